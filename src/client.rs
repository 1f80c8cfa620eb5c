use http::{Method, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::authenticator::{Authenticator, HttpAuthenticator};
use crate::bearer::{attach_bearer, authorize};
use crate::classifier::{Classification, classify};
use crate::coordinator::{LogoutHandler, RefreshCoordinator, RefreshError};
use crate::credentials::{CredentialPair, CredentialStore};
use crate::descriptor::RequestDescriptor;
use crate::endpoints::{ApiEndpoints, EndpointError};
use crate::http::client::{HttpBuildError, HttpClient as ReqwestHttpClient};
use crate::http::config::HttpConfig;
use crate::http_client::{HttpClient, HttpClientError};
use crate::token::Token;

#[derive(Error, Debug)]
pub enum RequestError {
    /// The request failed and is not recoverable. The dispatcher error is passed on unchanged.
    #[error(transparent)]
    Http(#[from] HttpClientError),
    /// The session expired and could not be refreshed; credentials have been cleared.
    #[error("session expired: {0}")]
    Refresh(#[from] RefreshError),
    #[error("invalid request: `{0}`")]
    InvalidRequest(String),
}

impl From<EndpointError> for RequestError {
    fn from(err: EndpointError) -> Self {
        RequestError::InvalidRequest(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ClientBuildError {
    #[error(transparent)]
    Http(#[from] HttpBuildError),
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
}

/// Sends requests with credentials attached. Refreshes and replays stay invisible to callers.
pub struct AuthenticatedClient<C, S, A, L> {
    http_client: C,
    endpoints: ApiEndpoints,
    coordinator: RefreshCoordinator<S, A, L>,
}

/// Client wired with the reqwest dispatcher and the HTTP refresh endpoint.
pub type ApiClient<S, L> =
    AuthenticatedClient<ReqwestHttpClient, S, HttpAuthenticator<ReqwestHttpClient>, L>;

impl<S, L> ApiClient<S, L>
where
    S: CredentialStore,
    L: LogoutHandler,
{
    /// Builds a client whose requests and refresh calls share one connection pool and timeout.
    pub fn from_config(
        config: HttpConfig,
        endpoints: ApiEndpoints,
        store: S,
        logout_handler: L,
    ) -> Result<Self, ClientBuildError> {
        let http_client = ReqwestHttpClient::new(config)?;
        let authenticator =
            HttpAuthenticator::new(http_client.clone(), endpoints.refresh_endpoint()?);
        let coordinator = RefreshCoordinator::new(store, authenticator, logout_handler);
        Ok(AuthenticatedClient::new(http_client, endpoints, coordinator))
    }
}

impl<C, S, A, L> AuthenticatedClient<C, S, A, L>
where
    C: HttpClient,
    S: CredentialStore,
    A: Authenticator,
    L: LogoutHandler,
{
    pub fn new(
        http_client: C,
        endpoints: ApiEndpoints,
        coordinator: RefreshCoordinator<S, A, L>,
    ) -> Self {
        Self {
            http_client,
            endpoints,
            coordinator,
        }
    }

    pub fn endpoints(&self) -> &ApiEndpoints {
        &self.endpoints
    }

    pub fn coordinator(&self) -> &RefreshCoordinator<S, A, L> {
        &self.coordinator
    }

    /// Stores the pair issued by a successful sign-in.
    pub fn sign_in(&self, pair: CredentialPair) {
        self.coordinator.store().set(pair);
    }

    /// Forgets the current session. The logout handler is reserved for sessions that expire on
    /// their own and is not notified.
    pub fn sign_out(&self) {
        self.coordinator.store().clear();
    }

    /// Sends `descriptor` with the current access credential. A first unauthorized response
    /// triggers a credential refresh (shared with any concurrent request) and one replay.
    pub fn send(
        &self,
        mut descriptor: RequestDescriptor,
    ) -> Result<Response<Vec<u8>>, RequestError> {
        let request = authorize(self.build(&descriptor)?, self.coordinator.store());
        let outcome = self.http_client.send(request);

        match classify(&outcome, &descriptor) {
            Classification::Success | Classification::Fatal => return Ok(outcome?),
            Classification::RetryableAuthFailure => {}
        }

        debug!(
            request_id = %descriptor.id(),
            method = %descriptor.method(),
            uri = %descriptor.uri(),
            "unauthorized, recovering session"
        );
        let token = self.coordinator.recover(&mut descriptor)?;
        self.replay(&descriptor, &token)
    }

    pub fn get(&self, path: &str) -> Result<Response<Vec<u8>>, RequestError> {
        self.send(RequestDescriptor::get(self.endpoints.resolve(path)?))
    }

    pub fn delete(&self, path: &str) -> Result<Response<Vec<u8>>, RequestError> {
        self.send(RequestDescriptor::new(
            Method::DELETE,
            self.endpoints.resolve(path)?,
        ))
    }

    pub fn post_json<T>(&self, path: &str, payload: &T) -> Result<Response<Vec<u8>>, RequestError>
    where
        T: Serialize + ?Sized,
    {
        self.send_json(Method::POST, path, payload)
    }

    pub fn put_json<T>(&self, path: &str, payload: &T) -> Result<Response<Vec<u8>>, RequestError>
    where
        T: Serialize + ?Sized,
    {
        self.send_json(Method::PUT, path, payload)
    }

    fn send_json<T>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
    ) -> Result<Response<Vec<u8>>, RequestError>
    where
        T: Serialize + ?Sized,
    {
        let descriptor = RequestDescriptor::new(method, self.endpoints.resolve(path)?)
            .with_json(payload)
            .map_err(|e| RequestError::InvalidRequest(e.to_string()))?;
        self.send(descriptor)
    }

    // The descriptor is already marked as retried, so whatever this returns is final.
    fn replay(
        &self,
        descriptor: &RequestDescriptor,
        token: &Token,
    ) -> Result<Response<Vec<u8>>, RequestError> {
        debug!(request_id = %descriptor.id(), "replaying request with refreshed credentials");
        let request = attach_bearer(self.build(descriptor)?, Some(token));
        Ok(self.http_client.send(request)?)
    }

    fn build(
        &self,
        descriptor: &RequestDescriptor,
    ) -> Result<http::Request<Vec<u8>>, RequestError> {
        descriptor
            .to_request()
            .map_err(|e| RequestError::InvalidRequest(e.to_string()))
    }
}
