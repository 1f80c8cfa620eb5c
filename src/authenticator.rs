use http::header::CONTENT_TYPE;
use http::{Method, Request, Uri};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::credentials::CredentialPair;
use crate::http_client::{HttpClient, HttpClientError};
use crate::token::Token;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthenticateError {
    #[error("unable to serialize request: `{0}`")]
    SerializeError(String),
    #[error("unable to deserialize token: `{0}`")]
    DeserializeError(String),
    #[error("refresh endpoint error: Status code: `{0}`, Body: `{1}`")]
    HttpResponseError(u16, String),
    #[error("http transport error: `{0}`")]
    HttpTransportError(String),
}

impl From<HttpClientError> for AuthenticateError {
    fn from(value: HttpClientError) -> Self {
        match value {
            HttpClientError::UnsuccessfulResponse(code, body) => {
                AuthenticateError::HttpResponseError(code, body)
            }
            err @ (HttpClientError::TransportError(_) | HttpClientError::Timeout(_)) => {
                AuthenticateError::HttpTransportError(err.to_string())
            }
            HttpClientError::InvalidResponse(msg) => AuthenticateError::DeserializeError(msg),
        }
    }
}

/// Exchanges a refresh credential for a new credential pair.
pub trait Authenticator {
    fn authenticate(&self, req: RefreshRequest) -> Result<RefreshResponse, AuthenticateError>;
}

// Accept closures as Authenticator implementations
impl<F> Authenticator for F
where
    F: Fn(RefreshRequest) -> Result<RefreshResponse, AuthenticateError>,
{
    fn authenticate(&self, req: RefreshRequest) -> Result<RefreshResponse, AuthenticateError> {
        self(req)
    }
}

/// Calls the API refresh endpoint. The call is deliberately unauthenticated: the refresh
/// credential travels in the body and no `Authorization` header is attached.
#[derive(Debug, Clone)]
pub struct HttpAuthenticator<C> {
    /// HTTP client
    http_client: C,
    /// Refresh endpoint, `<base>/auth/refresh`
    uri: Uri,
}

impl<C> HttpAuthenticator<C> {
    pub fn new(http_client: C, uri: Uri) -> Self {
        Self { http_client, uri }
    }
}

impl<C> Authenticator for HttpAuthenticator<C>
where
    C: HttpClient,
{
    /// Executes a POST request to the refresh endpoint with the `RefreshRequest` as a body.
    fn authenticate(&self, req: RefreshRequest) -> Result<RefreshResponse, AuthenticateError> {
        let serialized_req =
            serde_json::to_vec(&req).map_err(|e| AuthenticateError::SerializeError(e.to_string()))?;

        let request = Request::builder()
            .method(Method::POST)
            .uri(self.uri.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(serialized_req)
            .map_err(|e| AuthenticateError::SerializeError(e.to_string()))?;

        debug!(uri = %self.uri, "requesting credential refresh");
        let response = self.http_client.send(request)?;

        serde_json::from_slice(response.body())
            .map_err(|e| AuthenticateError::DeserializeError(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: Token,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RefreshResponse {
    pub access_token: Token,
    pub refresh_token: Token,
}

impl From<RefreshResponse> for CredentialPair {
    fn from(response: RefreshResponse) -> Self {
        CredentialPair {
            access: response.access_token,
            refresh: response.refresh_token,
        }
    }
}
