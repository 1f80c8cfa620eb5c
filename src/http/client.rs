use std::fs;
use std::path::Path;

use http::{Request, Response};
use reqwest::blocking::{Client, Response as BlockingResponse};
use reqwest::{Certificate, Proxy};
use tracing::{debug, trace};

use crate::http::config::{HttpConfig, ProxyConfig};
use crate::http_client::{HttpClient as DispatchClient, HttpClientError};

/// Request dispatcher backed by a blocking reqwest client.
///
/// Cloning is cheap and clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Builds a reqwest blocking client according to the provided configuration.
    pub fn new(config: HttpConfig) -> Result<Self, HttpBuildError> {
        let mut builder = Client::builder()
            .use_rustls_tls()
            .tls_built_in_native_certs(true)
            .timeout(config.timeout)
            .connect_timeout(config.conn_timeout);

        builder = with_proxy_config(builder, &config.proxy)?;

        let client = builder
            .build()
            .map_err(|err| HttpBuildError::ClientBuilder(err.to_string()))?;

        Ok(Self { client })
    }

    fn send(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>, HttpClientError> {
        let (parts, body) = request.into_parts();
        trace!(method = %parts.method, uri = %parts.uri, "dispatching request");

        let res = self
            .client
            .request(parts.method, parts.uri.to_string().as_str())
            .headers(parts.headers)
            .body(body)
            .send()
            .map_err(|err| {
                if err.is_timeout() {
                    HttpClientError::Timeout(err.to_string())
                } else {
                    HttpClientError::TransportError(err.to_string())
                }
            })?;

        try_build_response(res)
    }
}

impl DispatchClient for HttpClient {
    fn send(&self, req: Request<Vec<u8>>) -> Result<Response<Vec<u8>>, HttpClientError> {
        self.send(req)
    }
}

fn with_proxy_config(
    builder: reqwest::blocking::ClientBuilder,
    proxy_config: &ProxyConfig,
) -> Result<reqwest::blocking::ClientBuilder, HttpBuildError> {
    let mut builder = builder;
    if let Some(url) = proxy_config.url() {
        debug!(proxy = %url, "routing requests through proxy");
        let proxy = Proxy::all(url.as_str())
            .map_err(|err| HttpBuildError::InvalidProxy(err.to_string()))?;
        builder = builder.proxy(proxy);
    }
    for certificate in ca_certificates(proxy_config)? {
        builder = builder.add_root_certificate(certificate);
    }
    Ok(builder)
}

/// Collects the extra root certificates configured for the proxy.
fn ca_certificates(proxy_config: &ProxyConfig) -> Result<Vec<Certificate>, HttpBuildError> {
    let mut certificates = Vec::new();

    if let Some(file) = proxy_config.ca_bundle_file() {
        certificates.extend(read_pem(file)?);
    }

    if let Some(dir) = proxy_config.ca_bundle_dir() {
        let entries = fs::read_dir(dir).map_err(|err| {
            HttpBuildError::CertificateBundle(dir.display().to_string(), err.to_string())
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "pem") {
                certificates.extend(read_pem(&path)?);
            }
        }
    }

    Ok(certificates)
}

fn read_pem(path: &Path) -> Result<Vec<Certificate>, HttpBuildError> {
    let content = fs::read(path).map_err(|err| {
        HttpBuildError::CertificateBundle(path.display().to_string(), err.to_string())
    })?;
    debug!(path = %path.display(), "loading CA certificates");
    Certificate::from_pem_bundle(&content).map_err(|err| {
        HttpBuildError::CertificateBundle(path.display().to_string(), err.to_string())
    })
}

/// Converts a reqwest response into an [`http::Response`], turning non-2xx statuses into
/// [`HttpClientError::UnsuccessfulResponse`].
fn try_build_response(res: BlockingResponse) -> Result<Response<Vec<u8>>, HttpClientError> {
    let status = res.status();
    let version = res.version();
    let headers = res.headers().clone();

    let body: Vec<u8> = res
        .bytes()
        .map_err(|err| {
            if err.is_timeout() {
                HttpClientError::Timeout(err.to_string())
            } else {
                HttpClientError::InvalidResponse(err.to_string())
            }
        })?
        .into();

    if !status.is_success() {
        return Err(HttpClientError::UnsuccessfulResponse(
            status.as_u16(),
            String::from_utf8_lossy(&body).to_string(),
        ));
    }

    let mut response_builder = Response::builder().status(status).version(version);
    if let Some(response_headers) = response_builder.headers_mut() {
        response_headers.extend(headers);
    }

    response_builder
        .body(body)
        .map_err(|err| HttpClientError::InvalidResponse(err.to_string()))
}

#[derive(thiserror::Error, Debug)]
pub enum HttpBuildError {
    #[error("could not build the http client: {0}")]
    ClientBuilder(String),
    #[error("invalid proxy: {0}")]
    InvalidProxy(String),
    #[error("could not load CA certificates from `{0}`: {1}")]
    CertificateBundle(String, String),
}
