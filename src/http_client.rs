use http::{Request, Response, StatusCode};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum HttpClientError {
    /// The request never produced a response (connection, DNS, TLS...).
    #[error("HTTP Transport error: `{0}`")]
    TransportError(String),
    /// No response arrived within the configured request timeout.
    #[error("request timed out: `{0}`")]
    Timeout(String),
    /// Unsuccessful HTTP response, carrying its status code and body.
    #[error("Status code: `{0}` Body: `{1}`")]
    UnsuccessfulResponse(u16, String),
    /// Represents an unexpected response.
    #[error("invalid http response: `{0}`")]
    InvalidResponse(String),
}

impl HttpClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            HttpClientError::UnsuccessfulResponse(status, _) => StatusCode::from_u16(*status).ok(),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }
}

/// A synchronous trait that sends requests over the wire. This is the only I/O seam of the crate.
///
/// Implementations return `Ok` only for successful (2xx) responses; any other status is reported
/// as [`HttpClientError::UnsuccessfulResponse`].
pub trait HttpClient {
    /// Sends a request. The method and url are defined inside the Request.
    fn send(&self, req: Request<Vec<u8>>) -> Result<Response<Vec<u8>>, HttpClientError>;
}

// Accept closures as HttpClient implementations
impl<F> HttpClient for F
where
    F: Fn(Request<Vec<u8>>) -> Result<Response<Vec<u8>>, HttpClientError>,
{
    fn send(&self, req: Request<Vec<u8>>) -> Result<Response<Vec<u8>>, HttpClientError> {
        self(req)
    }
}
