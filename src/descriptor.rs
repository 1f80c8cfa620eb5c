use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method, Request, Uri};
use serde::Serialize;
use uuid::Uuid;

/// Everything needed to (re)transmit a request, independent of its execution.
///
/// A descriptor outlives its first transmission so that it can be replayed once after a
/// credential refresh. The `retried` flag records that replay.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    id: Uuid,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Vec<u8>,
    retried: bool,
}

impl RequestDescriptor {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            id: Uuid::now_v7(),
            method,
            uri,
            headers: HeaderMap::new(),
            body: Vec::new(),
            retried: false,
        }
    }

    pub fn get(uri: Uri) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Sets a JSON body and the matching content type.
    pub fn with_json<T: Serialize + ?Sized>(self, payload: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(payload)?;
        Ok(self
            .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .with_body(body))
    }

    /// Identifier shared by the original transmission and its replay, for log correlation.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn is_retried(&self) -> bool {
        self.retried
    }

    /// Flags the descriptor as replayed. Returns `false` if it had already been flagged.
    pub fn mark_retried(&mut self) -> bool {
        !std::mem::replace(&mut self.retried, true)
    }

    /// Builds a transmittable request. Credentials are attached separately, just before sending.
    pub fn to_request(&self) -> Result<Request<Vec<u8>>, http::Error> {
        let mut builder = Request::builder()
            .method(self.method.clone())
            .uri(self.uri.clone());
        if let Some(headers) = builder.headers_mut() {
            headers.extend(self.headers.clone());
        }
        builder.body(self.body.clone())
    }
}
