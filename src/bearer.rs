use http::Request;
use http::header::{AUTHORIZATION, HeaderValue};
use tracing::warn;

use crate::credentials::CredentialStore;
use crate::token::Token;

/// Attaches `token` as a bearer credential, replacing any previous `Authorization` header.
/// Without a token the request is left as is and goes out unauthenticated.
pub fn attach_bearer(mut request: Request<Vec<u8>>, token: Option<&Token>) -> Request<Vec<u8>> {
    let Some(token) = token else {
        return request;
    };
    match HeaderValue::try_from(token.bearer()) {
        Ok(mut value) => {
            value.set_sensitive(true);
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        Err(e) => warn!("access token is not a valid header value, sending unauthenticated: {e}"),
    }
    request
}

/// Attaches whatever access credential `store` currently holds.
pub fn authorize<S>(request: Request<Vec<u8>>, store: &S) -> Request<Vec<u8>>
where
    S: CredentialStore + ?Sized,
{
    attach_bearer(request, store.access_token().as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{CredentialPair, InMemoryCredentialStore};

    fn request() -> Request<Vec<u8>> {
        Request::get("https://api.example.com/albums")
            .body(Vec::new())
            .unwrap()
    }

    #[test]
    fn attaches_current_access_token() {
        let store = InMemoryCredentialStore::with_pair(CredentialPair::new("A1", "R1"));

        let request = authorize(request(), &store);

        assert_eq!(request.headers().get(AUTHORIZATION).unwrap(), "Bearer A1");
        assert!(request.headers().get(AUTHORIZATION).unwrap().is_sensitive());
    }

    #[test]
    fn empty_store_sends_unauthenticated() {
        let store = InMemoryCredentialStore::default();

        let request = authorize(request(), &store);

        assert!(request.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn replaces_stale_authorization() {
        let stale = attach_bearer(request(), Some(&Token::from("A1")));

        let request = attach_bearer(stale, Some(&Token::from("A2")));

        let values: Vec<_> = request.headers().get_all(AUTHORIZATION).iter().collect();
        assert_eq!(values, vec!["Bearer A2"]);
    }

    #[test]
    fn invalid_token_is_skipped() {
        let request = attach_bearer(request(), Some(&Token::from("bad\ntoken")));

        assert!(request.headers().get(AUTHORIZATION).is_none());
    }
}
