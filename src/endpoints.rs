use http::Uri;
use thiserror::Error;
use url::Url;

/// Path of the credential refresh endpoint, relative to the API base url.
pub const REFRESH_PATH: &str = "auth/refresh";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EndpointError {
    #[error("invalid base url `{0}`: `{1}`")]
    InvalidBaseUrl(String, String),
    #[error("invalid request path `{0}`: `{1}`")]
    InvalidPath(String, String),
}

/// Where the API lives. Resource paths and the refresh endpoint are resolved against the base
/// url, keeping any path prefix it carries (`https://host/api/` + `albums`).
#[derive(Debug, Clone, PartialEq)]
pub struct ApiEndpoints {
    base_url: Url,
}

impl TryFrom<&str> for ApiEndpoints {
    type Error = EndpointError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let base_url = Url::parse(value)
            .map_err(|e| EndpointError::InvalidBaseUrl(value.to_string(), e.to_string()))?;
        Self::new(base_url)
    }
}

impl ApiEndpoints {
    pub fn new(mut base_url: Url) -> Result<Self, EndpointError> {
        if base_url.cannot_be_a_base() {
            return Err(EndpointError::InvalidBaseUrl(
                base_url.to_string(),
                "url cannot be a base".to_string(),
            ));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Get the URI of the credential refresh endpoint.
    pub fn refresh_endpoint(&self) -> Result<Uri, EndpointError> {
        self.resolve(REFRESH_PATH)
    }

    /// Resolves a resource path such as `/albums/7` against the base url.
    pub fn resolve(&self, path: &str) -> Result<Uri, EndpointError> {
        let url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| EndpointError::InvalidPath(path.to_string(), e.to_string()))?;
        url.as_str()
            .parse::<Uri>()
            .map_err(|e| EndpointError::InvalidPath(path.to_string(), e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("https://api.example.com", "/albums", "https://api.example.com/albums")]
    #[case("https://api.example.com/", "albums/7", "https://api.example.com/albums/7")]
    #[case("https://api.example.com/v1", "/kids?page=2", "https://api.example.com/v1/kids?page=2")]
    #[case("http://localhost:8080/api/", "/photos", "http://localhost:8080/api/photos")]
    fn resolves_paths(#[case] base: &str, #[case] path: &str, #[case] expected: &str) {
        let endpoints = ApiEndpoints::try_from(base).unwrap();
        assert_eq!(endpoints.resolve(path).unwrap().to_string(), expected);
    }

    #[rstest]
    #[case("https://api.example.com", "https://api.example.com/auth/refresh")]
    #[case("https://api.example.com/v1/", "https://api.example.com/v1/auth/refresh")]
    fn refresh_endpoint(#[case] base: &str, #[case] expected: &str) {
        let endpoints = ApiEndpoints::try_from(base).unwrap();
        assert_eq!(endpoints.refresh_endpoint().unwrap().to_string(), expected);
    }

    #[test]
    fn rejects_invalid_base() {
        assert_matches!(
            ApiEndpoints::try_from("not a url"),
            Err(EndpointError::InvalidBaseUrl(..))
        );
        assert_matches!(
            ApiEndpoints::try_from("mailto:family@example.com"),
            Err(EndpointError::InvalidBaseUrl(..))
        );
    }
}
