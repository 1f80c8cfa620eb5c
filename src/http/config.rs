use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

/// Bounds every dispatched request, the refresh call included.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Checked in order when no proxy is given explicitly.
const PROXY_ENV_NAMES: [&str; 4] = ["HTTPS_PROXY", "https_proxy", "HTTP_PROXY", "http_proxy"];

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub(crate) timeout: Duration,
    pub(crate) conn_timeout: Duration,
    pub(crate) proxy: ProxyConfig,
}

impl HttpConfig {
    pub fn new(timeout: Duration, conn_timeout: Duration, proxy: ProxyConfig) -> Self {
        Self {
            timeout,
            conn_timeout,
            proxy,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn proxy(&self) -> &ProxyConfig {
        &self.proxy
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_REQUEST_TIMEOUT,
            conn_timeout: DEFAULT_CONNECT_TIMEOUT,
            proxy: ProxyConfig::default(),
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ProxyError {
    #[error("invalid proxy url `{0}`: {1}")]
    InvalidUrl(String, url::ParseError),
    #[error("proxy url `{0}` has no host")]
    MissingHost(String),
}

/// Outbound proxy and the extra CA roots needed to talk through it.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProxyConfig {
    url: Option<Url>,
    ca_bundle_dir: Option<PathBuf>,
    ca_bundle_file: Option<PathBuf>,
}

impl ProxyConfig {
    pub fn new(
        url: Option<&str>,
        ca_bundle_dir: Option<PathBuf>,
        ca_bundle_file: Option<PathBuf>,
    ) -> Result<Self, ProxyError> {
        Ok(Self {
            url: url.map(parse_proxy_url).transpose()?,
            ca_bundle_dir,
            ca_bundle_file,
        })
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn has_url(&self) -> bool {
        self.url.is_some()
    }

    /// Directory whose `.pem` files are all trusted.
    pub fn ca_bundle_dir(&self) -> Option<&Path> {
        self.ca_bundle_dir.as_deref()
    }

    pub fn ca_bundle_file(&self) -> Option<&Path> {
        self.ca_bundle_file.as_deref()
    }

    /// Falls back to the proxy environment variables when no url was given.
    pub fn or_env_proxy(self) -> Result<Self, ProxyError> {
        self.or_proxy_from(|name| env::var(name).ok())
    }

    fn or_proxy_from<F>(self, lookup: F) -> Result<Self, ProxyError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.url.is_some() {
            return Ok(self);
        }
        let Some(raw) = PROXY_ENV_NAMES
            .into_iter()
            .filter_map(|name| lookup(name))
            .find(|value| !value.is_empty())
        else {
            return Ok(self);
        };
        Ok(Self {
            url: Some(parse_proxy_url(&raw)?),
            ..self
        })
    }
}

// `host:port` parses as a url with a `host` scheme, so a missing host is rejected explicitly.
fn parse_proxy_url(raw: &str) -> Result<Url, ProxyError> {
    let url = Url::parse(raw).map_err(|err| ProxyError::InvalidUrl(raw.to_string(), err))?;
    if url.host().is_none() {
        return Err(ProxyError::MissingHost(raw.to_string()));
    }
    Ok(url)
}
