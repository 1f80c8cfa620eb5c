use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::{Args, Error, Subcommand, ValueEnum};
use http::Method;
use serde::Serialize;

use crate::credentials::StoredCredentials;
use crate::http::config::{DEFAULT_CONNECT_TIMEOUT, HttpConfig, ProxyConfig};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api/";
const CREDENTIALS_DIR: &str = "family-api";
const CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stores the credential pair issued by the sign-in flow.
    SignIn {
        /// Short-lived bearer token authorizing individual requests
        #[arg(long)]
        access_token: String,

        /// Long-lived token exchanged for a new pair when the access token expires
        #[arg(long)]
        refresh_token: String,
    },
    /// Forgets the stored credentials.
    SignOut,
    /// Sends an authenticated request and prints the response body.
    Request {
        /// HTTP method
        #[arg(long, short, default_value = "GET")]
        method: String,

        /// Resource path, relative to the base url (e.g. /albums)
        #[arg(long, short)]
        path: String,

        /// JSON body
        #[arg(long, short)]
        body: Option<String>,

        /// Select how the response body is printed
        #[arg(long, default_value = "Plain")]
        output_format: OutputFormat,
    },
    /// Reports which credentials are stored, without revealing them.
    Status {
        /// Select how the status is printed
        #[arg(long, default_value = "Plain")]
        output_format: OutputFormat,
    },
}

#[derive(ValueEnum, Clone, Debug, PartialEq)]
pub enum OutputFormat {
    /// Raw output
    #[value(name = "Plain")]
    Plain,
    /// Pretty-printed json
    #[value(name = "Json")]
    Json,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Base url of the family albums API
    #[arg(long, global = true, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// File holding the credentials. Defaults to the user configuration directory.
    #[arg(long, global = true)]
    pub credentials_file: Option<PathBuf>,

    /// Timeout in seconds bounding every request, credential refresh included
    #[arg(long, global = true, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Proxy url: <protocol>://<user>:<password>@<host>:<port>.
    /// Falls back to HTTPS_PROXY/HTTP_PROXY.
    #[arg(long, global = true)]
    pub proxy_url: Option<String>,

    /// Directory with extra CA certificates (`.pem`) to trust
    #[arg(long, global = true)]
    pub proxy_ca_dir: Option<PathBuf>,

    /// File with extra CA certificates to trust
    #[arg(long, global = true)]
    pub proxy_ca_file: Option<PathBuf>,

    /// Log filter, e.g. `warn` or `family_api_client=debug`
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,
}

/// Credential presence as reported by `status`.
#[derive(Serialize, Debug, PartialEq)]
pub struct CredentialStatus {
    pub access_token: bool,
    pub refresh_token: bool,
}

impl From<&StoredCredentials> for CredentialStatus {
    fn from(credentials: &StoredCredentials) -> Self {
        Self {
            access_token: credentials.access().is_some(),
            refresh_token: credentials.refresh().is_some(),
        }
    }
}

pub fn build_http_config(args: &GlobalArgs) -> Result<HttpConfig, Error> {
    let proxy = ProxyConfig::new(
        args.proxy_url.as_deref(),
        args.proxy_ca_dir.clone(),
        args.proxy_ca_file.clone(),
    )
    .and_then(ProxyConfig::or_env_proxy)
    .map_err(|e| Error::raw(ErrorKind::InvalidValue, e.to_string()))?;

    let timeout = Duration::from_secs(args.timeout_secs);
    Ok(HttpConfig::new(
        timeout,
        timeout.min(DEFAULT_CONNECT_TIMEOUT),
        proxy,
    ))
}

pub fn select_credentials_path(credentials_file: Option<PathBuf>) -> PathBuf {
    credentials_file.unwrap_or_else(|| {
        dirs::config_dir()
            .unwrap_or_default()
            .join(CREDENTIALS_DIR)
            .join(CREDENTIALS_FILE)
    })
}

pub fn select_method(method: &str) -> Result<Method, Error> {
    Method::from_str(&method.to_uppercase()).map_err(|e| {
        Error::raw(
            ErrorKind::InvalidValue,
            format!("Invalid method `{method}`: {e}"),
        )
    })
}

pub fn parse_json_body(body: &str) -> Result<serde_json::Value, Error> {
    serde_json::from_str(body)
        .map_err(|e| Error::raw(ErrorKind::InvalidValue, format!("Invalid JSON body: {e}")))
}
