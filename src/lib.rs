pub mod authenticator;
pub mod bearer;
pub mod classifier;
pub mod client;
pub mod coordinator;
pub mod credentials;
pub mod descriptor;
pub mod endpoints;
pub mod http;
pub mod http_client;
pub mod parameters;
pub mod token;

pub use client::{ApiClient, AuthenticatedClient, RequestError};
pub use coordinator::{LogoutHandler, RefreshError};
pub use credentials::{CredentialPair, CredentialStore};
