//! Storage for the access/refresh credential pair, written and cleared as a whole.
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::token::{ExpiringToken, Token};

/// Client-side lifetime of a freshly stored access credential.
pub const DEFAULT_ACCESS_LIFETIME: TimeDelta = TimeDelta::hours(1);
/// Client-side lifetime of a freshly stored refresh credential.
pub const DEFAULT_REFRESH_LIFETIME: TimeDelta = TimeDelta::days(7);

#[derive(Clone, Debug, PartialEq)]
pub struct CredentialPair {
    pub access: Token,
    pub refresh: Token,
}

impl CredentialPair {
    pub fn new(access: impl Into<Token>, refresh: impl Into<Token>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CredentialLifetimes {
    pub access: TimeDelta,
    pub refresh: TimeDelta,
}

impl Default for CredentialLifetimes {
    fn default() -> Self {
        Self {
            access: DEFAULT_ACCESS_LIFETIME,
            refresh: DEFAULT_REFRESH_LIFETIME,
        }
    }
}

/// The two named entries as they are persisted.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct StoredCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<ExpiringToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<ExpiringToken>,
}

impl StoredCredentials {
    pub fn issue(pair: CredentialPair, lifetimes: &CredentialLifetimes) -> Self {
        Self {
            access_token: Some(ExpiringToken::with_lifetime(pair.access, lifetimes.access)),
            refresh_token: Some(ExpiringToken::with_lifetime(
                pair.refresh,
                lifetimes.refresh,
            )),
        }
    }

    pub fn access(&self) -> Option<Token> {
        self.access_token.clone().and_then(ExpiringToken::into_live)
    }

    pub fn refresh(&self) -> Option<Token> {
        self.refresh_token.clone().and_then(ExpiringToken::into_live)
    }

    /// Both credentials, only when both are still live.
    pub fn pair(&self) -> Option<CredentialPair> {
        Some(CredentialPair {
            access: self.access()?,
            refresh: self.refresh()?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.access().is_none() && self.refresh().is_none()
    }
}

/// Holds the current credential pair. Implementations must be safe to share between threads.
pub trait CredentialStore {
    /// Current contents; expired entries are reported as absent.
    fn load(&self) -> StoredCredentials;

    /// Replaces both credentials at once.
    fn set(&self, pair: CredentialPair);

    /// Removes both credentials at once.
    fn clear(&self);

    fn get(&self) -> Option<CredentialPair> {
        self.load().pair()
    }

    fn access_token(&self) -> Option<Token> {
        self.load().access()
    }

    fn refresh_token(&self) -> Option<Token> {
        self.load().refresh()
    }
}

impl<S> CredentialStore for Arc<S>
where
    S: CredentialStore + ?Sized,
{
    fn load(&self) -> StoredCredentials {
        (**self).load()
    }

    fn set(&self, pair: CredentialPair) {
        (**self).set(pair)
    }

    fn clear(&self) {
        (**self).clear()
    }
}

/// Store living only for the lifetime of the process.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    credentials: Mutex<StoredCredentials>,
    lifetimes: CredentialLifetimes,
}

impl InMemoryCredentialStore {
    pub fn new(lifetimes: CredentialLifetimes) -> Self {
        Self {
            credentials: Mutex::default(),
            lifetimes,
        }
    }

    pub fn with_pair(pair: CredentialPair) -> Self {
        let store = Self::default();
        store.set(pair);
        store
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn load(&self) -> StoredCredentials {
        self.credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set(&self, pair: CredentialPair) {
        let issued = StoredCredentials::issue(pair, &self.lifetimes);
        *self
            .credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = issued;
    }

    fn clear(&self) {
        *self
            .credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = StoredCredentials::default();
    }
}

/// Store persisting the pair as a JSON document, so that it survives restarts.
///
/// Persistence failures are logged and otherwise ignored: an unreadable file is an empty store.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    lifetimes: CredentialLifetimes,
    // Serializes writers of this process; readers always see a whole file thanks to the rename.
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>, lifetimes: CredentialLifetimes) -> Self {
        Self {
            path: path.into(),
            lifetimes,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    fn persist(&self, credentials: &StoredCredentials) -> Result<(), String> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        let content = serde_json::to_vec_pretty(credentials).map_err(|e| e.to_string())?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, content).map_err(|e| e.to_string())?;
        fs::rename(&tmp_path, &self.path).map_err(|e| e.to_string())
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> StoredCredentials {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return StoredCredentials::default(),
            Err(e) => {
                warn!(path = %self.path.display(), "reading credentials: {e}");
                return StoredCredentials::default();
            }
        };
        serde_json::from_slice(&content).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), "decoding credentials: {e}");
            StoredCredentials::default()
        })
    }

    fn set(&self, pair: CredentialPair) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let issued = StoredCredentials::issue(pair, &self.lifetimes);
        match self.persist(&issued) {
            Ok(()) => debug!(path = %self.path.display(), "credentials persisted"),
            Err(e) => warn!(path = %self.path.display(), "persisting credentials: {e}"),
        }
    }

    fn clear(&self) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "credentials removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), "removing credentials: {e}"),
        }
    }
}
