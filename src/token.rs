use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Opaque credential issued by the API. Its real expiry is only known server-side.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(transparent)]
pub struct Token(String);

/// Authorization scheme the API expects the access token under.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TokenType {
    Bearer,
}

/// A token as persisted by a credential store, with the instant the client stops using it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ExpiringToken {
    value: Token,
    expires_at: DateTime<Utc>,
}

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Token(value.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Value for the `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("{} {}", TokenType::Bearer, self.0)
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Token::new(value)
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Token(value)
    }
}

// Tokens end up in logs through error and state dumps, never print them.
impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(<redacted>)")
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenType::Bearer => write!(f, "Bearer"),
        }
    }
}

impl ExpiringToken {
    pub fn new(value: Token, expires_at: DateTime<Utc>) -> Self {
        ExpiringToken { value, expires_at }
    }

    /// Stamps `value` with an expiry `lifetime` from now. Lifetimes too large to represent
    /// never expire.
    pub fn with_lifetime(value: Token, lifetime: TimeDelta) -> Self {
        let expires_at = Utc::now()
            .checked_add_signed(lifetime)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        ExpiringToken::new(value, expires_at)
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.lt(&Utc::now())
    }

    pub fn value(&self) -> &Token {
        &self.value
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Returns the token only while it has not expired.
    pub fn into_live(self) -> Option<Token> {
        (!self.is_expired()).then_some(self.value)
    }
}
