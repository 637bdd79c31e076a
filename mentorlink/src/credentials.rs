//! Bearer credentials for the transport handshake.

use std::time::{SystemTime, UNIX_EPOCH};

/// Synchronous source of the bearer token.
///
/// Returning `None` is a precondition failure: the controller will not open a
/// transport and reports a missing credential instead.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;
}

impl<F> TokenProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn token(&self) -> Option<String> {
        self()
    }
}

/// A bearer token with an optional expiry.
#[derive(Debug, Clone)]
pub struct Credential {
    /// JWT access token.
    pub token: String,
    /// Token expiration time (Unix timestamp in seconds).
    pub expires_at: Option<i64>,
}

impl Credential {
    /// A token that never expires on the client side.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Check if the token has expired.
    pub fn is_expired(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        self.expires_at.is_some_and(|at| now >= at)
    }
}

impl TokenProvider for Credential {
    fn token(&self) -> Option<String> {
        if self.is_expired() || self.token.is_empty() {
            None
        } else {
            Some(self.token.clone())
        }
    }
}

/// Provider that never has a token.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCredential;

impl TokenProvider for NoCredential {
    fn token(&self) -> Option<String> {
        None
    }
}
