//! Session and sign-in types

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Authenticated session owned by the token manager
///
/// Persisted as JSON on every mutation. `Debug` redacts both tokens.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at_epoch_millis: i64,
    pub user_id: String,
}

impl Session {
    /// Whether the access token may still be used at `now_millis`
    ///
    /// A token is usable while `now < expires_at - skew`.
    pub fn is_valid_at(&self, now_millis: i64, skew: Duration) -> bool {
        let skew_ms = i64::try_from(skew.as_millis()).unwrap_or(i64::MAX);
        now_millis < self.expires_at_epoch_millis.saturating_sub(skew_ms)
    }

    /// Milliseconds until hard expiry (negative once expired)
    pub fn remaining_millis(&self, now_millis: i64) -> i64 {
        self.expires_at_epoch_millis.saturating_sub(now_millis)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[redacted]")
            .field("refresh_token", &"[redacted]")
            .field("expires_at_epoch_millis", &self.expires_at_epoch_millis)
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Username/password pair submitted to the login endpoint
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: password.into() }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .finish()
    }
}

/// Authentication state observed by UI code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AuthState {
    SignedOut,
    SignedIn { user_id: String },
    /// A request failed because the session expired or is missing
    SignInRequired,
}
