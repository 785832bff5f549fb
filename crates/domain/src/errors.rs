//! Error taxonomy for the session core
//!
//! `SessionError` is `Clone` because a single failure is often delivered to
//! many waiters at once (a shared refresh, a coalesced GET).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for tether operations
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum SessionError {
    /// No response was received
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with a non-success status
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// The refresh token was rejected; the session is gone
    #[error("Session expired, sign in again")]
    AuthExpired,

    /// No session is present
    #[error("Not authenticated")]
    Unauthenticated,

    /// Retries exhausted and no cached fallback was available
    #[error("Service unavailable after {attempts} attempts: {reason}")]
    ServiceUnavailable { attempts: u32, reason: String },

    /// A realtime send was attempted while not connected
    #[error("Realtime channel is not connected")]
    NotConnected,

    /// The realtime channel stopped reconnecting
    #[error("Reconnect gave up after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,

    /// The realtime channel was closed by `disconnect()`
    #[error("Realtime channel is closed")]
    ChannelClosed,

    #[error("Credential storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Whether the request pipeline should retry after this error
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::Network(_) | SessionError::Timeout(_) => true,
            SessionError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Whether the user has to sign in again
    ///
    /// This is the single "please sign in again" condition exposed to UI code.
    pub fn requires_sign_in(&self) -> bool {
        matches!(self, SessionError::AuthExpired | SessionError::Unauthenticated)
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            SessionError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for SessionError {
    fn from(err: url::ParseError) -> Self {
        SessionError::Config(format!("invalid url: {err}"))
    }
}

/// Result type alias for tether operations
pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_failures_are_retryable() {
        assert!(SessionError::Network("reset".into()).is_retryable());
        assert!(SessionError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(SessionError::Api { status: 503, message: "down".into() }.is_retryable());

        assert!(!SessionError::Api { status: 404, message: "missing".into() }.is_retryable());
        assert!(!SessionError::AuthExpired.is_retryable());
    }

    #[test]
    fn auth_failures_map_to_sign_in() {
        assert!(SessionError::AuthExpired.requires_sign_in());
        assert!(SessionError::Unauthenticated.requires_sign_in());
        assert!(!SessionError::NotConnected.requires_sign_in());
        assert!(!SessionError::Api { status: 403, message: "forbidden".into() }.requires_sign_in());
    }

    #[test]
    fn errors_serialize_with_type_tag() {
        let err = SessionError::Api { status: 422, message: "bad title".into() };
        let json = serde_json::to_value(&err).expect("serialize");

        assert_eq!(json["type"], "Api");
        assert_eq!(json["details"]["status"], 422);
        assert_eq!(err.status(), Some(422));
    }
}
