//! Port interfaces for credential persistence and the auth backend

use async_trait::async_trait;
use tether_domain::{Credentials, Result, Session};

/// Durable key-value storage for opaque secrets
///
/// Implementations only need per-key linearizability.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Read a value; `Ok(None)` when the key is absent
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value; deleting a missing key succeeds
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Authentication backend
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Exchange credentials for a new session
    async fn login(&self, credentials: &Credentials) -> Result<Session>;

    /// Exchange a refresh token for a new session
    ///
    /// A terminal rejection of the refresh token must be reported as
    /// `SessionError::AuthExpired`; anything else is treated as transient.
    async fn refresh(&self, refresh_token: &str) -> Result<Session>;
}
