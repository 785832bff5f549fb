//! Credential store backed by the system keyring
use async_trait::async_trait;
use keyring::{Entry, Error as KeyringError};
use tether_core::CredentialStore;
use tether_domain::constants::DEFAULT_KEYRING_SERVICE;
use tether_domain::{Result, SessionError};
use tracing::debug;

use crate::errors::InfraError;

/// Stores each key as a keyring entry under one service name
///
/// Keyring calls block, so they run on the blocking thread pool.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service: String,
}

impl KeyringCredentialStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self { service: service.into() }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    async fn with_entry<T, F>(&self, key: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Entry) -> std::result::Result<T, KeyringError> + Send + 'static,
    {
        let service = self.service.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Entry::new(&service, &key).and_then(op))
            .await
            .map_err(|err| SessionError::Internal(format!("keyring task failed: {err}")))?
            .map_err(|err| SessionError::from(InfraError::from(err)))
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new(DEFAULT_KEYRING_SERVICE)
    }
}

#[async_trait]
impl CredentialStore for KeyringCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_entry(key, |entry| match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(KeyringError::NoEntry) => Ok(None),
            Err(err) => Err(err),
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let value = value.to_string();
        self.with_entry(key, move |entry| entry.set_password(&value)).await?;
        debug!(service = %self.service, key, "credential stored");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.with_entry(key, |entry| match entry.delete_credential() {
            Ok(()) | Err(KeyringError::NoEntry) => Ok(()),
            Err(err) => Err(err),
        })
        .await
    }
}
