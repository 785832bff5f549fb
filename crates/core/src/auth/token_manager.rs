//! Token manager with single-flight refresh
//!
//! Manages the session lifecycle:
//! - Restore from the credential store on startup
//! - Hand out access tokens, refreshing inside the skew window
//! - Collapse concurrent refreshes into one backend call
//! - Persist every new session before it becomes visible

use std::sync::Arc;
use std::time::Duration;

use tether_common::{Clock, SingleFlight, SystemClock};
use tether_domain::constants::SESSION_CREDENTIAL_KEY;
use tether_domain::{ClientConfig, Credentials, Result, Session, SessionError};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use super::ports::{AuthApi, CredentialStore};

/// In-memory session plus a generation counter
///
/// The generation changes on login and invalidation, so a refresh that was
/// started against an older session can detect that it lost the race.
#[derive(Default)]
struct SessionSlot {
    session: Option<Session>,
    generation: u64,
}

struct TokenInner {
    store: Arc<dyn CredentialStore>,
    auth_api: Arc<dyn AuthApi>,
    clock: Arc<dyn Clock>,
    slot: RwLock<SessionSlot>,
    skew: Duration,
    timeout: Duration,
}

/// Owns the access/refresh token lifecycle of one session
///
/// At most one refresh runs at a time; concurrent callers await the same
/// outcome.
pub struct TokenManager {
    inner: Arc<TokenInner>,
    refresh_flight: SingleFlight<(), Result<Session>>,
}

impl TokenManager {
    /// Create a token manager using the skew and timeout from `config`
    pub fn new(
        config: &ClientConfig,
        store: Arc<dyn CredentialStore>,
        auth_api: Arc<dyn AuthApi>,
    ) -> Self {
        Self::with_clock(config, store, auth_api, Arc::new(SystemClock))
    }

    /// Create a token manager with an explicit clock
    pub fn with_clock(
        config: &ClientConfig,
        store: Arc<dyn CredentialStore>,
        auth_api: Arc<dyn AuthApi>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                store,
                auth_api,
                clock,
                slot: RwLock::new(SessionSlot::default()),
                skew: config.token_skew,
                timeout: config.request_timeout,
            }),
            refresh_flight: SingleFlight::new(),
        }
    }

    /// Restore a persisted session
    ///
    /// Should be called on startup. An unreadable blob is deleted and treated
    /// as signed out.
    ///
    /// # Errors
    /// Returns an error if the credential store fails (not if it is empty)
    pub async fn initialize(&self) -> Result<Option<Session>> {
        let mut slot = self.inner.slot.write().await;
        let Some(blob) = self.inner.store.get(SESSION_CREDENTIAL_KEY).await? else {
            debug!("no persisted session found");
            return Ok(None);
        };

        match serde_json::from_str::<Session>(&blob) {
            Ok(session) => {
                info!(user_id = %session.user_id, "restored persisted session");
                slot.generation += 1;
                slot.session = Some(session.clone());
                Ok(Some(session))
            }
            Err(err) => {
                warn!(error = %err, "discarding unreadable persisted session");
                self.inner.store.delete(SESSION_CREDENTIAL_KEY).await?;
                Ok(None)
            }
        }
    }

    /// Sign in and install the resulting session
    #[instrument(skip_all, fields(username = %credentials.username))]
    pub async fn login(&self, credentials: &Credentials) -> Result<Session> {
        let session = tokio::time::timeout(
            self.inner.timeout,
            self.inner.auth_api.login(credentials),
        )
        .await
        .map_err(|_| SessionError::Timeout(self.inner.timeout))??;

        let mut slot = self.inner.slot.write().await;
        self.inner.persist(&session).await?;
        slot.generation += 1;
        slot.session = Some(session.clone());

        info!(user_id = %session.user_id, "signed in");
        Ok(session)
    }

    /// Return a usable access token, refreshing if it is inside the skew window
    ///
    /// # Errors
    /// - `Unauthenticated` when there is no session
    /// - whatever [`TokenManager::refresh`] surfaces
    pub async fn valid_token(&self) -> Result<String> {
        let now = self.inner.clock.millis_since_epoch();
        {
            let slot = self.inner.slot.read().await;
            match slot.session.as_ref() {
                None => return Err(SessionError::Unauthenticated),
                Some(session) if session.is_valid_at(now, self.inner.skew) => {
                    return Ok(session.access_token.clone());
                }
                Some(session) => {
                    debug!(remaining_ms = session.remaining_millis(now), "access token needs refresh");
                }
            }
        }

        Ok(self.refresh().await?.access_token)
    }

    /// Refresh the session, joining a refresh already in flight
    ///
    /// On success the new session is persisted before it is returned. A
    /// terminal rejection invalidates the session and surfaces `AuthExpired`;
    /// network failures and timeouts leave the session in place.
    pub async fn refresh(&self) -> Result<Session> {
        let inner = Arc::clone(&self.inner);
        self.refresh_flight
            .run((), move || async move { inner.refresh_once().await })
            .await
            .map_err(|err| SessionError::Internal(err.to_string()))?
    }

    /// Refresh after the server rejected `rejected_token`
    ///
    /// If the session already carries a different token, a concurrent refresh
    /// has won and that token is returned without another backend call.
    pub async fn refresh_rejected(&self, rejected_token: &str) -> Result<String> {
        {
            let slot = self.inner.slot.read().await;
            match slot.session.as_ref() {
                None => return Err(SessionError::Unauthenticated),
                Some(session) if session.access_token != rejected_token => {
                    debug!("token already rotated by a concurrent refresh");
                    return Ok(session.access_token.clone());
                }
                Some(_) => {}
            }
        }

        Ok(self.refresh().await?.access_token)
    }

    /// Clear the session from memory and the credential store
    ///
    /// Subsequent [`TokenManager::valid_token`] calls fail with
    /// `Unauthenticated` until the next login. A refresh still in flight is
    /// discarded when it completes.
    pub async fn invalidate(&self) -> Result<()> {
        let mut slot = self.inner.slot.write().await;
        self.inner.clear(&mut slot).await
    }

    /// Current session, if any, without refreshing
    pub async fn current_session(&self) -> Option<Session> {
        self.inner.slot.read().await.session.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.inner.slot.read().await.session.is_some()
    }

    pub async fn user_id(&self) -> Option<String> {
        self.inner.slot.read().await.session.as_ref().map(|s| s.user_id.clone())
    }
}

impl TokenInner {
    async fn refresh_once(&self) -> Result<Session> {
        let (refresh_token, user_id, generation) = {
            let slot = self.slot.read().await;
            let session = slot.session.as_ref().ok_or(SessionError::Unauthenticated)?;
            (session.refresh_token.clone(), session.user_id.clone(), slot.generation)
        };

        info!("refreshing access token");
        let outcome = tokio::time::timeout(self.timeout, self.auth_api.refresh(&refresh_token)).await;

        match outcome {
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "token refresh timed out");
                Err(SessionError::Timeout(self.timeout))
            }
            Ok(Err(SessionError::AuthExpired)) => {
                warn!("refresh token rejected, invalidating session");
                let mut slot = self.slot.write().await;
                if slot.generation == generation {
                    self.clear(&mut slot).await?;
                }
                Err(SessionError::AuthExpired)
            }
            Ok(Err(err)) => {
                warn!(error = %err, "token refresh failed");
                Err(err)
            }
            Ok(Ok(mut session)) => {
                if session.user_id.is_empty() {
                    session.user_id = user_id;
                }
                let mut slot = self.slot.write().await;
                if slot.generation != generation {
                    debug!("discarding refresh result for a replaced session");
                    return slot.session.clone().ok_or(SessionError::Unauthenticated);
                }
                self.persist(&session).await?;
                slot.session = Some(session.clone());
                info!(user_id = %session.user_id, "access token refreshed");
                Ok(session)
            }
        }
    }

    async fn persist(&self, session: &Session) -> Result<()> {
        let blob = serde_json::to_string(session)?;
        self.store.set(SESSION_CREDENTIAL_KEY, &blob).await
    }

    async fn clear(&self, slot: &mut SessionSlot) -> Result<()> {
        slot.generation += 1;
        let had_session = slot.session.take().is_some();
        self.store.delete(SESSION_CREDENTIAL_KEY).await?;
        if had_session {
            info!("session invalidated");
        }
        Ok(())
    }
}
