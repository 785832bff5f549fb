//! Client configuration
//!
//! Durations are (de)serialised as integer milliseconds. Missing fields take
//! the defaults from [`crate::constants`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_common::resilience::{BackoffPolicy, Jitter};
use tether_common::{duration_millis, option_duration_millis};
use url::Url;

use crate::constants::*;
use crate::errors::{Result, SessionError};

/// Configuration shared by every component of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the REST API (`https://api.example.com/v1`)
    pub base_url: String,
    pub login_endpoint: String,
    pub refresh_endpoint: String,
    /// Socket URL; derived from `base_url` when absent
    pub realtime_url: Option<String>,
    #[serde(with = "duration_millis")]
    pub default_cache_ttl: Duration,
    pub max_retries: u32,
    #[serde(with = "duration_millis")]
    pub retry_base_delay: Duration,
    #[serde(with = "duration_millis")]
    pub reconnect_base_delay: Duration,
    #[serde(with = "duration_millis")]
    pub reconnect_max_delay: Duration,
    /// `None` reconnects forever
    pub max_reconnect_attempts: Option<u32>,
    /// Applies to requests, refreshes and socket handshakes
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub token_skew: Duration,
    pub auth_rejected_close_code: u16,
    /// How long expired cache entries stay available as stale fallback
    #[serde(with = "duration_millis")]
    pub stale_retention: Duration,
    /// Period of the background cache sweep; `None` keeps expiry lazy only
    #[serde(with = "option_duration_millis")]
    pub cache_sweep_interval: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            login_endpoint: DEFAULT_LOGIN_ENDPOINT.to_string(),
            refresh_endpoint: DEFAULT_REFRESH_ENDPOINT.to_string(),
            realtime_url: None,
            default_cache_ttl: Duration::from_millis(DEFAULT_CACHE_TTL_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            reconnect_base_delay: Duration::from_millis(DEFAULT_RECONNECT_BASE_DELAY_MS),
            reconnect_max_delay: Duration::from_millis(DEFAULT_RECONNECT_MAX_DELAY_MS),
            max_reconnect_attempts: None,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            token_skew: Duration::from_millis(DEFAULT_TOKEN_SKEW_MS),
            auth_rejected_close_code: DEFAULT_AUTH_REJECTED_CLOSE_CODE,
            stale_retention: Duration::from_millis(DEFAULT_STALE_RETENTION_MS),
            cache_sweep_interval: None,
        }
    }
}

impl ClientConfig {
    /// Defaults with the given API base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), ..Self::default() }
    }

    /// Reject configurations the session core cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(SessionError::Config("base_url must not be empty".into()));
        }
        let base = Url::parse(&self.base_url)?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(SessionError::Config(format!(
                "base_url must be http(s), got {}",
                base.scheme()
            )));
        }
        if self.login_endpoint.trim().is_empty() || self.refresh_endpoint.trim().is_empty() {
            return Err(SessionError::Config("auth endpoints must not be empty".into()));
        }
        if let Some(realtime) = &self.realtime_url {
            Url::parse(realtime)?;
        }
        if self.request_timeout.is_zero() {
            return Err(SessionError::Config("request_timeout must be positive".into()));
        }
        if self.reconnect_base_delay.is_zero() {
            return Err(SessionError::Config("reconnect_base_delay must be positive".into()));
        }
        if self.reconnect_base_delay > self.reconnect_max_delay {
            return Err(SessionError::Config(
                "reconnect_base_delay must not exceed reconnect_max_delay".into(),
            ));
        }
        if self.cache_sweep_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(SessionError::Config("cache_sweep_interval must be positive".into()));
        }
        Ok(())
    }

    /// Absolute URL for an API path
    pub fn endpoint_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    /// Socket URL, derived as `ws(s)://<base>/realtime` when not configured
    pub fn realtime_endpoint(&self) -> String {
        if let Some(url) = &self.realtime_url {
            return url.clone();
        }
        let base = self.base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{ws_base}/realtime")
    }

    /// Request retry delays: exponential from `retry_base_delay`, full jitter
    pub fn request_backoff(&self) -> BackoffPolicy {
        BackoffPolicy::exponential(
            self.retry_base_delay,
            RETRY_BACKOFF_FACTOR,
            Duration::from_millis(RETRY_MAX_DELAY_MS),
            Jitter::Full,
        )
    }

    /// Reconnect delays: exponential between the configured bounds, ±20%
    pub fn reconnect_backoff(&self) -> BackoffPolicy {
        BackoffPolicy::exponential(
            self.reconnect_base_delay,
            RECONNECT_BACKOFF_FACTOR,
            self.reconnect_max_delay,
            Jitter::Proportional(RECONNECT_JITTER_FRACTION),
        )
    }
}
