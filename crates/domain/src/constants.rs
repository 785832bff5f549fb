//! Domain constants
//!
//! Defaults live here so config, core and tests agree on them.

// Credential store
pub const SESSION_CREDENTIAL_KEY: &str = "session";
pub const DEFAULT_KEYRING_SERVICE: &str = "tether";

// HTTP
pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const DEFAULT_LOGIN_ENDPOINT: &str = "/auth/login";
pub const DEFAULT_REFRESH_ENDPOINT: &str = "/auth/refresh";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

// Token lifecycle
pub const DEFAULT_TOKEN_SKEW_MS: u64 = 60_000;

// Request retries: base 500 ms, factor 2, full jitter
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;
pub const RETRY_BACKOFF_FACTOR: f64 = 2.0;
pub const RETRY_MAX_DELAY_MS: u64 = 30_000;

// Response cache
pub const DEFAULT_CACHE_TTL_MS: u64 = 5 * 60 * 1000;
pub const DEFAULT_STALE_RETENTION_MS: u64 = 24 * 60 * 60 * 1000;

// Realtime: base 1 s, factor 2, cap 30 s, ±20% jitter
pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 30_000;
pub const RECONNECT_BACKOFF_FACTOR: f64 = 2.0;
pub const RECONNECT_JITTER_FRACTION: f64 = 0.2;
pub const DEFAULT_AUTH_REJECTED_CLOSE_CODE: u16 = 4001;

/// Reserved topic carrying channel-level failures to every listener
pub const CHANNEL_ERROR_TOPIC: &str = "__channel_error__";
