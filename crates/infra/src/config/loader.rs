//! Configuration loader
//!
//! Loads [`ClientConfig`] from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If `TETHER_BASE_URL` is unset, falls back to loading from file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//!
//! Every loaded configuration is validated before it is returned.
//!
//! ## Environment Variables
//! - `TETHER_BASE_URL` (required): API base URL
//! - `TETHER_LOGIN_ENDPOINT`, `TETHER_REFRESH_ENDPOINT`: auth paths
//! - `TETHER_REALTIME_URL`: socket URL
//! - `TETHER_CACHE_TTL_MS`, `TETHER_STALE_RETENTION_MS`, `TETHER_CACHE_SWEEP_INTERVAL_MS`
//! - `TETHER_MAX_RETRIES`, `TETHER_RETRY_BASE_DELAY_MS`, `TETHER_REQUEST_TIMEOUT_MS`
//! - `TETHER_RECONNECT_BASE_DELAY_MS`, `TETHER_RECONNECT_MAX_DELAY_MS`,
//!   `TETHER_MAX_RECONNECT_ATTEMPTS`
//! - `TETHER_TOKEN_SKEW_MS`, `TETHER_AUTH_REJECTED_CLOSE_CODE`
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./tether.json` or `./tether.toml` (current working directory)
//! 2. `./config.json` or `./config.toml` (current working directory)
//! 3. `../tether.json` or `../tether.toml` (parent directory)
//! 4. The same names next to the executable

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use tether_domain::{ClientConfig, Result, SessionError};

const CONFIG_FILE_NAMES: [&str; 4] = ["tether.json", "tether.toml", "config.json", "config.toml"];

/// Load configuration with automatic fallback strategy
///
/// # Errors
/// Returns `SessionError::Config` if:
/// - Configuration cannot be loaded from either source
/// - A variable or file has an invalid value
/// - The resulting configuration fails validation
pub fn load() -> Result<ClientConfig> {
    if std::env::var_os("TETHER_BASE_URL").is_some() {
        let config = load_from_env()?;
        tracing::info!("Configuration loaded from environment variables");
        return Ok(config);
    }

    tracing::debug!("TETHER_BASE_URL not set, trying config files");
    load_from_file(None)
}

/// Load configuration from environment variables
///
/// Only `TETHER_BASE_URL` is required; every other variable falls back to the
/// default.
///
/// # Errors
/// Returns `SessionError::Config` if the base URL is missing or a variable
/// has an invalid value.
pub fn load_from_env() -> Result<ClientConfig> {
    let mut config = ClientConfig::new(env_var("TETHER_BASE_URL")?);

    if let Some(endpoint) = env_opt("TETHER_LOGIN_ENDPOINT") {
        config.login_endpoint = endpoint;
    }
    if let Some(endpoint) = env_opt("TETHER_REFRESH_ENDPOINT") {
        config.refresh_endpoint = endpoint;
    }
    if let Some(url) = env_opt("TETHER_REALTIME_URL") {
        config.realtime_url = Some(url);
    }
    if let Some(ttl) = env_millis("TETHER_CACHE_TTL_MS")? {
        config.default_cache_ttl = ttl;
    }
    if let Some(retries) = env_parse("TETHER_MAX_RETRIES")? {
        config.max_retries = retries;
    }
    if let Some(delay) = env_millis("TETHER_RETRY_BASE_DELAY_MS")? {
        config.retry_base_delay = delay;
    }
    if let Some(delay) = env_millis("TETHER_RECONNECT_BASE_DELAY_MS")? {
        config.reconnect_base_delay = delay;
    }
    if let Some(delay) = env_millis("TETHER_RECONNECT_MAX_DELAY_MS")? {
        config.reconnect_max_delay = delay;
    }
    if let Some(attempts) = env_parse("TETHER_MAX_RECONNECT_ATTEMPTS")? {
        config.max_reconnect_attempts = Some(attempts);
    }
    if let Some(timeout) = env_millis("TETHER_REQUEST_TIMEOUT_MS")? {
        config.request_timeout = timeout;
    }
    if let Some(skew) = env_millis("TETHER_TOKEN_SKEW_MS")? {
        config.token_skew = skew;
    }
    if let Some(code) = env_parse("TETHER_AUTH_REJECTED_CLOSE_CODE")? {
        config.auth_rejected_close_code = code;
    }
    if let Some(retention) = env_millis("TETHER_STALE_RETENTION_MS")? {
        config.stale_retention = retention;
    }
    if let Some(interval) = env_millis("TETHER_CACHE_SWEEP_INTERVAL_MS")? {
        config.cache_sweep_interval = Some(interval);
    }

    config.validate()?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Supports both JSON and TOML formats (detected by file extension).
///
/// # Errors
/// Returns `SessionError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid or validation fails
pub fn load_from_file(path: Option<PathBuf>) -> Result<ClientConfig> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(SessionError::Config(format!("Config file not found: {}", p.display())));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            SessionError::Config("No config file found in any of the standard locations".to_string())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| SessionError::Config(format!("Failed to read config file: {}", e)))?;

    let config = parse_config(&contents, &config_path)?;
    config.validate()?;
    Ok(config)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<ClientConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| SessionError::Config(format!("Invalid TOML format: {}", e))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| SessionError::Config(format!("Invalid JSON format: {}", e))),
        _ => Err(SessionError::Config(format!("Unsupported config format: {}", extension))),
    }
}

/// Probe multiple paths for configuration files
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut dirs = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd.clone());
        dirs.push(cwd.join(".."));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            dirs.push(exe_dir.to_path_buf());
        }
    }

    dirs.iter()
        .flat_map(|dir| CONFIG_FILE_NAMES.iter().map(move |name| dir.join(name)))
        .find(|path| path.exists())
}

/// Get required environment variable
fn env_var(key: &str) -> Result<String> {
    std::env::var(key)
        .map_err(|_| SessionError::Config(format!("Missing required environment variable: {}", key)))
}

/// Optional variable; empty counts as unset
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_opt(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| SessionError::Config(format!("Invalid value for {}: {}", key, e)))
        })
        .transpose()
}

fn env_millis(key: &str) -> Result<Option<Duration>> {
    Ok(env_parse::<u64>(key)?.map(Duration::from_millis))
}
