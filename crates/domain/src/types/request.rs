//! Outbound request description

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// HTTP method of a [`RequestSpec`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Whether a successful request with this method mutates server state
    pub fn is_write(&self) -> bool {
        !matches!(self, HttpMethod::Get)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request overrides of the client defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    /// Consult and populate the response cache (GET only)
    pub use_cache: bool,
    /// TTL for the cache entry written by this request
    pub cache_ttl: Option<Duration>,
    /// Retries after the first attempt; `Some(0)` disables retrying
    pub max_retries: Option<u32>,
    /// Per-attempt timeout
    pub timeout: Option<Duration>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self { use_cache: true, cache_ttl: None, max_retries: None, timeout: None }
    }
}

/// Description of an API call executed by the request pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub method: HttpMethod,
    /// Normalised path: leading slash, no trailing slash
    pub path: String,
    /// Query parameters; ordered so derived keys are stable
    pub params: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
    pub options: RequestOptions,
}

impl RequestSpec {
    pub fn new(method: HttpMethod, path: impl AsRef<str>) -> Self {
        Self {
            method,
            path: normalize_path(path.as_ref()),
            params: BTreeMap::new(),
            body: None,
            options: RequestOptions::default(),
        }
    }

    pub fn get(path: impl AsRef<str>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl AsRef<str>, body: serde_json::Value) -> Self {
        Self::new(HttpMethod::Post, path).body(body)
    }

    pub fn put(path: impl AsRef<str>, body: serde_json::Value) -> Self {
        Self::new(HttpMethod::Put, path).body(body)
    }

    pub fn patch(path: impl AsRef<str>, body: serde_json::Value) -> Self {
        Self::new(HttpMethod::Patch, path).body(body)
    }

    pub fn delete(path: impl AsRef<str>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn use_cache(mut self, enabled: bool) -> Self {
        self.options.use_cache = enabled;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.options.cache_ttl = Some(ttl);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.options.max_retries = Some(retries);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    /// Encoded query string without the leading `?`
    pub fn query_string(&self) -> String {
        self.params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Path plus normalised query; the response cache key
    pub fn cache_key(&self) -> String {
        if self.params.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query_string())
        }
    }

    /// Method, cache key and cache options; identical requests share one
    /// network call
    ///
    /// Requests that differ only in how the response is cached run separately,
    /// since the shared call stores its response with the leader's options.
    pub fn flight_key(&self) -> String {
        let mut key = format!("{} {}", self.method, self.cache_key());
        if !self.is_cacheable() {
            key.push_str(" no-cache");
        } else if let Some(ttl) = self.options.cache_ttl {
            key.push_str(&format!(" ttl={}ms", ttl.as_millis()));
        }
        key
    }

    /// Root prefix of the resource (`/posts/42/comments` -> `/posts`)
    pub fn resource_root(&self) -> String {
        match self.path.split('/').find(|segment| !segment.is_empty()) {
            Some(segment) => format!("/{segment}"),
            None => "/".to_string(),
        }
    }

    /// Whether this request reads from and writes to the response cache
    pub fn is_cacheable(&self) -> bool {
        self.method == HttpMethod::Get && self.options.use_cache
    }
}

fn normalize_path(path: &str) -> String {
    format!("/{}", path.trim().trim_matches('/'))
}

/// Bookkeeping for one in-flight execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    /// Attached to the outbound request and to every log line
    pub id: Uuid,
    pub retry_count: u32,
    pub started_at_epoch_millis: i64,
}

impl PendingRequest {
    pub fn new(started_at_epoch_millis: i64) -> Self {
        Self { id: Uuid::new_v4(), retry_count: 0, started_at_epoch_millis }
    }
}
