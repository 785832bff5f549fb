//! TTL response cache
//!
//! Expiry is lazy: `get` checks `stored_at + ttl` on every read and never
//! returns an expired entry. Expired entries stay readable through
//! [`ResponseCache::get_stale`] until [`ResponseCache::sweep`] reclaims them
//! after the stale retention period.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tether_common::{Clock, SystemClock};
use tether_domain::{CacheEntry, ClientConfig};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::stats::{CacheCounters, CacheStats};

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Whether `key` lies under `prefix` on a path-segment boundary
///
/// `/posts` covers `/posts`, `/posts/1` and `/posts?page=2` but not
/// `/postscript`.
fn under_prefix(key: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    match key.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'),
        None => false,
    }
}

/// Cache of successful GET responses keyed by path and normalised query
///
/// Entries are immutable `Arc`s; readers never take a cross-request lock.
pub struct ResponseCache {
    entries: DashMap<String, Arc<CacheEntry>>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
    stale_retention: Duration,
    counters: CacheCounters,
    generation: AtomicU64,
}

impl ResponseCache {
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &ClientConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            default_ttl: config.default_cache_ttl,
            stale_retention: config.stale_retention,
            counters: CacheCounters::default(),
            generation: AtomicU64::new(0),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Fresh entry for `key`, if any
    pub fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let now = self.clock.millis_since_epoch();
        match self.entries.get(key) {
            Some(entry) if entry.is_fresh_at(now) => {
                self.counters.record_hit();
                trace!(key, "cache hit");
                Some(Arc::clone(entry.value()))
            }
            Some(_) => {
                self.counters.record_miss();
                trace!(key, "cache entry expired");
                None
            }
            None => {
                self.counters.record_miss();
                None
            }
        }
    }

    /// Entry for `key` regardless of expiry
    ///
    /// Used for the stale fallback after the network failed.
    pub fn get_stale(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let entry = self.entries.get(key).map(|entry| Arc::clone(entry.value()))?;
        self.counters.record_stale_hit();
        Some(entry)
    }

    /// Store `payload` under `key` for `ttl`
    pub fn set(&self, key: impl Into<String>, payload: Vec<u8>, ttl: Duration) -> Arc<CacheEntry> {
        self.set_response(key, 200, None, payload, ttl)
    }

    /// Store a response with its status and content type
    pub fn set_response(
        &self,
        key: impl Into<String>,
        status: u16,
        content_type: Option<String>,
        payload: Vec<u8>,
        ttl: Duration,
    ) -> Arc<CacheEntry> {
        let key = key.into();
        let entry = Arc::new(CacheEntry {
            key: key.clone(),
            payload,
            status,
            content_type,
            stored_at_epoch_millis: self.clock.millis_since_epoch(),
            ttl_millis: millis(ttl),
        });
        self.entries.insert(key, Arc::clone(&entry));
        self.counters.record_write();
        entry
    }

    /// Store a response only if the cache was not cleared since `generation`
    ///
    /// Keeps a request that outlives a logout from repopulating the cache.
    pub fn set_response_if_current(
        &self,
        generation: u64,
        key: impl Into<String>,
        status: u16,
        content_type: Option<String>,
        payload: Vec<u8>,
        ttl: Duration,
    ) -> Option<Arc<CacheEntry>> {
        if self.generation() != generation {
            debug!("cache cleared while request was in flight, not storing");
            return None;
        }
        let entry = self.set_response(key, status, content_type, payload, ttl);
        if self.generation() != generation {
            self.entries.remove(&entry.key);
            return None;
        }
        Some(entry)
    }

    /// Incremented by every [`ResponseCache::clear`]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Remove one entry; returns whether it existed
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.counters.record_invalidations(1);
        }
        removed
    }

    /// Remove every entry under `prefix`; returns how many were removed
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !under_prefix(key, prefix));
        let removed = before.saturating_sub(self.entries.len());
        self.counters.record_invalidations(removed);
        debug!(prefix, removed, "invalidated cache prefix");
        removed
    }

    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let removed = self.entries.len();
        self.entries.clear();
        self.counters.record_invalidations(removed);
        debug!(removed, "cache cleared");
    }

    /// Drop entries that expired more than `stale_retention` ago
    pub fn sweep(&self) -> usize {
        let now = self.clock.millis_since_epoch();
        let retention = millis(self.stale_retention);
        let before = self.entries.len();
        self.entries.retain(|_, entry| now < entry.expires_at().saturating_add(retention));
        let swept = before.saturating_sub(self.entries.len());
        if swept > 0 {
            self.counters.record_swept(swept);
            debug!(swept, "swept expired cache entries");
        }
        swept
    }

    /// Run [`ResponseCache::sweep`] every `interval` until `cancel` fires
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        cache.sweep();
                    }
                }
            }
            debug!("cache sweeper stopped");
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot(self.entries.len())
    }
}
