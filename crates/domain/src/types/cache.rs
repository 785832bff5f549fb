//! Cached response entries

use serde::{Deserialize, Serialize};

/// A cached successful GET response
///
/// Entries are immutable once written; an update replaces the whole entry.
/// `stored_at + ttl` is the hard expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Vec<u8>,
    pub status: u16,
    pub content_type: Option<String>,
    pub stored_at_epoch_millis: i64,
    pub ttl_millis: i64,
}

impl CacheEntry {
    /// Epoch millis after which the entry is no longer fresh
    pub fn expires_at(&self) -> i64 {
        self.stored_at_epoch_millis.saturating_add(self.ttl_millis)
    }

    /// Whether the entry may be served as fresh at `now_millis`
    pub fn is_fresh_at(&self, now_millis: i64) -> bool {
        now_millis < self.expires_at()
    }

    /// Age of the entry at `now_millis`
    pub fn age_millis(&self, now_millis: i64) -> i64 {
        now_millis.saturating_sub(self.stored_at_epoch_millis)
    }
}
