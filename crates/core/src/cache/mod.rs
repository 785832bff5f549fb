//! Response cache
//!
//! - **[`ResponseCache`]**: TTL-keyed store of successful GET responses
//! - **[`CacheStats`]**: counters for hit-rate monitoring

mod response_cache;
mod stats;

pub use response_cache::ResponseCache;
pub use stats::CacheStats;
