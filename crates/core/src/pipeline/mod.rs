//! Request pipeline
//!
//! Every API call flows through [`RequestPipeline::execute`]:
//!
//! 1. fresh cache hit for cacheable GETs
//! 2. access token from the token manager
//! 3. dispatch with `Authorization` and `x-request-id`
//! 4. classification: success, one refresh-and-replay on 401, retry with
//!    backoff on 5xx and transport failures, immediate error on other 4xx
//! 5. cache write for GETs, prefix invalidation for writes
//!
//! Identical concurrent GETs share one execution.

mod executor;
pub mod ports;

pub use executor::RequestPipeline;
