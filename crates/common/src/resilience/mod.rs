//! Resilience patterns for transient failures
//!
//! Retry timing is expressed as a [`BackoffPolicy`]: a pure function of the
//! attempt number (and, for jitter, a random sample in `[0, 1)`). Callers that
//! actually sleep drive it through a [`BackoffSchedule`], which keeps the
//! attempt counter and guarantees the produced delays never decrease.
//!
//! Keeping the policy pure means it can be tested without timers:
//!
//! ```
//! use std::time::Duration;
//!
//! use tether_common::resilience::{BackoffPolicy, Jitter};
//!
//! let policy = BackoffPolicy::exponential(
//!     Duration::from_millis(500),
//!     2.0,
//!     Duration::from_secs(30),
//!     Jitter::None,
//! );
//! assert_eq!(policy.delay_with(0, 0.0), Duration::from_millis(500));
//! assert_eq!(policy.delay_with(2, 0.0), Duration::from_millis(2_000));
//! ```

pub mod backoff;

pub use backoff::{BackoffPolicy, BackoffSchedule, BackoffStrategy, Jitter};
