//! Time abstractions
//!
//! Token expiry and cache freshness are both judged against wall-clock epoch
//! milliseconds, so everything that makes such a decision takes a [`Clock`]
//! instead of calling `SystemTime::now()` directly.
//!
//! ```rust
//! use std::time::Duration;
//!
//! use tether_common::time::{Clock, MockClock};
//!
//! let clock = MockClock::at_epoch_millis(1_000);
//! clock.advance(Duration::from_secs(5));
//! assert_eq!(clock.millis_since_epoch(), 6_000);
//! ```

mod clock;

pub use clock::{Clock, MockClock, SystemClock};
