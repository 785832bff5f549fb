//! Reconnecting publish/subscribe channel
//!
//! ```text
//! Disconnected --connect()--> Connecting --open--> Connected
//!      Connected --close/error--> Reconnecting --backoff--> Connecting
//!      any --disconnect()/exhaustion/auth failure--> Closed (terminal)
//! ```
//!
//! Subscriptions live in a registry owned by the channel and survive
//! reconnects; every `Connected` transition re-sends a subscribe frame for
//! each registered topic.

mod channel;
pub mod ports;

pub use channel::{Listener, RealtimeChannel, SubscriptionHandle};
