//! # Tether Core
//!
//! Session logic behind port traits - no network or platform code.
//!
//! This crate contains:
//! - [`TokenManager`]: access/refresh token lifecycle with a single shared refresh
//! - [`ResponseCache`]: TTL cache of GET responses with stale fallback
//! - [`RequestPipeline`]: auth attach, 401 refresh-and-replay, retry, dedup
//! - [`RealtimeChannel`]: reconnecting publish/subscribe channel
//! - [`SessionFacade`]: the API consumed by application code
//!
//! ## Architecture Principles
//! - Only depends on `tether-common` and `tether-domain`
//! - All I/O goes through the traits in each module's `ports`
//! - Time flows through [`tether_common::Clock`] so expiry is testable

pub mod auth;
pub mod cache;
pub mod pipeline;
pub mod realtime;
pub mod session;

// Fakes for the port traits
// -----------------------------------------------------------------
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use auth::ports::{AuthApi, CredentialStore};
pub use auth::TokenManager;
pub use cache::{CacheStats, ResponseCache};
pub use pipeline::ports::{HttpRequest, HttpResponse, HttpTransport, TransportError};
pub use pipeline::RequestPipeline;
pub use realtime::ports::{SocketConnection, SocketEvent, SocketTransport};
pub use realtime::{Listener, RealtimeChannel, SubscriptionHandle};
pub use session::{SessionFacade, SessionPorts};
