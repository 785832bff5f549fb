//! Domain types and models

pub mod cache;
pub mod realtime;
pub mod request;
pub mod response;
pub mod session;

pub use cache::CacheEntry;
pub use realtime::{ChannelMessage, ConnectionState, Frame, Subscription};
pub use request::{HttpMethod, PendingRequest, RequestOptions, RequestSpec};
pub use response::{ApiResponse, ResponseSource};
pub use session::{AuthState, Credentials, Session};
