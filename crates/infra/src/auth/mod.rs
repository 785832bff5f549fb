//! Auth backend adapter

mod http_auth;

pub use http_auth::HttpAuthApi;
