//! # Tether Infrastructure
//!
//! Implementations of the `tether-core` ports.
//!
//! This crate contains:
//! - [`ReqwestTransport`]: HTTP transport over `reqwest`
//! - [`HttpAuthApi`]: login/refresh endpoints over any HTTP transport
//! - [`KeyringCredentialStore`] and [`MemoryCredentialStore`]
//! - Configuration loading from `TETHER_*` variables or config files
//! - `tracing` subscriber setup
//!
//! ## Architecture
//! - Implements traits defined in `tether-core`
//! - Contains all "impure" code (network, keychain, filesystem)
//! - The socket transport is supplied by the embedding application

pub mod auth;
pub mod config;
pub mod errors;
pub mod http;
pub mod observability;
pub mod store;

// Re-export commonly used items
pub use auth::HttpAuthApi;
pub use errors::InfraError;
pub use http::{ReqwestTransport, ReqwestTransportBuilder};
pub use observability::{init_tracing, LogFormat};
pub use store::{KeyringCredentialStore, MemoryCredentialStore};
