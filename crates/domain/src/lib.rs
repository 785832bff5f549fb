//! # Tether Domain
//!
//! Data model for the tether session core.
//!
//! This crate contains:
//! - Session, cache, request/response and realtime types
//! - The [`SessionError`] taxonomy and `Result` alias
//! - [`ClientConfig`] with defaults and validation
//! - Domain constants
//!
//! ## Architecture
//! - Depends only on the foundation tier of `tether-common`
//! - No I/O; pure data structures and their invariants

pub mod config;
pub mod constants;
pub mod errors;
pub mod types;

// Re-export commonly used items
pub use config::ClientConfig;
pub use errors::{Result, SessionError};
pub use types::*;
