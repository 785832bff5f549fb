//! Session facade
//!
//! Composes the token manager, response cache, request pipeline and realtime
//! channel into the single entry point used by application code.

mod facade;

pub use facade::{SessionFacade, SessionPorts};
