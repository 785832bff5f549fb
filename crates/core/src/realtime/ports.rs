//! Port interface for the duplex socket transport

use std::collections::BTreeMap;

use async_trait::async_trait;
use tether_domain::Result;
use tokio::sync::mpsc;

/// Event reported by an open socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Message(Vec<u8>),
    Closed { code: u16, reason: String },
    Error(String),
}

/// An open socket, expressed as a pair of channels
///
/// Frames written to `outbound` are sent in order. The transport ends the
/// connection when `outbound` is dropped; it reports the end of the
/// connection by closing `events` (optionally after a `Closed` event).
#[derive(Debug)]
pub struct SocketConnection {
    pub outbound: mpsc::UnboundedSender<Vec<u8>>,
    pub events: mpsc::UnboundedReceiver<SocketEvent>,
}

/// Opens socket connections
#[async_trait]
pub trait SocketTransport: Send + Sync {
    /// Perform the handshake with the given headers
    ///
    /// A handshake rejected for authentication reasons should be reported as
    /// `SessionError::Api` with status 401 or 403.
    async fn open(&self, url: &str, headers: &BTreeMap<String, String>) -> Result<SocketConnection>;
}
