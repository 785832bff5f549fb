//! Realtime channel types
//!
//! Frames use a small tagged JSON envelope:
//!
//! ```json
//! {"type": "subscribe", "topic": "posts"}
//! {"type": "message", "topic": "posts", "payload": {"id": 1}}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::constants::CHANNEL_ERROR_TOPIC;
use crate::errors::{Result, SessionError};

/// Lifecycle of a realtime channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Terminal; a closed channel is never reopened
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application message on a topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub topic: String,
    pub payload: Value,
}

impl ChannelMessage {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self { topic: topic.into(), payload }
    }

    /// Message on the reserved error topic describing `error`
    pub fn channel_error(error: &SessionError) -> Self {
        let payload = serde_json::to_value(error)
            .unwrap_or_else(|_| Value::String(error.to_string()));
        Self { topic: CHANNEL_ERROR_TOPIC.to_string(), payload }
    }

    pub fn is_channel_error(&self) -> bool {
        self.topic == CHANNEL_ERROR_TOPIC
    }

    /// Decode the error carried by a channel-error message
    pub fn as_error(&self) -> Option<SessionError> {
        if !self.is_channel_error() {
            return None;
        }
        serde_json::from_value(self.payload.clone()).ok()
    }
}

/// Wire envelope exchanged with the socket transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    /// Outbound application message
    Publish { topic: String, payload: Value },
    /// Inbound application message
    Message { topic: String, payload: Value },
}

impl Frame {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn topic(&self) -> &str {
        match self {
            Frame::Subscribe { topic }
            | Frame::Unsubscribe { topic }
            | Frame::Publish { topic, .. }
            | Frame::Message { topic, .. } => topic,
        }
    }
}

impl From<ChannelMessage> for Frame {
    fn from(message: ChannelMessage) -> Self {
        Frame::Publish { topic: message.topic, payload: message.payload }
    }
}

/// A listener registered on a topic
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub topic: String,
    pub listener_id: Uuid,
}

impl Subscription {
    pub fn new(topic: impl Into<String>) -> Self {
        Self { topic: topic.into(), listener_id: Uuid::new_v4() }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn frames_use_tagged_envelope() {
        let frame = Frame::Subscribe { topic: "posts".into() };
        let bytes = frame.encode().expect("encode");
        let value: Value = serde_json::from_slice(&bytes).expect("json");

        assert_eq!(value, json!({"type": "subscribe", "topic": "posts"}));
    }

    #[test]
    fn inbound_message_decodes() {
        let frame = Frame::decode(br#"{"type":"message","topic":"posts","payload":{"id":7}}"#)
            .expect("decode");

        assert_eq!(frame, Frame::Message { topic: "posts".into(), payload: json!({"id": 7}) });
        assert_eq!(frame.topic(), "posts");
    }

    #[test]
    fn unknown_frame_type_is_rejected() {
        let err = Frame::decode(br#"{"type":"ping"}"#).expect_err("should fail");
        assert!(matches!(err, SessionError::Serialization(_)));
    }

    #[test]
    fn channel_error_round_trips() {
        let message =
            ChannelMessage::channel_error(&SessionError::ReconnectExhausted { attempts: 5 });

        assert!(message.is_channel_error());
        assert_eq!(message.as_error(), Some(SessionError::ReconnectExhausted { attempts: 5 }));
        assert_eq!(ChannelMessage::new("posts", json!(1)).as_error(), None);
    }

    #[test]
    fn publish_frame_from_message() {
        let frame = Frame::from(ChannelMessage::new("chat", json!({"text": "hi"})));
        assert!(matches!(frame, Frame::Publish { ref topic, .. } if topic == "chat"));
        assert!(ConnectionState::Closed.is_terminal());
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
    }
}
