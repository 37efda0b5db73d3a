//! Chat message wire payload and display model.
//!
//! Payloads travel as JSON objects with four fields:
//! `{"type":"ENTER","roomId":"room-42","sender":"alice","message":"hello"}`.
//! Extra fields a backend adds are ignored on decode.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::macros::format_description;

use crate::error::ChatError;

#[cfg(test)]
#[path = "message_test.rs"]
mod message_test;

/// Message kind marker carried in the `type` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    /// Marker the session stamps on every outbound message.
    Enter,
    Talk,
    Quit,
}

/// A single chat message as published to and received from the broker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub room_id: String,
    pub sender: String,
    pub message: String,
}

impl ChatMessage {
    /// Build an outbound message with the session's fixed `ENTER` marker.
    pub fn enter(room_id: impl Into<String>, sender: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: MessageType::Enter,
            room_id: room_id.into(),
            sender: sender.into(),
            message: message.into(),
        }
    }
}

/// Serialize a message into its JSON payload.
#[must_use]
pub fn encode_message(message: &ChatMessage) -> String {
    // Four string-like fields: serialization into a String cannot fail.
    serde_json::to_string(message).unwrap_or_default()
}

/// Parse a JSON payload into a message.
///
/// # Errors
///
/// Returns [`ChatError::Decode`] for invalid JSON, missing fields,
/// and unknown `type` markers.
pub fn decode_message(payload: &str) -> Result<ChatMessage, ChatError> {
    serde_json::from_str(payload).map_err(|e| ChatError::Decode(e.to_string()))
}

/// A received message prepared for a renderer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayMessage {
    pub message: ChatMessage,
    /// True when the message was sent under this session's own identity.
    pub is_own: bool,
    pub received_at: OffsetDateTime,
}

impl DisplayMessage {
    #[must_use]
    pub fn from_received(message: ChatMessage, own_sender: &str, received_at: OffsetDateTime) -> Self {
        let is_own = message.sender == own_sender;
        Self { message, is_own, received_at }
    }

    /// Receipt time as `HH:MM`.
    #[must_use]
    pub fn display_time(&self) -> String {
        self.received_at
            .format(format_description!("[hour]:[minute]"))
            .unwrap_or_else(|_| "--:--".to_owned())
    }
}

/// Current wall-clock time, local when the offset is knowable.
pub(crate) fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}
