//! Error taxonomy for chat sessions.
//!
//! No variant is fatal to the host: the session logs, optionally records a
//! notice, and keeps running or winds down to `Disconnected`.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// The broker connection could not be established or subscribed.
    #[error("broker connection failed: {0}")]
    Connection(String),
    /// An inbound payload was not a well-formed chat message.
    #[error("inbound payload could not be decoded: {0}")]
    Decode(String),
    /// An outbound message could not be delivered.
    #[error("publish to {destination} failed: {reason}")]
    Publish { destination: String, reason: String },
    #[error("broker connection closed")]
    Closed,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid chat configuration: {0}")]
    Config(String),
    #[error("stomp frame error: {0}")]
    Frame(#[from] frames::CodecError),
}

impl ChatError {
    /// Grepable code for logs and notices.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "E_CHAT_CONNECT",
            Self::Decode(_) => "E_CHAT_DECODE",
            Self::Publish { .. } => "E_CHAT_PUBLISH",
            Self::Closed => "E_CHAT_CLOSED",
            Self::Timeout(_) => "E_CHAT_TIMEOUT",
            Self::Config(_) => "E_CHAT_CONFIG",
            Self::Frame(_) => "E_CHAT_FRAME",
        }
    }

    /// Whether reconnecting may clear the condition.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Closed | Self::Timeout(_))
    }
}
