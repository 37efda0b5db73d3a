//! Relay configuration parsed from environment variables.

use chat::config::{DEFAULT_PUBLISH_DESTINATION, DEFAULT_SUBSCRIBE_PREFIX, env_string};

use crate::error::RelayError;

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub port: u16,
    /// `SEND` destination whose bodies are chat messages routed by `roomId`.
    pub publish_destination: String,
    /// Room topics are this prefix followed by the room id.
    pub subscribe_prefix: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            publish_destination: DEFAULT_PUBLISH_DESTINATION.to_owned(),
            subscribe_prefix: DEFAULT_SUBSCRIBE_PREFIX.to_owned(),
        }
    }
}

impl RelayConfig {
    /// Build relay config from environment variables.
    ///
    /// Optional:
    /// - `PORT`: default 3000
    /// - `RELAY_PUBLISH_DESTINATION`: default `/api/chat/pub/chat/message`
    /// - `RELAY_SUBSCRIBE_PREFIX`: default `/api/chat/sub/chat/room/`
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if `PORT` is set but not a port number.
    pub fn from_env() -> Result<Self, RelayError> {
        let port = match env_string("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|e| RelayError::Config(format!("invalid PORT '{raw}': {e}")))?,
            None => DEFAULT_PORT,
        };
        Ok(Self {
            port,
            publish_destination: env_string("RELAY_PUBLISH_DESTINATION")
                .unwrap_or_else(|| DEFAULT_PUBLISH_DESTINATION.to_owned()),
            subscribe_prefix: env_string("RELAY_SUBSCRIBE_PREFIX").unwrap_or_else(|| DEFAULT_SUBSCRIBE_PREFIX.to_owned()),
        })
    }

    /// Topic a chat message for `room_id` is delivered on.
    #[must_use]
    pub fn room_topic(&self, room_id: &str) -> String {
        format!("{}{room_id}", self.subscribe_prefix)
    }
}
