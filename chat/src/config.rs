//! Session configuration parsed from environment variables.

use std::time::Duration;

use crate::error::ChatError;
use crate::retry::{DEFAULT_RETRY_BASE_MS, DEFAULT_RETRY_MAX_ATTEMPTS, DEFAULT_RETRY_MAX_MS, RetryPolicy};

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

/// Room used when the identity provider supplies none.
pub const DEFAULT_ROOM_ID: &str = "default_room_id";
pub const DEFAULT_SUBSCRIBE_PREFIX: &str = "/api/chat/sub/chat/room/";
pub const DEFAULT_PUBLISH_DESTINATION: &str = "/api/chat/pub/chat/message";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_PUBLISH_RETRY_ATTEMPTS: u32 = 2;

// =============================================================================
// ROOM IDENTITY
// =============================================================================

/// Room binding and display name for one session. Immutable once the
/// session is activated; switching rooms means a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomIdentity {
    pub room_id: String,
    pub sender: String,
}

impl RoomIdentity {
    /// Blank or absent room ids fall back to [`DEFAULT_ROOM_ID`].
    pub fn new(room_id: Option<&str>, sender: impl Into<String>) -> Self {
        let room_id = room_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(DEFAULT_ROOM_ID)
            .to_owned();
        Self { room_id, sender: sender.into() }
    }
}

// =============================================================================
// SESSION CONFIG
// =============================================================================

/// What to do when an outbound message cannot be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishFailurePolicy {
    /// Log only.
    Ignore,
    /// Log and record a notice for the renderer.
    Notify,
    /// Re-publish up to `attempts` more times, then notify.
    Retry { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Inbound destination is this prefix followed by the room id.
    pub subscribe_prefix: String,
    pub publish_destination: String,
    /// Upper bound on each connect attempt.
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
    pub publish_failure: PublishFailurePolicy,
    /// Drop-oldest bound on the display list; `None` keeps everything.
    pub history_limit: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            subscribe_prefix: DEFAULT_SUBSCRIBE_PREFIX.to_owned(),
            publish_destination: DEFAULT_PUBLISH_DESTINATION.to_owned(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            publish_failure: PublishFailurePolicy::Notify,
            history_limit: None,
        }
    }
}

impl SessionConfig {
    /// Build typed session config from environment variables.
    ///
    /// Optional:
    /// - `CHAT_SUBSCRIBE_PREFIX`: default `/api/chat/sub/chat/room/`
    /// - `CHAT_PUBLISH_DESTINATION`: default `/api/chat/pub/chat/message`
    /// - `CHAT_CONNECT_TIMEOUT_SECS`: default 10
    /// - `CHAT_RETRY_MAX_ATTEMPTS`: default 5, `0` disables reconnects
    /// - `CHAT_RETRY_BASE_MS`: default 1000
    /// - `CHAT_RETRY_MAX_MS`: default 10000
    /// - `CHAT_PUBLISH_FAILURE`: `notify` (default), `ignore`, or `retry`
    /// - `CHAT_PUBLISH_RETRY_ATTEMPTS`: default 2, used by `retry`
    /// - `CHAT_HISTORY_LIMIT`: default unbounded, `0` also means unbounded
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Config`] for an unknown `CHAT_PUBLISH_FAILURE`.
    pub fn from_env() -> Result<Self, ChatError> {
        let publish_failure = parse_publish_failure(
            env_string("CHAT_PUBLISH_FAILURE").as_deref(),
            env_parse("CHAT_PUBLISH_RETRY_ATTEMPTS", DEFAULT_PUBLISH_RETRY_ATTEMPTS),
        )?;
        let retry = RetryPolicy {
            max_attempts: env_parse("CHAT_RETRY_MAX_ATTEMPTS", DEFAULT_RETRY_MAX_ATTEMPTS),
            base: Duration::from_millis(env_parse("CHAT_RETRY_BASE_MS", DEFAULT_RETRY_BASE_MS)),
            max: Duration::from_millis(env_parse("CHAT_RETRY_MAX_MS", DEFAULT_RETRY_MAX_MS)),
            jitter: true,
        };
        let history_limit = Some(env_parse("CHAT_HISTORY_LIMIT", 0_usize)).filter(|limit| *limit > 0);

        Ok(Self {
            subscribe_prefix: env_string("CHAT_SUBSCRIBE_PREFIX").unwrap_or_else(|| DEFAULT_SUBSCRIBE_PREFIX.to_owned()),
            publish_destination: env_string("CHAT_PUBLISH_DESTINATION")
                .unwrap_or_else(|| DEFAULT_PUBLISH_DESTINATION.to_owned()),
            connect_timeout: Duration::from_secs(env_parse("CHAT_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)),
            retry,
            publish_failure,
            history_limit,
        })
    }

    /// Room-scoped destination the session subscribes to.
    #[must_use]
    pub fn inbound_destination(&self, room_id: &str) -> String {
        format!("{}{room_id}", self.subscribe_prefix)
    }
}

/// Value of `key`, or `None` when unset or blank.
pub fn env_string(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

/// Parsed value of `key`, or `default` when unset, blank, or unparsable.
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    match env_string(key).map(|v| v.trim().parse::<T>()) {
        Some(Ok(value)) => value,
        _ => default,
    }
}

fn parse_publish_failure(raw: Option<&str>, retry_attempts: u32) -> Result<PublishFailurePolicy, ChatError> {
    match raw.unwrap_or("notify") {
        "notify" => Ok(PublishFailurePolicy::Notify),
        "ignore" => Ok(PublishFailurePolicy::Ignore),
        "retry" => Ok(PublishFailurePolicy::Retry { attempts: retry_attempts }),
        other => Err(ChatError::Config(format!(
            "unknown CHAT_PUBLISH_FAILURE '{other}' (expected 'notify', 'ignore' or 'retry')"
        ))),
    }
}
