//! Pure session state: phase, display list, draft, and notices.
//!
//! DESIGN
//! ======
//! Everything here is synchronous and transport-free so that the rules the
//! renderer relies on can be tested directly:
//! - the display list only grows at the tail, in receipt order;
//! - a send only produces a message when the trimmed draft is non-empty and
//!   the session is subscribed, and only then is the draft cleared;
//! - malformed payloads never reach the list.

use std::collections::VecDeque;

use time::OffsetDateTime;

use crate::config::RoomIdentity;
use crate::error::ChatError;
use crate::message::{ChatMessage, DisplayMessage, decode_message, now};

#[cfg(test)]
#[path = "state_test.rs"]
mod state_test;

/// Notices kept for the renderer; older ones fall off.
pub const MAX_NOTICES: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Disconnected,
    Connecting,
    /// Recovering after `attempt` consecutive failures: backing off, then
    /// retrying the connect.
    Reconnecting { attempt: u32 },
    Subscribed,
}

#[derive(Clone, Debug)]
pub struct SessionState {
    identity: RoomIdentity,
    phase: SessionPhase,
    messages: VecDeque<DisplayMessage>,
    history_limit: Option<usize>,
    draft: String,
    notices: VecDeque<ChatError>,
}

impl SessionState {
    #[must_use]
    pub fn new(identity: RoomIdentity, history_limit: Option<usize>) -> Self {
        Self {
            identity,
            phase: SessionPhase::Disconnected,
            messages: VecDeque::new(),
            history_limit,
            draft: String::new(),
            notices: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn identity(&self) -> &RoomIdentity {
        &self.identity
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.phase == SessionPhase::Subscribed
    }

    pub fn messages(&self) -> impl ExactSizeIterator<Item = &DisplayMessage> {
        self.messages.iter()
    }

    pub fn notices(&self) -> impl ExactSizeIterator<Item = &ChatError> {
        self.notices.iter()
    }

    #[must_use]
    pub fn draft(&self) -> &str {
        &self.draft
    }

    // -------------------------------------------------------------------------
    // Phase transitions
    // -------------------------------------------------------------------------

    pub fn begin_connect(&mut self) {
        self.phase = SessionPhase::Connecting;
    }

    pub fn mark_reconnecting(&mut self, attempt: u32) {
        self.phase = SessionPhase::Reconnecting { attempt };
    }

    pub fn mark_subscribed(&mut self) {
        self.phase = SessionPhase::Subscribed;
    }

    pub fn mark_disconnected(&mut self) {
        self.phase = SessionPhase::Disconnected;
    }

    /// Apply a phase reported by the session driver.
    pub fn apply_phase(&mut self, phase: SessionPhase) {
        match phase {
            SessionPhase::Disconnected => self.mark_disconnected(),
            SessionPhase::Connecting => self.begin_connect(),
            SessionPhase::Reconnecting { attempt } => self.mark_reconnecting(attempt),
            SessionPhase::Subscribed => self.mark_subscribed(),
        }
    }

    // -------------------------------------------------------------------------
    // Draft / outbound
    // -------------------------------------------------------------------------

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    /// Take the draft as an outbound message.
    ///
    /// Returns `None` and leaves the draft alone when it is blank or the
    /// session is not subscribed. On success the draft is cleared.
    pub fn take_outgoing(&mut self) -> Option<ChatMessage> {
        if self.draft.trim().is_empty() || !self.is_subscribed() {
            return None;
        }
        let text = std::mem::take(&mut self.draft);
        Some(ChatMessage::enter(&self.identity.room_id, &self.identity.sender, text))
    }

    // -------------------------------------------------------------------------
    // Inbound
    // -------------------------------------------------------------------------

    /// Decode a payload and append it, stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Decode`] for malformed payloads; the list is
    /// left untouched.
    pub fn receive(&mut self, payload: &str) -> Result<&DisplayMessage, ChatError> {
        self.receive_at(payload, now())
    }

    /// [`Self::receive`] with an explicit receipt time.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Decode`] for malformed payloads.
    pub fn receive_at(&mut self, payload: &str, at: OffsetDateTime) -> Result<&DisplayMessage, ChatError> {
        let message = decode_message(payload)?;
        Ok(self.push(DisplayMessage::from_received(message, &self.identity.sender, at)))
    }

    fn push(&mut self, display: DisplayMessage) -> &DisplayMessage {
        if let Some(limit) = self.history_limit {
            while self.messages.len() >= limit.max(1) {
                self.messages.pop_front();
            }
        }
        self.messages.push_back(display);
        &self.messages[self.messages.len() - 1]
    }

    pub fn record_notice(&mut self, error: ChatError) {
        if self.notices.len() >= MAX_NOTICES {
            self.notices.pop_front();
        }
        self.notices.push_back(error);
    }

    /// Drop the display list and notices. The draft is kept.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.notices.clear();
    }
}
