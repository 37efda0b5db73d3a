//! Terminal rendering for session updates.

use chat::{DisplayMessage, RoomIdentity, SessionPhase, SessionUpdate};

#[cfg(test)]
#[path = "render_test.rs"]
mod render_test;

/// `[HH:MM] sender: text`, with the user's own messages marked.
pub fn message_line(display: &DisplayMessage) -> String {
    let own = if display.is_own { " (you)" } else { "" };
    format!(
        "[{}] {}{own}: {}",
        display.display_time(),
        display.message.sender,
        display.message.message
    )
}

pub fn phase_line(phase: SessionPhase, identity: &RoomIdentity) -> String {
    match phase {
        SessionPhase::Connecting => format!("-- connecting to room {}", identity.room_id),
        SessionPhase::Reconnecting { attempt } => format!("-- connection lost, retrying (attempt {attempt})"),
        SessionPhase::Subscribed => format!("-- joined room {} as {}", identity.room_id, identity.sender),
        SessionPhase::Disconnected => "-- disconnected".to_owned(),
    }
}

/// Line to print for an update. Dropped payloads are only logged.
pub fn update_line(update: &SessionUpdate, identity: &RoomIdentity) -> Option<String> {
    match update {
        SessionUpdate::Phase(phase) => Some(phase_line(*phase, identity)),
        SessionUpdate::Message(display) => Some(message_line(display)),
        SessionUpdate::Notice(error) => Some(format!("!! {}: {error}", error.code())),
        SessionUpdate::Dropped(_) => None,
    }
}

pub fn not_sent(phase: SessionPhase) -> String {
    match phase {
        SessionPhase::Subscribed => "!! message not sent".to_owned(),
        _ => "!! not connected yet, message not sent".to_owned(),
    }
}

pub fn left(identity: &RoomIdentity) -> String {
    format!("-- left room {}", identity.room_id)
}
