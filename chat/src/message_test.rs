use super::*;
use time::macros::datetime;

#[test]
fn encode_message_uses_wire_field_names() {
    let msg = ChatMessage::enter("room-42", "alice", "hello");
    let value: serde_json::Value = serde_json::from_str(&encode_message(&msg)).expect("json");
    assert_eq!(
        value,
        serde_json::json!({"type":"ENTER","roomId":"room-42","sender":"alice","message":"hello"})
    );
}

#[test]
fn decode_message_round_trips_all_types() {
    for kind in [MessageType::Enter, MessageType::Talk, MessageType::Quit] {
        let msg = ChatMessage { kind, room_id: "r".into(), sender: "s".into(), message: "m \"quoted\"\n".into() };
        assert_eq!(decode_message(&encode_message(&msg)).expect("decode"), msg);
    }
}

#[test]
fn decode_message_rejects_unknown_type() {
    let err = decode_message(r#"{"type":"SHOUT","roomId":"r","sender":"s","message":"m"}"#)
        .expect_err("unknown type");
    assert_eq!(err.code(), "E_CHAT_DECODE");
}

#[test]
fn decode_message_rejects_missing_field() {
    let err = decode_message(r#"{"type":"ENTER","roomId":"r","sender":"s"}"#).expect_err("missing message");
    assert!(matches!(err, ChatError::Decode(_)));
}

#[test]
fn decode_message_ignores_extra_fields() {
    let message = decode_message(r#"{"type":"TALK","roomId":"r","sender":"s","message":"m","sentAt":"12:00"}"#)
        .expect("extra field tolerated");
    assert_eq!(message.kind, MessageType::Talk);
    assert_eq!(message.message, "m");
}

#[test]
fn decode_message_rejects_non_json() {
    assert!(matches!(decode_message("hello"), Err(ChatError::Decode(_))));
}

#[test]
fn display_message_marks_own_sender() {
    let at = datetime!(2026-10-15 23:00 UTC);
    let own = DisplayMessage::from_received(ChatMessage::enter("r", "alice", "hi"), "alice", at);
    let other = DisplayMessage::from_received(ChatMessage::enter("r", "bob", "hi"), "alice", at);
    assert!(own.is_own);
    assert!(!other.is_own);
}

#[test]
fn display_time_renders_hours_and_minutes() {
    let at = datetime!(2026-10-15 09:05:59 UTC);
    let display = DisplayMessage::from_received(ChatMessage::enter("r", "bob", "hi"), "alice", at);
    assert_eq!(display.display_time(), "09:05");
}
