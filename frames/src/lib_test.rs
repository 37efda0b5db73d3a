use super::*;

fn send_frame() -> Frame {
    Frame::new(Command::Send)
        .with_header("destination", "/api/chat/pub/chat/message")
        .with_header(CONTENT_TYPE, "application/json")
        .with_body(r#"{"type":"ENTER","roomId":"room-42","sender":"alice","message":"hello"}"#)
}

#[test]
fn command_spelling_round_trips() {
    for command in [
        Command::Connect,
        Command::Stomp,
        Command::Connected,
        Command::Send,
        Command::Subscribe,
        Command::Unsubscribe,
        Command::Ack,
        Command::Nack,
        Command::Begin,
        Command::Commit,
        Command::Abort,
        Command::Disconnect,
        Command::Message,
        Command::Receipt,
        Command::Error,
    ] {
        assert_eq!(command.as_str().parse::<Command>().expect("command"), command);
    }
}

#[test]
fn command_parse_rejects_lowercase() {
    let err = "send".parse::<Command>().expect_err("lowercase should fail");
    assert_eq!(err, CodecError::UnknownCommand("send".to_owned()));
}

#[test]
fn encode_frame_emits_content_length_and_nul() {
    let text = encode_frame(&send_frame());
    assert!(text.starts_with("SEND\ndestination:/api/chat/pub/chat/message\n"));
    assert!(text.contains("content-length:70\n\n{"));
    assert!(text.ends_with("}\0"));
}

#[test]
fn encode_frame_without_body_has_no_content_length() {
    let frame = Frame::new(Command::Disconnect).with_header("receipt", "r-1");
    assert_eq!(encode_frame(&frame), "DISCONNECT\nreceipt:r-1\n\n\0");
}

#[test]
fn encode_decode_round_trip_preserves_frame() {
    let frame = send_frame();
    let decoded = decode_frame(&encode_frame(&frame)).expect("decode");
    assert_eq!(decoded.command, Command::Send);
    assert_eq!(decoded.header("destination"), Some("/api/chat/pub/chat/message"));
    assert_eq!(decoded.body, frame.body);
}

#[test]
fn header_values_are_escaped_outside_connect() {
    let frame = Frame::new(Command::Message).with_header("note", "a:b\nc\\d");
    let text = encode_frame(&frame);
    assert!(text.contains("note:a\\cb\\nc\\\\d\n"));
    let decoded = decode_frame(&text).expect("decode");
    assert_eq!(decoded.header("note"), Some("a:b\nc\\d"));
}

#[test]
fn connect_headers_are_not_escaped() {
    let frame = Frame::new(Command::Connect).with_header("host", "localhost:8080");
    let text = encode_frame(&frame);
    assert!(text.contains("host:localhost:8080\n"));
    let decoded = decode_frame(&text).expect("decode");
    assert_eq!(decoded.header("host"), Some("localhost:8080"));
}

#[test]
fn decode_accepts_crlf_and_leading_heartbeats() {
    let text = "\n\r\nCONNECTED\r\nversion:1.2\r\nheart-beat:0,0\r\n\r\n\0\n";
    let frame = decode_frame(text).expect("decode");
    assert_eq!(frame.command, Command::Connected);
    assert_eq!(frame.header("version"), Some("1.2"));
    assert_eq!(frame.header("heart-beat"), Some("0,0"));
    assert!(frame.body.is_empty());
}

#[test]
fn decode_uses_first_of_repeated_headers() {
    let text = "MESSAGE\nfoo:first\nfoo:second\n\n\0";
    let frame = decode_frame(text).expect("decode");
    assert_eq!(frame.header("foo"), Some("first"));
    assert_eq!(frame.headers.len(), 2);
}

#[test]
fn decode_honours_content_length_with_embedded_nul() {
    let text = "MESSAGE\ncontent-length:3\n\na\0b\0";
    let frame = decode_frame(text).expect("decode");
    assert_eq!(frame.body, "a\0b");
}

#[test]
fn decode_rejects_content_length_past_end() {
    let err = decode_frame("MESSAGE\ncontent-length:10\n\nabc\0").expect_err("should fail");
    assert!(matches!(err, CodecError::InvalidContentLength(_)));
}

#[test]
fn decode_rejects_non_numeric_content_length() {
    let err = decode_frame("MESSAGE\ncontent-length:ten\n\nabc\0").expect_err("should fail");
    assert_eq!(err, CodecError::InvalidContentLength("ten".to_owned()));
}

#[test]
fn decode_rejects_missing_terminator() {
    let err = decode_frame("SEND\ndestination:/x\n\nbody").expect_err("should fail");
    assert_eq!(err, CodecError::MissingTerminator);
}

#[test]
fn decode_rejects_header_without_colon() {
    let err = decode_frame("SEND\nnot-a-header\n\n\0").expect_err("should fail");
    assert_eq!(err, CodecError::MalformedHeader("not-a-header".to_owned()));
}

#[test]
fn decode_rejects_undefined_escape() {
    let err = decode_frame("MESSAGE\nfoo:bad\\t\n\n\0").expect_err("should fail");
    assert!(matches!(err, CodecError::InvalidEscape(_)));
}

#[test]
fn decode_rejects_unknown_command() {
    let err = decode_frame("PUBLISH\n\n\0").expect_err("should fail");
    assert_eq!(err, CodecError::UnknownCommand("PUBLISH".to_owned()));
}

#[test]
fn decode_frame_rejects_eol_only_input() {
    assert_eq!(decode_frame("\n\n").expect_err("empty"), CodecError::Empty);
    assert_eq!(decode_frame("").expect_err("empty"), CodecError::Empty);
}

#[test]
fn decode_frame_rejects_second_frame() {
    let text = format!("{}{}", encode_frame(&send_frame()), encode_frame(&send_frame()));
    assert_eq!(decode_frame(&text).expect_err("two frames"), CodecError::TrailingData);
}

#[test]
fn decode_frames_splits_batched_message() {
    let receipt = Frame::new(Command::Receipt).with_header("receipt-id", "r-7");
    let text = format!("{}\n{}", encode_frame(&send_frame()), encode_frame(&receipt));
    let frames = decode_frames(&text).expect("decode");
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].command, Command::Send);
    assert_eq!(frames[1].header("receipt-id"), Some("r-7"));
}

#[test]
fn decode_frames_of_heartbeat_is_empty() {
    assert!(decode_frames("\n").expect("heartbeat").is_empty());
}

#[test]
fn heartbeat_detection() {
    assert!(is_heartbeat("\n"));
    assert!(is_heartbeat("\r\n\n"));
    assert!(!is_heartbeat(""));
    assert!(!is_heartbeat("MESSAGE\n\n\0"));
}
