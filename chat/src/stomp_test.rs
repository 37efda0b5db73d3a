use super::*;

const ROOM: &str = "/api/chat/sub/chat/room/room-42";

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn message(destination: &str, body: &str) -> String {
    encode_frame(
        &Frame::new(Command::Message)
            .with_header("destination", destination)
            .with_header("subscription", "sub-1")
            .with_header("message-id", "m-1")
            .with_body(body),
    )
}

unsafe fn clear_stomp_env() {
    unsafe {
        for key in [
            "STOMP_URL",
            "STOMP_HOST",
            "STOMP_LOGIN",
            "STOMP_PASSCODE",
            "STOMP_HEARTBEAT_OUT_MS",
            "STOMP_HEARTBEAT_IN_MS",
        ] {
            std::env::remove_var(key);
        }
    }
}

// =============================================================
// Heart-beat negotiation
// =============================================================

#[test]
fn negotiate_takes_the_slower_side() {
    let hb = negotiate_heartbeat(ms(10_000), ms(10_000), Some("5000,20000"));
    assert_eq!(hb.outgoing, Some(ms(20_000)));
    assert_eq!(hb.incoming, Some(ms(10_000)));
}

#[test]
fn negotiate_zero_on_either_side_disables() {
    let hb = negotiate_heartbeat(ms(10_000), ms(0), Some("0,4000"));
    assert_eq!(hb.outgoing, Some(ms(10_000)));
    assert_eq!(hb.incoming, None);

    let hb = negotiate_heartbeat(ms(10_000), ms(10_000), Some("0,0"));
    assert_eq!(hb, Heartbeat::default());
}

#[test]
fn negotiate_missing_or_malformed_header_disables() {
    assert_eq!(negotiate_heartbeat(ms(1000), ms(1000), None), Heartbeat::default());
    assert_eq!(negotiate_heartbeat(ms(1000), ms(1000), Some("fast")), Heartbeat::default());
    assert_eq!(negotiate_heartbeat(ms(1000), ms(1000), Some("10,x")), Heartbeat::default());
}

#[test]
fn negotiate_tolerates_spaces() {
    let hb = negotiate_heartbeat(ms(1000), ms(1000), Some(" 3000 , 2000 "));
    assert_eq!(hb.outgoing, Some(ms(2000)));
    assert_eq!(hb.incoming, Some(ms(3000)));
}

// =============================================================
// Outbound frames
// =============================================================

#[test]
fn connect_frame_offers_versions_host_and_heartbeat() {
    let config = StompConfig::with_url("wss://chat.example.com:8443/api/chat/ws");
    let frame = connect_frame(&config);
    assert_eq!(frame.command, Command::Connect);
    assert_eq!(frame.header("accept-version"), Some("1.2,1.1,1.0"));
    assert_eq!(frame.header("host"), Some("chat.example.com"));
    assert_eq!(frame.header("heart-beat"), Some("10000,10000"));
    assert_eq!(frame.header("login"), None);
}

#[test]
fn connect_frame_carries_credentials_and_explicit_host() {
    let config = StompConfig {
        host: Some("vhost-a".into()),
        login: Some("guest".into()),
        passcode: Some("secret".into()),
        heartbeat_out: Duration::ZERO,
        ..StompConfig::default()
    };
    let frame = connect_frame(&config);
    assert_eq!(frame.header("host"), Some("vhost-a"));
    assert_eq!(frame.header("login"), Some("guest"));
    assert_eq!(frame.header("passcode"), Some("secret"));
    assert_eq!(frame.header("heart-beat"), Some("0,10000"));
}

#[test]
fn subscribe_frame_uses_auto_ack() {
    let frame = subscribe_frame("sub-3", ROOM);
    assert_eq!(frame.command, Command::Subscribe);
    assert_eq!(frame.header("id"), Some("sub-3"));
    assert_eq!(frame.header("destination"), Some(ROOM));
    assert_eq!(frame.header("ack"), Some("auto"));
}

#[test]
fn send_frame_is_json_with_length() {
    let body = r#"{"type":"ENTER","roomId":"room-42","sender":"alice","message":"hello"}"#;
    let wire = encode_frame(&send_frame("/api/chat/pub/chat/message", body));
    let frame = frames::decode_frame(&wire).expect("decodes");
    assert_eq!(frame.header("content-type"), Some("application/json"));
    assert_eq!(frame.header("content-length"), Some("70"));
    assert_eq!(frame.body, body);
}

#[test]
fn authority_host_strips_scheme_port_and_path() {
    assert_eq!(authority_host("ws://127.0.0.1:3000/api/chat/ws"), "127.0.0.1");
    assert_eq!(authority_host("wss://chat.example.com/ws?x=1"), "chat.example.com");
    assert_eq!(authority_host("ws://user@broker:61614"), "broker");
    assert_eq!(authority_host("localhost"), "localhost");
}

#[test]
fn error_summary_combines_header_and_body() {
    let frame = Frame::new(Command::Error).with_header("message", "bad destination").with_body("no such room");
    assert_eq!(error_summary(&frame), "bad destination: no such room");
    assert_eq!(error_summary(&Frame::new(Command::Error)), "broker sent ERROR");
}

// =============================================================
// Inbox
// =============================================================

#[test]
fn inbox_yields_message_frames_in_order() {
    let mut inbox = Inbox::default();
    let batch = format!("{}{}", message(ROOM, "first"), message(ROOM, "second"));
    inbox.absorb(&batch);
    inbox.absorb(&message(ROOM, "third"));

    let bodies: Vec<String> = std::iter::from_fn(|| inbox.pop()).map(|d| d.body).collect();
    assert_eq!(bodies, ["first", "second", "third"]);
    assert!(!inbox.lost);
}

#[test]
fn inbox_keeps_destination() {
    let mut inbox = Inbox::default();
    inbox.absorb(&message(ROOM, "x"));
    assert_eq!(inbox.pop().expect("delivery").destination, ROOM);
}

#[test]
fn inbox_ignores_heartbeats_receipts_and_garbage() {
    let mut inbox = Inbox::default();
    inbox.absorb("\n");
    inbox.absorb("\r\n\r\n");
    inbox.absorb(&encode_frame(&Frame::new(Command::Receipt).with_header("receipt-id", "77")));
    inbox.absorb("NOT-A-COMMAND\n\n\0");
    assert!(inbox.pop().is_none());
    assert!(!inbox.lost);
}

#[test]
fn inbox_error_marks_lost_after_earlier_messages() {
    let mut inbox = Inbox::default();
    let error = encode_frame(&Frame::new(Command::Error).with_header("message", "kicked"));
    inbox.absorb(&format!("{}{error}", message(ROOM, "last words")));

    assert!(inbox.lost);
    assert_eq!(inbox.pop().expect("delivery").body, "last words");
    assert!(inbox.pop().is_none());
}

// =============================================================
// Config
// =============================================================

#[test]
fn from_env_defaults_and_overrides() {
    unsafe { clear_stomp_env() };
    let config = StompConfig::from_env();
    assert_eq!(config, StompConfig::default());
    assert_eq!(config.virtual_host(), "127.0.0.1");

    unsafe {
        std::env::set_var("STOMP_URL", "ws://relay:9000/api/chat/ws");
        std::env::set_var("STOMP_LOGIN", "guest");
        std::env::set_var("STOMP_HEARTBEAT_OUT_MS", "0");
        std::env::set_var("STOMP_HEARTBEAT_IN_MS", "not-a-number");
    }
    let config = StompConfig::from_env();
    unsafe { clear_stomp_env() };

    assert_eq!(config.url, "ws://relay:9000/api/chat/ws");
    assert_eq!(config.virtual_host(), "relay");
    assert_eq!(config.login.as_deref(), Some("guest"));
    assert_eq!(config.passcode, None);
    assert_eq!(config.heartbeat_out, Duration::ZERO);
    assert_eq!(config.heartbeat_in, ms(DEFAULT_HEARTBEAT_MS));
}

// =============================================================
// Liveness
// =============================================================

/// Accepts one client, answers `CONNECTED` with `heart-beat:100,100`, then
/// reads everything and never writes again.
async fn silent_broker() -> String {
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("ws://{}/api/chat/ws", listener.local_addr().expect("local addr"));
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.expect("accept");
        let echo_protocol = |_request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
            response.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("v12.stomp"));
            Ok(response)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(tcp, echo_protocol).await.expect("upgrade");

        let connect = ws.next().await.expect("CONNECT").expect("CONNECT readable");
        assert!(connect.to_text().expect("text frame").starts_with("CONNECT"));
        let connected = Frame::new(Command::Connected)
            .with_header("version", "1.2")
            .with_header("heart-beat", "100,100");
        ws.send(text(encode_frame(&connected))).await.expect("send CONNECTED");

        while let Some(Ok(_)) = ws.next().await {}
    });
    url
}

#[tokio::test]
async fn silent_broker_is_lost_while_client_heartbeats_flow() {
    use crate::config::{RoomIdentity, SessionConfig};
    use crate::retry::RetryPolicy;
    use crate::session::ChatSession;
    use crate::state::SessionPhase;
    use std::sync::Arc;

    let url = silent_broker().await;
    let stomp = StompConfig { heartbeat_out: ms(100), heartbeat_in: ms(100), ..StompConfig::with_url(url) };
    let config = SessionConfig { retry: RetryPolicy::none(), ..SessionConfig::default() };
    let mut session =
        ChatSession::activate(config, RoomIdentity::new(Some("room-42"), "alice"), Arc::new(StompBroker::new(stomp)));

    let reached = tokio::time::timeout(Duration::from_secs(3), session.wait_for_phase(SessionPhase::Disconnected))
        .await
        .expect("silent broker was never detected");
    assert!(reached);
    assert!(session.state().notices().any(|notice| *notice == ChatError::Closed));
}

#[tokio::test]
async fn silence_deadline_survives_dropped_delivery_futures() {
    let url = silent_broker().await;
    let config = StompConfig { heartbeat_out: ms(100), heartbeat_in: ms(100), ..StompConfig::with_url(url) };
    let mut connection = StompConnection::open(&config).await.expect("handshake");
    assert_eq!(connection.heartbeat_interval(), Some(ms(100)));

    // Poll in short slices, the way the session does between heart-beats.
    let lost = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if let Ok(delivery) = tokio::time::timeout(ms(50), connection.next_delivery()).await {
                return delivery;
            }
            connection.send_heartbeat().await.expect("heart-beat sent");
        }
    })
    .await
    .expect("silence never ended the connection");
    assert!(lost.is_none());

    connection.close().await;
}
