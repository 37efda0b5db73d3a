//! WebSocket handler: a minimal in-memory STOMP broker.
//!
//! DESIGN
//! ======
//! On upgrade the relay negotiates a `v1x.stomp` subprotocol, assigns a
//! client id, and enters a `select!` loop:
//! - Incoming text messages → decode STOMP frames → dispatch by command
//! - Frames fanned out by peers → forward to the client
//!
//! Handlers validate, mutate [`RelayState`], and return an `Outcome`; they
//! never write to the socket. A rejected frame becomes an `ERROR` frame and
//! the connection is closed after it, as STOMP requires.
//!
//! CHAT ROUTING
//! ============
//! A `SEND` to the configured publish destination must carry a chat message
//! body. The relay decodes it and delivers it on the topic for its `roomId`,
//! so clients only ever subscribe to their own room. Any other destination
//! is a plain topic.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → client sends `CONNECT`/`STOMP` → `CONNECTED` (heart-beat 0,0)
//! 2. `SUBSCRIBE` / `UNSUBSCRIBE` / `SEND` → dispatch → Outcome
//! 3. `DISCONNECT` (receipt honoured) or socket close → drop subscriptions

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use frames::{CONTENT_TYPE, Command, Frame, decode_frames, encode_frame, is_heartbeat};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::state::{CLIENT_CHANNEL_CAPACITY, RelayState};

#[cfg(test)]
#[path = "ws_test.rs"]
mod ws_test;

/// Subprotocols accepted on upgrade, most preferred first.
pub const STOMP_PROTOCOLS: [&str; 3] = ["v12.stomp", "v11.stomp", "v10.stomp"];

/// Versions this relay speaks, most preferred first.
const SUPPORTED_VERSIONS: [&str; 3] = ["1.2", "1.1", "1.0"];

const SERVER: &str = concat!("everstar-relay/", env!("CARGO_PKG_VERSION"));

// =============================================================================
// OUTCOME
// =============================================================================

/// Result of a handler. The dispatch layer owns every socket write.
enum Outcome {
    Done,
    Reply(Frame),
    /// Client asked to leave; close after any receipt.
    Close,
}

/// Frames to write back to the sender, and whether to hang up afterwards.
#[derive(Debug, Default)]
struct Reply {
    frames: Vec<Frame>,
    close: bool,
}

/// Per-connection protocol state.
struct ClientConn {
    client_id: Uuid,
    version: Option<&'static str>,
}

impl ClientConn {
    fn new() -> Self {
        Self { client_id: Uuid::new_v4(), version: None }
    }
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<RelayState>, ws: WebSocketUpgrade) -> Response {
    ws.protocols(STOMP_PROTOCOLS).on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: RelayState) {
    let mut conn = ClientConn::new();
    let client_id = conn.client_id;
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(CLIENT_CHANNEL_CAPACITY);

    info!(%client_id, protocol = ?socket.protocol(), "relay: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let reply = process_inbound_text(&state, &mut conn, &client_tx, text.as_str()).await;
                        if send_frames(&mut socket, &reply.frames).await.is_err() || reply.close {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frames(&mut socket, std::slice::from_ref(&frame)).await.is_err() {
                    break;
                }
            }
        }
    }

    let dropped = state.part(client_id).await;
    info!(%client_id, subscriptions = dropped, "relay: client disconnected");
}

async fn send_frames(socket: &mut WebSocket, frames: &[Frame]) -> Result<(), axum::Error> {
    for frame in frames {
        socket.send(Message::Text(encode_frame(frame).into())).await?;
    }
    Ok(())
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Decode one transport message, dispatch each frame, and collect the
/// frames owed to the sender.
async fn process_inbound_text(
    state: &RelayState,
    conn: &mut ClientConn,
    client_tx: &mpsc::Sender<Frame>,
    text: &str,
) -> Reply {
    let mut reply = Reply::default();
    if is_heartbeat(text) {
        return reply;
    }

    let frames = match decode_frames(text) {
        Ok(frames) => frames,
        Err(e) => {
            warn!(client_id = %conn.client_id, error = %e, "relay: undecodable frame");
            reply.frames.push(error_frame("malformed frame", &e.to_string(), None));
            reply.close = true;
            return reply;
        }
    };

    for frame in frames {
        let receipt = frame.header("receipt").map(str::to_owned);
        debug!(client_id = %conn.client_id, command = %frame.command, "relay: recv frame");

        match handle_frame(state, conn, client_tx, frame).await {
            Ok(outcome) => {
                match outcome {
                    Outcome::Done => {}
                    Outcome::Reply(frame) => reply.frames.push(frame),
                    Outcome::Close => reply.close = true,
                }
                if let Some(receipt) = receipt {
                    reply.frames.push(Frame::new(Command::Receipt).with_header("receipt-id", receipt));
                }
            }
            Err((message, detail)) => {
                warn!(client_id = %conn.client_id, %message, %detail, "relay: frame rejected");
                reply.frames.push(error_frame(message, &detail, receipt.as_deref()));
                reply.close = true;
            }
        }
        if reply.close {
            break;
        }
    }
    reply
}

/// Rejection: short `message` header plus a detail body.
type Rejection = (&'static str, String);

async fn handle_frame(
    state: &RelayState,
    conn: &mut ClientConn,
    client_tx: &mpsc::Sender<Frame>,
    frame: Frame,
) -> Result<Outcome, Rejection> {
    match frame.command {
        Command::Connect | Command::Stomp => handle_connect(conn, &frame),
        _ if conn.version.is_none() => Err(("not connected", format!("{} before CONNECT", frame.command))),
        Command::Subscribe => handle_subscribe(state, conn, client_tx, &frame).await,
        Command::Unsubscribe => handle_unsubscribe(state, conn, &frame).await,
        Command::Send => handle_send(state, conn, frame).await,
        Command::Disconnect => Ok(Outcome::Close),
        // Every subscription is ack:auto.
        Command::Ack | Command::Nack => Ok(Outcome::Done),
        Command::Begin | Command::Commit | Command::Abort => {
            Err(("unsupported", "transactions are not supported".to_owned()))
        }
        Command::Connected | Command::Message | Command::Receipt | Command::Error => {
            Err(("unexpected frame", format!("{} is a server frame", frame.command)))
        }
    }
}

fn handle_connect(conn: &mut ClientConn, frame: &Frame) -> Result<Outcome, Rejection> {
    if conn.version.is_some() {
        return Err(("already connected", "CONNECT sent twice".to_owned()));
    }
    let Some(version) = negotiate_version(frame.header("accept-version")) else {
        return Err((
            "unsupported protocol version",
            format!("supported versions are {}", SUPPORTED_VERSIONS.join(",")),
        ));
    };
    conn.version = Some(version);
    info!(client_id = %conn.client_id, version, host = frame.header("host").unwrap_or(""), "relay: stomp connected");

    Ok(Outcome::Reply(
        Frame::new(Command::Connected)
            .with_header("version", version)
            .with_header("heart-beat", "0,0")
            .with_header("session", conn.client_id.to_string())
            .with_header("server", SERVER),
    ))
}

/// Highest version both sides speak. A missing header means 1.0.
fn negotiate_version(accept: Option<&str>) -> Option<&'static str> {
    let Some(accept) = accept else {
        return Some("1.0");
    };
    let offered: Vec<&str> = accept.split(',').map(str::trim).collect();
    SUPPORTED_VERSIONS.into_iter().find(|version| offered.contains(version))
}

async fn handle_subscribe(
    state: &RelayState,
    conn: &ClientConn,
    client_tx: &mpsc::Sender<Frame>,
    frame: &Frame,
) -> Result<Outcome, Rejection> {
    let id = required(frame, "id")?;
    let destination = required(frame, "destination")?;
    state.subscribe(destination, conn.client_id, id, client_tx.clone()).await;
    info!(client_id = %conn.client_id, %id, %destination, "relay: subscribed");
    Ok(Outcome::Done)
}

async fn handle_unsubscribe(state: &RelayState, conn: &ClientConn, frame: &Frame) -> Result<Outcome, Rejection> {
    let id = required(frame, "id")?;
    if !state.unsubscribe(conn.client_id, id).await {
        debug!(client_id = %conn.client_id, %id, "relay: unsubscribe for unknown id");
    }
    Ok(Outcome::Done)
}

async fn handle_send(state: &RelayState, conn: &ClientConn, frame: Frame) -> Result<Outcome, Rejection> {
    let destination = required(&frame, "destination")?;
    let content_type = frame.header(CONTENT_TYPE);

    if destination != state.config.publish_destination {
        let delivered = state.publish(destination, &frame.body, content_type).await;
        debug!(client_id = %conn.client_id, %destination, delivered, "relay: topic send");
        return Ok(Outcome::Done);
    }

    let message = chat::decode_message(&frame.body).map_err(|e| ("malformed chat message", e.to_string()))?;
    let topic = state.config.room_topic(&message.room_id);
    let delivered = state.publish(&topic, &frame.body, content_type).await;
    info!(
        client_id = %conn.client_id,
        room_id = %message.room_id,
        sender = %message.sender,
        delivered,
        "relay: chat message routed"
    );
    Ok(Outcome::Done)
}

fn required<'a>(frame: &'a Frame, name: &'static str) -> Result<&'a str, Rejection> {
    frame
        .header(name)
        .ok_or_else(|| ("missing header", format!("{} requires '{name}'", frame.command)))
}

fn error_frame(message: &str, detail: &str, receipt: Option<&str>) -> Frame {
    let mut frame = Frame::new(Command::Error).with_header("message", message);
    if let Some(receipt) = receipt {
        frame = frame.with_header("receipt-id", receipt);
    }
    frame.with_header(CONTENT_TYPE, "text/plain").with_body(detail)
}
