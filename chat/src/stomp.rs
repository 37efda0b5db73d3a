//! STOMP 1.2 broker over WebSocket.
//!
//! DESIGN
//! ======
//! One [`StompConnection`] wraps one `tokio-tungstenite` stream. The
//! handshake (`CONNECT` → `CONNECTED`) completes inside
//! [`StompBroker::connect`]; after that the connection is driven entirely by
//! the session through the [`Connection`] trait.
//!
//! Inbound transport messages may carry several frames. They are decoded
//! into an [`Inbox`] and handed out one delivery at a time, so
//! [`Connection::next_delivery`] only ever awaits `stream.next()`, which is
//! cancel-safe.
//!
//! HEART-BEATS
//! ===========
//! Negotiated per STOMP 1.2: outgoing every `max(cx, sy)`, incoming expected
//! every `max(cy, sx)`, zero on either side disables that direction. Silence
//! for twice the incoming window counts as a lost connection. The deadline is
//! measured from the last stream item, not from the start of a
//! `next_delivery` call, since the session drops that future whenever it
//! sends.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use frames::{CONTENT_TYPE, Command, Frame, decode_frames, encode_frame, is_heartbeat};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::broker::{Broker, Connection, Delivery};
use crate::config::{env_parse, env_string};
use crate::error::ChatError;

#[cfg(test)]
#[path = "stomp_test.rs"]
mod stomp_test;

pub const DEFAULT_STOMP_URL: &str = "ws://127.0.0.1:3000/api/chat/ws";
pub const DEFAULT_HEARTBEAT_MS: u64 = 10_000;

/// WebSocket subprotocols offered during the upgrade, most preferred first.
pub const STOMP_SUBPROTOCOLS: &str = "v12.stomp, v11.stomp, v10.stomp";

const ACCEPT_VERSION: &str = "1.2,1.1,1.0";
const JSON: &str = "application/json";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// CONFIG
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompConfig {
    /// WebSocket endpoint, `ws://` or `wss://`.
    pub url: String,
    /// Virtual host for the `CONNECT` frame; defaults to the URL's host.
    pub host: Option<String>,
    pub login: Option<String>,
    pub passcode: Option<String>,
    /// Heart-beat the client offers to send. Zero disables.
    pub heartbeat_out: Duration,
    /// Heart-beat the client wants to receive. Zero disables.
    pub heartbeat_in: Duration,
}

impl Default for StompConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_STOMP_URL.to_owned(),
            host: None,
            login: None,
            passcode: None,
            heartbeat_out: Duration::from_millis(DEFAULT_HEARTBEAT_MS),
            heartbeat_in: Duration::from_millis(DEFAULT_HEARTBEAT_MS),
        }
    }
}

impl StompConfig {
    /// Build broker config from environment variables.
    ///
    /// Optional:
    /// - `STOMP_URL`: default `ws://127.0.0.1:3000/api/chat/ws`
    /// - `STOMP_HOST`: default is the host part of `STOMP_URL`
    /// - `STOMP_LOGIN`, `STOMP_PASSCODE`: sent only when set
    /// - `STOMP_HEARTBEAT_OUT_MS`, `STOMP_HEARTBEAT_IN_MS`: default 10000
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            url: env_string("STOMP_URL").unwrap_or_else(|| DEFAULT_STOMP_URL.to_owned()),
            host: env_string("STOMP_HOST"),
            login: env_string("STOMP_LOGIN"),
            passcode: env_string("STOMP_PASSCODE"),
            heartbeat_out: Duration::from_millis(env_parse("STOMP_HEARTBEAT_OUT_MS", DEFAULT_HEARTBEAT_MS)),
            heartbeat_in: Duration::from_millis(env_parse("STOMP_HEARTBEAT_IN_MS", DEFAULT_HEARTBEAT_MS)),
        }
    }

    #[must_use]
    pub fn with_url(url: impl Into<String>) -> Self {
        Self { url: url.into(), ..Self::default() }
    }

    fn virtual_host(&self) -> &str {
        self.host.as_deref().unwrap_or_else(|| authority_host(&self.url))
    }
}

/// Host portion of a WebSocket URL, without scheme, port, or path.
fn authority_host(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split(['/', '?']).next().unwrap_or(rest);
    let authority = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    authority.rsplit_once(':').map_or(authority, |(host, _)| host)
}

// =============================================================================
// HEART-BEAT NEGOTIATION
// =============================================================================

/// Negotiated heart-beat directions. `None` means disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Heartbeat {
    pub outgoing: Option<Duration>,
    pub incoming: Option<Duration>,
}

/// Combine the client's offer with the server's `heart-beat` header.
///
/// A missing or malformed header is treated as `0,0`.
#[must_use]
pub fn negotiate_heartbeat(client_out: Duration, client_in: Duration, server: Option<&str>) -> Heartbeat {
    let (server_out, server_in) = server.and_then(parse_heartbeat).unwrap_or((Duration::ZERO, Duration::ZERO));
    Heartbeat {
        outgoing: combine(client_out, server_in),
        incoming: combine(client_in, server_out),
    }
}

fn combine(ours: Duration, theirs: Duration) -> Option<Duration> {
    if ours.is_zero() || theirs.is_zero() {
        None
    } else {
        Some(ours.max(theirs))
    }
}

fn parse_heartbeat(value: &str) -> Option<(Duration, Duration)> {
    let (out, inc) = value.split_once(',')?;
    match (out.trim().parse::<u64>(), inc.trim().parse::<u64>()) {
        (Ok(out), Ok(inc)) => Some((Duration::from_millis(out), Duration::from_millis(inc))),
        _ => None,
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// =============================================================================
// FRAMES
// =============================================================================

fn connect_frame(config: &StompConfig) -> Frame {
    let mut frame = Frame::new(Command::Connect)
        .with_header("accept-version", ACCEPT_VERSION)
        .with_header("host", config.virtual_host())
        .with_header(
            "heart-beat",
            format!("{},{}", millis(config.heartbeat_out), millis(config.heartbeat_in)),
        );
    if let Some(login) = &config.login {
        frame = frame.with_header("login", login);
    }
    if let Some(passcode) = &config.passcode {
        frame = frame.with_header("passcode", passcode);
    }
    frame
}

fn subscribe_frame(id: &str, destination: &str) -> Frame {
    Frame::new(Command::Subscribe)
        .with_header("id", id)
        .with_header("destination", destination)
        .with_header("ack", "auto")
}

fn send_frame(destination: &str, body: &str) -> Frame {
    Frame::new(Command::Send)
        .with_header("destination", destination)
        .with_header(CONTENT_TYPE, JSON)
        .with_body(body)
}

fn text(payload: String) -> Message {
    Message::Text(payload.into())
}

/// Summary of an `ERROR` frame for logs and notices.
fn error_summary(frame: &Frame) -> String {
    match (frame.header("message"), frame.body.trim()) {
        (Some(message), "") => message.to_owned(),
        (Some(message), body) => format!("{message}: {body}"),
        (None, "") => "broker sent ERROR".to_owned(),
        (None, body) => body.to_owned(),
    }
}

// =============================================================================
// INBOX
// =============================================================================

/// Deliveries decoded from transport messages but not yet handed out.
#[derive(Debug, Default)]
struct Inbox {
    pending: VecDeque<Delivery>,
    lost: bool,
}

impl Inbox {
    /// Decode one transport message. `ERROR` frames mark the connection lost
    /// after any deliveries that preceded them.
    fn absorb(&mut self, payload: &str) {
        if is_heartbeat(payload) {
            return;
        }
        let frames = match decode_frames(payload) {
            Ok(frames) => frames,
            Err(error) => {
                warn!(error = %error, "stomp: undecodable transport message");
                return;
            }
        };
        for frame in frames {
            match frame.command {
                Command::Message => {
                    let destination = frame.header("destination").unwrap_or_default().to_owned();
                    self.pending.push_back(Delivery { destination, body: frame.body });
                }
                Command::Receipt => {
                    debug!(receipt = frame.header("receipt-id").unwrap_or_default(), "stomp: receipt");
                }
                Command::Error => {
                    warn!(error = %error_summary(&frame), "stomp: broker error");
                    self.lost = true;
                }
                other => debug!(command = %other, "stomp: ignoring frame"),
            }
        }
    }

    fn pop(&mut self) -> Option<Delivery> {
        self.pending.pop_front()
    }
}

// =============================================================================
// BROKER
// =============================================================================

/// Opens STOMP connections to one WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct StompBroker {
    config: StompConfig,
}

impl StompBroker {
    #[must_use]
    pub fn new(config: StompConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &StompConfig {
        &self.config
    }
}

#[async_trait]
impl Broker for StompBroker {
    async fn connect(&self) -> Result<Box<dyn Connection>, ChatError> {
        let connection = StompConnection::open(&self.config).await?;
        Ok(Box::new(connection))
    }
}

// =============================================================================
// CONNECTION
// =============================================================================

pub struct StompConnection {
    stream: WsStream,
    inbox: Inbox,
    heartbeat: Heartbeat,
    /// When the broker was last heard from.
    last_seen: Instant,
    next_subscription: u64,
    closed: bool,
}

impl StompConnection {
    /// Upgrade to WebSocket and complete the STOMP handshake.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Connection`] if the upgrade fails, the broker
    /// answers `ERROR`, or the socket closes before `CONNECTED`.
    pub async fn open(config: &StompConfig) -> Result<Self, ChatError> {
        let mut request = config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ChatError::Connection(format!("invalid url {}: {e}", config.url)))?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(STOMP_SUBPROTOCOLS));

        let (mut stream, _response) = connect_async(request)
            .await
            .map_err(|e| ChatError::Connection(format!("websocket connect to {}: {e}", config.url)))?;

        stream
            .send(text(encode_frame(&connect_frame(config))))
            .await
            .map_err(|e| ChatError::Connection(format!("send CONNECT: {e}")))?;

        let connected = await_connected(&mut stream).await?;
        let heartbeat = negotiate_heartbeat(config.heartbeat_out, config.heartbeat_in, connected.header("heart-beat"));
        info!(
            url = %config.url,
            version = connected.header("version").unwrap_or("1.0"),
            heartbeat_out_ms = heartbeat.outgoing.map_or(0, millis),
            heartbeat_in_ms = heartbeat.incoming.map_or(0, millis),
            "stomp: connected"
        );

        Ok(Self {
            stream,
            inbox: Inbox::default(),
            heartbeat,
            last_seen: Instant::now(),
            next_subscription: 0,
            closed: false,
        })
    }

    async fn write(&mut self, frame: &Frame) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        self.stream.send(text(encode_frame(frame))).await
    }
}

async fn await_connected(stream: &mut WsStream) -> Result<Frame, ChatError> {
    while let Some(message) = stream.next().await {
        let payload = match message {
            Ok(Message::Text(payload)) => payload,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => return Err(ChatError::Connection(format!("handshake: {e}"))),
        };
        if is_heartbeat(payload.as_str()) {
            continue;
        }
        for frame in decode_frames(payload.as_str())? {
            match frame.command {
                Command::Connected => return Ok(frame),
                Command::Error => return Err(ChatError::Connection(error_summary(&frame))),
                other => debug!(command = %other, "stomp: frame before CONNECTED ignored"),
            }
        }
    }
    Err(ChatError::Connection("socket closed before CONNECTED".to_owned()))
}

#[async_trait]
impl Connection for StompConnection {
    async fn subscribe(&mut self, destination: &str) -> Result<(), ChatError> {
        self.next_subscription += 1;
        let id = format!("sub-{}", self.next_subscription);
        self.write(&subscribe_frame(&id, destination))
            .await
            .map_err(|e| ChatError::Connection(format!("subscribe {destination}: {e}")))?;
        debug!(%id, %destination, "stomp: subscribed");
        Ok(())
    }

    async fn publish(&mut self, destination: &str, body: &str) -> Result<(), ChatError> {
        if self.closed || self.inbox.lost {
            return Err(ChatError::Publish { destination: destination.to_owned(), reason: "connection closed".to_owned() });
        }
        self.write(&send_frame(destination, body))
            .await
            .map_err(|e| ChatError::Publish { destination: destination.to_owned(), reason: e.to_string() })
    }

    async fn next_delivery(&mut self) -> Option<Delivery> {
        loop {
            if let Some(delivery) = self.inbox.pop() {
                return Some(delivery);
            }
            if self.closed || self.inbox.lost {
                return None;
            }

            let deadline = self
                .heartbeat
                .incoming
                .and_then(|window| self.last_seen.checked_add(window.saturating_mul(2)));
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, self.stream.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(
                            window_ms = self.heartbeat.incoming.map_or(0, millis),
                            "stomp: broker heart-beat missed"
                        );
                        self.inbox.lost = true;
                        continue;
                    }
                },
                None => self.stream.next().await,
            };
            self.last_seen = Instant::now();

            match next {
                Some(Ok(Message::Text(payload))) => self.inbox.absorb(payload.as_str()),
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "stomp: socket closed by broker");
                    self.inbox.lost = true;
                }
                // Ping, pong and binary traffic only count as liveness.
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    warn!(error = %error, "stomp: socket error");
                    self.inbox.lost = true;
                }
                None => self.inbox.lost = true,
            }
        }
    }

    fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat.outgoing
    }

    async fn send_heartbeat(&mut self) -> Result<(), ChatError> {
        self.stream
            .send(text("\n".to_owned()))
            .await
            .map_err(|e| ChatError::Connection(format!("heart-beat: {e}")))
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if !self.inbox.lost {
            if let Err(error) = self.write(&Frame::new(Command::Disconnect)).await {
                debug!(error = %error, "stomp: DISCONNECT not sent");
            }
        }
        if let Err(error) = self.stream.close(None).await {
            debug!(error = %error, "stomp: socket close");
        }
    }
}
