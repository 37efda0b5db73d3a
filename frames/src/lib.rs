//! STOMP frame model and text codec for the realtime chat transport.
//!
//! This crate owns the wire representation shared by the `chat` client
//! library, the `cli`, and the relay server. Frames travel as WebSocket text
//! messages in the STOMP 1.2 layout:
//!
//! ```text
//! COMMAND
//! header:value
//!
//! body^@
//! ```
//!
//! DESIGN
//! ======
//! - Headers keep wire order and may repeat; lookups return the first match,
//!   which is the STOMP 1.2 rule for repeated entries.
//! - Header escaping applies to every command except `CONNECT` and
//!   `CONNECTED`, which stay raw for 1.0 compatibility.
//! - A `content-length` header is honoured on decode so bodies may contain
//!   NUL, and is emitted on encode whenever a body is present.
//! - A transport message made only of EOLs is a heart-beat, not a frame.

use std::fmt;
use std::str::FromStr;

/// Header carrying the body length in octets.
pub const CONTENT_LENGTH: &str = "content-length";

/// Header carrying the body MIME type.
pub const CONTENT_TYPE: &str = "content-type";

/// Error returned by [`decode_frame`] and [`decode_frames`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Input contained nothing but EOLs (or nothing at all).
    #[error("empty frame")]
    Empty,
    /// The command line did not name a STOMP command.
    #[error("unknown frame command: {0}")]
    UnknownCommand(String),
    /// A header line had no `:` separator.
    #[error("malformed header line: {0}")]
    MalformedHeader(String),
    /// A header contained a backslash escape outside `\\ \n \r \c`.
    #[error("invalid header escape in: {0}")]
    InvalidEscape(String),
    /// `content-length` was not a number or did not match the body.
    #[error("invalid content-length: {0}")]
    InvalidContentLength(String),
    /// The frame body was not terminated by a NUL octet.
    #[error("frame is missing its NUL terminator")]
    MissingTerminator,
    /// Non-EOL bytes followed a complete frame.
    #[error("unexpected data after frame terminator")]
    TrailingData,
}

/// STOMP 1.2 commands, client and server side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    /// Wire spelling of the command.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// `CONNECT` and `CONNECTED` frames never escape header values.
    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let command = match s {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "ACK" => Self::Ack,
            "NACK" => Self::Nack,
            "BEGIN" => Self::Begin,
            "COMMIT" => Self::Commit,
            "ABORT" => Self::Abort,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            other => return Err(CodecError::UnknownCommand(other.to_owned())),
        };
        Ok(command)
    }
}

/// A single STOMP frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    /// Headers in wire order. Repeated names are allowed.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    /// Create a frame with no headers and an empty body.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self { command, headers: Vec::new(), body: String::new() }
    }

    /// Append a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replace the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value for `name`, if present.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// True when a transport message is a heart-beat (one or more EOLs only).
#[must_use]
pub fn is_heartbeat(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c == '\n' || c == '\r')
}

/// Encode a frame into its STOMP text form, including the NUL terminator.
#[must_use]
pub fn encode_frame(frame: &Frame) -> String {
    let escape = frame.command.escapes_headers();
    let mut out = String::with_capacity(frame.body.len() + 64);
    out.push_str(frame.command.as_str());
    out.push('\n');

    for (name, value) in &frame.headers {
        if escape {
            out.push_str(&escape_header(name));
            out.push(':');
            out.push_str(&escape_header(value));
        } else {
            out.push_str(name);
            out.push(':');
            out.push_str(value);
        }
        out.push('\n');
    }

    if !frame.body.is_empty() && frame.header(CONTENT_LENGTH).is_none() {
        out.push_str(CONTENT_LENGTH);
        out.push(':');
        out.push_str(&frame.body.len().to_string());
        out.push('\n');
    }

    out.push('\n');
    out.push_str(&frame.body);
    out.push('\0');
    out
}

/// Decode exactly one frame. Leading and trailing EOLs are ignored.
///
/// # Errors
///
/// Returns [`CodecError::Empty`] for EOL-only input, [`CodecError::TrailingData`]
/// when a second frame follows, and the specific parse error otherwise.
pub fn decode_frame(input: &str) -> Result<Frame, CodecError> {
    let input = skip_eols(input);
    if input.is_empty() {
        return Err(CodecError::Empty);
    }
    let (frame, rest) = decode_one(input)?;
    if !skip_eols(rest).is_empty() {
        return Err(CodecError::TrailingData);
    }
    Ok(frame)
}

/// Decode every frame in a transport message. EOL-only input yields an
/// empty list.
///
/// # Errors
///
/// Returns the first parse error encountered; frames before it are discarded.
pub fn decode_frames(input: &str) -> Result<Vec<Frame>, CodecError> {
    let mut frames = Vec::new();
    let mut rest = skip_eols(input);
    while !rest.is_empty() {
        let (frame, tail) = decode_one(rest)?;
        frames.push(frame);
        rest = skip_eols(tail);
    }
    Ok(frames)
}

fn skip_eols(input: &str) -> &str {
    input.trim_start_matches(['\n', '\r'])
}

/// Split one line off `input`, accepting `\n` or `\r\n`.
fn take_line(input: &str) -> Option<(&str, &str)> {
    let (line, rest) = input.split_once('\n')?;
    Some((line.strip_suffix('\r').unwrap_or(line), rest))
}

fn decode_one(input: &str) -> Result<(Frame, &str), CodecError> {
    let (command_line, mut rest) = take_line(input).ok_or(CodecError::MissingTerminator)?;
    let command = command_line.parse::<Command>()?;
    let escape = command.escapes_headers();

    let mut headers = Vec::new();
    loop {
        let (line, tail) = take_line(rest).ok_or(CodecError::MissingTerminator)?;
        rest = tail;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| CodecError::MalformedHeader(line.to_owned()))?;
        if escape {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_owned(), value.to_owned()));
        }
    }

    let frame = Frame { command, headers, body: String::new() };
    let (body, tail) = match frame.header(CONTENT_LENGTH) {
        Some(raw) => {
            let len = raw
                .trim()
                .parse::<usize>()
                .map_err(|_| CodecError::InvalidContentLength(raw.to_owned()))?;
            let body = rest
                .get(..len)
                .ok_or_else(|| CodecError::InvalidContentLength(raw.to_owned()))?;
            let tail = rest[len..]
                .strip_prefix('\0')
                .ok_or_else(|| CodecError::InvalidContentLength(raw.to_owned()))?;
            (body, tail)
        }
        None => rest.split_once('\0').ok_or(CodecError::MissingTerminator)?,
    };

    Ok((Frame { body: body.to_owned(), ..frame }, tail))
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, CodecError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(CodecError::InvalidEscape(raw.to_owned())),
        }
    }
    Ok(out)
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
