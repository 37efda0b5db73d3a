//! Room-scoped realtime chat over a publish-subscribe broker.
//!
//! SYSTEM CONTEXT
//! ==============
//! A [`ChatSession`] owns one broker connection bound to one room. It
//! subscribes to the room's inbound destination, turns inbound payloads into
//! an ordered display list, and publishes the user's draft to the shared
//! outbound destination. The production broker is STOMP over WebSocket
//! ([`stomp::StompBroker`]); anything implementing [`Broker`] can stand in.
//!
//! LAYERS
//! ======
//! - [`state`]: pure session state machine (phase, messages, draft).
//! - [`session`]: the async driver task and the handle hosts interact with.
//! - [`broker`]: the connection seam.
//! - [`stomp`]: STOMP 1.2 client over `tokio-tungstenite`.
//! - [`message`]: the JSON wire payload and display model.

pub mod broker;
pub mod config;
pub mod error;
pub mod message;
pub mod retry;
pub mod session;
pub mod state;
pub mod stomp;

pub use broker::{Broker, Connection, Delivery};
pub use config::{PublishFailurePolicy, RoomIdentity, SessionConfig};
pub use error::ChatError;
pub use message::{ChatMessage, DisplayMessage, MessageType, decode_message, encode_message};
pub use retry::RetryPolicy;
pub use session::{ChatSession, SessionUpdate};
pub use state::{SessionPhase, SessionState};
