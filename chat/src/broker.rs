//! Broker seam: what a session needs from a publish-subscribe transport.
//!
//! A [`Connection`] is exclusively owned by one session and is never shared
//! across rooms. Implementations must make [`Connection::next_delivery`]
//! cancel-safe: the session races it against commands and shutdown, and a
//! dropped call must not lose a delivery.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ChatError;

/// One inbound message as handed over by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub destination: String,
    pub body: String,
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a fresh connection.
    async fn connect(&self) -> Result<Box<dyn Connection>, ChatError>;
}

#[async_trait]
pub trait Connection: Send {
    async fn subscribe(&mut self, destination: &str) -> Result<(), ChatError>;

    async fn publish(&mut self, destination: &str, body: &str) -> Result<(), ChatError>;

    /// Next message on any subscription. `None` means the connection is gone.
    async fn next_delivery(&mut self) -> Option<Delivery>;

    /// Negotiated client heart-beat interval, if any.
    fn heartbeat_interval(&self) -> Option<Duration> {
        None
    }

    async fn send_heartbeat(&mut self) -> Result<(), ChatError> {
        Ok(())
    }

    /// Tear the connection down. Safe to call on a connection already lost.
    async fn close(&mut self);
}
