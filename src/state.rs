//! Shared relay state.
//!
//! DESIGN
//! ======
//! `RelayState` is injected into Axum handlers via the `State` extractor. It
//! holds the relay config and the topic table: destination → subscribers.
//! A subscriber is one (client, subscription id) pair with the sender half
//! of that client's outbound frame channel. Fan-out is best-effort: a client
//! whose channel is full misses the frame and the miss is logged.

use std::collections::HashMap;
use std::sync::Arc;

use frames::{CONTENT_TYPE, Command, Frame};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::RelayConfig;

#[cfg(test)]
#[path = "state_test.rs"]
mod state_test;

/// Outbound frame buffer per client.
pub const CLIENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct Subscriber {
    pub client_id: Uuid,
    pub subscription_id: String,
    pub tx: mpsc::Sender<Frame>,
}

#[derive(Clone)]
pub struct RelayState {
    pub config: Arc<RelayConfig>,
    pub topics: Arc<RwLock<HashMap<String, Vec<Subscriber>>>>,
}

impl RelayState {
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        Self { config: Arc::new(config), topics: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Register a subscription. Re-using a subscription id moves it to the
    /// new destination.
    pub async fn subscribe(&self, destination: &str, client_id: Uuid, subscription_id: &str, tx: mpsc::Sender<Frame>) {
        let mut topics = self.topics.write().await;
        remove_where(&mut topics, |s| s.client_id == client_id && s.subscription_id == subscription_id);
        topics.entry(destination.to_owned()).or_default().push(Subscriber {
            client_id,
            subscription_id: subscription_id.to_owned(),
            tx,
        });
    }

    /// Drop one subscription. Returns whether it existed.
    pub async fn unsubscribe(&self, client_id: Uuid, subscription_id: &str) -> bool {
        let mut topics = self.topics.write().await;
        remove_where(&mut topics, |s| s.client_id == client_id && s.subscription_id == subscription_id) > 0
    }

    /// Drop every subscription a client holds. Returns how many were removed.
    pub async fn part(&self, client_id: Uuid) -> usize {
        let mut topics = self.topics.write().await;
        remove_where(&mut topics, |s| s.client_id == client_id)
    }

    /// Deliver `body` as a `MESSAGE` to every subscriber of `destination`.
    /// Returns how many subscribers accepted it.
    pub async fn publish(&self, destination: &str, body: &str, content_type: Option<&str>) -> usize {
        let topics = self.topics.read().await;
        let Some(subscribers) = topics.get(destination) else {
            debug!(%destination, "relay: no subscribers");
            return 0;
        };

        let mut delivered = 0;
        for subscriber in subscribers {
            let mut frame = Frame::new(Command::Message)
                .with_header("destination", destination)
                .with_header("subscription", subscriber.subscription_id.as_str())
                .with_header("message-id", Uuid::new_v4().to_string());
            if let Some(content_type) = content_type {
                frame = frame.with_header(CONTENT_TYPE, content_type);
            }
            match subscriber.tx.try_send(frame.with_body(body)) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(client_id = %subscriber.client_id, %destination, error = %e, "relay: delivery skipped"),
            }
        }
        delivered
    }

    pub async fn subscriber_count(&self, destination: &str) -> usize {
        self.topics.read().await.get(destination).map_or(0, Vec::len)
    }

    pub async fn topic_count(&self) -> usize {
        self.topics.read().await.len()
    }
}

/// Remove matching subscribers and any topic left empty.
fn remove_where(topics: &mut HashMap<String, Vec<Subscriber>>, matches: impl Fn(&Subscriber) -> bool) -> usize {
    let mut removed = 0;
    topics.retain(|_, subscribers| {
        let before = subscribers.len();
        subscribers.retain(|s| !matches(s));
        removed += before - subscribers.len();
        !subscribers.is_empty()
    });
    removed
}
