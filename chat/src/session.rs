//! Chat session handle and its connection driver task.
//!
//! DESIGN
//! ======
//! `ChatSession::activate` spawns one driver task per session. The driver
//! owns the broker connection and serializes every event through a single
//! `select!` loop: shutdown, publish commands, inbound deliveries, and
//! heart-beat ticks. The handle owns the [`SessionState`]; driver events are
//! applied to it only when the host pulls them with
//! [`ChatSession::next_update`], so all state changes happen on the host's
//! task, one at a time, in receipt order.
//!
//! LIFECYCLE
//! =========
//! 1. Activate → `Connecting` → broker connect (bounded by `connect_timeout`)
//! 2. Subscribe to `{subscribe_prefix}{room_id}` → `Subscribed`
//! 3. Deliveries → display list; sends → publish to the outbound destination
//! 4. Connection lost or connect failed → `Reconnecting` under `RetryPolicy`
//! 5. Deactivate or budget spent → close → `Disconnected`
//!
//! CANCELLATION
//! ============
//! Deactivation may land while a connect is in flight. The attempt is then
//! allowed to settle; a connection that completes late is closed at once, so
//! a session never leaves an orphaned subscription behind. Every connection
//! the driver obtains is closed exactly once.
//!
//! Each subscription is an epoch. Sends carry the epoch the handle last saw;
//! a send from an older epoch is reported as a publish failure instead of
//! being replayed onto a newer connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::{Broker, Connection};
use crate::config::{PublishFailurePolicy, RoomIdentity, SessionConfig};
use crate::error::ChatError;
use crate::message::{ChatMessage, DisplayMessage, encode_message};
use crate::state::{SessionPhase, SessionState};

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

// =============================================================================
// EVENTS
// =============================================================================

/// Driver → handle.
#[derive(Debug)]
enum DriverEvent {
    Phase(SessionPhase),
    Subscribed { epoch: u64 },
    Delivery(String),
    Notice(ChatError),
}

/// Handle → driver.
#[derive(Debug)]
enum DriverCommand {
    Publish { epoch: u64, message: ChatMessage },
}

/// A change applied to the session state, reported to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    Phase(SessionPhase),
    /// A message was appended to the display list.
    Message(DisplayMessage),
    /// An inbound payload was malformed and dropped.
    Dropped(ChatError),
    /// A transient, non-fatal failure worth showing the user.
    Notice(ChatError),
}

// =============================================================================
// HANDLE
// =============================================================================

pub struct ChatSession {
    state: SessionState,
    epoch: u64,
    commands: mpsc::UnboundedSender<DriverCommand>,
    events: mpsc::UnboundedReceiver<DriverEvent>,
    cancel: CancellationToken,
    driver: Option<JoinHandle<()>>,
}

impl ChatSession {
    /// Start a session for `identity`. Must be called inside a tokio runtime.
    ///
    /// Returns immediately in `Connecting`; the subscription is established
    /// asynchronously and reported through [`Self::next_update`].
    pub fn activate(config: SessionConfig, identity: RoomIdentity, broker: Arc<dyn Broker>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let mut state = SessionState::new(identity.clone(), config.history_limit);
        state.begin_connect();

        let driver = Driver {
            inbound: config.inbound_destination(&identity.room_id),
            room_id: identity.room_id,
            config,
            broker,
            commands: command_rx,
            events: event_tx,
            cancel: cancel.clone(),
            epoch: 0,
        };
        info!(room_id = %driver.room_id, inbound = %driver.inbound, "chat: session activated");
        let driver = tokio::spawn(driver.run());

        Self {
            state,
            epoch: 0,
            commands: command_tx,
            events: event_rx,
            cancel,
            driver: Some(driver),
        }
    }

    #[must_use]
    pub fn identity(&self) -> &RoomIdentity {
        self.state.identity()
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn messages(&self) -> impl ExactSizeIterator<Item = &DisplayMessage> {
        self.state.messages()
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.state.set_draft(text);
    }

    #[must_use]
    pub fn draft(&self) -> &str {
        self.state.draft()
    }

    /// Publish the current draft.
    ///
    /// A blank draft, or a session that is not subscribed, makes this a
    /// no-op: nothing is published, nothing is queued, and the draft is
    /// left as it was. Returns whether a publish was handed to the driver.
    pub fn send(&mut self) -> bool {
        let Some(message) = self.state.take_outgoing() else {
            return false;
        };
        let command = DriverCommand::Publish { epoch: self.epoch, message };
        if self.commands.send(command).is_err() {
            warn!(room_id = %self.state.identity().room_id, "chat: send after driver exit");
            return false;
        }
        true
    }

    /// Wait for the next driver event and apply it.
    ///
    /// Returns `None` once the driver has exited and every event is applied.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        let event = self.events.recv().await?;
        Some(self.apply(event))
    }

    /// Apply every event that is already waiting, without blocking.
    pub fn drain_updates(&mut self) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            updates.push(self.apply(event));
        }
        updates
    }

    /// Apply updates until the session reaches `phase`. Returns `false` if
    /// the driver exits first.
    pub async fn wait_for_phase(&mut self, phase: SessionPhase) -> bool {
        while self.state.phase() != phase {
            if self.next_update().await.is_none() {
                return false;
            }
        }
        true
    }

    /// Tear the session down: stop the driver, close its connection, and
    /// discard the display list. Idempotent.
    pub async fn deactivate(&mut self) {
        self.cancel.cancel();
        if let Some(driver) = self.driver.take() {
            if let Err(error) = driver.await {
                warn!(error = %error, "chat: session driver ended abnormally");
            }
            info!(room_id = %self.state.identity().room_id, "chat: session deactivated");
        }
        while self.events.try_recv().is_ok() {}
        self.state.mark_disconnected();
        self.state.clear();
    }

    fn apply(&mut self, event: DriverEvent) -> SessionUpdate {
        match event {
            DriverEvent::Phase(phase) => {
                self.state.apply_phase(phase);
                SessionUpdate::Phase(phase)
            }
            DriverEvent::Subscribed { epoch } => {
                self.epoch = epoch;
                self.state.mark_subscribed();
                SessionUpdate::Phase(SessionPhase::Subscribed)
            }
            DriverEvent::Delivery(body) => match self.state.receive(&body) {
                Ok(display) => SessionUpdate::Message(display.clone()),
                Err(error) => {
                    warn!(room_id = %self.state.identity().room_id, error = %error, "chat: dropping malformed message");
                    SessionUpdate::Dropped(error)
                }
            },
            DriverEvent::Notice(error) => {
                self.state.record_notice(error.clone());
                SessionUpdate::Notice(error)
            }
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        // The driver still closes its connection on its own once cancelled.
        self.cancel.cancel();
    }
}

// =============================================================================
// DRIVER
// =============================================================================

struct Driver {
    config: SessionConfig,
    room_id: String,
    inbound: String,
    broker: Arc<dyn Broker>,
    commands: mpsc::UnboundedReceiver<DriverCommand>,
    events: mpsc::UnboundedSender<DriverEvent>,
    cancel: CancellationToken,
    epoch: u64,
}

enum Establish {
    Ready(Box<dyn Connection>),
    Failed(ChatError),
    Cancelled,
}

enum PumpEnd {
    Cancelled,
    Lost,
}

impl Driver {
    async fn run(mut self) {
        let mut failures: u32 = 0;

        loop {
            if failures == 0 {
                self.emit(DriverEvent::Phase(SessionPhase::Connecting));
            }

            match self.establish().await {
                Establish::Cancelled => break,
                Establish::Failed(error) => {
                    failures = failures.saturating_add(1);
                    warn!(room_id = %self.room_id, error = %error, failures, "chat: connection failed");
                    let retryable = error.retryable();
                    self.emit(DriverEvent::Notice(error));
                    if !retryable {
                        break;
                    }
                }
                Establish::Ready(mut connection) => {
                    self.epoch = self.epoch.wrapping_add(1);
                    info!(room_id = %self.room_id, epoch = self.epoch, "chat: subscribed");
                    self.emit(DriverEvent::Subscribed { epoch: self.epoch });

                    let end = self.pump(connection.as_mut()).await;
                    connection.close().await;
                    match end {
                        PumpEnd::Cancelled => break,
                        PumpEnd::Lost => {
                            warn!(room_id = %self.room_id, "chat: connection lost");
                            self.emit(DriverEvent::Notice(ChatError::Closed));
                            failures = 1;
                        }
                    }
                }
            }

            let Some(delay) = self.config.retry.delay_for(failures) else {
                info!(room_id = %self.room_id, failures, "chat: giving up on reconnect");
                break;
            };
            self.emit(DriverEvent::Phase(SessionPhase::Reconnecting { attempt: failures }));
            if !self.backoff(delay).await {
                break;
            }
        }

        self.emit(DriverEvent::Phase(SessionPhase::Disconnected));
        debug!(room_id = %self.room_id, "chat: driver exited");
    }

    /// Connect and subscribe, honouring shutdown.
    async fn establish(&self) -> Establish {
        let timeout = self.config.connect_timeout;
        let connecting = tokio::time::timeout(timeout, self.broker.connect());
        tokio::pin!(connecting);

        let connected = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                // Let the in-flight attempt settle; a late connection is closed, not orphaned.
                if let Ok(Ok(mut late)) = connecting.await {
                    debug!(room_id = %self.room_id, "chat: closing connection that completed after deactivation");
                    late.close().await;
                }
                return Establish::Cancelled;
            }
            result = &mut connecting => result,
        };

        let mut connection = match connected {
            Ok(Ok(connection)) => connection,
            Ok(Err(error)) => return Establish::Failed(error),
            Err(_) => return Establish::Failed(ChatError::Timeout(timeout)),
        };

        if let Err(error) = connection.subscribe(&self.inbound).await {
            connection.close().await;
            return Establish::Failed(error);
        }
        if self.cancel.is_cancelled() {
            connection.close().await;
            return Establish::Cancelled;
        }
        Establish::Ready(connection)
    }

    /// Serve one live connection until shutdown or loss.
    async fn pump(&mut self, connection: &mut dyn Connection) -> PumpEnd {
        let mut heartbeat = connection
            .heartbeat_interval()
            .map(|every| tokio::time::interval_at(Instant::now() + every, every));

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return PumpEnd::Cancelled,
                command = self.commands.recv() => match command {
                    Some(DriverCommand::Publish { epoch, message }) => {
                        self.publish(connection, epoch, message).await;
                    }
                    // Handle dropped without deactivating.
                    None => return PumpEnd::Cancelled,
                },
                delivery = connection.next_delivery() => match delivery {
                    Some(delivery) => {
                        debug!(room_id = %self.room_id, destination = %delivery.destination, "chat: delivery");
                        self.emit(DriverEvent::Delivery(delivery.body));
                    }
                    None => return PumpEnd::Lost,
                },
                () = next_heartbeat(&mut heartbeat) => {
                    if let Err(error) = connection.send_heartbeat().await {
                        warn!(room_id = %self.room_id, error = %error, "chat: heart-beat failed");
                        return PumpEnd::Lost;
                    }
                }
            }
        }
    }

    async fn publish(&self, connection: &mut dyn Connection, epoch: u64, message: ChatMessage) {
        let destination = &self.config.publish_destination;
        if epoch != self.epoch {
            self.publish_failed(ChatError::Publish {
                destination: destination.clone(),
                reason: "sent on a connection that is no longer live".to_owned(),
            });
            return;
        }

        let body = encode_message(&message);
        let retries = match self.config.publish_failure {
            PublishFailurePolicy::Retry { attempts } => attempts,
            PublishFailurePolicy::Ignore | PublishFailurePolicy::Notify => 0,
        };
        let mut attempt: u32 = 0;
        loop {
            match connection.publish(destination, &body).await {
                Ok(()) => {
                    debug!(room_id = %self.room_id, %destination, "chat: published");
                    return;
                }
                Err(error) if attempt < retries => {
                    attempt += 1;
                    warn!(room_id = %self.room_id, error = %error, attempt, "chat: publish failed, retrying");
                }
                Err(error) => {
                    self.publish_failed(error);
                    return;
                }
            }
        }
    }

    fn publish_failed(&self, error: ChatError) {
        warn!(room_id = %self.room_id, error = %error, "chat: publish failed");
        if self.config.publish_failure != PublishFailurePolicy::Ignore {
            self.emit(DriverEvent::Notice(error));
        }
    }

    /// Sleep out a reconnect delay. Returns `false` when shut down meanwhile.
    async fn backoff(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return false,
                () = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    // Nothing is queued while disconnected.
                    Some(DriverCommand::Publish { .. }) => self.publish_failed(ChatError::Publish {
                        destination: self.config.publish_destination.clone(),
                        reason: "not connected".to_owned(),
                    }),
                    None => return false,
                },
            }
        }
    }

    fn emit(&self, event: DriverEvent) {
        if self.events.send(event).is_err() {
            debug!(room_id = %self.room_id, "chat: session handle gone, event discarded");
        }
    }
}

async fn next_heartbeat(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
