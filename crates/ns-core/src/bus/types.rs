//! Message and subscription types for the event bus.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::mpsc;

/// A message delivered to a subscription.
///
/// The payload is raw bytes; engines serialize their domain records with
/// `serde_json` before publishing and use [`Message::deserialize`] on the
/// receiving side.
#[derive(Debug, Clone)]
pub struct Message {
    /// The topic this message was published to.
    pub topic: String,
    /// Serialized payload.
    pub payload: Vec<u8>,
    /// When the transport accepted the message.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Attempts to decode the payload as JSON.
    pub fn deserialize<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

/// A live subscription to a topic.
///
/// Each subscription owns a bounded channel fed by the transport. Delivery
/// within a subscription is strictly FIFO per publisher; a subscription that
/// stops draining its channel exerts backpressure on publishers (up to
/// `publish_timeout`, after which messages destined for it are dropped and
/// counted).
pub struct Subscription {
    pub(crate) receiver: mpsc::Receiver<Message>,
}

impl Subscription {
    pub(crate) fn new(receiver: mpsc::Receiver<Message>) -> Self {
        Self { receiver }
    }

    /// Receives the next message, or `None` once the bus is closed and the
    /// queue is drained.
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    /// Non-blocking receive, for tests and drain loops.
    pub fn try_recv(&mut self) -> Result<Message, mpsc::error::TryRecvError> {
        self.receiver.try_recv()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("receiver", &"<mpsc::Receiver>")
            .finish()
    }
}

/// Cancellation handle for a spawned subscription handler.
///
/// Returned by [`crate::bus::spawn_handler`]; dropping the handle does NOT
/// cancel the handler (the pipeline keeps running if a caller discards it).
#[derive(Debug)]
pub struct HandlerHandle {
    pub(crate) cancel: CancelFlag,
    pub(crate) join: tokio::task::JoinHandle<()>,
}

impl HandlerHandle {
    /// Signals the handler loop to stop after the in-flight invocation.
    pub fn cancel(&self) {
        self.cancel.set();
    }

    /// Cancels and waits for the handler loop to finish.
    pub async fn shutdown(self) {
        self.cancel.set();
        let _ = self.join.await;
    }
}

/// Cancellation flag shared between a handle and its task, built on a
/// `watch` channel so waiters never miss a set that races their registration.
#[derive(Debug, Clone)]
pub(crate) struct CancelFlag {
    tx: std::sync::Arc<tokio::sync::watch::Sender<bool>>,
}

impl Default for CancelFlag {
    fn default() -> Self {
        let (tx, _) = tokio::sync::watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
        }
    }
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.tx.send_replace(true);
    }

    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}
