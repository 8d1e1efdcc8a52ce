//! In-process event bus over bounded tokio channels.

use super::error::{BusError, BusResult};
use super::types::{Message, Subscription};
use super::EventBus;
use async_trait::async_trait;
use metrics::counter;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

/// In-process [`EventBus`] implementation.
///
/// Every subscription owns a bounded `mpsc` queue; a publish fans out to all
/// current subscriptions of the topic. When a subscriber's queue is full the
/// publish waits up to the publish timeout for room, then drops the payload
/// for that subscriber only and bumps `ns_bus_dropped_total`.
pub struct MemoryBus {
    topics: Arc<RwLock<HashMap<String, Vec<mpsc::Sender<Message>>>>>,
    queue_capacity: usize,
    publish_timeout: Duration,
    drain_timeout: Duration,
    closed: AtomicBool,
    /// Messages dropped on publish timeout, exposed for tests.
    dropped: AtomicUsize,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::with_capacity(super::DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(queue_capacity: usize) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            queue_capacity,
            publish_timeout: super::DEFAULT_PUBLISH_TIMEOUT,
            drain_timeout: super::DEFAULT_DRAIN_TIMEOUT,
            closed: AtomicBool::new(false),
            dropped: AtomicUsize::new(0),
        }
    }

    pub fn with_timeouts(mut self, publish_timeout: Duration, drain_timeout: Duration) -> Self {
        self.publish_timeout = publish_timeout;
        self.drain_timeout = drain_timeout;
        self
    }

    /// Number of payloads dropped because a subscriber queue stayed full
    /// past the publish timeout.
    pub fn dropped_count(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBus")
            .field("queue_capacity", &self.queue_capacity)
            .field("dropped", &self.dropped)
            .finish()
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, topic: &str, payload: &[u8]) -> BusResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }

        let message = Message::new(topic, payload.to_vec());

        // Snapshot the senders so the lock is not held across send_timeout.
        let senders: Vec<mpsc::Sender<Message>> = {
            let topics = self.topics.read().await;
            match topics.get(topic) {
                Some(senders) => senders.clone(),
                None => {
                    debug!(topic = topic, "published with no subscribers");
                    return Ok(());
                }
            }
        };

        let mut stale = false;
        for sender in &senders {
            match sender
                .send_timeout(message.clone(), self.publish_timeout)
                .await
            {
                Ok(()) => {}
                Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                    self.dropped.fetch_add(1, Ordering::SeqCst);
                    counter!("ns_bus_dropped_total", "topic" => topic.to_string()).increment(1);
                    warn!(topic = topic, "subscriber queue full, payload dropped");
                }
                Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                    stale = true;
                }
            }
        }

        if stale {
            let mut topics = self.topics.write().await;
            if let Some(senders) = topics.get_mut(topic) {
                senders.retain(|s| !s.is_closed());
            }
        }

        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> BusResult<Subscription> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let mut topics = self.topics.write().await;
        topics.entry(topic.to_string()).or_default().push(tx);
        debug!(topic = topic, "created subscription");
        Ok(Subscription::new(rx))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);

        // Dropping the senders lets subscribers drain what is queued and
        // then observe end-of-stream. Give them the drain window before
        // returning so callers can tear the process down afterwards.
        let senders: Vec<mpsc::Sender<Message>> = {
            let mut topics = self.topics.write().await;
            topics.drain().flat_map(|(_, v)| v).collect()
        };

        let deadline = tokio::time::Instant::now() + self.drain_timeout;
        for sender in senders {
            while sender.capacity() < sender.max_capacity() && !sender.is_closed() {
                if tokio::time::Instant::now() >= deadline {
                    warn!("bus close: drain timeout reached with queued payloads remaining");
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}
