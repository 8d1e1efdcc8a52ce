//! Topic-based pub/sub connecting the pipeline engines.
//!
//! The [`EventBus`] trait abstracts the transport so the engines never care
//! whether events travel through in-process queues or a network broker:
//!
//! - [`MemoryBus`]: bounded per-topic queues inside the process. The default,
//!   and also the fallback the broker transport degrades to during outages.
//! - `BrokerBus` (feature `broker`): Redis Streams with automatic reconnect
//!   and transparent degradation to memory while the broker is away.
//!
//! # Delivery semantics
//!
//! At-least-once within a process, best-effort across processes. Ordering is
//! FIFO per (topic, publisher); there is no cross-topic guarantee and
//! subscribers MUST be idempotent against replays after a broker reconnect.
//!
//! # Backpressure
//!
//! Topic queues are bounded (default 10 000). A publish blocks up to
//! `publish_timeout` (default 100 ms) when a subscriber's queue is full, then
//! drops the payload for that subscriber and increments
//! `ns_bus_dropped_total`. Dropping is a last resort; the detection engine's
//! own flow eviction is expected to shed load long before queues fill.

pub mod error;
pub mod memory;
pub mod types;

#[cfg(feature = "broker")]
pub mod broker;

pub use error::{BusError, BusResult};
pub use memory::MemoryBus;
pub use types::{HandlerHandle, Message, Subscription};

#[cfg(feature = "broker")]
pub use broker::{BrokerBus, BrokerConfig};

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Default bound of each per-subscription queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Default time a publish may block on a full queue before dropping.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_millis(100);

/// Default time `close()` waits for queued payloads to drain.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A transport for topic-based publish/subscribe.
///
/// Implementations must be `Send + Sync` so a single `Arc<dyn EventBus>` can
/// be shared by every engine.
#[async_trait]
pub trait EventBus: Send + Sync + 'static {
    /// Publishes a payload to a topic.
    ///
    /// Returns once the payload is enqueued locally. Never blocks longer
    /// than the configured publish timeout; on timeout the payload is
    /// dropped for the congested subscriber and the drop counter is
    /// incremented.
    async fn publish(&self, topic: &str, payload: &[u8]) -> BusResult<()>;

    /// Subscribes to a topic, returning a FIFO message stream.
    async fn subscribe(&self, topic: &str) -> BusResult<Subscription>;

    /// Closes the bus: rejects further publishes, cancels subscriptions,
    /// and drains queued payloads up to the drain timeout.
    async fn close(&self);
}

/// Boxed future returned by subscription handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Spawns a serialized handler loop over a subscription.
///
/// Handler invocations are at-most-one in flight: the next message is not
/// taken until the previous invocation finishes. A panicking handler is
/// caught and logged and the subscription continues.
pub fn spawn_handler<F>(topic: &str, mut subscription: Subscription, handler: F) -> HandlerHandle
where
    F: Fn(Message) -> HandlerFuture + Send + Sync + 'static,
{
    let cancel = types::CancelFlag::new();
    let flag = cancel.clone();
    let topic = topic.to_string();
    let handler = Arc::new(handler);

    let join = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                msg = subscription.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
                _ = flag.cancelled() => break,
            };

            // Each invocation runs in its own task so a panic is contained
            // to that message instead of killing the subscription.
            let handler = Arc::clone(&handler);
            let invocation = tokio::spawn(async move { handler(message).await });
            if let Err(join_err) = invocation.await {
                if join_err.is_panic() {
                    error!(topic = %topic, "subscriber handler panicked, subscription continues");
                } else {
                    warn!(topic = %topic, "subscriber handler cancelled");
                }
            }
        }
    });

    HandlerHandle { cancel, join }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn handler_survives_panics() {
        let bus = MemoryBus::new();
        let sub = bus.subscribe("alerts").await.unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_handler = Arc::clone(&seen);
        let handle = spawn_handler("alerts", sub, move |msg| {
            let seen = Arc::clone(&seen_in_handler);
            Box::pin(async move {
                if msg.payload == b"boom" {
                    panic!("handler blew up");
                }
                seen.fetch_add(1, Ordering::SeqCst);
            })
        });

        bus.publish("alerts", b"ok-1").await.unwrap();
        bus.publish("alerts", b"boom").await.unwrap();
        bus.publish("alerts", b"ok-2").await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn handler_invocations_are_serialized() {
        let bus = MemoryBus::new();
        let sub = bus.subscribe("alerts").await.unwrap();

        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let (in_flight_h, max_seen_h) = (Arc::clone(&in_flight), Arc::clone(&max_seen));

        let handle = spawn_handler("alerts", sub, move |_msg| {
            let in_flight = Arc::clone(&in_flight_h);
            let max_seen = Arc::clone(&max_seen_h);
            Box::pin(async move {
                let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            })
        });

        for _ in 0..10 {
            bus.publish("alerts", b"x").await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        handle.shutdown().await;
    }
}
