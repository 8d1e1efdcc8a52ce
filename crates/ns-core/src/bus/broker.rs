//! Redis Streams event bus with transparent degradation to memory.
//!
//! Payloads are appended with `XADD` and pumped back into an internal
//! [`MemoryBus`] by one `XREAD` loop per topic, so local subscribers always
//! read from the same bounded queues regardless of transport health.
//!
//! # Outage behavior
//!
//! On the first broker error the bus flips to degraded mode (one WARN),
//! publishes go straight to the internal memory bus so no local delivery is
//! lost, and a single reconnect task probes the broker with exponential
//! backoff from 100 ms capped at 30 s. After reconnect the pump resumes from
//! its last seen stream id; subscribers must tolerate replayed entries.

use super::error::{BusError, BusResult};
use super::memory::MemoryBus;
use super::types::Subscription;
use super::EventBus;
use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Configuration for the Redis Streams transport.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Redis connection URL (e.g. "redis://localhost:6379").
    pub url: String,
    /// Connection pool size.
    pub max_connections: u32,
    /// MAXLEN for XADD, keeping streams bounded.
    pub stream_max_len: usize,
    /// Block time for XREAD in milliseconds.
    pub block_ms: u64,
    /// Messages fetched per XREAD.
    pub batch_size: usize,
    /// Initial reconnect backoff.
    pub reconnect_min: Duration,
    /// Backoff cap.
    pub reconnect_max: Duration,
}

impl BrokerConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 8,
            stream_max_len: 100_000,
            block_ms: 1000,
            batch_size: 64,
            reconnect_min: Duration::from_millis(100),
            reconnect_max: Duration::from_secs(30),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::new("redis://localhost:6379")
    }
}

/// [`EventBus`] backed by Redis Streams.
pub struct BrokerBus {
    pool: Pool,
    inner: Arc<MemoryBus>,
    config: BrokerConfig,
    connected: Arc<AtomicBool>,
    reconnecting: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    pumped_topics: Arc<RwLock<HashSet<String>>>,
}

impl BrokerBus {
    /// Connects to the broker and verifies it answers PING.
    ///
    /// A broker that is down at startup is a connection error, not a silent
    /// degrade: the operator asked for broker mode, so startup fails loudly
    /// and the caller decides whether to fall back.
    pub async fn connect(config: BrokerConfig) -> BusResult<Self> {
        let pool_config = PoolConfig::from_url(&config.url);
        let pool = pool_config
            .builder()
            .map_err(|e| BusError::connection(format!("pool builder: {e}")))?
            .max_size(config.max_connections as usize)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| BusError::connection(format!("pool build: {e}")))?;

        let mut conn = pool
            .get()
            .await
            .map_err(|e| BusError::connection(format!("pool get: {e}")))?;
        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map_err(|e| BusError::connection(format!("PING: {e}")))?;

        info!(url = %config.url, "connected to broker");

        Ok(Self {
            pool,
            inner: Arc::new(MemoryBus::new()),
            config,
            connected: Arc::new(AtomicBool::new(true)),
            reconnecting: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
            pumped_topics: Arc::new(RwLock::new(HashSet::new())),
        })
    }

    fn mark_degraded(&self, context: &str) {
        self.clone_for_reconnect().degrade(context);
    }

    /// Ensures exactly one XREAD pump exists for a topic.
    async fn ensure_pump(&self, topic: &str) {
        {
            let mut pumped = self.pumped_topics.write().await;
            if !pumped.insert(topic.to_string()) {
                return;
            }
        }

        let pool = self.pool.clone();
        let inner = Arc::clone(&self.inner);
        let connected = Arc::clone(&self.connected);
        let closed = Arc::clone(&self.closed);
        let topic = topic.to_string();
        let block_ms = self.config.block_ms;
        let batch_size = self.config.batch_size;
        let reconnect = self.clone_for_reconnect();

        tokio::spawn(async move {
            // "$" skips history: subscriptions see only what arrives after
            // they were created, like the memory transport.
            let mut last_id = "$".to_string();
            loop {
                if closed.load(Ordering::SeqCst) {
                    break;
                }
                if !connected.load(Ordering::SeqCst) {
                    tokio::time::sleep(Duration::from_millis(250)).await;
                    continue;
                }

                let mut conn = match pool.get().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        reconnect.degrade(&format!("pump pool get: {e}"));
                        continue;
                    }
                };

                let options = StreamReadOptions::default()
                    .block(block_ms as usize)
                    .count(batch_size);
                let reply: Result<StreamReadReply, _> = conn
                    .xread_options(&[topic.as_str()], &[last_id.as_str()], &options)
                    .await;

                match reply {
                    Ok(reply) => {
                        for key in reply.keys {
                            for entry in key.ids {
                                last_id = entry.id.clone();
                                match entry.map.get("payload") {
                                    Some(value) => {
                                        match redis::from_redis_value::<Vec<u8>>(value) {
                                            Ok(payload) => {
                                                let _ = inner.publish(&topic, &payload).await;
                                            }
                                            Err(e) => {
                                                warn!(topic = %topic, id = %entry.id, "undecodable stream payload: {e}");
                                            }
                                        }
                                    }
                                    None => {
                                        warn!(topic = %topic, id = %entry.id, "stream entry missing payload field");
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        reconnect.degrade(&format!("pump XREAD: {e}"));
                    }
                }
            }
        });
    }

    /// Cheap handle with just enough state to trigger reconnects from the
    /// pump closure.
    fn clone_for_reconnect(&self) -> ReconnectHandle {
        ReconnectHandle {
            pool: self.pool.clone(),
            connected: Arc::clone(&self.connected),
            reconnecting: Arc::clone(&self.reconnecting),
            closed: Arc::clone(&self.closed),
            min: self.config.reconnect_min,
            max: self.config.reconnect_max,
        }
    }
}

/// Reconnect state detached from the bus so background tasks can own it.
struct ReconnectHandle {
    pool: Pool,
    connected: Arc<AtomicBool>,
    reconnecting: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    min: Duration,
    max: Duration,
}

impl ReconnectHandle {
    /// Flips to degraded mode (one WARN) and starts the single-flight
    /// reconnect probe.
    fn degrade(&self, context: &str) {
        if self.connected.swap(false, Ordering::SeqCst) {
            warn!(
                context = context,
                "broker unreachable, degrading to in-memory transport"
            );
        }
        self.spawn_reconnect();
    }

    fn spawn_reconnect(&self) {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }

        let pool = self.pool.clone();
        let connected = Arc::clone(&self.connected);
        let reconnecting = Arc::clone(&self.reconnecting);
        let closed = Arc::clone(&self.closed);
        let (min, max) = (self.min, self.max);

        tokio::spawn(async move {
            let mut backoff = min;
            loop {
                if closed.load(Ordering::SeqCst) {
                    break;
                }
                tokio::time::sleep(backoff).await;

                let ping = async {
                    let mut conn = pool.get().await.ok()?;
                    redis::cmd("PING")
                        .query_async::<String>(&mut *conn)
                        .await
                        .ok()
                };
                if ping.await.is_some() {
                    connected.store(true, Ordering::SeqCst);
                    info!("broker reconnected, leaving degraded mode");
                    break;
                }

                backoff = (backoff * 2).min(max);
            }
            reconnecting.store(false, Ordering::SeqCst);
        });
    }
}

#[async_trait]
impl EventBus for BrokerBus {
    async fn publish(&self, topic: &str, payload: &[u8]) -> BusResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }

        if self.connected.load(Ordering::SeqCst) {
            let result = async {
                let mut conn = self
                    .pool
                    .get()
                    .await
                    .map_err(|e| BusError::connection(format!("pool get: {e}")))?;
                redis::cmd("XADD")
                    .arg(topic)
                    .arg("MAXLEN")
                    .arg("~")
                    .arg(self.config.stream_max_len)
                    .arg("*")
                    .arg("payload")
                    .arg(payload)
                    .query_async::<String>(&mut *conn)
                    .await
                    .map_err(|e| BusError::connection(format!("XADD: {e}")))?;
                Ok::<_, BusError>(())
            }
            .await;

            match result {
                Ok(()) => return Ok(()),
                Err(e) => self.mark_degraded(&e.to_string()),
            }
        }

        // Degraded path: local delivery only, nothing crosses the process
        // boundary until the broker returns.
        self.inner.publish(topic, payload).await
    }

    async fn subscribe(&self, topic: &str) -> BusResult<Subscription> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        let subscription = self.inner.subscribe(topic).await?;
        self.ensure_pump(topic).await;
        Ok(subscription)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.inner.close().await;
    }
}
