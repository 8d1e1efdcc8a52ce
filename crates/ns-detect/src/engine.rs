//! The detection engine: one ingest worker, N scoring workers.
//!
//! The flow table is owned by the aggregation task alone; scoring workers
//! receive immutable flow snapshots through per-worker queues. Snapshots are
//! routed by flow key hash so all emissions for one flow land on the same
//! worker, which preserves per-flow alert ordering.

use crate::batcher::MicroBatcher;
use crate::features::FeatureVector;
use crate::flow::{FlowKey, FlowStats, FlowTable};
use crate::packet::PacketSource;
use crate::scorer::Scorer;
use chrono::Utc;
use metrics::{counter, gauge, histogram};
use ns_core::bus::EventBus;
use ns_core::config::DetectionConfig;
use ns_core::model::{topics, AlertEvent, Severity};
use ns_core::repo::Repository;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Queue depth of the packet channel between ingest and aggregation.
const PACKET_CHANNEL_CAPACITY: usize = 4_096;
/// Queue depth of each scoring worker's snapshot channel.
const SNAPSHOT_CHANNEL_CAPACITY: usize = 1_024;
/// Cadence of the idle-flow sweep.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Detection stage of the pipeline.
pub struct DetectionEngine {
    bus: Arc<dyn EventBus>,
    repo: Arc<dyn Repository>,
    scorer: Arc<dyn Scorer>,
    config: DetectionConfig,
    sensor_id: String,
}

/// Handle over the spawned detection tasks.
pub struct DetectionHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl DetectionHandle {
    /// Signals shutdown and waits for all workers to finish. Buffered
    /// partial batches are scored and emitted on the way out.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

impl DetectionEngine {
    pub fn new(
        bus: Arc<dyn EventBus>,
        repo: Arc<dyn Repository>,
        scorer: Arc<dyn Scorer>,
        config: DetectionConfig,
        sensor_id: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            repo,
            scorer,
            config,
            sensor_id: sensor_id.into(),
        }
    }

    /// Spawns the worker group over a packet source and returns its handle.
    pub fn spawn(self, source: Box<dyn PacketSource>) -> DetectionHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker_count = if self.config.scoring_workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.config.scoring_workers
        };

        let mut tasks = Vec::new();
        let mut snapshot_txs = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let (tx, rx) = mpsc::channel::<FeatureVector>(SNAPSHOT_CHANNEL_CAPACITY);
            snapshot_txs.push(tx);
            tasks.push(tokio::spawn(scoring_worker(
                worker_id,
                rx,
                Arc::clone(&self.bus),
                Arc::clone(&self.repo),
                Arc::clone(&self.scorer),
                self.config.clone(),
                self.sensor_id.clone(),
                shutdown_rx.clone(),
            )));
        }

        let (packet_tx, packet_rx) = mpsc::channel(PACKET_CHANNEL_CAPACITY);
        tasks.push(tokio::task::spawn_blocking(move || {
            ingest_loop(source, packet_tx)
        }));
        tasks.push(tokio::spawn(aggregate_loop(
            packet_rx,
            snapshot_txs,
            self.config,
            shutdown_rx,
        )));

        info!(workers = worker_count, "detection engine started");
        DetectionHandle {
            shutdown: shutdown_tx,
            tasks,
        }
    }
}

/// Blocking packet-source reader. Ends at end-of-stream or when the
/// aggregation side goes away.
fn ingest_loop(mut source: Box<dyn PacketSource>, tx: mpsc::Sender<crate::packet::PacketRecord>) {
    while let Some(packet) = source.next_packet() {
        counter!("ns_packets_total").increment(1);
        if tx.blocking_send(packet).is_err() {
            return;
        }
    }
    debug!("packet source reached end of stream");
}

/// Owns the flow table; routes snapshots to scoring workers by key hash.
async fn aggregate_loop(
    mut packet_rx: mpsc::Receiver<crate::packet::PacketRecord>,
    snapshot_txs: Vec<mpsc::Sender<FeatureVector>>,
    config: DetectionConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut table = FlowTable::new(
        config.max_flows,
        Duration::from_secs(config.flow_idle_timeout_secs),
    );
    let mut flush = tokio::time::interval(Duration::from_millis(config.flush_interval_ms.max(1)));
    flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut source_done = false;

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            maybe_packet = packet_rx.recv(), if !source_done => {
                match maybe_packet {
                    Some(packet) => {
                        if let Some((key, stats)) = table.observe(&packet) {
                            counter!("ns_flows_evicted_total", "reason" => "capacity").increment(1);
                            route(&snapshot_txs, key, &stats).await;
                        }
                        gauge!("ns_flows_tracked").set(table.len() as f64);
                    }
                    None => {
                        // Engine goes idle; flush/sweep keep draining what
                        // is already tracked.
                        source_done = true;
                    }
                }
            }
            _ = flush.tick() => {
                for (key, stats) in table.flush_active() {
                    route(&snapshot_txs, key, &stats).await;
                }
            }
            _ = sweep.tick() => {
                for (key, stats) in table.sweep_idle(Utc::now()) {
                    counter!("ns_flows_evicted_total", "reason" => "idle").increment(1);
                    route(&snapshot_txs, key, &stats).await;
                }
                gauge!("ns_flows_tracked").set(table.len() as f64);
            }
        }
    }
}

/// Routes one flow snapshot to its affinity worker.
async fn route(snapshot_txs: &[mpsc::Sender<FeatureVector>], key: FlowKey, stats: &FlowStats) {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    let worker = (hasher.finish() % snapshot_txs.len() as u64) as usize;
    if snapshot_txs[worker]
        .send(FeatureVector::extract(key, stats))
        .await
        .is_err()
    {
        warn!("scoring worker gone, snapshot dropped");
    }
}

/// Batches snapshots, scores them, and emits alerts.
#[allow(clippy::too_many_arguments)]
async fn scoring_worker(
    worker_id: usize,
    mut rx: mpsc::Receiver<FeatureVector>,
    bus: Arc<dyn EventBus>,
    repo: Arc<dyn Repository>,
    scorer: Arc<dyn Scorer>,
    config: DetectionConfig,
    sensor_id: String,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut batcher = MicroBatcher::new(
        config.batch_size,
        Duration::from_millis(config.batch_timeout_ms),
    );

    loop {
        let deadline = batcher.deadline();
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    if let Some(batch) = batcher.take() {
                        score_and_emit(&bus, &repo, &scorer, &config, &sensor_id, batch).await;
                    }
                    debug!(worker_id, "scoring worker stopped");
                    return;
                }
            }
            maybe_vector = rx.recv() => {
                match maybe_vector {
                    Some(vector) => {
                        if let Some(batch) = batcher.push(vector) {
                            score_and_emit(&bus, &repo, &scorer, &config, &sensor_id, batch).await;
                        }
                    }
                    None => {
                        if let Some(batch) = batcher.take() {
                            score_and_emit(&bus, &repo, &scorer, &config, &sensor_id, batch).await;
                        }
                        return;
                    }
                }
            }
            _ = tokio::time::sleep_until(
                tokio::time::Instant::from_std(deadline.unwrap_or_else(Instant::now))
            ), if deadline.is_some() => {
                if let Some(batch) = batcher.take_if_due(Instant::now()) {
                    score_and_emit(&bus, &repo, &scorer, &config, &sensor_id, batch).await;
                }
            }
        }
    }
}

/// Scores one batch and emits alerts for everything above the emit
/// threshold. A scorer failure discards the batch; detection continues.
async fn score_and_emit(
    bus: &Arc<dyn EventBus>,
    repo: &Arc<dyn Repository>,
    scorer: &Arc<dyn Scorer>,
    config: &DetectionConfig,
    sensor_id: &str,
    batch: Vec<FeatureVector>,
) {
    let scores = match scorer.score_batch(&batch) {
        Ok(scores) if scores.len() == batch.len() => scores,
        Ok(scores) => {
            counter!("ns_scorer_errors_total").increment(1);
            warn!(
                expected = batch.len(),
                got = scores.len(),
                "scorer returned wrong batch length, batch discarded"
            );
            return;
        }
        Err(e) => {
            counter!("ns_scorer_errors_total").increment(1);
            warn!("scorer failed, batch discarded: {e}");
            return;
        }
    };

    for (vector, score) in batch.into_iter().zip(scores) {
        if !score.is_finite() || !(0.0..=1.0).contains(&score) {
            counter!("ns_packets_malformed_total").increment(1);
            warn!(score, "scorer produced out-of-range score, flow dropped");
            continue;
        }
        if score < config.emit_threshold {
            counter!("ns_alerts_suppressed_total").increment(1);
            continue;
        }

        let confidence = if scorer.is_probabilistic() {
            score.max(1.0 - score)
        } else {
            score
        };
        let debug_id = Uuid::now_v7();
        eprintln!("DEBUG detect id={debug_id} score={score:.20}");
        let alert = AlertEvent {
            id: debug_id,
            ts: Utc::now(),
            src_ip: vector.key.src_ip,
            dst_ip: vector.key.dst_ip,
            proto: vector.key.proto,
            features: vector.as_map(),
            model_score: score,
            confidence,
            severity: Severity::bucket(score, &config.severity_thresholds),
            sensor_id: sensor_id.to_string(),
        };

        persist_and_publish(bus, repo, &alert).await;
        histogram!("ns_detection_latency_seconds").record(vector.extracted_at.elapsed().as_secs_f64());
    }
}

/// Write-before-publish with a single retry on transient store failure.
async fn persist_and_publish(bus: &Arc<dyn EventBus>, repo: &Arc<dyn Repository>, alert: &AlertEvent) {
    let saved = match repo.save_alert(alert).await {
        Ok(saved) => saved,
        Err(e) if e.is_transient() => match repo.save_alert(alert).await {
            Ok(saved) => saved,
            Err(e) => {
                counter!("ns_persist_failures_total", "record" => "alert").increment(1);
                error!(alert_id = %alert.id, "alert dropped, persist retry failed: {e}");
                return;
            }
        },
        Err(e) => {
            counter!("ns_persist_failures_total", "record" => "alert").increment(1);
            error!(alert_id = %alert.id, "alert dropped, persist failed: {e}");
            return;
        }
    };
    if !saved {
        // Replay of an id the store already has; nothing more to do.
        return;
    }

    let payload = match serde_json::to_vec(alert) {
        Ok(payload) => payload,
        Err(e) => {
            error!(alert_id = %alert.id, "alert serialization failed: {e}");
            return;
        }
    };
    if let Err(e) = bus.publish(topics::ALERTS, &payload).await {
        warn!(alert_id = %alert.id, "alert publish failed: {e}");
        return;
    }
    counter!("ns_alerts_emitted_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketRecord;
    use crate::scorer::HeuristicScorer;
    use chrono::TimeZone;
    use ns_core::bus::MemoryBus;
    use ns_core::model::Proto;
    use ns_core::repo::MemoryRepository;
    use std::net::IpAddr;

    struct VecSource {
        packets: std::vec::IntoIter<PacketRecord>,
        pacing: Option<Duration>,
    }

    impl VecSource {
        fn new(packets: Vec<PacketRecord>) -> Self {
            Self {
                packets: packets.into_iter(),
                pacing: None,
            }
        }

        /// Spreads ingestion over wall-clock time so periodic flushes
        /// observe the flow mid-life.
        fn paced(packets: Vec<PacketRecord>, pacing: Duration) -> Self {
            Self {
                packets: packets.into_iter(),
                pacing: Some(pacing),
            }
        }
    }

    impl PacketSource for VecSource {
        fn next_packet(&mut self) -> Option<PacketRecord> {
            if let Some(pacing) = self.pacing {
                std::thread::sleep(pacing);
            }
            self.packets.next()
        }
    }

    fn fast_config() -> DetectionConfig {
        DetectionConfig {
            flush_interval_ms: 50,
            batch_timeout_ms: 20,
            scoring_workers: 2,
            ..Default::default()
        }
    }

    fn packet(src: [u8; 4], ts_ms: i64, size: u64) -> PacketRecord {
        PacketRecord {
            ts: Utc.timestamp_millis_opt(1_700_000_000_000 + ts_ms).unwrap(),
            src_ip: IpAddr::from(src),
            dst_ip: IpAddr::from([10, 0, 0, 5]),
            proto: Proto::Tcp,
            src_port: 40_000,
            dst_port: 443,
            size,
            flags: 0x18,
        }
    }

    fn engine(
        bus: &Arc<MemoryBus>,
        repo: &Arc<MemoryRepository>,
        config: DetectionConfig,
    ) -> DetectionEngine {
        DetectionEngine::new(
            Arc::clone(bus) as Arc<dyn EventBus>,
            Arc::clone(repo) as Arc<dyn Repository>,
            Arc::new(HeuristicScorer::default()),
            config,
            "sensor-test",
        )
    }

    #[tokio::test]
    async fn heavy_flow_produces_high_severity_alert() {
        let bus = Arc::new(MemoryBus::new());
        let repo = Arc::new(MemoryRepository::new());
        let mut sub = bus.subscribe(topics::ALERTS).await.unwrap();

        // 500 packets, ~1 MB total, 10 ms apart: heuristic saturates.
        let packets: Vec<PacketRecord> = (0..500)
            .map(|i| packet([203, 0, 113, 7], i * 10, 2_098))
            .collect();

        let handle = engine(&bus, &repo, fast_config()).spawn(Box::new(VecSource::new(packets)));

        let msg = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("no alert within 5s")
            .unwrap();
        let alert: AlertEvent = msg.deserialize().unwrap();
        assert_eq!(alert.src_ip, IpAddr::from([203, 0, 113, 7]));
        assert_eq!(alert.severity, Severity::High);
        assert!(alert.model_score >= 0.8);
        assert_eq!(alert.sensor_id, "sensor-test");

        // Persisted before published.
        assert!(repo.get_alert(alert.id).await.unwrap().is_some());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn noise_below_emit_threshold_is_suppressed() {
        let bus = Arc::new(MemoryBus::new());
        let repo = Arc::new(MemoryRepository::new());
        let mut sub = bus.subscribe(topics::ALERTS).await.unwrap();

        // 1000 tiny single-packet flows: bytes/packets terms are negligible
        // and single-packet flows have zero IAT, so every score is ~0.
        let packets: Vec<PacketRecord> = (0..1000)
            .map(|i| {
                packet(
                    [192, 0, 2, (i % 200 + 2) as u8],
                    i * 3,
                    60 + (i % 40) as u64,
                )
            })
            .map(|mut p| {
                p.src_port = 1024 + (p.src_port + p.size as u16) % 30000;
                p
            })
            .collect();

        let handle = engine(&bus, &repo, fast_config()).spawn(Box::new(VecSource::new(packets)));
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(sub.try_recv().is_err());
        assert_eq!(repo.count_alerts().await.unwrap(), 0);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn scorer_failure_is_survivable() {
        struct FailingScorer;
        impl Scorer for FailingScorer {
            fn score_batch(
                &self,
                _batch: &[FeatureVector],
            ) -> Result<Vec<f64>, crate::scorer::ScorerError> {
                Err(crate::scorer::ScorerError("model exploded".to_string()))
            }
        }

        let bus = Arc::new(MemoryBus::new());
        let repo = Arc::new(MemoryRepository::new());
        let engine = DetectionEngine::new(
            Arc::clone(&bus) as Arc<dyn EventBus>,
            Arc::clone(&repo) as Arc<dyn Repository>,
            Arc::new(FailingScorer),
            fast_config(),
            "sensor-test",
        );

        let packets: Vec<PacketRecord> =
            (0..100).map(|i| packet([203, 0, 113, 7], i * 10, 2_000)).collect();
        let handle = engine.spawn(Box::new(VecSource::new(packets)));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(repo.count_alerts().await.unwrap(), 0);

        // Engine is still alive and shuts down cleanly.
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn single_flow_alerts_stay_ordered() {
        let bus = Arc::new(MemoryBus::new());
        let repo = Arc::new(MemoryRepository::new());
        let mut sub = bus.subscribe(topics::ALERTS).await.unwrap();

        // Long-lived heavy flow, paced so it spans several flush
        // intervals: the periodic flush emits it repeatedly.
        let packets: Vec<PacketRecord> = (0..2_000)
            .map(|i| packet([203, 0, 113, 9], i * 5, 2_000))
            .collect();
        let handle = engine(&bus, &repo, fast_config())
            .spawn(Box::new(VecSource::paced(packets, Duration::from_micros(150))));

        let mut alerts = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while alerts.len() < 2 && tokio::time::Instant::now() < deadline {
            if let Ok(Some(msg)) =
                tokio::time::timeout(Duration::from_millis(500), sub.recv()).await
            {
                let alert: AlertEvent = msg.deserialize().unwrap();
                if alert.src_ip == IpAddr::from([203, 0, 113, 9]) {
                    alerts.push(alert);
                }
            }
        }
        handle.shutdown().await;

        assert!(alerts.len() >= 2, "expected repeated emissions of the flow");
        // UUIDv7 ids are monotonic, so ordering is checkable directly.
        assert!(alerts.windows(2).all(|w| w[0].id < w[1].id));
        let growing = alerts
            .windows(2)
            .all(|w| w[0].features["packets"] <= w[1].features["packets"]);
        assert!(growing);
    }
}
