//! End-to-end pipeline scenarios over the in-process bus.
//!
//! Each test wires the real engines together the same way the binary does,
//! swapping only the packet source (scripted), the TI providers (mocked),
//! and the data plane (simulation mode).

use chrono::{TimeZone, Utc};
use ns_core::bus::{EventBus, MemoryBus};
use ns_core::cache::{ti_key, LruTtlCache, TiCache};
use ns_core::config::{DetectionConfig, InvestigationConfig, ResponseConfig};
use ns_core::model::{topics, ActionRecord, AlertEvent, InvestigationReport, Severity, Verdict};
use ns_core::repo::{MemoryRepository, Repository};
use ns_detect::{DetectionEngine, DetectionHandle, HeuristicScorer, PacketRecord, PacketSource};
use ns_intel::{Finding, InvestigationAgent, InvestigationHandle, MockProvider, TiProvider};
use ns_observability::AuditLog;
use ns_response::{ActionRegistry, RecordingDataPlane, ResponseEngine, ResponseHandle};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

struct ListSource {
    packets: std::vec::IntoIter<PacketRecord>,
}

impl ListSource {
    fn new(packets: Vec<PacketRecord>) -> Self {
        Self {
            packets: packets.into_iter(),
        }
    }
}

impl PacketSource for ListSource {
    fn next_packet(&mut self) -> Option<PacketRecord> {
        self.packets.next()
    }
}

fn packet(src: [u8; 4], src_port: u16, ts_ms: i64, size: u64) -> PacketRecord {
    PacketRecord {
        ts: Utc.timestamp_millis_opt(1_700_000_000_000 + ts_ms).unwrap(),
        src_ip: IpAddr::from(src),
        dst_ip: IpAddr::from([10, 0, 0, 5]),
        proto: ns_core::model::Proto::Tcp,
        src_port,
        dst_port: 443,
        size,
        flags: 0x18,
    }
}

/// The flow from the malicious-IP scenario: 500 packets, ~1 MB, 10 ms IAT.
fn heavy_flow(src: [u8; 4]) -> Vec<PacketRecord> {
    (0..500).map(|i| packet(src, 40_000, i * 10, 2_098)).collect()
}

struct Harness {
    bus: Arc<MemoryBus>,
    repo: Arc<MemoryRepository>,
    detection: DetectionHandle,
    investigation: InvestigationHandle,
    response: ResponseHandle,
}

impl Harness {
    async fn spawn(
        packets: Vec<PacketRecord>,
        providers: Vec<Arc<dyn TiProvider>>,
        cache: Arc<dyn TiCache>,
        response_config: ResponseConfig,
    ) -> Self {
        let bus = Arc::new(MemoryBus::new());
        let repo = Arc::new(MemoryRepository::new());
        let audit = Arc::new(AuditLog::without_tracing(1_000));

        let registry = ActionRegistry::builtin(Arc::new(RecordingDataPlane::new()), &response_config);
        let investigation_config = InvestigationConfig::default();
        let response = ResponseEngine::new(
            Arc::clone(&bus) as Arc<dyn EventBus>,
            Arc::clone(&repo) as Arc<dyn Repository>,
            registry,
            &response_config,
            investigation_config.verdict_thresholds,
            audit,
        )
        .unwrap()
        .spawn()
        .await
        .unwrap();

        let investigation = InvestigationAgent::new(
            Arc::clone(&bus) as Arc<dyn EventBus>,
            Arc::clone(&repo) as Arc<dyn Repository>,
            cache,
            providers,
            investigation_config,
        )
        .spawn()
        .await
        .unwrap();

        let detection_config = DetectionConfig {
            flush_interval_ms: 50,
            batch_timeout_ms: 20,
            scoring_workers: 2,
            ..Default::default()
        };
        let detection = DetectionEngine::new(
            Arc::clone(&bus) as Arc<dyn EventBus>,
            Arc::clone(&repo) as Arc<dyn Repository>,
            Arc::new(HeuristicScorer::default()),
            detection_config,
            "sensor-e2e",
        )
        .spawn(Box::new(ListSource::new(packets)));

        Self {
            bus,
            repo,
            detection,
            investigation,
            response,
        }
    }

    async fn shutdown(self) {
        self.detection.shutdown().await;
        self.investigation.shutdown().await;
        self.response.shutdown().await;
    }
}

async fn await_action(
    sub: &mut ns_core::bus::Subscription,
    timeout: Duration,
) -> Option<ActionRecord> {
    let msg = tokio::time::timeout(timeout, sub.recv()).await.ok()??;
    msg.deserialize().ok()
}

/// Low-confidence noise never makes it past the emit threshold.
#[tokio::test]
async fn noise_is_suppressed_end_to_end() {
    // 1000 single-packet flows with negligible volume: heuristic scores
    // land well under the 0.3 emit threshold.
    let packets: Vec<PacketRecord> = (0..1_000)
        .map(|i| {
            packet(
                [192, 0, 2, (i % 200 + 2) as u8],
                2_000 + (i % 500) as u16,
                i * 2,
                60 + (i % 40) as u64,
            )
        })
        .collect();

    let harness = Harness::spawn(
        packets,
        vec![Arc::new(MockProvider::fixed("reputation", 0.9))],
        Arc::new(LruTtlCache::new()),
        ResponseConfig::default(),
    )
    .await;

    tokio::time::sleep(Duration::from_millis(700)).await;

    assert_eq!(harness.repo.count_alerts().await.unwrap(), 0);
    assert_eq!(harness.repo.count_investigations().await.unwrap(), 0);
    assert_eq!(harness.repo.count_actions().await.unwrap(), 0);

    harness.shutdown().await;
}

/// A malicious source with a cached high-confidence finding walks the whole
/// pipeline into container isolation.
#[tokio::test]
async fn cached_malicious_ip_is_isolated() {
    let cache: Arc<dyn TiCache> = Arc::new(LruTtlCache::new());
    let seeded = Finding {
        source: "reputation".to_string(),
        raw: serde_json::json!({ "reputation": -90.0 }),
        normalized_score: 0.95,
        is_mocked: false,
    };
    cache
        .set(
            &ti_key("reputation", "203.0.113.7"),
            &serde_json::to_vec(&seeded).unwrap(),
            Duration::from_secs(3_600),
        )
        .await
        .unwrap();

    // The provider itself is down; only the cache can answer.
    let harness = Harness::spawn(
        heavy_flow([203, 0, 113, 7]),
        vec![Arc::new(MockProvider::failing("reputation"))],
        cache,
        ResponseConfig::default(),
    )
    .await;
    let mut actions = harness.bus.subscribe(topics::ACTIONS).await.unwrap();

    let record = await_action(&mut actions, Duration::from_secs(10))
        .await
        .expect("no action record");
    assert_eq!(record.action_type, "isolate_container");
    assert_eq!(record.target, "203.0.113.7");
    assert_eq!(record.result, "simulated_isolation");
    assert!(record.gate_trace().is_empty());

    // One of each record, joined by ids.
    let alerts = harness
        .repo
        .list_alerts(ns_core::repo::Page::default())
        .await
        .unwrap();
    let alert = alerts
        .iter()
        .find(|a| a.id == record.alert_id)
        .expect("action references a persisted alert");
    assert_eq!(alert.severity, Severity::High);
    assert!(alert.model_score >= 0.8);

    let report = harness
        .repo
        .investigation_for_alert(record.alert_id)
        .await
        .unwrap()
        .expect("investigation persisted");
    assert_eq!(report.verdict, Verdict::Malicious);
    assert!(report.risk_score >= 0.7);

    harness.shutdown().await;
}

/// Whitelisting the offender forces log_only with an audit trace.
#[tokio::test]
async fn whitelisted_offender_is_only_logged() {
    let cache: Arc<dyn TiCache> = Arc::new(LruTtlCache::new());
    cache
        .set(
            &ti_key("reputation", "203.0.113.7"),
            &serde_json::to_vec(&Finding {
                source: "reputation".to_string(),
                raw: serde_json::json!({ "reputation": -90.0 }),
                normalized_score: 0.95,
                is_mocked: false,
            })
            .unwrap(),
            Duration::from_secs(3_600),
        )
        .await
        .unwrap();

    let harness = Harness::spawn(
        heavy_flow([203, 0, 113, 7]),
        vec![Arc::new(MockProvider::failing("reputation"))],
        cache,
        ResponseConfig {
            ip_whitelist: vec!["203.0.113.7".to_string()],
            ..Default::default()
        },
    )
    .await;
    let mut actions = harness.bus.subscribe(topics::ACTIONS).await.unwrap();

    let record = await_action(&mut actions, Duration::from_secs(10))
        .await
        .expect("no action record");
    assert_eq!(record.action_type, "log_only");
    assert_eq!(record.gate_trace(), vec!["whitelist".to_string()]);

    harness.shutdown().await;
}

/// With every TI provider failing, the report falls back to the alert and
/// the confidence gate keeps intrusive actions off the table.
#[tokio::test]
async fn total_ti_outage_degrades_cleanly() {
    let harness = Harness::spawn(
        heavy_flow([203, 0, 113, 50]),
        vec![
            Arc::new(MockProvider::failing("reputation")),
            Arc::new(MockProvider::failing("abuse-confidence")),
        ],
        Arc::new(LruTtlCache::new()),
        ResponseConfig::default(),
    )
    .await;
    let mut actions = harness.bus.subscribe(topics::ACTIONS).await.unwrap();

    let record = await_action(&mut actions, Duration::from_secs(10))
        .await
        .expect("no action record");

    let report = harness
        .repo
        .investigation_for_alert(record.alert_id)
        .await
        .unwrap()
        .expect("investigation persisted");
    assert_eq!(report.uncertainty, 1.0);
    assert_eq!(report.verdict, Verdict::Suspicious);
    let alert = harness
        .repo
        .get_alert(record.alert_id)
        .await
        .unwrap()
        .unwrap();
    eprintln!("DEBUG record.alert_id={} report.alert_id={} alert.id={} report.risk_score={:.20} alert.model_score={:.20}", record.alert_id, report.alert_id, alert.id, report.risk_score, alert.model_score);
    assert_eq!(report.risk_score, alert.model_score);

    // The matrix cell proposed isolation (high x high), and the zero
    // confidence downgraded it one level with an audit trace.
    assert_eq!(record.action_type, "rate_limit");
    assert_eq!(record.gate_trace(), vec!["low_confidence".to_string()]);

    harness.shutdown().await;
}

/// Two reports against the same target serialize, and the second block
/// observes the first (idempotent install).
#[tokio::test]
async fn same_target_blocks_serialize() {
    let bus = Arc::new(MemoryBus::new());
    let repo = Arc::new(MemoryRepository::new());
    let config = ResponseConfig::default();
    let registry = ActionRegistry::builtin(Arc::new(RecordingDataPlane::new()), &config);
    let response = ResponseEngine::new(
        Arc::clone(&bus) as Arc<dyn EventBus>,
        Arc::clone(&repo) as Arc<dyn Repository>,
        registry,
        &config,
        Default::default(),
        Arc::new(AuditLog::without_tracing(100)),
    )
    .unwrap()
    .spawn()
    .await
    .unwrap();
    let mut actions = bus.subscribe(topics::ACTIONS).await.unwrap();

    // Two alerts from the same source, both landing in high x medium
    // (block_ip).
    let mut reports = Vec::new();
    for _ in 0..2 {
        let alert = AlertEvent {
            id: uuid::Uuid::now_v7(),
            ts: Utc::now(),
            src_ip: "203.0.113.77".parse().unwrap(),
            dst_ip: "10.0.0.5".parse().unwrap(),
            proto: ns_core::model::Proto::Tcp,
            features: Default::default(),
            model_score: 0.9,
            confidence: 0.9,
            severity: Severity::High,
            sensor_id: "sensor-e2e".to_string(),
        };
        repo.save_alert(&alert).await.unwrap();
        reports.push(InvestigationReport {
            alert_id: alert.id,
            ts: Utc::now(),
            ioc_findings: Default::default(),
            sources: vec!["reputation".to_string()],
            risk_score: 0.55,
            verdict: Verdict::Suspicious,
            uncertainty: 0.0,
            confidence: 1.0,
            alert_severity: Severity::High,
            notes: String::new(),
        });
    }

    for report in &reports {
        bus.publish(topics::INVESTIGATIONS, &serde_json::to_vec(report).unwrap())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let first = await_action(&mut actions, Duration::from_secs(5))
        .await
        .expect("first record");
    let second = await_action(&mut actions, Duration::from_secs(5))
        .await
        .expect("second record");

    assert_eq!(first.action_type, "block_ip");
    assert_eq!(second.action_type, "block_ip");
    assert!(first.ts <= second.ts);
    assert_eq!(first.result, "simulated_block");
    assert_eq!(second.result, "already_blocked");
    assert_eq!(repo.count_actions().await.unwrap(), 2);

    response.shutdown().await;
}

/// Replaying the same alert through the bus yields exactly one
/// investigation and one action.
#[tokio::test]
async fn replayed_alert_is_absorbed() {
    let harness = Harness::spawn(
        Vec::new(),
        vec![Arc::new(MockProvider::fixed("reputation", 0.95))],
        Arc::new(LruTtlCache::new()),
        ResponseConfig::default(),
    )
    .await;
    let mut actions = harness.bus.subscribe(topics::ACTIONS).await.unwrap();

    let alert = AlertEvent {
        id: uuid::Uuid::now_v7(),
        ts: Utc::now(),
        src_ip: "203.0.113.99".parse().unwrap(),
        dst_ip: "10.0.0.5".parse().unwrap(),
        proto: ns_core::model::Proto::Tcp,
        features: Default::default(),
        model_score: 0.9,
        confidence: 0.9,
        severity: Severity::High,
        sensor_id: "sensor-e2e".to_string(),
    };
    harness.repo.save_alert(&alert).await.unwrap();

    let payload = serde_json::to_vec(&alert).unwrap();
    harness.bus.publish(topics::ALERTS, &payload).await.unwrap();
    harness.bus.publish(topics::ALERTS, &payload).await.unwrap();

    let record = await_action(&mut actions, Duration::from_secs(5))
        .await
        .expect("one action record");
    assert_eq!(record.alert_id, alert.id);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(harness.repo.count_investigations().await.unwrap(), 1);
    assert_eq!(harness.repo.count_actions().await.unwrap(), 1);

    harness.shutdown().await;
}
