//! The response engine: matrix lookup, safety gate, dispatch, revert.
//!
//! Dispatch is serial — one report at a time — which makes action ordering
//! against any single target deterministic by construction. The per-target
//! locks exist because `revert` arrives from outside the dispatcher (CLI,
//! API) and must serialize against in-flight executions on the same target.

use crate::actions::{ActionError, ActionRegistry, ExecutionMode};
use crate::advisor::{NoopAdvisor, PolicyAdvisor};
use crate::gate::SafetyGate;
use crate::matrix::DecisionMatrix;
use chrono::Utc;
use metrics::{counter, histogram};
use ns_core::bus::{BusResult, EventBus};
use ns_core::config::{ConfigError, ResponseConfig};
use ns_core::model::{
    topics, ActionRecord, InvestigationReport, RiskBucket, SafetyLevel, VerdictThresholds,
};
use ns_core::repo::{RepoError, Repository};
use ns_observability::{AuditEventType, AuditLog, AuditResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Errors surfaced by the engine's externally callable operations.
#[derive(Error, Debug)]
pub enum ResponseError {
    #[error("action record not found: {0}")]
    NotFound(Uuid),

    #[error("action '{0}' is not reversible or has no revert token")]
    NotReversible(String),

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// FIFO locks keyed by target, shared by dispatch and revert.
#[derive(Default)]
struct TargetLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TargetLocks {
    async fn acquire(&self, target: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            Arc::clone(map.entry(target.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

/// Response stage of the pipeline.
pub struct ResponseEngine {
    bus: Arc<dyn EventBus>,
    repo: Arc<dyn Repository>,
    registry: ActionRegistry,
    matrix: DecisionMatrix,
    gate: SafetyGate,
    advisor: Arc<dyn PolicyAdvisor>,
    audit: Arc<AuditLog>,
    risk_thresholds: VerdictThresholds,
    action_timeout: Duration,
    default_mode: ExecutionMode,
    locks: TargetLocks,
}

/// Handle over the spawned dispatcher.
pub struct ResponseHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    /// Kept so `revert` stays callable after spawn.
    pub engine: Arc<ResponseEngine>,
}

impl ResponseHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

impl ResponseEngine {
    /// Builds the engine, validating the decision matrix against the
    /// registry. Fails before any work is accepted.
    pub fn new(
        bus: Arc<dyn EventBus>,
        repo: Arc<dyn Repository>,
        registry: ActionRegistry,
        config: &ResponseConfig,
        risk_thresholds: VerdictThresholds,
        audit: Arc<AuditLog>,
    ) -> Result<Self, ConfigError> {
        let matrix = DecisionMatrix::from_config(&config.decision_matrix, &registry)?;
        let gate = SafetyGate::new(config);
        Ok(Self {
            bus,
            repo,
            registry,
            matrix,
            gate,
            advisor: Arc::new(NoopAdvisor),
            audit,
            risk_thresholds,
            action_timeout: Duration::from_millis(config.action_timeout_ms),
            default_mode: if config.production_actions_enabled {
                ExecutionMode::Production
            } else {
                ExecutionMode::Simulation
            },
            locks: TargetLocks::default(),
        })
    }

    /// Installs a learned-policy advisor. The matrix stays authoritative
    /// and the gate still applies to whatever the advisor suggests.
    pub fn with_advisor(mut self, advisor: Arc<dyn PolicyAdvisor>) -> Self {
        self.advisor = advisor;
        self
    }

    /// Subscribes to investigation reports and starts the serial
    /// dispatcher.
    pub async fn spawn(self) -> BusResult<ResponseHandle> {
        let subscription = self.bus.subscribe(topics::INVESTIGATIONS).await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let engine = Arc::new(self);
        info!("response engine started");
        let task = tokio::spawn(run(Arc::clone(&engine), subscription, shutdown_rx));
        Ok(ResponseHandle {
            shutdown: shutdown_tx,
            task,
            engine,
        })
    }

    /// Decides on and executes the response to one report.
    ///
    /// Returns the emitted record, or `None` when the report was a replay
    /// or its alert is unknown.
    pub async fn respond(&self, report: &InvestigationReport) -> Option<ActionRecord> {
        let started = Instant::now();

        // One non-reverted action per report; bus replays stop here.
        match self.repo.action_for_alert(report.alert_id).await {
            Ok(Some(existing)) => {
                debug!(alert_id = %report.alert_id, "alert already actioned, replay dropped");
                return Some(existing);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(alert_id = %report.alert_id, "action dedup lookup failed: {e}");
            }
        }

        let alert = match self.repo.get_alert(report.alert_id).await {
            Ok(Some(alert)) => alert,
            Ok(None) => {
                warn!(alert_id = %report.alert_id, "report references unknown alert, dropped");
                return None;
            }
            Err(e) => {
                error!(alert_id = %report.alert_id, "alert lookup failed, report dropped: {e}");
                return None;
            }
        };
        let target = alert.src_ip.to_string();

        let bucket = RiskBucket::bucket(report.risk_score, &self.risk_thresholds);
        let mut proposed = self.matrix.select(report.alert_severity, bucket).to_string();
        if let Some(advised) = self.advisor.advise(report, &proposed) {
            if self.registry.contains(&advised) {
                debug!(proposed, advised, "advisor shifted cell selection");
                proposed = advised;
            } else {
                warn!(advised, "advisor suggested unregistered action, ignored");
            }
        }

        let decision = self
            .gate
            .apply(&self.registry, &proposed, &target, report.confidence);
        if !decision.trace.is_empty() {
            self.audit
                .record(
                    AuditEventType::ActionDowngraded,
                    Some(report.alert_id),
                    None,
                    format!("{proposed} -> {} on {target}", decision.action_type),
                    AuditResult::Success,
                )
                .await;
        }

        let Some(action) = self.registry.get(&decision.action_type) else {
            error!(action = %decision.action_type, "gated action missing from registry");
            return None;
        };

        let parameters = serde_json::json!({
            "verdict": report.verdict,
            "risk_score": report.risk_score,
            "gate_trace": decision.trace,
        });

        // Hold the target lock across execution; revert requests on the
        // same target queue behind it.
        let _guard = self.locks.acquire(&target).await;
        let executed = tokio::time::timeout(
            self.action_timeout,
            action.execute(&target, &parameters, decision.mode),
        )
        .await;

        let (result, reversible, revert_token, audit_event, audit_result) = match executed {
            Ok(Ok(outcome)) => {
                let event = if decision.mode == ExecutionMode::Simulation {
                    AuditEventType::ActionSimulated
                } else {
                    AuditEventType::ActionExecuted
                };
                (
                    outcome.result,
                    outcome.reversible,
                    outcome.revert_token,
                    event,
                    AuditResult::Success,
                )
            }
            Ok(Err(e)) => {
                warn!(action = %decision.action_type, "action failed on {target}: {e}");
                (
                    format!("error:{}", e.kind()),
                    false,
                    None,
                    AuditEventType::ActionFailed,
                    AuditResult::Failure(e.to_string()),
                )
            }
            Err(_) => {
                warn!(action = %decision.action_type, "action deadline missed on {target}");
                (
                    "timeout".to_string(),
                    false,
                    None,
                    AuditEventType::ActionTimedOut,
                    AuditResult::Failure("deadline exceeded".to_string()),
                )
            }
        };

        let record = ActionRecord {
            action_id: Uuid::now_v7(),
            alert_id: report.alert_id,
            ts: Utc::now(),
            action_type: decision.action_type.clone(),
            target,
            parameters,
            result,
            safety_gate: safety_level(bucket, report.confidence),
            reversible,
            reverted: false,
            reverts: None,
            revert_token: revert_token.map(|t| t.to_string()),
        };

        self.persist_and_publish(&record).await;
        self.audit
            .record(
                audit_event,
                Some(record.alert_id),
                Some(record.action_id),
                format!("{} against {}", record.action_type, record.target),
                audit_result,
            )
            .await;
        counter!("ns_actions_executed_total", "action" => record.action_type.clone())
            .increment(1);
        histogram!("ns_action_latency_seconds").record(started.elapsed().as_secs_f64());

        Some(record)
    }

    /// Reverts a previously executed action by id.
    ///
    /// Idempotent: reverting an action that already has a revert record
    /// returns that record unchanged.
    pub async fn revert(&self, action_id: Uuid) -> Result<ActionRecord, ResponseError> {
        let record = self
            .repo
            .get_action(action_id)
            .await?
            .ok_or(ResponseError::NotFound(action_id))?;

        if let Some(existing) = self.repo.find_revert_of(action_id).await? {
            debug!(action_id = %action_id, "already reverted, returning existing record");
            return Ok(existing);
        }
        if record.reverted {
            // The record itself is a revert; nothing to undo.
            return Err(ResponseError::NotReversible(record.action_type));
        }

        let token_str = record
            .revert_token
            .as_ref()
            .filter(|_| record.reversible)
            .ok_or_else(|| ResponseError::NotReversible(record.action_type.clone()))?;
        let token: serde_json::Value = serde_json::from_str(token_str)
            .map_err(|e| ActionError::InvalidRevertToken(e.to_string()))?;

        let action = self
            .registry
            .get(&record.action_type)
            .ok_or_else(|| ActionError::NotFound(record.action_type.clone()))?;
        let mode = self.default_mode;

        let _guard = self.locks.acquire(&record.target).await;
        let result = action.revert(&token, mode).await?;

        let revert_record = ActionRecord {
            action_id: Uuid::now_v7(),
            alert_id: record.alert_id,
            ts: Utc::now(),
            action_type: record.action_type.clone(),
            target: record.target.clone(),
            parameters: serde_json::json!({ "gate_trace": [] }),
            result,
            safety_gate: record.safety_gate,
            reversible: false,
            reverted: true,
            reverts: Some(record.action_id),
            revert_token: None,
        };

        self.persist_and_publish(&revert_record).await;
        self.audit
            .record(
                AuditEventType::ActionReverted,
                Some(revert_record.alert_id),
                Some(revert_record.action_id),
                format!("{} on {} reverted", record.action_type, record.target),
                AuditResult::Success,
            )
            .await;
        counter!("ns_actions_reverted_total").increment(1);

        Ok(revert_record)
    }

    /// Write-before-publish with a single retry on transient store failure.
    async fn persist_and_publish(&self, record: &ActionRecord) {
        let saved = match self.repo.save_action(record).await {
            Ok(saved) => saved,
            Err(e) if e.is_transient() => match self.repo.save_action(record).await {
                Ok(saved) => saved,
                Err(e) => {
                    counter!("ns_persist_failures_total", "record" => "action").increment(1);
                    error!(action_id = %record.action_id, "record dropped, persist retry failed: {e}");
                    return;
                }
            },
            Err(e) => {
                counter!("ns_persist_failures_total", "record" => "action").increment(1);
                error!(action_id = %record.action_id, "record dropped, persist failed: {e}");
                return;
            }
        };
        if !saved {
            return;
        }

        let payload = match serde_json::to_vec(record) {
            Ok(payload) => payload,
            Err(e) => {
                error!(action_id = %record.action_id, "record serialization failed: {e}");
                return;
            }
        };
        if let Err(e) = self.bus.publish(topics::ACTIONS, &payload).await {
            warn!(action_id = %record.action_id, "record publish failed: {e}");
        }
    }
}

/// Gate scrutiny level recorded on the audit record.
fn safety_level(bucket: RiskBucket, confidence: f64) -> SafetyLevel {
    if bucket == RiskBucket::High || confidence >= 0.8 {
        SafetyLevel::High
    } else if bucket == RiskBucket::Medium || confidence >= 0.5 {
        SafetyLevel::Medium
    } else {
        SafetyLevel::Low
    }
}

/// Serial dispatcher loop.
async fn run(
    engine: Arc<ResponseEngine>,
    mut subscription: ns_core::bus::Subscription,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            maybe_msg = subscription.recv() => {
                let Some(msg) = maybe_msg else { break };
                match msg.deserialize::<InvestigationReport>() {
                    Ok(report) => {
                        engine.respond(&report).await;
                    }
                    Err(e) => warn!("undecodable report payload dropped: {e}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Action, ActionOutcome};
    use crate::dataplane::RecordingDataPlane;
    use async_trait::async_trait;
    use ns_core::bus::MemoryBus;
    use ns_core::model::{AlertEvent, Proto, Severity, Verdict};
    use ns_core::repo::MemoryRepository;
    use std::collections::BTreeMap;

    struct Fixture {
        bus: Arc<MemoryBus>,
        repo: Arc<MemoryRepository>,
        audit: Arc<AuditLog>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                bus: Arc::new(MemoryBus::new()),
                repo: Arc::new(MemoryRepository::new()),
                audit: Arc::new(AuditLog::without_tracing(100)),
            }
        }

        fn engine(&self, config: ResponseConfig) -> ResponseEngine {
            let registry =
                ActionRegistry::builtin(Arc::new(RecordingDataPlane::new()), &config);
            ResponseEngine::new(
                Arc::clone(&self.bus) as Arc<dyn EventBus>,
                Arc::clone(&self.repo) as Arc<dyn Repository>,
                registry,
                &config,
                VerdictThresholds::default(),
                Arc::clone(&self.audit),
            )
            .unwrap()
        }

        async fn seed_alert(&self, src: &str, score: f64, severity: Severity) -> AlertEvent {
            let alert = AlertEvent {
                id: Uuid::now_v7(),
                ts: Utc::now(),
                src_ip: src.parse().unwrap(),
                dst_ip: "10.0.0.5".parse().unwrap(),
                proto: Proto::Tcp,
                features: BTreeMap::new(),
                model_score: score,
                confidence: score,
                severity,
                sensor_id: "sensor-1".to_string(),
            };
            self.repo.save_alert(&alert).await.unwrap();
            alert
        }
    }

    fn report_for(alert: &AlertEvent, risk: f64, confidence: f64) -> InvestigationReport {
        InvestigationReport {
            alert_id: alert.id,
            ts: Utc::now(),
            ioc_findings: BTreeMap::new(),
            sources: vec!["reputation".to_string()],
            risk_score: risk,
            verdict: Verdict::bucket(risk, &VerdictThresholds::default()),
            uncertainty: 1.0 - confidence,
            confidence,
            alert_severity: alert.severity,
            notes: String::new(),
        }
    }

    #[tokio::test]
    async fn high_high_cell_isolates() {
        let fixture = Fixture::new();
        let engine = fixture.engine(ResponseConfig::default());
        let alert = fixture.seed_alert("203.0.113.7", 0.9, Severity::High).await;

        let record = engine
            .respond(&report_for(&alert, 0.91, 0.95))
            .await
            .unwrap();
        assert_eq!(record.action_type, "isolate_container");
        assert_eq!(record.result, "simulated_isolation");
        assert_eq!(record.target, "203.0.113.7");
        assert!(record.reversible);
        assert!(record.gate_trace().is_empty());
        assert_eq!(record.safety_gate, SafetyLevel::High);
        assert_eq!(fixture.repo.count_actions().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn whitelisted_target_only_logs() {
        let fixture = Fixture::new();
        let engine = fixture.engine(ResponseConfig {
            ip_whitelist: vec!["203.0.113.7".to_string()],
            ..Default::default()
        });
        let alert = fixture.seed_alert("203.0.113.7", 0.9, Severity::High).await;

        let record = engine
            .respond(&report_for(&alert, 0.91, 0.95))
            .await
            .unwrap();
        assert_eq!(record.action_type, "log_only");
        assert_eq!(record.gate_trace(), vec!["whitelist".to_string()]);
        assert_eq!(record.result, "recorded");
    }

    #[tokio::test]
    async fn low_confidence_intrusive_is_downgraded() {
        let fixture = Fixture::new();
        let engine = fixture.engine(ResponseConfig::default());
        let alert = fixture.seed_alert("203.0.113.9", 0.9, Severity::High).await;

        // high x high proposes isolate_container; confidence below 0.6
        // drops it one level.
        let record = engine
            .respond(&report_for(&alert, 0.95, 0.4))
            .await
            .unwrap();
        assert_eq!(record.action_type, "rate_limit");
        assert_eq!(record.gate_trace(), vec!["low_confidence".to_string()]);
    }

    #[tokio::test]
    async fn duplicate_report_produces_one_record() {
        let fixture = Fixture::new();
        let engine = fixture.engine(ResponseConfig::default());
        let alert = fixture.seed_alert("203.0.113.7", 0.9, Severity::High).await;
        let report = report_for(&alert, 0.91, 0.95);

        let first = engine.respond(&report).await.unwrap();
        let second = engine.respond(&report).await.unwrap();
        assert_eq!(first.action_id, second.action_id);
        assert_eq!(fixture.repo.count_actions().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn same_target_actions_are_sequential_and_idempotent() {
        let fixture = Fixture::new();
        let engine = fixture.engine(ResponseConfig::default());

        // Two different alerts from the same source, both landing in the
        // high x medium cell (block_ip).
        let first = fixture.seed_alert("203.0.113.7", 0.9, Severity::High).await;
        let second = fixture.seed_alert("203.0.113.7", 0.9, Severity::High).await;

        let record_a = engine.respond(&report_for(&first, 0.55, 0.9)).await.unwrap();
        let record_b = engine
            .respond(&report_for(&second, 0.55, 0.9))
            .await
            .unwrap();

        assert_eq!(record_a.action_type, "block_ip");
        assert_eq!(record_b.action_type, "block_ip");
        assert!(record_a.ts <= record_b.ts);
        assert_eq!(record_a.result, "simulated_block");
        // The second install observes the first.
        assert_eq!(record_b.result, "already_blocked");
    }

    #[tokio::test]
    async fn revert_emits_back_referencing_record() {
        let fixture = Fixture::new();
        let engine = fixture.engine(ResponseConfig::default());
        let alert = fixture.seed_alert("203.0.113.7", 0.9, Severity::High).await;

        let record = engine
            .respond(&report_for(&alert, 0.55, 0.9))
            .await
            .unwrap();
        assert_eq!(record.action_type, "block_ip");

        let revert = engine.revert(record.action_id).await.unwrap();
        assert!(revert.reverted);
        assert_eq!(revert.reverts, Some(record.action_id));
        assert_eq!(revert.result, "unblocked");

        // Second revert is a no-op returning the same record.
        let again = engine.revert(record.action_id).await.unwrap();
        assert_eq!(again.action_id, revert.action_id);
        assert_eq!(again.result, revert.result);
        assert_eq!(fixture.repo.count_actions().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn revert_of_log_only_is_rejected() {
        let fixture = Fixture::new();
        let engine = fixture.engine(ResponseConfig::default());
        let alert = fixture.seed_alert("203.0.113.7", 0.2, Severity::Low).await;

        let record = engine.respond(&report_for(&alert, 0.1, 0.9)).await.unwrap();
        assert_eq!(record.action_type, "log_only");

        let err = engine.revert(record.action_id).await.unwrap_err();
        assert!(matches!(err, ResponseError::NotReversible(_)));
    }

    #[tokio::test]
    async fn deadline_miss_records_timeout() {
        struct SlowAction;

        #[async_trait]
        impl Action for SlowAction {
            fn name(&self) -> &str {
                "slow_action"
            }
            fn is_intrusive(&self) -> bool {
                false
            }
            async fn execute(
                &self,
                _target: &str,
                _params: &serde_json::Value,
                _mode: ExecutionMode,
            ) -> Result<ActionOutcome, ActionError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(ActionOutcome::irreversible("too late"))
            }
        }

        let fixture = Fixture::new();
        let mut config = ResponseConfig {
            action_timeout_ms: 50,
            ..Default::default()
        };
        config
            .decision_matrix
            .get_mut("high")
            .unwrap()
            .insert("high".to_string(), "slow_action".to_string());

        let mut registry =
            ActionRegistry::builtin(Arc::new(RecordingDataPlane::new()), &config);
        registry.register(Arc::new(SlowAction));
        let engine = ResponseEngine::new(
            Arc::clone(&fixture.bus) as Arc<dyn EventBus>,
            Arc::clone(&fixture.repo) as Arc<dyn Repository>,
            registry,
            &config,
            VerdictThresholds::default(),
            Arc::clone(&fixture.audit),
        )
        .unwrap();

        let alert = fixture.seed_alert("203.0.113.7", 0.9, Severity::High).await;
        let record = engine
            .respond(&report_for(&alert, 0.95, 0.95))
            .await
            .unwrap();
        assert_eq!(record.result, "timeout");
        assert!(!record.reversible);
    }

    #[tokio::test]
    async fn advisor_shifts_cell_but_gate_still_applies() {
        struct EscalatingAdvisor;
        impl PolicyAdvisor for EscalatingAdvisor {
            fn advise(&self, _report: &InvestigationReport, proposed: &str) -> Option<String> {
                (proposed == "rate_limit").then(|| "block_ip".to_string())
            }
        }

        let fixture = Fixture::new();
        let engine = fixture
            .engine(ResponseConfig {
                ip_whitelist: vec!["203.0.113.7".to_string()],
                ..Default::default()
            })
            .with_advisor(Arc::new(EscalatingAdvisor));
        let alert = fixture.seed_alert("203.0.113.7", 0.9, Severity::High).await;

        // high x low proposes rate_limit, the advisor escalates to
        // block_ip, and the whitelist still forces log_only.
        let record = engine.respond(&report_for(&alert, 0.2, 0.9)).await.unwrap();
        assert_eq!(record.action_type, "log_only");
        assert_eq!(record.gate_trace(), vec!["whitelist".to_string()]);
    }

    #[tokio::test]
    async fn dispatcher_loop_consumes_published_reports() {
        let fixture = Fixture::new();
        let mut action_sub = fixture.bus.subscribe(topics::ACTIONS).await.unwrap();
        let engine = fixture.engine(ResponseConfig::default());
        let alert = fixture.seed_alert("203.0.113.7", 0.9, Severity::High).await;

        let handle = engine.spawn().await.unwrap();
        let payload = serde_json::to_vec(&report_for(&alert, 0.91, 0.95)).unwrap();
        fixture
            .bus
            .publish(topics::INVESTIGATIONS, &payload)
            .await
            .unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(3), action_sub.recv())
            .await
            .expect("no action record within 3s")
            .unwrap();
        let record: ActionRecord = msg.deserialize().unwrap();
        assert_eq!(record.alert_id, alert.id);
        assert_eq!(record.action_type, "isolate_container");

        handle.shutdown().await;
    }
}
