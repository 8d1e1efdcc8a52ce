//! The investigation agent: concurrent TI fan-out and score fusion.
//!
//! For each alert the agent queries every configured provider in parallel
//! under a common deadline, consults the cache first, fuses whatever arrived
//! into a risk score, and emits exactly one report per alert. Provider
//! failures degrade the result (higher uncertainty), they never abort it.

use crate::provider::{Finding, ProviderError, TiProvider};
use chrono::Utc;
use metrics::{counter, histogram};
use ns_core::bus::{BusResult, EventBus};
use ns_core::cache::{ti_key, TiCache};
use ns_core::config::InvestigationConfig;
use ns_core::model::{topics, AlertEvent, InvestigationReport, Severity, Verdict};
use ns_core::repo::Repository;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Investigation stage of the pipeline.
pub struct InvestigationAgent {
    bus: Arc<dyn EventBus>,
    repo: Arc<dyn Repository>,
    cache: Arc<dyn TiCache>,
    providers: Vec<Arc<dyn TiProvider>>,
    config: InvestigationConfig,
}

/// Handle over the spawned agent.
pub struct InvestigationHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl InvestigationHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

impl InvestigationAgent {
    pub fn new(
        bus: Arc<dyn EventBus>,
        repo: Arc<dyn Repository>,
        cache: Arc<dyn TiCache>,
        providers: Vec<Arc<dyn TiProvider>>,
        config: InvestigationConfig,
    ) -> Self {
        Self {
            bus,
            repo,
            cache,
            providers,
            config,
        }
    }

    /// Subscribes to alerts and spawns the reader loop.
    pub async fn spawn(self) -> BusResult<InvestigationHandle> {
        let subscription = self.bus.subscribe(topics::ALERTS).await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let agent = Arc::new(self);
        info!(
            providers = agent.providers.len(),
            offline = agent.config.offline_mode,
            "investigation agent started"
        );
        let task = tokio::spawn(run(agent, subscription, shutdown_rx));
        Ok(InvestigationHandle {
            shutdown: shutdown_tx,
            task,
        })
    }

    /// Runs one investigation. Deterministic given the alert, the cache
    /// state, and the providers' answers.
    pub async fn investigate(&self, alert: &AlertEvent) -> InvestigationReport {
        let ip = alert.src_ip;
        let total = self.providers.len();
        let sources: Vec<String> = self.providers.iter().map(|p| p.name().to_string()).collect();

        let mut lookups = JoinSet::new();
        for provider in &self.providers {
            let provider = Arc::clone(provider);
            let cache = Arc::clone(&self.cache);
            let ttl = self.ttl_for(provider.name());
            lookups.spawn(async move {
                let name = provider.name().to_string();
                let result = lookup(provider, cache, ip, ttl).await;
                (name, result)
            });
        }

        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.config.ti_fanout_timeout_ms);
        let mut findings: BTreeMap<String, serde_json::Value> = BTreeMap::new();
        let mut present = 0usize;
        let mut normalized_sum = 0.0f64;

        loop {
            match tokio::time::timeout_at(deadline, lookups.join_next()).await {
                Ok(Some(Ok((source, Ok(finding))))) => {
                    present += 1;
                    normalized_sum += finding.normalized_score;
                    match serde_json::to_value(&finding) {
                        Ok(value) => {
                            findings.insert(source, value);
                        }
                        Err(e) => {
                            findings
                                .insert(source, serde_json::json!({ "error": e.to_string() }));
                        }
                    }
                }
                Ok(Some(Ok((source, Err(e))))) => {
                    counter!("ns_ti_provider_errors_total", "provider" => source.clone())
                        .increment(1);
                    debug!(provider = %source, "provider lookup failed: {e}");
                    findings.insert(source, serde_json::json!({ "error": e.kind() }));
                }
                Ok(Some(Err(join_err))) => {
                    warn!("provider lookup task failed: {join_err}");
                }
                Ok(None) => break,
                Err(_) => {
                    // Deadline: truncate the fan-out, proceed with what we
                    // have.
                    warn!(
                        alert_id = %alert.id,
                        answered = present,
                        total,
                        "TI fan-out deadline reached"
                    );
                    lookups.abort_all();
                    break;
                }
            }
        }

        self.fuse(alert, sources, findings, present, normalized_sum, total)
    }

    fn ttl_for(&self, provider: &str) -> Duration {
        let secs = self
            .config
            .providers
            .get(provider)
            .map(|p| p.ttl_secs)
            .unwrap_or(3_600);
        Duration::from_secs(secs)
    }

    /// Fuses provider scores with the model score into the final report.
    fn fuse(
        &self,
        alert: &AlertEvent,
        sources: Vec<String>,
        findings: BTreeMap<String, serde_json::Value>,
        present: usize,
        normalized_sum: f64,
        total: usize,
    ) -> InvestigationReport {
        let thresholds = &self.config.verdict_thresholds;
        eprintln!("DEBUG present={present} total={total}");

        eprintln!("DEBUG investigate id={} alert.model_score={:.20}", alert.id, alert.model_score);
        if present == 0 {
            // No intel at all: the alert stands on its own, at full
            // uncertainty. High-severity alerts stay on the radar.
            let verdict = if alert.severity == Severity::High {
                Verdict::Suspicious
            } else {
                Verdict::Benign
            };
            return InvestigationReport {
                alert_id: alert.id,
                ts: Utc::now(),
                ioc_findings: findings,
                sources,
                risk_score: alert.model_score,
                verdict,
                uncertainty: 1.0,
                confidence: 0.0,
                alert_severity: alert.severity,
                notes: format!("no TI sources responded (0/{total})"),
            };
        }

        let alpha = self.config.alpha;
        let provider_mean = normalized_sum / present as f64;
        let risk_score =
            (alpha * alert.model_score + (1.0 - alpha) * provider_mean).clamp(0.0, 1.0);
        let uncertainty = 1.0 - present as f64 / total as f64;
        let confidence = 1.0 - uncertainty;

        InvestigationReport {
            alert_id: alert.id,
            ts: Utc::now(),
            ioc_findings: findings,
            sources,
            risk_score,
            verdict: Verdict::bucket(risk_score, thresholds),
            uncertainty,
            confidence,
            alert_severity: alert.severity,
            notes: format!("automated investigation, {present}/{total} sources responded"),
        }
    }

    async fn process(&self, alert: AlertEvent) {
        let started = Instant::now();
        let report = self.investigate(&alert).await;
        self.persist_and_publish(&report).await;
        histogram!("ns_investigation_latency_seconds").record(started.elapsed().as_secs_f64());
    }

    /// Write-before-publish with a single retry on transient store failure.
    /// A duplicate alert id is dropped silently — one report per alert.
    async fn persist_and_publish(&self, report: &InvestigationReport) {
        let saved = match self.repo.save_investigation(report).await {
            Ok(saved) => saved,
            Err(e) if e.is_transient() => match self.repo.save_investigation(report).await {
                Ok(saved) => saved,
                Err(e) => {
                    counter!("ns_persist_failures_total", "record" => "investigation")
                        .increment(1);
                    error!(alert_id = %report.alert_id, "report dropped, persist retry failed: {e}");
                    return;
                }
            },
            Err(e) => {
                counter!("ns_persist_failures_total", "record" => "investigation").increment(1);
                error!(alert_id = %report.alert_id, "report dropped, persist failed: {e}");
                return;
            }
        };
        if !saved {
            debug!(alert_id = %report.alert_id, "alert already investigated, replay dropped");
            return;
        }

        let payload = match serde_json::to_vec(report) {
            Ok(payload) => payload,
            Err(e) => {
                error!(alert_id = %report.alert_id, "report serialization failed: {e}");
                return;
            }
        };
        if let Err(e) = self.bus.publish(topics::INVESTIGATIONS, &payload).await {
            warn!(alert_id = %report.alert_id, "report publish failed: {e}");
        }
    }
}

/// Cache-through provider lookup.
///
/// On a miss the winner of any concurrent fill race is preferred so every
/// investigation of the same IOC sees identical findings until TTL expiry.
async fn lookup(
    provider: Arc<dyn TiProvider>,
    cache: Arc<dyn TiCache>,
    ip: IpAddr,
    ttl: Duration,
) -> Result<Finding, ProviderError> {
    let key = ti_key(provider.name(), &ip.to_string());

    if let Ok(Some(bytes)) = cache.get(&key).await {
        if let Ok(finding) = serde_json::from_slice::<Finding>(&bytes) {
            counter!("ns_ti_cache_hits_total", "provider" => provider.name().to_string())
                .increment(1);
            return Ok(finding);
        }
        // Undecodable entry: fall through and refresh it.
        let _ = cache.delete(&key).await;
    }

    let finding = provider.check_ip(ip).await?;
    if let Ok(bytes) = serde_json::to_vec(&finding) {
        if let Ok(false) = cache.set_if_absent(&key, &bytes, ttl).await {
            if let Ok(Some(winner)) = cache.get(&key).await {
                if let Ok(winner) = serde_json::from_slice::<Finding>(&winner) {
                    return Ok(winner);
                }
            }
        }
    }
    Ok(finding)
}

/// Subscription reader: at most `max_concurrent` investigations in flight.
async fn run(
    agent: Arc<InvestigationAgent>,
    mut subscription: ns_core::bus::Subscription,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let semaphore = Arc::new(Semaphore::new(agent.config.max_concurrent.max(1)));
    let mut workers = JoinSet::new();

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            maybe_msg = subscription.recv() => {
                let Some(msg) = maybe_msg else { break };
                let alert: AlertEvent = match msg.deserialize() {
                    Ok(alert) => alert,
                    Err(e) => {
                        warn!("undecodable alert payload dropped: {e}");
                        continue;
                    }
                };

                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    break;
                };
                let agent = Arc::clone(&agent);
                workers.spawn(async move {
                    let _permit = permit;
                    agent.process(alert).await;
                });
            }
            // Reap finished investigations so the set stays small.
            Some(_) = workers.join_next(), if !workers.is_empty() => {}
        }
    }

    // Let in-flight investigations finish before the task exits.
    while workers.join_next().await.is_some() {}
}
