//! Pipeline wiring: build the shared infrastructure, spawn the three
//! engines, run until interrupted.

use anyhow::{Context, Result};
use ns_core::bus::EventBus;
use ns_core::cache::{LruTtlCache, TiCache};
use ns_core::config::{AppConfig, BusTransport};
use ns_core::repo::{Repository, SqliteRepository};
use ns_core::stats::StatsService;
use ns_detect::{DetectionEngine, HeuristicScorer, PacketSource};
use ns_intel::{build_providers, InvestigationAgent};
use ns_observability::AuditLog;
use ns_response::{ActionRegistry, ResponseEngine, SystemDataPlane};
use std::sync::Arc;
use tracing::info;

/// Entries the in-memory audit log retains.
const AUDIT_CAPACITY: usize = 10_000;

/// Builds the event bus selected by configuration.
pub async fn build_bus(config: &AppConfig) -> Result<Arc<dyn EventBus>> {
    match config.bus.transport {
        BusTransport::Memory => Ok(Arc::new(
            ns_core::bus::MemoryBus::with_capacity(config.bus.queue_capacity).with_timeouts(
                std::time::Duration::from_millis(config.bus.publish_timeout_ms),
                std::time::Duration::from_millis(config.bus.drain_timeout_ms),
            ),
        )),
        BusTransport::Broker => build_broker_bus(config).await,
    }
}

#[cfg(feature = "broker")]
async fn build_broker_bus(config: &AppConfig) -> Result<Arc<dyn EventBus>> {
    let broker_config = ns_core::bus::BrokerConfig::new(&config.bus.broker_url);
    let bus = ns_core::bus::BrokerBus::connect(broker_config)
        .await
        .with_context(|| format!("connecting to broker at {}", config.bus.broker_url))?;
    Ok(Arc::new(bus))
}

#[cfg(not(feature = "broker"))]
async fn build_broker_bus(_config: &AppConfig) -> Result<Arc<dyn EventBus>> {
    anyhow::bail!("built without the 'broker' feature; set bus.transport to 'memory'")
}

/// Opens the repository named by `persistence_url`.
pub async fn build_repo(config: &AppConfig) -> Result<Arc<dyn Repository>> {
    let repo = SqliteRepository::connect(&config.persistence_url)
        .await
        .with_context(|| format!("opening persistence store {}", config.persistence_url))?;
    Ok(Arc::new(repo))
}

/// Registry of built-in actions against the real data plane.
pub fn build_registry(config: &AppConfig) -> ActionRegistry {
    ActionRegistry::builtin(Arc::new(SystemDataPlane), &config.response)
}

/// Validates the configuration against the registered actions. Fatal
/// errors abort startup; the pipeline never starts partially configured.
pub fn validate(config: &AppConfig, registry: &ActionRegistry) -> Result<()> {
    config
        .validate(&registry.names())
        .context("fatal configuration error")?;
    Ok(())
}

/// Wires and runs the whole pipeline until ctrl-c.
pub async fn run(config: AppConfig, source: Box<dyn PacketSource>) -> Result<()> {
    let registry = build_registry(&config);
    validate(&config, &registry)?;

    let bus = build_bus(&config).await?;
    let repo = build_repo(&config).await?;
    let audit = Arc::new(AuditLog::new(AUDIT_CAPACITY));
    let cache: Arc<dyn TiCache> = Arc::new(LruTtlCache::with_capacity(
        config.investigation.cache_capacity,
    ));

    // Downstream subscribers first, so nothing published is missed.
    let response = ResponseEngine::new(
        Arc::clone(&bus),
        Arc::clone(&repo),
        registry,
        &config.response,
        config.investigation.verdict_thresholds,
        Arc::clone(&audit),
    )?
    .spawn()
    .await?;

    let providers = build_providers(&config.investigation);
    let investigation = InvestigationAgent::new(
        Arc::clone(&bus),
        Arc::clone(&repo),
        cache,
        providers,
        config.investigation.clone(),
    )
    .spawn()
    .await?;

    let detection = DetectionEngine::new(
        Arc::clone(&bus),
        Arc::clone(&repo),
        Arc::new(HeuristicScorer::new(config.detection.score_weights)),
        config.detection.clone(),
        config.sensor_id.clone(),
    )
    .spawn(source);

    let stats = Arc::new(StatsService::new(Arc::clone(&repo)));
    let ticker = stats.spawn_ticker();

    info!("pipeline running, ctrl-c to stop");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutting down");

    detection.shutdown().await;
    investigation.shutdown().await;
    response.shutdown().await;
    ticker.abort();
    bus.close().await;

    Ok(())
}
