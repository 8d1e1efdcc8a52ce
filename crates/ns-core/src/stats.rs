//! Stats and query surface consumed by dashboards.
//!
//! The pipeline itself never reads this module; it exists so external
//! readers (HTTP dashboard, CLI `stats`, exporters) have one contract:
//! a point-in-time [`StatsSnapshot`], paged listings, and a broadcast
//! stream of snapshots ticked at 1 Hz.

use crate::model::{ActionRecord, AlertEvent, InvestigationReport};
use crate::repo::{Page, RepoResult, Repository};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

/// Counter snapshot of everything persisted so far.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StatsSnapshot {
    pub alerts: u64,
    pub investigations: u64,
    pub actions: u64,
    pub alert_severities: HashMap<String, u64>,
    pub action_types: HashMap<String, u64>,
    pub verdicts: HashMap<String, u64>,
}

/// One page of a listing, echoing the requested window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paged<T> {
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
    pub items: Vec<T>,
}

/// Read-only stats service over the repository.
pub struct StatsService {
    repo: Arc<dyn Repository>,
    tx: broadcast::Sender<StatsSnapshot>,
}

impl StatsService {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { repo, tx }
    }

    /// Computes a fresh snapshot from the repository.
    pub async fn snapshot(&self) -> RepoResult<StatsSnapshot> {
        Ok(StatsSnapshot {
            alerts: self.repo.count_alerts().await?,
            investigations: self.repo.count_investigations().await?,
            actions: self.repo.count_actions().await?,
            alert_severities: self.repo.alert_severity_counts().await?,
            action_types: self.repo.action_type_counts().await?,
            verdicts: self.repo.verdict_counts().await?,
        })
    }

    pub async fn alerts(&self, page: Page) -> RepoResult<Paged<AlertEvent>> {
        Ok(Paged {
            total: self.repo.count_alerts().await?,
            limit: page.limit,
            offset: page.offset,
            items: self.repo.list_alerts(page).await?,
        })
    }

    pub async fn investigations(&self, page: Page) -> RepoResult<Paged<InvestigationReport>> {
        Ok(Paged {
            total: self.repo.count_investigations().await?,
            limit: page.limit,
            offset: page.offset,
            items: self.repo.list_investigations(page).await?,
        })
    }

    pub async fn actions(&self, page: Page) -> RepoResult<Paged<ActionRecord>> {
        Ok(Paged {
            total: self.repo.count_actions().await?,
            limit: page.limit,
            offset: page.offset,
            items: self.repo.list_actions(page).await?,
        })
    }

    /// Live snapshot stream. Slow receivers lag and skip, they never block
    /// the ticker.
    pub fn subscribe(&self) -> broadcast::Receiver<StatsSnapshot> {
        self.tx.subscribe()
    }

    /// Starts the 1 Hz snapshot ticker.
    pub fn spawn_ticker(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                match service.snapshot().await {
                    // No receivers is fine; send only fails then.
                    Ok(snapshot) => {
                        let _ = service.tx.send(snapshot);
                    }
                    Err(e) => warn!("stats ticker could not read repository: {e}"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Proto, Severity};
    use crate::repo::MemoryRepository;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn alert(severity: Severity) -> AlertEvent {
        AlertEvent {
            id: Uuid::now_v7(),
            ts: Utc::now(),
            src_ip: "198.51.100.9".parse().unwrap(),
            dst_ip: "10.1.0.2".parse().unwrap(),
            proto: Proto::Tcp,
            features: BTreeMap::new(),
            model_score: 0.9,
            confidence: 0.9,
            severity,
            sensor_id: "sensor-1".to_string(),
        }
    }

    #[tokio::test]
    async fn snapshot_reflects_repository() {
        let repo = Arc::new(MemoryRepository::new());
        repo.save_alert(&alert(Severity::High)).await.unwrap();
        repo.save_alert(&alert(Severity::Low)).await.unwrap();

        let service = StatsService::new(repo);
        let snapshot = service.snapshot().await.unwrap();
        assert_eq!(snapshot.alerts, 2);
        assert_eq!(snapshot.alert_severities.get("high"), Some(&1));
        assert_eq!(snapshot.alert_severities.get("low"), Some(&1));
    }

    #[tokio::test]
    async fn paged_listing_echoes_window() {
        let repo = Arc::new(MemoryRepository::new());
        for _ in 0..5 {
            repo.save_alert(&alert(Severity::Medium)).await.unwrap();
        }

        let service = StatsService::new(repo);
        let page = service.alerts(Page::new(2, 1)).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.limit, 2);
        assert_eq!(page.offset, 1);
        assert_eq!(page.items.len(), 2);
    }

    #[tokio::test]
    async fn ticker_broadcasts_snapshots() {
        let repo = Arc::new(MemoryRepository::new());
        repo.save_alert(&alert(Severity::High)).await.unwrap();

        let service = Arc::new(StatsService::new(repo));
        let mut rx = service.subscribe();
        let ticker = service.spawn_ticker();

        let snapshot = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("no snapshot within 3s")
            .unwrap();
        assert_eq!(snapshot.alerts, 1);
        ticker.abort();
    }
}
