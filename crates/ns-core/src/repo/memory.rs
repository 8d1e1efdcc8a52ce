//! In-memory repository for tests and ephemeral runs.

use super::{Page, RepoResult, Repository};
use crate::model::{ActionRecord, AlertEvent, InvestigationReport};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    alerts: Vec<AlertEvent>,
    investigations: Vec<InvestigationReport>,
    actions: Vec<ActionRecord>,
}

/// [`Repository`] backed by process memory. Same idempotence semantics as
/// the SQLite store; nothing survives the process.
#[derive(Default)]
pub struct MemoryRepository {
    inner: RwLock<Inner>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn page_of<T: Clone>(items: &[T], page: Page) -> Vec<T> {
    // Stored in insertion order; listings are ts-descending like the SQL
    // store, and insertion order tracks ts for every engine in practice.
    items
        .iter()
        .rev()
        .skip(page.offset as usize)
        .take(page.limit as usize)
        .cloned()
        .collect()
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn save_alert(&self, alert: &AlertEvent) -> RepoResult<bool> {
        let mut inner = self.inner.write().await;
        if inner.alerts.iter().any(|a| a.id == alert.id) {
            return Ok(false);
        }
        inner.alerts.push(alert.clone());
        Ok(true)
    }

    async fn save_investigation(&self, report: &InvestigationReport) -> RepoResult<bool> {
        let mut inner = self.inner.write().await;
        if inner
            .investigations
            .iter()
            .any(|r| r.alert_id == report.alert_id)
        {
            return Ok(false);
        }
        inner.investigations.push(report.clone());
        Ok(true)
    }

    async fn save_action(&self, action: &ActionRecord) -> RepoResult<bool> {
        let mut inner = self.inner.write().await;
        if inner
            .actions
            .iter()
            .any(|a| a.action_id == action.action_id)
        {
            return Ok(false);
        }
        inner.actions.push(action.clone());
        Ok(true)
    }

    async fn get_alert(&self, id: Uuid) -> RepoResult<Option<AlertEvent>> {
        let inner = self.inner.read().await;
        Ok(inner.alerts.iter().find(|a| a.id == id).cloned())
    }

    async fn get_action(&self, action_id: Uuid) -> RepoResult<Option<ActionRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .actions
            .iter()
            .find(|a| a.action_id == action_id)
            .cloned())
    }

    async fn investigation_for_alert(
        &self,
        alert_id: Uuid,
    ) -> RepoResult<Option<InvestigationReport>> {
        let inner = self.inner.read().await;
        Ok(inner
            .investigations
            .iter()
            .find(|r| r.alert_id == alert_id)
            .cloned())
    }

    async fn find_revert_of(&self, action_id: Uuid) -> RepoResult<Option<ActionRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .actions
            .iter()
            .find(|a| a.reverted && a.reverts == Some(action_id))
            .cloned())
    }

    async fn action_for_alert(&self, alert_id: Uuid) -> RepoResult<Option<ActionRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .actions
            .iter()
            .find(|a| a.alert_id == alert_id && !a.reverted)
            .cloned())
    }

    async fn list_alerts(&self, page: Page) -> RepoResult<Vec<AlertEvent>> {
        let inner = self.inner.read().await;
        Ok(page_of(&inner.alerts, page))
    }

    async fn list_investigations(&self, page: Page) -> RepoResult<Vec<InvestigationReport>> {
        let inner = self.inner.read().await;
        Ok(page_of(&inner.investigations, page))
    }

    async fn list_actions(&self, page: Page) -> RepoResult<Vec<ActionRecord>> {
        let inner = self.inner.read().await;
        Ok(page_of(&inner.actions, page))
    }

    async fn count_alerts(&self) -> RepoResult<u64> {
        Ok(self.inner.read().await.alerts.len() as u64)
    }

    async fn count_investigations(&self) -> RepoResult<u64> {
        Ok(self.inner.read().await.investigations.len() as u64)
    }

    async fn count_actions(&self) -> RepoResult<u64> {
        Ok(self.inner.read().await.actions.len() as u64)
    }

    async fn alert_severity_counts(&self) -> RepoResult<HashMap<String, u64>> {
        let inner = self.inner.read().await;
        let mut counts = HashMap::new();
        for alert in &inner.alerts {
            *counts
                .entry(alert.severity.as_db_str().to_string())
                .or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn action_type_counts(&self) -> RepoResult<HashMap<String, u64>> {
        let inner = self.inner.read().await;
        let mut counts = HashMap::new();
        for action in &inner.actions {
            *counts.entry(action.action_type.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn verdict_counts(&self) -> RepoResult<HashMap<String, u64>> {
        let inner = self.inner.read().await;
        let mut counts = HashMap::new();
        for report in &inner.investigations {
            *counts
                .entry(report.verdict.as_db_str().to_string())
                .or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Proto, Severity};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn alert() -> AlertEvent {
        AlertEvent {
            id: Uuid::now_v7(),
            ts: Utc::now(),
            src_ip: "192.0.2.1".parse().unwrap(),
            dst_ip: "10.0.0.1".parse().unwrap(),
            proto: Proto::Udp,
            features: BTreeMap::new(),
            model_score: 0.6,
            confidence: 0.6,
            severity: Severity::Medium,
            sensor_id: "sensor-1".to_string(),
        }
    }

    #[tokio::test]
    async fn idempotent_saves() {
        let repo = MemoryRepository::new();
        let a = alert();
        assert!(repo.save_alert(&a).await.unwrap());
        assert!(!repo.save_alert(&a).await.unwrap());
        assert_eq!(repo.count_alerts().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn paging_is_newest_first() {
        let repo = MemoryRepository::new();
        let first = alert();
        let second = alert();
        repo.save_alert(&first).await.unwrap();
        repo.save_alert(&second).await.unwrap();

        let listed = repo.list_alerts(Page::new(1, 0)).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, second.id);

        let next = repo.list_alerts(Page::new(1, 1)).await.unwrap();
        assert_eq!(next[0].id, first.id);
    }
}
