//! Audit trail for response actions.
//!
//! The durable audit surface is the `actions` table in the repository; this
//! in-memory log is the fast operator view (recent window, queryable by
//! alert) and mirrors every entry to tracing so the audit trail shows up in
//! shipped logs too.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// An entry in the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    /// The alert that ultimately caused this event.
    pub alert_id: Option<Uuid>,
    /// The action record this event concerns.
    pub action_id: Option<Uuid>,
    pub description: String,
    pub result: AuditResult,
}

/// Types of auditable events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    SystemLifecycle,
    ActionSelected,
    ActionDowngraded,
    ActionExecuted,
    ActionSimulated,
    ActionFailed,
    ActionTimedOut,
    ActionReverted,
}

/// Result of an audited operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Failure(String),
    Skipped(String),
}

/// Bounded in-memory audit log.
pub struct AuditLog {
    entries: Arc<RwLock<VecDeque<AuditLogEntry>>>,
    max_entries: usize,
    log_to_tracing: bool,
}

impl AuditLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::with_capacity(max_entries))),
            max_entries,
            log_to_tracing: true,
        }
    }

    /// For tests that assert on entries without tracing noise.
    pub fn without_tracing(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::with_capacity(max_entries))),
            max_entries,
            log_to_tracing: false,
        }
    }

    /// Appends an entry, evicting the oldest past capacity.
    pub async fn log(&self, entry: AuditLogEntry) {
        if self.log_to_tracing {
            info!(
                event_type = ?entry.event_type,
                alert_id = ?entry.alert_id,
                action_id = ?entry.action_id,
                result = ?entry.result,
                "audit: {}",
                entry.description
            );
        }

        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_entries {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Convenience constructor + append.
    pub async fn record(
        &self,
        event_type: AuditEventType,
        alert_id: Option<Uuid>,
        action_id: Option<Uuid>,
        description: impl Into<String>,
        result: AuditResult,
    ) {
        self.log(AuditLogEntry {
            id: Uuid::now_v7(),
            timestamp: Utc::now(),
            event_type,
            alert_id,
            action_id,
            description: description.into(),
            result,
        })
        .await;
    }

    /// All entries, oldest first.
    pub async fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries.read().await.iter().cloned().collect()
    }

    /// Entries concerning one alert.
    pub async fn entries_for_alert(&self, alert_id: Uuid) -> Vec<AuditLogEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.alert_id == Some(alert_id))
            .cloned()
            .collect()
    }
}
