//! Durable, append-only persistence for pipeline records.
//!
//! The repository is the single durable source of truth: every record an
//! engine publishes is written here first, and the publish is only attempted
//! after the write commits. Dashboards and the stats surface are pure readers
//! of this store.
//!
//! All saves are idempotent on the record's primary key — writing the same id
//! twice is a silent no-op, which is what makes subscribers safe against
//! replayed bus payloads.

pub mod error;
pub mod memory;
pub mod sqlite;

pub use error::{RepoError, RepoResult};
pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;

use crate::model::{ActionRecord, AlertEvent, InvestigationReport};
use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

/// Maximum page size accepted by list queries.
pub const MAX_PAGE_LIMIT: u32 = 500;

/// Pagination window for list queries.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self {
            limit: limit.min(MAX_PAGE_LIMIT),
            offset,
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

/// Store for alerts, investigations, and action records.
///
/// Saves return `Ok(true)` when the record was inserted and `Ok(false)` when
/// a record with the same primary key already existed (the duplicate is
/// discarded). Listings are ordered by timestamp descending.
#[async_trait]
pub trait Repository: Send + Sync + 'static {
    async fn save_alert(&self, alert: &AlertEvent) -> RepoResult<bool>;
    async fn save_investigation(&self, report: &InvestigationReport) -> RepoResult<bool>;
    async fn save_action(&self, action: &ActionRecord) -> RepoResult<bool>;

    async fn get_alert(&self, id: Uuid) -> RepoResult<Option<AlertEvent>>;
    async fn get_action(&self, action_id: Uuid) -> RepoResult<Option<ActionRecord>>;
    /// The investigation for an alert, if one has been emitted.
    async fn investigation_for_alert(
        &self,
        alert_id: Uuid,
    ) -> RepoResult<Option<InvestigationReport>>;
    /// The revert record referencing `action_id`, if the action was reverted.
    async fn find_revert_of(&self, action_id: Uuid) -> RepoResult<Option<ActionRecord>>;
    /// The non-reverted action emitted for an alert, if any. Backs the
    /// one-action-per-report guarantee against bus replays.
    async fn action_for_alert(&self, alert_id: Uuid) -> RepoResult<Option<ActionRecord>>;

    async fn list_alerts(&self, page: Page) -> RepoResult<Vec<AlertEvent>>;
    async fn list_investigations(&self, page: Page) -> RepoResult<Vec<InvestigationReport>>;
    async fn list_actions(&self, page: Page) -> RepoResult<Vec<ActionRecord>>;

    async fn count_alerts(&self) -> RepoResult<u64>;
    async fn count_investigations(&self) -> RepoResult<u64>;
    async fn count_actions(&self) -> RepoResult<u64>;

    /// Alert counts grouped by severity label.
    async fn alert_severity_counts(&self) -> RepoResult<HashMap<String, u64>>;
    /// Action counts grouped by action type.
    async fn action_type_counts(&self) -> RepoResult<HashMap<String, u64>>;
    /// Investigation counts grouped by verdict label.
    async fn verdict_counts(&self) -> RepoResult<HashMap<String, u64>>;
}
