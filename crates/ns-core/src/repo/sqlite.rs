//! SQLite implementation of the repository.
//!
//! One table per record type, primary key = record id, `INSERT OR IGNORE`
//! for idempotent writes. The schema is created on startup if absent.
//! Timestamps are stored as Unix seconds (REAL) so the `ts` indices order
//! listings without string parsing.

use super::{Page, RepoError, RepoResult, Repository};
use crate::model::{
    self, ActionRecord, AlertEvent, InvestigationReport, Proto, SafetyLevel, Severity, Verdict,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS alerts (
    id          TEXT PRIMARY KEY,
    ts          REAL NOT NULL,
    src_ip      TEXT NOT NULL,
    dst_ip      TEXT NOT NULL,
    proto       TEXT NOT NULL,
    features    TEXT NOT NULL,
    model_score REAL NOT NULL,
    confidence  REAL NOT NULL,
    severity    TEXT NOT NULL,
    sensor_id   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alerts_ts ON alerts(ts);

CREATE TABLE IF NOT EXISTS investigations (
    alert_id       TEXT PRIMARY KEY,
    ts             REAL NOT NULL,
    ioc_findings   TEXT NOT NULL,
    sources        TEXT NOT NULL,
    risk_score     REAL NOT NULL,
    verdict        TEXT NOT NULL,
    uncertainty    REAL NOT NULL,
    confidence     REAL NOT NULL,
    alert_severity TEXT NOT NULL,
    notes          TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_investigations_ts ON investigations(ts);

CREATE TABLE IF NOT EXISTS actions (
    action_id    TEXT PRIMARY KEY,
    alert_id     TEXT NOT NULL,
    ts           REAL NOT NULL,
    action_type  TEXT NOT NULL,
    target       TEXT NOT NULL,
    parameters   TEXT NOT NULL,
    result       TEXT NOT NULL,
    safety_gate  TEXT NOT NULL,
    reversible   INTEGER NOT NULL,
    reverted     INTEGER NOT NULL,
    reverts      TEXT,
    revert_token TEXT
);
CREATE INDEX IF NOT EXISTS idx_actions_ts ON actions(ts);
CREATE INDEX IF NOT EXISTS idx_actions_alert_id ON actions(alert_id);
"#;

/// SQLite-backed [`Repository`].
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Opens (creating if missing) the database at `url` and ensures the
    /// schema exists.
    ///
    /// Accepts `sqlite:` URLs (`sqlite://netsentinel.db`, `sqlite::memory:`)
    /// or a bare filesystem path.
    pub async fn connect(url: &str) -> RepoResult<Self> {
        let options = if url.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(url)?
        } else {
            SqliteConnectOptions::new().filename(url)
        }
        .create_if_missing(true);

        // An in-memory database exists per connection, so the pool must not
        // fan out across connections there.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let repo = Self { pool };
        repo.init_schema().await?;
        info!(url = url, "repository ready");
        Ok(repo)
    }

    /// In-memory database, for tests.
    pub async fn in_memory() -> RepoResult<Self> {
        Self::connect("sqlite::memory:").await
    }

    async fn init_schema(&self) -> RepoResult<()> {
        let mut tx = self.pool.begin().await?;
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    fn counts_from_rows(rows: Vec<(String, i64)>) -> HashMap<String, u64> {
        rows.into_iter().map(|(k, v)| (k, v as u64)).collect()
    }
}

#[derive(sqlx::FromRow)]
struct AlertRow {
    id: String,
    ts: f64,
    src_ip: String,
    dst_ip: String,
    proto: String,
    features: String,
    model_score: f64,
    confidence: f64,
    severity: String,
    sensor_id: String,
}

impl TryFrom<AlertRow> for AlertEvent {
    type Error = RepoError;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        Ok(AlertEvent {
            id: Uuid::parse_str(&row.id)
                .map_err(|e| RepoError::corrupt(format!("alert id: {e}")))?,
            ts: model::from_unix_seconds(row.ts)
                .ok_or_else(|| RepoError::corrupt(format!("alert ts: {}", row.ts)))?,
            src_ip: row
                .src_ip
                .parse()
                .map_err(|e| RepoError::corrupt(format!("alert src_ip: {e}")))?,
            dst_ip: row
                .dst_ip
                .parse()
                .map_err(|e| RepoError::corrupt(format!("alert dst_ip: {e}")))?,
            proto: Proto::from_db_str(&row.proto)
                .ok_or_else(|| RepoError::corrupt(format!("alert proto: {}", row.proto)))?,
            features: serde_json::from_str(&row.features)?,
            model_score: row.model_score,
            confidence: row.confidence,
            severity: Severity::from_db_str(&row.severity)
                .ok_or_else(|| RepoError::corrupt(format!("alert severity: {}", row.severity)))?,
            sensor_id: row.sensor_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct InvestigationRow {
    alert_id: String,
    ts: f64,
    ioc_findings: String,
    sources: String,
    risk_score: f64,
    verdict: String,
    uncertainty: f64,
    confidence: f64,
    alert_severity: String,
    notes: String,
}

impl TryFrom<InvestigationRow> for InvestigationReport {
    type Error = RepoError;

    fn try_from(row: InvestigationRow) -> Result<Self, Self::Error> {
        Ok(InvestigationReport {
            alert_id: Uuid::parse_str(&row.alert_id)
                .map_err(|e| RepoError::corrupt(format!("investigation alert_id: {e}")))?,
            ts: model::from_unix_seconds(row.ts)
                .ok_or_else(|| RepoError::corrupt(format!("investigation ts: {}", row.ts)))?,
            ioc_findings: serde_json::from_str(&row.ioc_findings)?,
            sources: serde_json::from_str(&row.sources)?,
            risk_score: row.risk_score,
            verdict: Verdict::from_db_str(&row.verdict)
                .ok_or_else(|| RepoError::corrupt(format!("verdict: {}", row.verdict)))?,
            uncertainty: row.uncertainty,
            confidence: row.confidence,
            alert_severity: Severity::from_db_str(&row.alert_severity).ok_or_else(|| {
                RepoError::corrupt(format!("alert_severity: {}", row.alert_severity))
            })?,
            notes: row.notes,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ActionRow {
    action_id: String,
    alert_id: String,
    ts: f64,
    action_type: String,
    target: String,
    parameters: String,
    result: String,
    safety_gate: String,
    reversible: bool,
    reverted: bool,
    reverts: Option<String>,
    revert_token: Option<String>,
}

impl TryFrom<ActionRow> for ActionRecord {
    type Error = RepoError;

    fn try_from(row: ActionRow) -> Result<Self, Self::Error> {
        Ok(ActionRecord {
            action_id: Uuid::parse_str(&row.action_id)
                .map_err(|e| RepoError::corrupt(format!("action_id: {e}")))?,
            alert_id: Uuid::parse_str(&row.alert_id)
                .map_err(|e| RepoError::corrupt(format!("action alert_id: {e}")))?,
            ts: model::from_unix_seconds(row.ts)
                .ok_or_else(|| RepoError::corrupt(format!("action ts: {}", row.ts)))?,
            action_type: row.action_type,
            target: row.target,
            parameters: serde_json::from_str(&row.parameters)?,
            result: row.result,
            safety_gate: SafetyLevel::from_db_str(&row.safety_gate)
                .ok_or_else(|| RepoError::corrupt(format!("safety_gate: {}", row.safety_gate)))?,
            reversible: row.reversible,
            reverted: row.reverted,
            reverts: row
                .reverts
                .map(|s| Uuid::parse_str(&s))
                .transpose()
                .map_err(|e| RepoError::corrupt(format!("reverts: {e}")))?,
            revert_token: row.revert_token,
        })
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn save_alert(&self, alert: &AlertEvent) -> RepoResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO alerts
                (id, ts, src_ip, dst_ip, proto, features, model_score, confidence, severity, sensor_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(alert.id.to_string())
        .bind(model::unix_seconds(&alert.ts))
        .bind(alert.src_ip.to_string())
        .bind(alert.dst_ip.to_string())
        .bind(alert.proto.as_str())
        .bind(serde_json::to_string(&alert.features)?)
        .bind(alert.model_score)
        .bind(alert.confidence)
        .bind(alert.severity.as_db_str())
        .bind(&alert.sensor_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn save_investigation(&self, report: &InvestigationReport) -> RepoResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO investigations
                (alert_id, ts, ioc_findings, sources, risk_score, verdict, uncertainty, confidence, alert_severity, notes)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(report.alert_id.to_string())
        .bind(model::unix_seconds(&report.ts))
        .bind(serde_json::to_string(&report.ioc_findings)?)
        .bind(serde_json::to_string(&report.sources)?)
        .bind(report.risk_score)
        .bind(report.verdict.as_db_str())
        .bind(report.uncertainty)
        .bind(report.confidence)
        .bind(report.alert_severity.as_db_str())
        .bind(&report.notes)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn save_action(&self, action: &ActionRecord) -> RepoResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO actions
                (action_id, alert_id, ts, action_type, target, parameters, result, safety_gate, reversible, reverted, reverts, revert_token)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(action.action_id.to_string())
        .bind(action.alert_id.to_string())
        .bind(model::unix_seconds(&action.ts))
        .bind(&action.action_type)
        .bind(&action.target)
        .bind(serde_json::to_string(&action.parameters)?)
        .bind(&action.result)
        .bind(action.safety_gate.as_db_str())
        .bind(action.reversible)
        .bind(action.reverted)
        .bind(action.reverts.map(|id| id.to_string()))
        .bind(&action.revert_token)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_alert(&self, id: Uuid) -> RepoResult<Option<AlertEvent>> {
        let row: Option<AlertRow> = sqlx::query_as("SELECT * FROM alerts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn get_action(&self, action_id: Uuid) -> RepoResult<Option<ActionRecord>> {
        let row: Option<ActionRow> = sqlx::query_as("SELECT * FROM actions WHERE action_id = ?")
            .bind(action_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn investigation_for_alert(
        &self,
        alert_id: Uuid,
    ) -> RepoResult<Option<InvestigationReport>> {
        let row: Option<InvestigationRow> =
            sqlx::query_as("SELECT * FROM investigations WHERE alert_id = ?")
                .bind(alert_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn find_revert_of(&self, action_id: Uuid) -> RepoResult<Option<ActionRecord>> {
        let row: Option<ActionRow> =
            sqlx::query_as("SELECT * FROM actions WHERE reverts = ? AND reverted = 1 LIMIT 1")
                .bind(action_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn action_for_alert(&self, alert_id: Uuid) -> RepoResult<Option<ActionRecord>> {
        let row: Option<ActionRow> = sqlx::query_as(
            "SELECT * FROM actions WHERE alert_id = ? AND reverted = 0 ORDER BY ts LIMIT 1",
        )
        .bind(alert_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_alerts(&self, page: Page) -> RepoResult<Vec<AlertEvent>> {
        let rows: Vec<AlertRow> =
            sqlx::query_as("SELECT * FROM alerts ORDER BY ts DESC LIMIT ? OFFSET ?")
                .bind(page.limit)
                .bind(page.offset)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_investigations(&self, page: Page) -> RepoResult<Vec<InvestigationReport>> {
        let rows: Vec<InvestigationRow> =
            sqlx::query_as("SELECT * FROM investigations ORDER BY ts DESC LIMIT ? OFFSET ?")
                .bind(page.limit)
                .bind(page.offset)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_actions(&self, page: Page) -> RepoResult<Vec<ActionRecord>> {
        let rows: Vec<ActionRow> =
            sqlx::query_as("SELECT * FROM actions ORDER BY ts DESC LIMIT ? OFFSET ?")
                .bind(page.limit)
                .bind(page.offset)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn count_alerts(&self) -> RepoResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM alerts")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn count_investigations(&self) -> RepoResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM investigations")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn count_actions(&self) -> RepoResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM actions")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn alert_severity_counts(&self) -> RepoResult<HashMap<String, u64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT severity, COUNT(*) FROM alerts GROUP BY severity")
                .fetch_all(&self.pool)
                .await?;
        Ok(Self::counts_from_rows(rows))
    }

    async fn action_type_counts(&self) -> RepoResult<HashMap<String, u64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT action_type, COUNT(*) FROM actions GROUP BY action_type")
                .fetch_all(&self.pool)
                .await?;
        Ok(Self::counts_from_rows(rows))
    }

    async fn verdict_counts(&self) -> RepoResult<HashMap<String, u64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT verdict, COUNT(*) FROM investigations GROUP BY verdict")
                .fetch_all(&self.pool)
                .await?;
        Ok(Self::counts_from_rows(rows))
    }
}
