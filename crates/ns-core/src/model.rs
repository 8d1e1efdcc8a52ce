//! Domain records carried through the pipeline.
//!
//! Three durable record types flow between the engines: [`AlertEvent`]
//! (detection), [`InvestigationReport`] (investigation), and [`ActionRecord`]
//! (response). All three are immutable once emitted; corrections are made by
//! appending new records, never by mutating existing ones.
//!
//! Timestamps are `DateTime<Utc>` in memory and Unix seconds (f64) on the
//! wire and in the database, matching the sensor protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use uuid::Uuid;

/// Well-known bus topics.
pub mod topics {
    /// Alerts emitted by the detection engine.
    pub const ALERTS: &str = "alerts";
    /// Reports emitted by the investigation agent.
    pub const INVESTIGATIONS: &str = "investigations";
    /// Audit records emitted by the response engine.
    pub const ACTIONS: &str = "actions";
}

/// Converts a timestamp to Unix seconds with microsecond precision.
pub fn unix_seconds(ts: &DateTime<Utc>) -> f64 {
    ts.timestamp() as f64 + f64::from(ts.timestamp_subsec_micros()) / 1_000_000.0
}

/// Parses Unix seconds back into a timestamp. `None` if out of range.
pub fn from_unix_seconds(secs: f64) -> Option<DateTime<Utc>> {
    use chrono::TimeZone;
    let whole = secs.trunc() as i64;
    let micros = ((secs - secs.trunc()) * 1_000_000.0).round() as u32;
    Utc.timestamp_opt(whole, micros * 1000).single()
}

/// Serde adapter for timestamps as Unix seconds with fractional precision.
pub mod ts_float {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(super::unix_seconds(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let secs = f64::deserialize(d)?;
        super::from_unix_seconds(secs)
            .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {secs}")))
    }
}

/// Alert severity, ranked low to high.
///
/// Derived from the model score against configured thresholds; the ordering
/// derive makes bucketing monotonicity directly assertable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
}

impl Severity {
    /// Buckets a model score using inclusive-high thresholds.
    pub fn bucket(score: f64, thresholds: &SeverityThresholds) -> Self {
        if score >= thresholds.high {
            Severity::High
        } else if score >= thresholds.medium {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn as_db_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            _ => None,
        }
    }
}

/// Severity bucketing thresholds (inclusive at each boundary).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SeverityThresholds {
    pub high: f64,
    pub medium: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            high: 0.8,
            medium: 0.5,
        }
    }
}

/// Categorical judgement of an investigation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    #[default]
    Benign,
    Suspicious,
    Malicious,
}

impl Verdict {
    /// Buckets a fused risk score using inclusive-high thresholds.
    pub fn bucket(risk_score: f64, thresholds: &VerdictThresholds) -> Self {
        if risk_score >= thresholds.malicious {
            Verdict::Malicious
        } else if risk_score >= thresholds.suspicious {
            Verdict::Suspicious
        } else {
            Verdict::Benign
        }
    }

    pub fn as_db_str(&self) -> &'static str {
        match self {
            Verdict::Benign => "benign",
            Verdict::Suspicious => "suspicious",
            Verdict::Malicious => "malicious",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "benign" => Some(Verdict::Benign),
            "suspicious" => Some(Verdict::Suspicious),
            "malicious" => Some(Verdict::Malicious),
            _ => None,
        }
    }
}

/// Verdict bucketing thresholds. The same boundaries drive the decision
/// matrix risk axis, so a `malicious` verdict always lands in the high risk
/// column.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct VerdictThresholds {
    pub malicious: f64,
    pub suspicious: f64,
}

impl Default for VerdictThresholds {
    fn default() -> Self {
        Self {
            malicious: 0.7,
            suspicious: 0.4,
        }
    }
}

/// Risk column of the decision matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskBucket {
    Low,
    Medium,
    High,
}

impl RiskBucket {
    pub fn bucket(risk_score: f64, thresholds: &VerdictThresholds) -> Self {
        if risk_score >= thresholds.malicious {
            RiskBucket::High
        } else if risk_score >= thresholds.suspicious {
            RiskBucket::Medium
        } else {
            RiskBucket::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskBucket::Low => "low",
            RiskBucket::Medium => "medium",
            RiskBucket::High => "high",
        }
    }
}

/// Level at which the safety gate scrutinized an action.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl SafetyLevel {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            SafetyLevel::Low => "low",
            SafetyLevel::Medium => "medium",
            SafetyLevel::High => "high",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "low" => Some(SafetyLevel::Low),
            "medium" => Some(SafetyLevel::Medium),
            "high" => Some(SafetyLevel::High),
            _ => None,
        }
    }
}

/// L4 protocol of a flow, collapsed to the classes the feature vector
/// one-hot encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Proto {
    Tcp,
    Udp,
    Icmp,
    Other,
}

impl Proto {
    /// Maps an IP protocol number to its class.
    pub fn from_number(proto: u8) -> Self {
        match proto {
            6 => Proto::Tcp,
            17 => Proto::Udp,
            1 | 58 => Proto::Icmp,
            _ => Proto::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Proto::Tcp => "tcp",
            Proto::Udp => "udp",
            Proto::Icmp => "icmp",
            Proto::Other => "other",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "tcp" => Some(Proto::Tcp),
            "udp" => Some(Proto::Udp),
            "icmp" => Some(Proto::Icmp),
            "other" => Some(Proto::Other),
            _ => None,
        }
    }
}

/// An alert emitted by the detection engine for a scored flow.
///
/// Ids are UUIDv7: time-ordered and monotonic within a process, so alert ids
/// sort in emission order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertEvent {
    pub id: Uuid,
    #[serde(with = "ts_float")]
    pub ts: DateTime<Utc>,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub proto: Proto,
    pub features: BTreeMap<String, f64>,
    pub model_score: f64,
    pub confidence: f64,
    pub severity: Severity,
    pub sensor_id: String,
}

/// The fused outcome of threat-intel enrichment for one alert.
///
/// `ioc_findings` carries one entry per queried source; a failed source is
/// recorded as `{"error": "<kind>"}` under its key rather than aborting the
/// investigation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvestigationReport {
    pub alert_id: Uuid,
    #[serde(with = "ts_float")]
    pub ts: DateTime<Utc>,
    pub ioc_findings: BTreeMap<String, serde_json::Value>,
    pub sources: Vec<String>,
    pub risk_score: f64,
    pub verdict: Verdict,
    pub uncertainty: f64,
    pub confidence: f64,
    pub alert_severity: Severity,
    pub notes: String,
}

/// Audit record for an executed (or simulated, or reverted) action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionRecord {
    pub action_id: Uuid,
    pub alert_id: Uuid,
    #[serde(with = "ts_float")]
    pub ts: DateTime<Utc>,
    pub action_type: String,
    pub target: String,
    pub parameters: serde_json::Value,
    pub result: String,
    pub safety_gate: SafetyLevel,
    pub reversible: bool,
    pub reverted: bool,
    /// Back-reference to the record this one reverts, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverts: Option<Uuid>,
    /// Opaque token the action plug-in needs to undo its effect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revert_token: Option<String>,
}

impl ActionRecord {
    /// Extracts the gate downgrade chain recorded under
    /// `parameters.gate_trace`, empty if the gate passed the action through.
    pub fn gate_trace(&self) -> Vec<String> {
        self.parameters
            .get("gate_trace")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }
}
