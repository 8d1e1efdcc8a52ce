//! Configuration loading and validation.
//!
//! Configuration is loaded once at startup from a YAML file plus a small set
//! of environment overrides, validated, and treated as immutable thereafter;
//! changing it requires a restart. Validation failures are fatal — the
//! process never starts partially configured.

use crate::model::{SeverityThresholds, VerdictThresholds};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Fatal configuration errors, surfaced at startup with a diagnostic.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("decision matrix references unknown action type '{0}'")]
    UnknownActionType(String),
}

/// Bus transport selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BusTransport {
    #[default]
    Memory,
    Broker,
}

/// Event bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default)]
    pub transport: BusTransport,
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

fn default_broker_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_publish_timeout_ms() -> u64 {
    100
}

fn default_drain_timeout_ms() -> u64 {
    5_000
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            transport: BusTransport::Memory,
            broker_url: default_broker_url(),
            queue_capacity: default_queue_capacity(),
            publish_timeout_ms: default_publish_timeout_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

/// Detection engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    #[serde(default)]
    pub severity_thresholds: SeverityThresholds,
    #[serde(default = "default_emit_threshold")]
    pub emit_threshold: f64,
    #[serde(default = "default_flow_idle_timeout_secs")]
    pub flow_idle_timeout_secs: u64,
    #[serde(default = "default_max_flows")]
    pub max_flows: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
    #[serde(default)]
    pub score_weights: ScoreWeights,
    /// Number of scoring workers; 0 means one per available core.
    #[serde(default)]
    pub scoring_workers: usize,
}

fn default_emit_threshold() -> f64 {
    0.3
}

fn default_flow_idle_timeout_secs() -> u64 {
    30
}

fn default_max_flows() -> usize {
    100_000
}

fn default_flush_interval_ms() -> u64 {
    2_000
}

fn default_batch_size() -> usize {
    64
}

fn default_batch_timeout_ms() -> u64 {
    100
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            severity_thresholds: SeverityThresholds::default(),
            emit_threshold: default_emit_threshold(),
            flow_idle_timeout_secs: default_flow_idle_timeout_secs(),
            max_flows: default_max_flows(),
            flush_interval_ms: default_flush_interval_ms(),
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            score_weights: ScoreWeights::default(),
            scoring_workers: 0,
        }
    }
}

/// Weights of the heuristic scorer terms.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScoreWeights {
    pub bytes: f64,
    pub packets: f64,
    pub iat_inv: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            bytes: 0.6,
            packets: 0.3,
            iat_inv: 0.1,
        }
    }
}

/// Per-provider knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// API credential; a provider without one is mocked (offline mode) or
    /// skipped.
    #[serde(default)]
    pub credential: String,
    #[serde(default = "default_requests_per_day")]
    pub requests_per_day: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Override of the provider's API endpoint, mainly for tests.
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_requests_per_day() -> u32 {
    1_000
}

fn default_burst() -> u32 {
    4
}

fn default_ttl_secs() -> u64 {
    3_600
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            credential: String::new(),
            requests_per_day: default_requests_per_day(),
            burst: default_burst(),
            ttl_secs: default_ttl_secs(),
            base_url: None,
        }
    }
}

/// Investigation agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestigationConfig {
    #[serde(default)]
    pub verdict_thresholds: VerdictThresholds,
    /// Fusion weight of the model score; providers share `1 - alpha`.
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_ti_fanout_timeout_ms")]
    pub ti_fanout_timeout_ms: u64,
    #[serde(default = "default_max_concurrent_investigations")]
    pub max_concurrent: usize,
    #[serde(default)]
    pub offline_mode: bool,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
}

fn default_alpha() -> f64 {
    0.4
}

fn default_ti_fanout_timeout_ms() -> u64 {
    3_000
}

fn default_max_concurrent_investigations() -> usize {
    16
}

fn default_cache_capacity() -> usize {
    10_000
}

impl Default for InvestigationConfig {
    fn default() -> Self {
        Self {
            verdict_thresholds: VerdictThresholds::default(),
            alpha: default_alpha(),
            ti_fanout_timeout_ms: default_ti_fanout_timeout_ms(),
            max_concurrent: default_max_concurrent_investigations(),
            offline_mode: false,
            cache_capacity: default_cache_capacity(),
            providers: BTreeMap::new(),
        }
    }
}

/// Response engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseConfig {
    /// severity -> risk bucket -> action type. Missing cells fall back to
    /// `log_only`.
    #[serde(default)]
    pub decision_matrix: BTreeMap<String, BTreeMap<String, String>>,
    /// Addresses and CIDRs that only ever receive `log_only`.
    #[serde(default)]
    pub ip_whitelist: Vec<String>,
    /// Subnets treated as management networks by the safety gate.
    #[serde(default = "default_management_subnets")]
    pub management_subnets: Vec<String>,
    #[serde(default = "default_min_confidence")]
    pub min_confidence_for_intrusive_action: f64,
    #[serde(default)]
    pub production_actions_enabled: bool,
    #[serde(default = "default_action_timeout_ms")]
    pub action_timeout_ms: u64,
    #[serde(default = "default_honeypot_addr")]
    pub honeypot_addr: String,
    #[serde(default = "default_quarantine_dir")]
    pub quarantine_dir: String,
}

fn default_management_subnets() -> Vec<String> {
    vec!["192.168.100.0/24".to_string()]
}

fn default_min_confidence() -> f64 {
    0.6
}

fn default_action_timeout_ms() -> u64 {
    5_000
}

fn default_honeypot_addr() -> String {
    "10.0.0.100".to_string()
}

fn default_quarantine_dir() -> String {
    "/var/lib/netsentinel/quarantine".to_string()
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            decision_matrix: default_decision_matrix(),
            ip_whitelist: Vec::new(),
            management_subnets: default_management_subnets(),
            min_confidence_for_intrusive_action: default_min_confidence(),
            production_actions_enabled: false,
            action_timeout_ms: default_action_timeout_ms(),
            honeypot_addr: default_honeypot_addr(),
            quarantine_dir: default_quarantine_dir(),
        }
    }
}

/// The default 3x3 decision table.
pub fn default_decision_matrix() -> BTreeMap<String, BTreeMap<String, String>> {
    let cell = |low: &str, medium: &str, high: &str| {
        BTreeMap::from([
            ("low".to_string(), low.to_string()),
            ("medium".to_string(), medium.to_string()),
            ("high".to_string(), high.to_string()),
        ])
    };
    BTreeMap::from([
        ("low".to_string(), cell("log_only", "log_only", "rate_limit")),
        (
            "medium".to_string(),
            cell("log_only", "rate_limit", "block_ip"),
        ),
        (
            "high".to_string(),
            cell("rate_limit", "block_ip", "isolate_container"),
        ),
    ])
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_sensor_id")]
    pub sensor_id: String,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default = "default_persistence_url")]
    pub persistence_url: String,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub investigation: InvestigationConfig,
    #[serde(default)]
    pub response: ResponseConfig,
}

fn default_sensor_id() -> String {
    "sensor-1".to_string()
}

fn default_persistence_url() -> String {
    "sqlite://netsentinel.db".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sensor_id: default_sensor_id(),
            bus: BusConfig::default(),
            persistence_url: default_persistence_url(),
            detection: DetectionConfig::default(),
            investigation: InvestigationConfig::default(),
            response: ResponseConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a YAML file, then applies environment
    /// overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Self =
            serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Default configuration with environment overrides, for running without
    /// a config file.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Environment variables that commonly differ between deployments.
    /// `BUS` is the historical name; the `NS_`-prefixed form wins when both
    /// are set.
    fn apply_env_overrides(&mut self) {
        let bus = std::env::var("NS_BUS").or_else(|_| std::env::var("BUS"));
        if let Ok(bus) = bus {
            match bus.trim().to_lowercase().as_str() {
                "broker" => self.bus.transport = BusTransport::Broker,
                "memory" => self.bus.transport = BusTransport::Memory,
                _ => {}
            }
        }
        if let Ok(url) = std::env::var("NS_BROKER_URL") {
            self.bus.broker_url = url;
        }
        if let Ok(url) = std::env::var("NS_DB") {
            self.persistence_url = url;
        }
        if let Ok(offline) = std::env::var("NS_OFFLINE_MODE") {
            self.investigation.offline_mode = offline == "1" || offline == "true";
        }
        if let Ok(production) = std::env::var("NS_PRODUCTION_ACTIONS") {
            self.response.production_actions_enabled = production == "1" || production == "true";
        }
    }

    /// Validates thresholds, weights, and the decision matrix shape.
    ///
    /// `known_actions` is the set of registered action types; referencing
    /// anything else from the matrix is fatal.
    pub fn validate(&self, known_actions: &[&str]) -> Result<(), ConfigError> {
        let det = &self.detection;
        if !(0.0..=1.0).contains(&det.emit_threshold) {
            return Err(ConfigError::Invalid(format!(
                "emit_threshold must be in [0,1], got {}",
                det.emit_threshold
            )));
        }
        if det.severity_thresholds.high < det.severity_thresholds.medium {
            return Err(ConfigError::Invalid(
                "severity_thresholds.high must be >= severity_thresholds.medium".to_string(),
            ));
        }
        if det.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be > 0".to_string()));
        }
        if det.max_flows == 0 {
            return Err(ConfigError::Invalid("max_flows must be > 0".to_string()));
        }

        let inv = &self.investigation;
        if !(0.0..=1.0).contains(&inv.alpha) {
            return Err(ConfigError::Invalid(format!(
                "alpha must be in [0,1], got {}",
                inv.alpha
            )));
        }
        if inv.verdict_thresholds.malicious < inv.verdict_thresholds.suspicious {
            return Err(ConfigError::Invalid(
                "verdict_thresholds.malicious must be >= verdict_thresholds.suspicious".to_string(),
            ));
        }

        let resp = &self.response;
        if !(0.0..=1.0).contains(&resp.min_confidence_for_intrusive_action) {
            return Err(ConfigError::Invalid(format!(
                "min_confidence_for_intrusive_action must be in [0,1], got {}",
                resp.min_confidence_for_intrusive_action
            )));
        }
        for (severity, row) in &resp.decision_matrix {
            if !matches!(severity.as_str(), "low" | "medium" | "high") {
                return Err(ConfigError::Invalid(format!(
                    "decision matrix severity row '{severity}' is not low/medium/high"
                )));
            }
            for (risk, action) in row {
                if !matches!(risk.as_str(), "low" | "medium" | "high") {
                    return Err(ConfigError::Invalid(format!(
                        "decision matrix risk column '{risk}' is not low/medium/high"
                    )));
                }
                if !known_actions.contains(&action.as_str()) {
                    return Err(ConfigError::UnknownActionType(action.clone()));
                }
            }
        }
        for cidr in resp.ip_whitelist.iter().chain(&resp.management_subnets) {
            if cidr.parse::<ipnet::IpNet>().is_err() && cidr.parse::<std::net::IpAddr>().is_err() {
                return Err(ConfigError::Invalid(format!(
                    "'{cidr}' is neither an IP address nor a CIDR"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KNOWN: &[&str] = &[
        "log_only",
        "rate_limit",
        "block_ip",
        "isolate_container",
        "redirect_to_honeypot",
        "quarantine_file",
    ];

    #[test]
    fn defaults_validate() {
        AppConfig::default().validate(KNOWN).unwrap();
    }

    #[test]
    fn default_matrix_matches_policy_table() {
        let matrix = default_decision_matrix();
        assert_eq!(matrix["high"]["high"], "isolate_container");
        assert_eq!(matrix["high"]["medium"], "block_ip");
        assert_eq!(matrix["medium"]["medium"], "rate_limit");
        assert_eq!(matrix["low"]["low"], "log_only");
    }

    #[test]
    fn unknown_action_type_is_fatal() {
        let mut config = AppConfig::default();
        config
            .response
            .decision_matrix
            .get_mut("high")
            .unwrap()
            .insert("high".to_string(), "launch_missiles".to_string());

        let err = config.validate(KNOWN).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownActionType(name) if name == "launch_missiles"));
    }

    #[test]
    fn bad_whitelist_entry_is_fatal() {
        let mut config = AppConfig::default();
        config.response.ip_whitelist = vec!["not-an-ip".to_string()];
        assert!(config.validate(KNOWN).is_err());
    }

    #[test]
    fn out_of_range_alpha_is_fatal() {
        let mut config = AppConfig::default();
        config.investigation.alpha = 1.5;
        assert!(config.validate(KNOWN).is_err());
    }

    #[test]
    fn yaml_round_trip() {
        let config = AppConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: AppConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.detection.batch_size, config.detection.batch_size);
        assert_eq!(back.bus.transport, config.bus.transport);
    }
}
