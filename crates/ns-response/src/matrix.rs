//! The severity × risk decision matrix.

use crate::actions::ActionRegistry;
use ns_core::config::ConfigError;
use ns_core::model::{RiskBucket, Severity};
use std::collections::{BTreeMap, HashMap};

/// The action every unspecified cell falls back to.
pub const DEFAULT_ACTION: &str = "log_only";

/// 3×3 lookup from (alert severity, risk bucket) to an action type.
///
/// Built once at startup from configuration and validated against the
/// action registry; an unknown action type anywhere in the table is a fatal
/// configuration error.
#[derive(Debug)]
pub struct DecisionMatrix {
    cells: HashMap<(Severity, RiskBucket), String>,
}

impl DecisionMatrix {
    /// Builds and validates the matrix.
    pub fn from_config(
        table: &BTreeMap<String, BTreeMap<String, String>>,
        registry: &ActionRegistry,
    ) -> Result<Self, ConfigError> {
        let mut cells = HashMap::new();
        for (severity_key, row) in table {
            let severity = Severity::from_db_str(severity_key).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "decision matrix severity row '{severity_key}' is not low/medium/high"
                ))
            })?;
            for (risk_key, action) in row {
                let bucket = match risk_key.as_str() {
                    "low" => RiskBucket::Low,
                    "medium" => RiskBucket::Medium,
                    "high" => RiskBucket::High,
                    other => {
                        return Err(ConfigError::Invalid(format!(
                            "decision matrix risk column '{other}' is not low/medium/high"
                        )))
                    }
                };
                if !registry.contains(action) {
                    return Err(ConfigError::UnknownActionType(action.clone()));
                }
                cells.insert((severity, bucket), action.clone());
            }
        }

        if !registry.contains(DEFAULT_ACTION) {
            return Err(ConfigError::UnknownActionType(DEFAULT_ACTION.to_string()));
        }

        Ok(Self { cells })
    }

    /// Cell lookup; unspecified cells answer `log_only`.
    pub fn select(&self, severity: Severity, bucket: RiskBucket) -> &str {
        self.cells
            .get(&(severity, bucket))
            .map(String::as_str)
            .unwrap_or(DEFAULT_ACTION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataplane::RecordingDataPlane;
    use ns_core::config::{default_decision_matrix, ResponseConfig};
    use std::sync::Arc;

    fn registry() -> ActionRegistry {
        ActionRegistry::builtin(
            Arc::new(RecordingDataPlane::new()),
            &ResponseConfig::default(),
        )
    }

    #[test]
    fn default_table_selections() {
        let matrix = DecisionMatrix::from_config(&default_decision_matrix(), &registry()).unwrap();

        assert_eq!(matrix.select(Severity::High, RiskBucket::High), "isolate_container");
        assert_eq!(matrix.select(Severity::High, RiskBucket::Medium), "block_ip");
        assert_eq!(matrix.select(Severity::High, RiskBucket::Low), "rate_limit");
        assert_eq!(matrix.select(Severity::Medium, RiskBucket::High), "block_ip");
        assert_eq!(matrix.select(Severity::Medium, RiskBucket::Medium), "rate_limit");
        assert_eq!(matrix.select(Severity::Low, RiskBucket::High), "rate_limit");
        assert_eq!(matrix.select(Severity::Low, RiskBucket::Low), "log_only");
    }

    #[test]
    fn missing_cells_fall_back_to_log_only() {
        let table = BTreeMap::from([(
            "high".to_string(),
            BTreeMap::from([("high".to_string(), "block_ip".to_string())]),
        )]);
        let matrix = DecisionMatrix::from_config(&table, &registry()).unwrap();

        assert_eq!(matrix.select(Severity::High, RiskBucket::High), "block_ip");
        assert_eq!(matrix.select(Severity::Low, RiskBucket::Medium), "log_only");
    }

    #[test]
    fn unknown_action_is_fatal() {
        let table = BTreeMap::from([(
            "high".to_string(),
            BTreeMap::from([("high".to_string(), "defenestrate".to_string())]),
        )]);
        let err = DecisionMatrix::from_config(&table, &registry()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownActionType(name) if name == "defenestrate"));
    }

    #[test]
    fn bad_axis_labels_are_fatal() {
        let table = BTreeMap::from([(
            "catastrophic".to_string(),
            BTreeMap::from([("high".to_string(), "block_ip".to_string())]),
        )]);
        assert!(DecisionMatrix::from_config(&table, &registry()).is_err());
    }
}
