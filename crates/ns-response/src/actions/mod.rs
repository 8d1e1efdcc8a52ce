//! Response action plug-ins and their registry.
//!
//! Actions are registered at startup; the decision matrix is validated
//! against the registry before the engine accepts any work, so a matrix
//! cell can never name an action that does not exist at runtime.

pub mod block_ip;
pub mod honeypot;
pub mod isolate;
pub mod log_only;
pub mod quarantine;
pub mod rate_limit;

pub use block_ip::BlockIpAction;
pub use honeypot::RedirectToHoneypotAction;
pub use isolate::IsolateContainerAction;
pub use log_only::LogOnlyAction;
pub use quarantine::QuarantineFileAction;
pub use rate_limit::RateLimitAction;

use crate::dataplane::{DataPlane, DataPlaneError};
use async_trait::async_trait;
use ns_core::config::ResponseConfig;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors from action execution or reversal.
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("action not found: {0}")]
    NotFound(String),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("action '{0}' is not reversible")]
    NotReversible(String),

    #[error("invalid revert token: {0}")]
    InvalidRevertToken(String),
}

impl From<DataPlaneError> for ActionError {
    fn from(err: DataPlaneError) -> Self {
        Self::ExecutionFailed(err.to_string())
    }
}

impl ActionError {
    /// Short kind for the audit-visible `result=error:<kind>` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidParameters(_) => "invalid_parameters",
            Self::ExecutionFailed(_) => "execution_failed",
            Self::NotReversible(_) => "not_reversible",
            Self::InvalidRevertToken(_) => "invalid_revert_token",
        }
    }
}

/// Whether effects touch the data plane or are only recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Simulation,
    Production,
}

/// What an execution produced.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    /// Audit-visible result string ("blocked", "simulated_block", ...).
    pub result: String,
    /// Whether a revert token was produced.
    pub reversible: bool,
    /// Opaque state the plug-in needs to undo the effect.
    pub revert_token: Option<serde_json::Value>,
}

impl ActionOutcome {
    pub fn irreversible(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            reversible: false,
            revert_token: None,
        }
    }

    pub fn reversible(result: impl Into<String>, token: serde_json::Value) -> Self {
        Self {
            result: result.into(),
            reversible: true,
            revert_token: Some(token),
        }
    }
}

/// A containment action plug-in.
#[async_trait]
pub trait Action: Send + Sync + 'static {
    /// Registry name, referenced by decision matrix cells.
    fn name(&self) -> &str;

    /// Whether the confidence gate treats this action as intrusive.
    fn is_intrusive(&self) -> bool;

    /// Applies the action to a target. In simulation mode the intended
    /// effect is recorded without touching the data plane.
    async fn execute(
        &self,
        target: &str,
        params: &serde_json::Value,
        mode: ExecutionMode,
    ) -> Result<ActionOutcome, ActionError>;

    /// Undoes a previous execution using its revert token.
    async fn revert(
        &self,
        token: &serde_json::Value,
        mode: ExecutionMode,
    ) -> Result<String, ActionError> {
        let _ = (token, mode);
        Err(ActionError::NotReversible(self.name().to_string()))
    }
}

/// Startup-time registry of available actions.
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    /// Registry with all built-in actions against the given data plane.
    pub fn builtin(dataplane: Arc<dyn DataPlane>, config: &ResponseConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(LogOnlyAction));
        registry.register(Arc::new(RateLimitAction::new(Arc::clone(&dataplane))));
        registry.register(Arc::new(BlockIpAction::new(Arc::clone(&dataplane))));
        registry.register(Arc::new(IsolateContainerAction::new(Arc::clone(&dataplane))));
        registry.register(Arc::new(RedirectToHoneypotAction::new(
            Arc::clone(&dataplane),
            config.honeypot_addr.clone(),
        )));
        registry.register(Arc::new(QuarantineFileAction::new(
            dataplane,
            config.quarantine_dir.clone(),
        )));
        registry
    }

    pub fn register(&mut self, action: Arc<dyn Action>) {
        info!(action = action.name(), "registering action");
        self.actions.insert(action.name().to_string(), action);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    /// Registered action names, for config validation.
    pub fn names(&self) -> Vec<&str> {
        self.actions.keys().map(|s| s.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataplane::RecordingDataPlane;

    #[test]
    fn builtin_registry_has_the_full_set() {
        let registry = ActionRegistry::builtin(
            Arc::new(RecordingDataPlane::new()),
            &ResponseConfig::default(),
        );
        for name in [
            "log_only",
            "rate_limit",
            "block_ip",
            "isolate_container",
            "redirect_to_honeypot",
            "quarantine_file",
        ] {
            assert!(registry.contains(name), "missing {name}");
        }
    }

    #[test]
    fn intrusive_classification() {
        let registry = ActionRegistry::builtin(
            Arc::new(RecordingDataPlane::new()),
            &ResponseConfig::default(),
        );
        assert!(!registry.get("log_only").unwrap().is_intrusive());
        assert!(!registry.get("rate_limit").unwrap().is_intrusive());
        assert!(registry.get("block_ip").unwrap().is_intrusive());
        assert!(registry.get("isolate_container").unwrap().is_intrusive());
        assert!(registry.get("redirect_to_honeypot").unwrap().is_intrusive());
    }
}
