//! The do-nothing action: record and move on.
//!
//! Also the landing spot for everything the safety gate downgrades, so it
//! must never fail.

use super::{Action, ActionError, ActionOutcome, ExecutionMode};
use async_trait::async_trait;

pub struct LogOnlyAction;

#[async_trait]
impl Action for LogOnlyAction {
    fn name(&self) -> &str {
        "log_only"
    }

    fn is_intrusive(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        _target: &str,
        _params: &serde_json::Value,
        _mode: ExecutionMode,
    ) -> Result<ActionOutcome, ActionError> {
        Ok(ActionOutcome::irreversible("recorded"))
    }
}
