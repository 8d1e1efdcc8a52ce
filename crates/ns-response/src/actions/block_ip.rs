//! Drop rule against an offending source IP.
//!
//! Installs are idempotent: a second block of the same target records the
//! existing rule instead of stacking a duplicate.

use super::{Action, ActionError, ActionOutcome, ExecutionMode};
use crate::dataplane::DataPlane;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

pub struct BlockIpAction {
    dataplane: Arc<dyn DataPlane>,
    /// Targets with a live drop rule.
    applied: Mutex<HashSet<String>>,
}

impl BlockIpAction {
    pub fn new(dataplane: Arc<dyn DataPlane>) -> Self {
        Self {
            dataplane,
            applied: Mutex::new(HashSet::new()),
        }
    }

    fn token(target: &str) -> serde_json::Value {
        serde_json::json!({ "target": target })
    }
}

#[async_trait]
impl Action for BlockIpAction {
    fn name(&self) -> &str {
        "block_ip"
    }

    fn is_intrusive(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        target: &str,
        _params: &serde_json::Value,
        mode: ExecutionMode,
    ) -> Result<ActionOutcome, ActionError> {
        let mut applied = self.applied.lock().await;
        if applied.contains(target) {
            return Ok(ActionOutcome::reversible("already_blocked", Self::token(target)));
        }

        if mode == ExecutionMode::Simulation {
            applied.insert(target.to_string());
            info!(ip = target, "[simulation] would install drop rule");
            return Ok(ActionOutcome::reversible("simulated_block", Self::token(target)));
        }

        self.dataplane
            .run(
                "iptables",
                &[
                    "-A".to_string(),
                    "INPUT".to_string(),
                    "-s".to_string(),
                    target.to_string(),
                    "-j".to_string(),
                    "DROP".to_string(),
                ],
            )
            .await?;
        applied.insert(target.to_string());
        info!(ip = target, "installed drop rule");
        Ok(ActionOutcome::reversible("blocked", Self::token(target)))
    }

    async fn revert(
        &self,
        token: &serde_json::Value,
        mode: ExecutionMode,
    ) -> Result<String, ActionError> {
        let target = token
            .get("target")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ActionError::InvalidRevertToken("missing target".to_string()))?;

        let mut applied = self.applied.lock().await;
        if mode == ExecutionMode::Production {
            self.dataplane
                .run(
                    "iptables",
                    &[
                        "-D".to_string(),
                        "INPUT".to_string(),
                        "-s".to_string(),
                        target.to_string(),
                        "-j".to_string(),
                        "DROP".to_string(),
                    ],
                )
                .await?;
        }
        applied.remove(target);
        info!(ip = target, "removed drop rule");
        Ok("unblocked".to_string())
    }
}
