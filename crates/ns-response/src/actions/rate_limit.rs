//! Bandwidth cap on traffic from a target.

use super::{Action, ActionError, ActionOutcome, ExecutionMode};
use crate::dataplane::DataPlane;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

const DEFAULT_RATE: &str = "10/second";

pub struct RateLimitAction {
    dataplane: Arc<dyn DataPlane>,
}

impl RateLimitAction {
    pub fn new(dataplane: Arc<dyn DataPlane>) -> Self {
        Self { dataplane }
    }

    fn rule_args(op: &str, target: &str, rate: &str) -> Vec<String> {
        vec![
            op.to_string(),
            "INPUT".to_string(),
            "-s".to_string(),
            target.to_string(),
            "-m".to_string(),
            "limit".to_string(),
            "--limit".to_string(),
            rate.to_string(),
            "-j".to_string(),
            "ACCEPT".to_string(),
        ]
    }
}

#[async_trait]
impl Action for RateLimitAction {
    fn name(&self) -> &str {
        "rate_limit"
    }

    // Alters the data plane, but the confidence gate downgrades INTO this
    // action, so it sits below the intrusive tier.
    fn is_intrusive(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        target: &str,
        params: &serde_json::Value,
        mode: ExecutionMode,
    ) -> Result<ActionOutcome, ActionError> {
        let rate = params
            .get("rate")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_RATE)
            .to_string();
        let token = serde_json::json!({ "target": target, "rate": rate });

        if mode == ExecutionMode::Simulation {
            info!(ip = target, rate, "[simulation] would rate limit");
            return Ok(ActionOutcome::reversible("simulated_rate_limit", token));
        }

        self.dataplane
            .run("iptables", &Self::rule_args("-A", target, &rate))
            .await?;
        info!(ip = target, rate, "rate limit installed");
        Ok(ActionOutcome::reversible("rate_limited", token))
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
        let rate = token
            .get("rate")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_RATE);

        if mode == ExecutionMode::Production {
            self.dataplane
                .run("iptables", &Self::rule_args("-D", target, rate))
                .await?;
        }
        info!(ip = target, "rate limit removed");
        Ok("rate_limit_removed".to_string())
    }
}
