//! Destination rewrite steering a target's traffic into the honeypot.

use super::{Action, ActionError, ActionOutcome, ExecutionMode};
use crate::dataplane::DataPlane;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub struct RedirectToHoneypotAction {
    dataplane: Arc<dyn DataPlane>,
    honeypot_addr: String,
}

impl RedirectToHoneypotAction {
    pub fn new(dataplane: Arc<dyn DataPlane>, honeypot_addr: String) -> Self {
        Self {
            dataplane,
            honeypot_addr,
        }
    }

    fn rule_args(op: &str, target: &str, honeypot: &str) -> Vec<String> {
        vec![
            "-t".to_string(),
            "nat".to_string(),
            op.to_string(),
            "PREROUTING".to_string(),
            "-s".to_string(),
            target.to_string(),
            "-j".to_string(),
            "DNAT".to_string(),
            "--to-destination".to_string(),
            honeypot.to_string(),
        ]
    }
}

#[async_trait]
impl Action for RedirectToHoneypotAction {
    fn name(&self) -> &str {
        "redirect_to_honeypot"
    }

    fn is_intrusive(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        target: &str,
        params: &serde_json::Value,
        mode: ExecutionMode,
    ) -> Result<ActionOutcome, ActionError> {
        let honeypot = params
            .get("honeypot_addr")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.honeypot_addr)
            .to_string();
        let token = serde_json::json!({ "target": target, "honeypot_addr": honeypot });

        if mode == ExecutionMode::Simulation {
            info!(ip = target, honeypot, "[simulation] would redirect to honeypot");
            return Ok(ActionOutcome::reversible("simulated_redirect", token));
        }

        self.dataplane
            .run("iptables", &Self::rule_args("-A", target, &honeypot))
            .await?;
        info!(ip = target, honeypot, "redirect installed");
        Ok(ActionOutcome::reversible("redirected", token))
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
        let honeypot = token
            .get("honeypot_addr")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.honeypot_addr);

        if mode == ExecutionMode::Production {
            self.dataplane
                .run("iptables", &Self::rule_args("-D", target, honeypot))
                .await?;
        }
        info!(ip = target, "redirect removed");
        Ok("redirect_removed".to_string())
    }
}
