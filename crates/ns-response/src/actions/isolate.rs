//! Disconnects a compute unit from its data network.
//!
//! The unit name comes from `params.container`; without one the unit
//! serving the flow is addressed by convention as `app-<target>`.

use super::{Action, ActionError, ActionOutcome, ExecutionMode};
use crate::dataplane::DataPlane;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

const NETWORK: &str = "bridge";

pub struct IsolateContainerAction {
    dataplane: Arc<dyn DataPlane>,
}

impl IsolateContainerAction {
    pub fn new(dataplane: Arc<dyn DataPlane>) -> Self {
        Self { dataplane }
    }

    fn container_for(target: &str, params: &serde_json::Value) -> String {
        params
            .get("container")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| format!("app-{target}"))
    }
}

#[async_trait]
impl Action for IsolateContainerAction {
    fn name(&self) -> &str {
        "isolate_container"
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
        let container = Self::container_for(target, params);
        let token = serde_json::json!({ "container": container, "network": NETWORK });

        if mode == ExecutionMode::Simulation {
            info!(container, "[simulation] would disconnect from network");
            return Ok(ActionOutcome::reversible("simulated_isolation", token));
        }

        self.dataplane
            .run(
                "docker",
                &[
                    "network".to_string(),
                    "disconnect".to_string(),
                    NETWORK.to_string(),
                    container.clone(),
                ],
            )
            .await?;
        info!(container, "disconnected from network");
        Ok(ActionOutcome::reversible("isolated", token))
    }

    async fn revert(
        &self,
        token: &serde_json::Value,
        mode: ExecutionMode,
    ) -> Result<String, ActionError> {
        let container = token
            .get("container")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ActionError::InvalidRevertToken("missing container".to_string()))?;
        let network = token
            .get("network")
            .and_then(|v| v.as_str())
            .unwrap_or(NETWORK);

        if mode == ExecutionMode::Production {
            self.dataplane
                .run(
                    "docker",
                    &[
                        "network".to_string(),
                        "connect".to_string(),
                        network.to_string(),
                        container.to_string(),
                    ],
                )
                .await?;
        }
        info!(container, "reconnected to network");
        Ok("reconnected".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataplane::RecordingDataPlane;

    #[tokio::test]
    async fn isolates_named_container() {
        let plane = Arc::new(RecordingDataPlane::new());
        let action = IsolateContainerAction::new(Arc::clone(&plane) as Arc<dyn DataPlane>);

        let outcome = action
            .execute(
                "203.0.113.7",
                &serde_json::json!({"container": "app1"}),
                ExecutionMode::Production,
            )
            .await
            .unwrap();
        assert_eq!(outcome.result, "isolated");

        action
            .revert(&outcome.revert_token.unwrap(), ExecutionMode::Production)
            .await
            .unwrap();

        let calls = plane.calls().await;
        assert_eq!(calls[0], "docker network disconnect bridge app1");
        assert_eq!(calls[1], "docker network connect bridge app1");
    }

    #[tokio::test]
    async fn derives_container_name_when_absent() {
        let plane = Arc::new(RecordingDataPlane::new());
        let action = IsolateContainerAction::new(Arc::clone(&plane) as Arc<dyn DataPlane>);

        action
            .execute("203.0.113.7", &serde_json::json!({}), ExecutionMode::Production)
            .await
            .unwrap();
        assert!(plane.calls().await[0].ends_with("app-203.0.113.7"));
    }
}
