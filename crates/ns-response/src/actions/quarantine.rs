//! Moves a suspicious file into the quarantine directory.
//!
//! Revert is move-back, possible only while the quarantined copy still
//! exists; a purged quarantine makes the revert fail cleanly.

use super::{Action, ActionError, ActionOutcome, ExecutionMode};
use crate::dataplane::DataPlane;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub struct QuarantineFileAction {
    dataplane: Arc<dyn DataPlane>,
    quarantine_dir: PathBuf,
}

impl QuarantineFileAction {
    pub fn new(dataplane: Arc<dyn DataPlane>, quarantine_dir: String) -> Self {
        Self {
            dataplane,
            quarantine_dir: PathBuf::from(quarantine_dir),
        }
    }
}

#[async_trait]
impl Action for QuarantineFileAction {
    fn name(&self) -> &str {
        "quarantine_file"
    }

    fn is_intrusive(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        target: &str,
        params: &serde_json::Value,
        mode: ExecutionMode,
    ) -> Result<ActionOutcome, ActionError> {
        // The file lives in params; the record target stays the offender.
        let path = params
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or(target);
        let source = Path::new(path);
        let file_name = source.file_name().ok_or_else(|| {
            ActionError::InvalidParameters(format!("'{path}' has no file name"))
        })?;
        let destination = self.quarantine_dir.join(file_name);
        let token = serde_json::json!({
            "original": source.display().to_string(),
            "quarantined": destination.display().to_string(),
        });

        if mode == ExecutionMode::Simulation {
            info!(path, "[simulation] would quarantine file");
            return Ok(ActionOutcome::reversible("simulated_quarantine", token));
        }

        self.dataplane.move_file(source, &destination).await?;
        info!(path, quarantined = %destination.display(), "file quarantined");
        Ok(ActionOutcome::reversible("quarantined", token))
    }

    async fn revert(
        &self,
        token: &serde_json::Value,
        mode: ExecutionMode,
    ) -> Result<String, ActionError> {
        let original = token
            .get("original")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ActionError::InvalidRevertToken("missing original".to_string()))?;
        let quarantined = token
            .get("quarantined")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ActionError::InvalidRevertToken("missing quarantined".to_string()))?;

        if mode == ExecutionMode::Production {
            let quarantined_path = Path::new(quarantined);
            if !self.dataplane.file_exists(quarantined_path).await {
                return Err(ActionError::ExecutionFailed(format!(
                    "quarantined copy '{quarantined}' no longer exists"
                )));
            }
            self.dataplane
                .move_file(quarantined_path, Path::new(original))
                .await?;
        }
        info!(original, "file restored from quarantine");
        Ok("restored".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataplane::RecordingDataPlane;

    fn action_with(plane: Arc<RecordingDataPlane>) -> QuarantineFileAction {
        QuarantineFileAction::new(plane as Arc<dyn DataPlane>, "/tmp/quarantine".to_string())
    }

    #[tokio::test]
    async fn quarantine_then_move_back() {
        let plane = Arc::new(RecordingDataPlane::new());
        let action = action_with(Arc::clone(&plane));

        let outcome = action
            .execute(
                "203.0.113.7",
                &serde_json::json!({"path": "/srv/upload/dropper.bin"}),
                ExecutionMode::Production,
            )
            .await
            .unwrap();
        assert_eq!(outcome.result, "quarantined");

        let result = action
            .revert(&outcome.revert_token.unwrap(), ExecutionMode::Production)
            .await
            .unwrap();
        assert_eq!(result, "restored");

        let calls = plane.calls().await;
        assert_eq!(calls[0], "mv /srv/upload/dropper.bin /tmp/quarantine/dropper.bin");
        assert_eq!(calls[1], "mv /tmp/quarantine/dropper.bin /srv/upload/dropper.bin");
    }

    #[tokio::test]
    async fn revert_fails_when_copy_is_gone() {
        let plane = Arc::new(RecordingDataPlane::new());
        let action = action_with(plane);

        // Token points at a file the data plane never saw.
        let token = serde_json::json!({
            "original": "/srv/upload/dropper.bin",
            "quarantined": "/tmp/quarantine/dropper.bin",
        });
        let err = action
            .revert(&token, ExecutionMode::Production)
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::ExecutionFailed(_)));
    }
}
