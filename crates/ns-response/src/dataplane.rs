//! Data-plane seam: the only place response actions touch the host.
//!
//! Actions never shell out directly; they go through [`DataPlane`] so
//! simulation mode, tests, and future drivers (an eBPF ruleset, a switch
//! API) slot in without touching the action logic.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Failure at the data-plane boundary.
#[derive(Error, Debug, Clone)]
pub enum DataPlaneError {
    #[error("command failed ({status}): {stderr}")]
    CommandFailed { status: i32, stderr: String },

    #[error("io error: {0}")]
    Io(String),
}

/// Executes containment primitives against the host.
#[async_trait]
pub trait DataPlane: Send + Sync + 'static {
    /// Runs a system command, returning stdout on success.
    async fn run(&self, program: &str, args: &[String]) -> Result<String, DataPlaneError>;

    /// Moves a file, creating the destination directory if needed.
    async fn move_file(&self, from: &Path, to: &Path) -> Result<(), DataPlaneError>;

    /// Whether a path currently exists.
    async fn file_exists(&self, path: &Path) -> bool;
}

/// Real host driver: system commands and filesystem moves.
pub struct SystemDataPlane;

#[async_trait]
impl DataPlane for SystemDataPlane {
    async fn run(&self, program: &str, args: &[String]) -> Result<String, DataPlaneError> {
        debug!(program, ?args, "running data-plane command");
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| DataPlaneError::Io(e.to_string()))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(DataPlaneError::CommandFailed {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn move_file(&self, from: &Path, to: &Path) -> Result<(), DataPlaneError> {
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DataPlaneError::Io(e.to_string()))?;
        }
        tokio::fs::rename(from, to)
            .await
            .map_err(|e| DataPlaneError::Io(e.to_string()))
    }

    async fn file_exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }
}

/// Recording stub for tests: captures every call, optionally failing.
#[derive(Default)]
pub struct RecordingDataPlane {
    calls: tokio::sync::Mutex<Vec<String>>,
    fail: std::sync::atomic::AtomicBool,
    /// Paths "moved" by move_file, treated as existing afterwards.
    moved: tokio::sync::Mutex<Vec<String>>,
}

impl RecordingDataPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail.
    pub fn fail_from_now(&self) {
        self.fail.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    fn should_fail(&self) -> bool {
        self.fail.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl DataPlane for RecordingDataPlane {
    async fn run(&self, program: &str, args: &[String]) -> Result<String, DataPlaneError> {
        self.calls
            .lock()
            .await
            .push(format!("{program} {}", args.join(" ")));
        if self.should_fail() {
            return Err(DataPlaneError::CommandFailed {
                status: 1,
                stderr: "injected failure".to_string(),
            });
        }
        Ok(String::new())
    }

    async fn move_file(&self, from: &Path, to: &Path) -> Result<(), DataPlaneError> {
        self.calls
            .lock()
            .await
            .push(format!("mv {} {}", from.display(), to.display()));
        if self.should_fail() {
            return Err(DataPlaneError::Io("injected failure".to_string()));
        }
        self.moved.lock().await.push(to.display().to_string());
        Ok(())
    }

    async fn file_exists(&self, path: &Path) -> bool {
        self.moved
            .lock()
            .await
            .contains(&path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_plane_captures_calls() {
        let plane = RecordingDataPlane::new();
        plane
            .run("iptables", &["-A".to_string(), "INPUT".to_string()])
            .await
            .unwrap();
        assert_eq!(plane.calls().await, vec!["iptables -A INPUT"]);
    }

    #[tokio::test]
    async fn recording_plane_injects_failures() {
        let plane = RecordingDataPlane::new();
        plane.fail_from_now();
        let err = plane.run("iptables", &[]).await.unwrap_err();
        assert!(matches!(err, DataPlaneError::CommandFailed { .. }));
    }
}
