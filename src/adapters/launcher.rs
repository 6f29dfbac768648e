use crate::domain::model::ActionSpec;
use crate::domain::ports::ActionLauncher;
use crate::utils::error::{MonitorError, Result};
use std::process::Stdio;
use tokio::process::Command;
use tokio::runtime::Handle;

/// Starts actions as detached child processes on the current tokio runtime.
///
/// The child gets exactly the environment of the action, no stdio, and is
/// reaped by a background task that only logs how it ended.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    runtime: Handle,
}

impl ProcessLauncher {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Uses the runtime the caller is running on.
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| MonitorError::ConfigError {
                message: format!("process launcher needs a tokio runtime: {}", e),
            })
    }
}

impl ActionLauncher for ProcessLauncher {
    fn launch_detached(&self, action: &ActionSpec) -> Result<()> {
        let path = action.script_path.display().to_string();
        let _guard = self.runtime.enter();

        let mut child = Command::new(&action.interpreter)
            .args(action.argv())
            .env_clear()
            .envs(&action.env)
            .current_dir("/")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false)
            .spawn()
            .map_err(|e| MonitorError::ActionLaunchFailure {
                path: path.clone(),
                message: e.to_string(),
            })?;

        tracing::debug!("Launched {} (pid {:?})", path, child.id());
        self.runtime.spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => tracing::debug!("{} finished", path),
                Ok(status) => tracing::debug!("{} exited with {}", path, status),
                Err(e) => tracing::debug!("Lost track of {}: {}", path, e),
            }
        });
        Ok(())
    }
}
