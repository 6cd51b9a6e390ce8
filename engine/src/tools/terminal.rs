//! Terminal Core Tool
//!
//! Native execution of allow-listed, read-only shell commands inside the
//! workspace. Commands are validated by `CommandExecutor` and spawned
//! execve-style (no shell) with stdin closed. A hard wall-clock timeout
//! kills the child process if it overruns.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::command_executor::{CommandError, CommandExecutor};

/// Captured result of a command that ran to completion.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone)]
pub struct TerminalTool {
    work_dir: PathBuf,
    timeout: Duration,
    executor: CommandExecutor,
}

impl TerminalTool {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            timeout: Duration::from_secs(10), // Default 10s timeout
            executor: CommandExecutor::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_executor(mut self, executor: CommandExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Execute a snippet through the CommandExecutor gates.
    ///
    /// Rejected snippets return an error before any process exists. A
    /// command that outlives the timeout is killed and reported as
    /// `CommandError::TimedOut`; a nonzero exit status is not an error here,
    /// it is reflected in `CommandOutput::success`.
    pub async fn execute(&self, snippet: &str) -> Result<CommandOutput, CommandError> {
        let command = match self.executor.validate(snippet) {
            Ok(command) => command,
            Err(e) => {
                warn!("Command rejected: {}", e);
                return Err(e);
            }
        };

        info!("Executing terminal command: {}", command.program);

        let child = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Dropping the wait future on timeout drops the child, which kills it.
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                debug!("Command exited with {}", output.status);
                Ok(CommandOutput {
                    success: output.status.success(),
                    exit_code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
            Ok(Err(e)) => {
                warn!("Command failed: {}", e);
                Err(CommandError::ExecutionFailed(e))
            }
            Err(_) => {
                warn!(
                    "Command timed out after {} seconds",
                    self.timeout.as_secs()
                );
                Err(CommandError::TimedOut(self.timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_runs_in_work_dir() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("notes.txt"), "alpha\nbeta\n").unwrap();

        let tool = TerminalTool::new(temp_dir.path());
        let output = tool.execute("cat notes.txt").await.unwrap();

        assert!(output.success);
        assert_eq!(output.stdout, "alpha\nbeta\n");
        assert_eq!(output.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let tool = TerminalTool::new(temp_dir.path());

        let output = tool.execute("cat missing.txt").await.unwrap();
        assert!(!output.success);
        assert!(output.stderr.contains("missing.txt"));
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let temp_dir = TempDir::new().unwrap();
        let executor = CommandExecutor::with_allowlist(vec!["sleep".to_string()]);
        let tool = TerminalTool::new(temp_dir.path())
            .with_executor(executor)
            .with_timeout(Duration::from_millis(300));

        let started = std::time::Instant::now();
        let result = tool.execute("sleep 5").await;

        assert!(matches!(result, Err(CommandError::TimedOut(_))));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_rejected_command_never_spawns() {
        let temp_dir = TempDir::new().unwrap();
        let tool = TerminalTool::new(temp_dir.path());

        let result = tool.execute("touch created.txt").await;
        assert!(matches!(result, Err(CommandError::CommandNotAllowed { .. })));
        assert!(!temp_dir.path().join("created.txt").exists());
    }
}
