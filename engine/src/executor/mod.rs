//! Bounded Executor
//!
//! Runs a snippet under a language policy and folds every outcome, including
//! rejections, timeouts and interpreter faults, into an `ExecutionResult`.
//! Nothing raised while running a snippet reaches the caller.
//!
//! - `python` / `py`: the in-process interpreter from [`crate::sandbox`],
//!   on a dedicated thread with its own stack and wall-clock deadline
//! - `bash` / `shell` / `sh`: allow-listed commands through
//!   [`TerminalTool`], killed when they overrun their timeout

use std::path::PathBuf;
use std::time::Duration;

use sdk::{ExecutionResult, Language};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::command_executor::{CommandError, CommandExecutor};
use crate::config::ExecutorConfig;
use crate::sandbox::{Sandbox, SandboxLimits, SandboxOutput};
use crate::tools::terminal::TerminalTool;

/// Stack for the interpreter thread. Deeply nested snippets recurse in the
/// tree walker, so the default 2 MiB is not enough.
const INTERPRETER_STACK_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct BoundedExecutor {
    terminal: TerminalTool,
    sandbox: Sandbox,
}

impl BoundedExecutor {
    /// Executor with default limits rooted at `workspace`.
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            terminal: TerminalTool::new(workspace),
            sandbox: Sandbox::default(),
        }
    }

    pub fn from_config(config: &ExecutorConfig, workspace: impl Into<PathBuf>) -> Self {
        let terminal = TerminalTool::new(workspace)
            .with_timeout(Duration::from_secs(config.shell_timeout_secs))
            .with_executor(CommandExecutor::with_allowlist(
                config.shell_allowlist.clone(),
            ));
        let sandbox = Sandbox::new(SandboxLimits {
            timeout: Duration::from_secs(config.python_timeout_secs),
            ..SandboxLimits::default()
        });
        Self { terminal, sandbox }
    }

    pub fn with_sandbox_limits(mut self, limits: SandboxLimits) -> Self {
        self.sandbox = Sandbox::new(limits);
        self
    }

    pub fn with_terminal(mut self, terminal: TerminalTool) -> Self {
        self.terminal = terminal;
        self
    }

    pub fn workspace(&self) -> &std::path::Path {
        self.terminal.work_dir()
    }

    /// Runs `code` under the policy selected by `language_tag`.
    ///
    /// The tag is echoed back verbatim in the result.
    pub async fn execute(&self, code: &str, language_tag: &str) -> ExecutionResult {
        let Some(language) = Language::from_tag(language_tag) else {
            warn!("Rejected snippet with unsupported language '{}'", language_tag);
            return ExecutionResult::rejected(
                language_tag,
                format!(
                    "Language '{}' not supported. Supported: {}",
                    language_tag,
                    Language::SUPPORTED.join(", ")
                ),
            );
        };

        info!("Executing {} snippet ({} bytes)", language, code.len());
        let result = match language {
            Language::Python => self.run_python(code, language_tag).await,
            Language::Shell => self.run_shell(code, language_tag).await,
        };
        debug!("Snippet finished: success={}", result.success);
        result
    }

    async fn run_python(&self, code: &str, tag: &str) -> ExecutionResult {
        let (tx, rx) = oneshot::channel::<SandboxOutput>();
        let sandbox = self.sandbox.clone();
        let code = code.to_string();

        let spawned = std::thread::Builder::new()
            .name("cove-sandbox".to_string())
            .stack_size(INTERPRETER_STACK_BYTES)
            .spawn(move || {
                let _ = tx.send(sandbox.run(&code));
            });
        if let Err(e) = spawned {
            warn!("Failed to start interpreter thread: {}", e);
            return ExecutionResult::rejected(tag, format!("Execution error: {}", e));
        }

        let output = match rx.await {
            Ok(output) => output,
            Err(_) => {
                warn!("Interpreter thread ended without a result");
                return ExecutionResult::rejected(
                    tag,
                    "Execution error: interpreter stopped unexpectedly",
                );
            }
        };

        match output.error {
            None => ExecutionResult::completed(tag, true, output.stdout, output.stderr),
            Some(err) => {
                debug!("Snippet raised: {}", err);
                let error = format!("{}{}", output.stderr, err);
                ExecutionResult::completed(tag, false, output.stdout, error)
            }
        }
    }

    async fn run_shell(&self, code: &str, tag: &str) -> ExecutionResult {
        match self.terminal.execute(code).await {
            Ok(output) => {
                ExecutionResult::completed(tag, output.success, output.stdout, output.stderr)
            }
            Err(e) => {
                if matches!(e, CommandError::TimedOut(_)) {
                    warn!("Shell snippet killed after its timeout");
                }
                ExecutionResult::rejected(tag, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_unsupported_language_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let executor = BoundedExecutor::new(temp_dir.path());

        let result = executor.execute("puts 1", "Ruby").await;
        assert!(!result.success);
        assert_eq!(result.language, "Ruby");
        assert_eq!(
            result.error,
            "Language 'Ruby' not supported. Supported: python, bash"
        );
        assert!(result.output.is_empty());
    }

    #[tokio::test]
    async fn test_python_success_and_tag_echo() {
        let temp_dir = TempDir::new().unwrap();
        let executor = BoundedExecutor::new(temp_dir.path());

        let result = executor.execute("print(sum([1, 2, 3]))", " PY ").await;
        assert!(result.success);
        assert_eq!(result.output, "6\n");
        assert_eq!(result.error, "");
        assert_eq!(result.language, " PY ");
    }

    #[tokio::test]
    async fn test_python_fault_is_contained() {
        let temp_dir = TempDir::new().unwrap();
        let executor = BoundedExecutor::new(temp_dir.path());

        let result = executor
            .execute("print('partial')\nraise KeyError('k')", "python")
            .await;
        assert!(!result.success);
        assert_eq!(result.output, "partial\n");
        assert_eq!(result.error, "KeyError: k (line 2)");
    }

    #[tokio::test]
    async fn test_python_timeout() {
        let temp_dir = TempDir::new().unwrap();
        let executor = BoundedExecutor::new(temp_dir.path()).with_sandbox_limits(SandboxLimits {
            timeout: Duration::from_secs(1),
            ..SandboxLimits::default()
        });

        let started = std::time::Instant::now();
        let result = executor.execute("while True:\n    pass", "python").await;
        assert!(!result.success);
        assert_eq!(result.error, "TimeoutError: Execution timed out (1s limit)");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_shell_allowlist() {
        let temp_dir = TempDir::new().unwrap();
        let executor = BoundedExecutor::new(temp_dir.path());

        let result = executor.execute("rm -rf /", "bash").await;
        assert!(!result.success);
        assert_eq!(
            result.error,
            "Command 'rm' not allowed. Safe commands: ls, pwd, echo, cat, head, tail, wc, grep, find"
        );
    }

    #[tokio::test]
    async fn test_shell_runs_in_workspace() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("data.txt"), "one\ntwo\n").unwrap();
        let executor = BoundedExecutor::new(temp_dir.path());

        let result = executor.execute("cat data.txt", "shell").await;
        assert!(result.success);
        assert_eq!(result.output, "one\ntwo\n");

        let missing = executor.execute("cat nope.txt", "sh").await;
        assert!(!missing.success);
        assert!(missing.error.contains("nope.txt"));
    }
}
