//! Restricted interpreter for python-like snippets
//!
//! Snippets run against an allow-list of builtins with no import machinery
//! and no filesystem, network or process access. The interpreter enforces a
//! wall-clock deadline, a recursion limit, a collection-size limit and an
//! output cap. It is a convenience restriction, not a security boundary.

mod ast;
mod builtins;
pub mod error;
mod format;
mod interpreter;
mod parser;
mod value;

use std::time::Duration;

pub use error::{ErrorKind, Exception, SandboxError};

use interpreter::Interpreter;

/// Bounds applied to a single run.
#[derive(Debug, Clone)]
pub struct SandboxLimits {
    pub timeout: Duration,
    /// Captured stdout beyond this is dropped with a notice on stderr
    pub max_output_bytes: usize,
    pub max_depth: usize,
    pub max_collection: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_output_bytes: 64 * 1024,
            max_depth: 200,
            max_collection: 1_000_000,
        }
    }
}

/// What a run produced. Output captured before a fault is kept.
#[derive(Debug, Clone, Default)]
pub struct SandboxOutput {
    pub stdout: String,
    pub stderr: String,
    pub error: Option<SandboxError>,
}

impl SandboxOutput {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    limits: SandboxLimits,
}

impl Sandbox {
    pub fn new(limits: SandboxLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    /// Parses and runs `code`. Blocks the calling thread until the snippet
    /// finishes or its deadline passes, so callers run it off the async
    /// scheduler on a thread with a generous stack.
    pub fn run(&self, code: &str) -> SandboxOutput {
        let program = match parser::parse_program(code) {
            Ok(program) => program,
            Err(err) => {
                tracing::debug!("Snippet rejected by parser: {}", err);
                return SandboxOutput {
                    error: Some(err),
                    ..SandboxOutput::default()
                };
            }
        };

        let mut interpreter = Interpreter::new(self.limits.clone());
        let result = interpreter.run(&program);
        let (stdout, stderr) = interpreter.into_output();

        SandboxOutput {
            stdout,
            stderr,
            error: result.err().map(SandboxError::from),
        }
    }
}
