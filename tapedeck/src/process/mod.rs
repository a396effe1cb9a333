//! Subprocess execution seam.
//!
//! All hardware access goes through external CLI tools, and all tool
//! invocations go through the [`CommandRunner`] trait so the orchestrator
//! and the LTFS procedures never spawn processes directly. Production code
//! uses [`TokioRunner`]; tests inject a [`ScriptedRunner`] that replays
//! canned output.

mod scripted;
mod tokio_runner;

pub use scripted::{ScriptedResponse, ScriptedRunner};
pub use tokio_runner::TokioRunner;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Callback invoked for every non-empty output line of a child process.
pub type LineHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// A tool invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Program to run; may be a bare name or a full path.
    pub program: String,
    /// Arguments, one per element.
    pub args: Vec<String>,
    /// Trace id of the operation this invocation belongs to, mirrored
    /// into the log line fields.
    pub trace_id: Option<Uuid>,
}

impl CommandSpec {
    /// Build a spec for `program` with `args`.
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            trace_id: None,
        }
    }

    /// Attach the owning operation's trace id.
    pub fn with_trace(mut self, trace_id: Uuid) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// The invocation as one display string (`program arg arg ...`).
    pub fn display_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Result of a completed tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    /// Child exit code (`-1` when terminated by a signal).
    pub exit_code: i32,
    /// Last non-empty line seen across stdout and stderr.
    pub last_message: String,
}

impl ExecOutcome {
    /// Whether the child exited with code zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Errors from launching or supervising a child process.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The program could not be started.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// I/O failure while supervising the child.
    #[error("subprocess I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The invocation was cancelled and the child terminated.
    #[error("subprocess cancelled")]
    Cancelled,

    /// A scripted runner had no response for the command (test-only).
    #[error("no scripted response for '{command}'")]
    NoScript {
        /// The unmatched command line.
        command: String,
    },
}

/// Launches external tools and streams their output line by line.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `spec` to completion.
    ///
    /// Every non-empty output line (stdout and stderr merged) is passed to
    /// `on_line` and mirrored to the tracing log under the spec's trace
    /// id. Cancellation terminates the child and fails the call.
    async fn run(
        &self,
        spec: CommandSpec,
        cancel: CancellationToken,
        on_line: Option<LineHandler>,
    ) -> Result<ExecOutcome, ProcessError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_display_line() {
        let spec = CommandSpec::new("mtx", &["-f", "/dev/sg5", "status"]);
        assert_eq!(spec.display_line(), "mtx -f /dev/sg5 status");
        assert_eq!(CommandSpec::new("mtx", &[]).display_line(), "mtx");
    }

    #[test]
    fn test_exec_outcome_success() {
        let ok = ExecOutcome {
            exit_code: 0,
            last_message: String::new(),
        };
        let bad = ExecOutcome {
            exit_code: 1,
            last_message: String::new(),
        };
        assert!(ok.success());
        assert!(!bad.success());
    }
}
