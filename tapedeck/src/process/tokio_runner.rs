//! Production subprocess runner on top of `tokio::process`.

use super::{CommandRunner, CommandSpec, ExecOutcome, LineHandler, ProcessError};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Runs tools as real child processes with line-streamed output.
///
/// stdout and stderr are merged into a single ordered-per-stream line
/// feed. When the program path has a parent directory the child runs with
/// that directory as its working directory, so bundled tool distributions
/// find their co-located libraries.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioRunner;

impl TokioRunner {
    /// Create a runner.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for TokioRunner {
    async fn run(
        &self,
        spec: CommandSpec,
        cancel: CancellationToken,
        on_line: Option<LineHandler>,
    ) -> Result<ExecOutcome, ProcessError> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = Path::new(&spec.program).parent() {
            if !dir.as_os_str().is_empty() {
                command.current_dir(dir);
            }
        }

        debug!(command = %spec.display_line(), "spawning subprocess");
        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("child stdout unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("child stderr unavailable"))?;

        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
        spawn_line_reader(BufReader::new(stdout), line_tx.clone());
        spawn_line_reader(BufReader::new(stderr), line_tx);

        let mut last_message = String::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    return Err(ProcessError::Cancelled);
                }
                line = line_rx.recv() => match line {
                    Some(line) => {
                        if let Some(trace_id) = spec.trace_id {
                            debug!(trace_id = %trace_id, "{}", line);
                        } else {
                            debug!("{}", line);
                        }
                        if let Some(handler) = on_line.as_ref() {
                            handler(&line);
                        }
                        last_message = line;
                    }
                    // Both pipes closed; the child is exiting.
                    None => break,
                }
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(ProcessError::Cancelled);
            }
            status = child.wait() => status?,
        };

        Ok(ExecOutcome {
            exit_code: status.code().unwrap_or(-1),
            last_message,
        })
    }
}

fn spawn_line_reader<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = reader.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let trimmed = line.trim_end();
            if !trimmed.is_empty() && tx.send(trimmed.to_string()).is_err() {
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_runs_command_and_captures_last_line() {
        let runner = TokioRunner::new();
        let outcome = runner
            .run(
                CommandSpec::new("sh", &["-c", "echo first; echo last"]),
                CancellationToken::new(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.last_message, "last");
    }

    #[tokio::test]
    async fn test_merges_stdout_and_stderr() {
        let runner = TokioRunner::new();
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: LineHandler = Arc::new(move |line: &str| {
            sink.lock().unwrap().push(line.to_string());
        });

        let outcome = runner
            .run(
                CommandSpec::new("sh", &["-c", "echo out; echo err >&2; exit 3"]),
                CancellationToken::new(),
                Some(handler),
            )
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, 3);
        let mut lines = seen.lock().unwrap().clone();
        lines.sort();
        assert_eq!(lines, vec!["err".to_string(), "out".to_string()]);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let runner = TokioRunner::new();
        let err = runner
            .run(
                CommandSpec::new("definitely-not-a-real-tool", &[]),
                CancellationToken::new(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_cancellation_kills_child() {
        let runner = TokioRunner::new();
        let cancel = CancellationToken::new();
        let killer = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            killer.cancel();
        });

        let err = runner
            .run(
                CommandSpec::new("sleep", &["30"]),
                cancel,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Cancelled));
    }
}
