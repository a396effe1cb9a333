//! Scripted subprocess driver for tests.

use super::{CommandRunner, CommandSpec, ExecOutcome, LineHandler, ProcessError};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// One canned response, matched by command-line prefix.
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    prefix: String,
    exit_code: i32,
    lines: Vec<String>,
    sticky: bool,
}

impl ScriptedResponse {
    /// Response for any command whose line starts with `prefix`
    /// (program matched by base name, so configured tool paths still hit).
    pub fn new(prefix: impl Into<String>, exit_code: i32, lines: &[&str]) -> Self {
        Self {
            prefix: prefix.into(),
            exit_code,
            lines: lines.iter().map(|l| l.to_string()).collect(),
            sticky: false,
        }
    }

    /// Keep the response in place instead of consuming it on first match.
    pub fn sticky(mut self) -> Self {
        self.sticky = true;
        self
    }
}

/// A [`CommandRunner`] that replays canned output instead of spawning
/// processes, and records every invocation for assertions.
///
/// Responses are matched in insertion order against the command line with
/// the program reduced to its base name (`/opt/ltfs/bin/mtx -f /dev/sg5
/// status` matches the prefix `mtx`). Non-sticky responses are consumed by
/// the first match.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    responses: Mutex<Vec<ScriptedResponse>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    /// Create a runner with no scripted responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a one-shot response.
    pub fn respond(&self, prefix: impl Into<String>, exit_code: i32, lines: &[&str]) {
        self.push(ScriptedResponse::new(prefix, exit_code, lines));
    }

    /// Queue a response that answers every matching invocation.
    pub fn respond_always(&self, prefix: impl Into<String>, exit_code: i32, lines: &[&str]) {
        self.push(ScriptedResponse::new(prefix, exit_code, lines).sticky());
    }

    /// Queue a prepared response.
    pub fn push(&self, response: ScriptedResponse) {
        self.responses.lock().unwrap().push(response);
    }

    /// Every command line run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of recorded invocations starting with `prefix`.
    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        spec: CommandSpec,
        cancel: CancellationToken,
        on_line: Option<LineHandler>,
    ) -> Result<ExecOutcome, ProcessError> {
        if cancel.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }

        let base = Path::new(&spec.program)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| spec.program.clone());
        let command = if spec.args.is_empty() {
            base
        } else {
            format!("{} {}", base, spec.args.join(" "))
        };
        self.calls.lock().unwrap().push(command.clone());

        let response = {
            let mut responses = self.responses.lock().unwrap();
            let found = responses
                .iter()
                .position(|response| command.starts_with(&response.prefix));
            match found {
                Some(index) if responses[index].sticky => responses[index].clone(),
                Some(index) => responses.remove(index),
                None => return Err(ProcessError::NoScript { command }),
            }
        };

        let mut last_message = String::new();
        for line in &response.lines {
            if line.is_empty() {
                continue;
            }
            if let Some(handler) = on_line.as_ref() {
                handler(line);
            }
            last_message = line.clone();
        }

        Ok(ExecOutcome {
            exit_code: response.exit_code,
            last_message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_matches_by_base_name_prefix() {
        let runner = ScriptedRunner::new();
        runner.respond("mtx", 0, &["ok"]);

        let outcome = runner
            .run(
                CommandSpec::new("/opt/tools/mtx", &["-f", "/dev/sg5", "status"]),
                CancellationToken::new(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.last_message, "ok");
        assert_eq!(runner.calls(), vec!["mtx -f /dev/sg5 status".to_string()]);
    }

    #[tokio::test]
    async fn test_one_shot_responses_are_consumed_in_order() {
        let runner = ScriptedRunner::new();
        runner.respond("df", 0, &["first"]);
        runner.respond("df", 0, &["second"]);

        let spec = CommandSpec::new("df", &[]);
        let a = runner
            .run(spec.clone(), CancellationToken::new(), None)
            .await
            .unwrap();
        let b = runner
            .run(spec.clone(), CancellationToken::new(), None)
            .await
            .unwrap();

        assert_eq!(a.last_message, "first");
        assert_eq!(b.last_message, "second");
        assert!(runner
            .run(spec, CancellationToken::new(), None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_sticky_response_answers_repeatedly() {
        let runner = ScriptedRunner::new();
        runner.respond_always("ltfs", 0, &["LTFS11031I Volume mounted successfully"]);

        let spec = CommandSpec::new("ltfs", &["-o", "devname=/dev/sg3"]);
        for _ in 0..3 {
            let outcome = runner
                .run(spec.clone(), CancellationToken::new(), None)
                .await
                .unwrap();
            assert!(outcome.success());
        }
        assert_eq!(runner.call_count("ltfs"), 3);
    }

    #[tokio::test]
    async fn test_lines_reach_the_handler() {
        let runner = ScriptedRunner::new();
        runner.respond("mkltfs", 0, &["step 1", "", "step 2"]);

        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: LineHandler = Arc::new(move |line: &str| {
            sink.lock().unwrap().push(line.to_string());
        });

        runner
            .run(
                CommandSpec::new("mkltfs", &["--device=/dev/sg3"]),
                CancellationToken::new(),
                Some(handler),
            )
            .await
            .unwrap();

        assert_eq!(
            seen.lock().unwrap().clone(),
            vec!["step 1".to_string(), "step 2".to_string()]
        );
    }
}
