//! Shared context threaded through every operation body.

use super::operations::OperationCell;
use crate::config::LibrarySettings;
use crate::events::{EventHub, LibraryEvent};
use crate::library::{LibraryState, StatusCollector};
use crate::lock::{drive_lock_name, LockGuard, Locker, DRIVE_LOCK_TTL};
use crate::ltfs::LtfsProcedures;
use crate::model::LibraryOperationStatus;
use crate::parse::LtfsCodeTracker;
use crate::process::{CommandRunner, CommandSpec, ExecOutcome, ProcessError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

/// Advisory wait handed to callers bounced off a busy drive or changer.
pub const BUSY_RETRY_WAIT_SECS: u64 = 15;

/// Final result of an operation body.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationOutcome {
    /// Terminal status.
    pub status: LibraryOperationStatus,
    /// Outcome message shown to the caller.
    pub message: String,
    /// Advisory pacing for the next operation, in seconds.
    pub wait_before_next_operation: Option<u64>,
}

impl OperationOutcome {
    /// Outcome with the given status and message.
    pub fn new(status: LibraryOperationStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            wait_before_next_operation: None,
        }
    }

    /// `Succeeded` with a message.
    pub fn succeeded(message: impl Into<String>) -> Self {
        Self::new(LibraryOperationStatus::Succeeded, message)
    }

    /// `NoAction`: the requested state already held.
    pub fn no_action(message: impl Into<String>) -> Self {
        Self::new(LibraryOperationStatus::NoAction, message)
    }

    /// `Failed` with a reason.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(LibraryOperationStatus::Failed, message)
    }

    /// Busy rejection (`DriveBusy`/`MtxBusy`) with the standard retry
    /// advisory.
    pub fn busy(status: LibraryOperationStatus, message: impl Into<String>) -> Self {
        let mut outcome = Self::new(status, message);
        outcome.wait_before_next_operation = Some(BUSY_RETRY_WAIT_SECS);
        outcome
    }

    /// Attach a pacing advisory.
    pub fn with_wait(mut self, seconds: u64) -> Self {
        self.wait_before_next_operation = Some(seconds);
        self
    }

    /// Whether the outcome counts as success.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Everything an operation body needs: the model, the tools, the locks,
/// the event sinks and the operation's own log.
#[derive(Clone)]
pub struct OpContext {
    /// Trace id of the owning operation.
    pub trace_id: Uuid,
    /// Name of the operation ("Load", "Unload", ...) used in lock events.
    pub op_name: &'static str,
    /// Cancellation for every suspension point of the body.
    pub cancel: CancellationToken,
    /// The library model.
    pub state: Arc<LibraryState>,
    /// Status refresh.
    pub collector: Arc<StatusCollector>,
    /// Subprocess seam.
    pub runner: Arc<dyn CommandRunner>,
    /// Lock provider.
    pub locker: Arc<dyn Locker>,
    /// Event fan-out.
    pub events: Arc<EventHub>,
    /// Platform LTFS strategy.
    pub procedures: Arc<dyn LtfsProcedures>,
    /// Library configuration.
    pub settings: LibrarySettings,
    pub(crate) cell: Arc<OperationCell>,
}

impl OpContext {
    /// Log a line: appended to the operation, mirrored to tracing, and
    /// published as an `OperationLogging` event.
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        info!(trace_id = %self.trace_id, "{}", message);
        self.cell.append_log(&message);
        self.events.emit(LibraryEvent::OperationLogging {
            trace_id: Some(self.trace_id),
            message,
        });
    }

    /// Publish an event.
    pub fn emit(&self, event: LibraryEvent) {
        self.events.emit(event);
    }

    /// Owner string used for lock acquisition.
    pub fn owner(&self) -> String {
        self.trace_id.to_string()
    }

    /// Run a tool, streaming every output line into the operation log.
    pub async fn run_tool(
        &self,
        program: impl Into<String>,
        args: &[&str],
    ) -> Result<ExecOutcome, ProcessError> {
        let spec = CommandSpec::new(program, args).with_trace(self.trace_id);
        self.log(format!("$ {}", spec.display_line()));
        let logger = self.clone();
        self.runner
            .run(
                spec,
                self.cancel.clone(),
                Some(Arc::new(move |line: &str| logger.log(line))),
            )
            .await
    }

    /// Run a tool and additionally track LTFS codes across its output;
    /// the last interpreted code wins.
    pub async fn run_tool_with_codes(
        &self,
        program: impl Into<String>,
        args: &[&str],
    ) -> Result<(ExecOutcome, Option<LibraryOperationStatus>), ProcessError> {
        let spec = CommandSpec::new(program, args).with_trace(self.trace_id);
        self.log(format!("$ {}", spec.display_line()));
        let tracker = Arc::new(LtfsCodeTracker::new());
        let codes = Arc::clone(&tracker);
        let logger = self.clone();
        let outcome = self
            .runner
            .run(
                spec,
                self.cancel.clone(),
                Some(Arc::new(move |line: &str| {
                    codes.observe(line);
                    logger.log(line);
                })),
            )
            .await?;
        Ok((outcome, tracker.latest()))
    }

    /// Run a tool and collect its full output while still logging it.
    pub async fn run_tool_capture(
        &self,
        program: impl Into<String>,
        args: &[&str],
    ) -> Result<(ExecOutcome, String), ProcessError> {
        let spec = CommandSpec::new(program, args).with_trace(self.trace_id);
        self.log(format!("$ {}", spec.display_line()));
        let lines: Arc<std::sync::Mutex<Vec<String>>> = Arc::default();
        let sink = Arc::clone(&lines);
        let logger = self.clone();
        let outcome = self
            .runner
            .run(
                spec,
                self.cancel.clone(),
                Some(Arc::new(move |line: &str| {
                    sink.lock().unwrap().push(line.to_string());
                    logger.log(line);
                })),
            )
            .await?;
        let output = lines.lock().unwrap().join("\n");
        Ok((outcome, output))
    }

    /// Refresh the model from `mtx status`, logging failures.
    pub async fn refresh(&self, force: bool) -> Result<(), OperationOutcome> {
        self.collector
            .collect_status(force, &self.cancel)
            .await
            .map_err(|err| {
                self.log(format!("status refresh failed: {err}"));
                OperationOutcome::failed(err.to_string())
            })
    }

    /// Cancellable sleep; returns false when cancelled.
    pub async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// Take the per-drive lock, emitting the lock lifecycle events.
    ///
    /// Returns `None` (after logging) when the lock is held elsewhere.
    pub async fn lock_drive(&self, slot_number: u32) -> Option<ScopedDriveLock> {
        let guard = self
            .locker
            .acquire(&drive_lock_name(slot_number), &self.owner(), DRIVE_LOCK_TTL)
            .await?;
        self.emit(LibraryEvent::DriveChanged {
            slot_number,
            operation: format!("Locked to {}", self.op_name),
        });
        Some(ScopedDriveLock {
            _guard: guard,
            events: Arc::clone(&self.events),
            slot_number,
            op_name: self.op_name,
        })
    }
}

/// Drive lock that announces its own release.
pub struct ScopedDriveLock {
    _guard: LockGuard,
    events: Arc<EventHub>,
    slot_number: u32,
    op_name: &'static str,
}

impl Drop for ScopedDriveLock {
    fn drop(&mut self) {
        self.events.emit(LibraryEvent::DriveChanged {
            slot_number: self.slot_number,
            operation: format!("Unlocked after {}", self.op_name),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_helpers() {
        assert!(OperationOutcome::succeeded("ok").is_success());
        assert!(OperationOutcome::no_action("nothing to do").is_success());
        assert!(!OperationOutcome::failed("boom").is_success());

        let busy = OperationOutcome::busy(LibraryOperationStatus::DriveBusy, "drive 1 busy");
        assert_eq!(busy.wait_before_next_operation, Some(BUSY_RETRY_WAIT_SECS));

        let paced = OperationOutcome::succeeded("ok").with_wait(5);
        assert_eq!(paced.wait_before_next_operation, Some(5));
    }
}
