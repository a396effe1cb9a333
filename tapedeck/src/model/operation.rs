//! An orchestrated unit of work and its incremental log.

use super::status::LibraryOperationStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Advisory poll interval handed to clients with a fresh operation.
pub const WAIT_BEFORE_NEXT_TRACE_SECS: u64 = 30;

/// One timestamped line of an operation's log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogEntry {
    /// When the line was recorded.
    pub at: DateTime<Utc>,
    /// The line itself.
    pub message: String,
}

/// A unit of orchestrated work, addressable by trace id.
///
/// An operation starts `Ongoing` and moves to exactly one terminal status.
/// Identity (and equality) is the trace id; everything else is mutable
/// state the engine updates while the operation runs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Operation {
    /// Unique identifier callers poll by.
    pub trace_id: Uuid,
    /// Current status; `Ongoing` until the operation finishes.
    pub status: LibraryOperationStatus,
    /// Human-readable outcome or progress message.
    pub message: String,
    /// Append-only, timestamped log lines.
    pub logs: Vec<LogEntry>,
    /// When the operation was registered.
    pub started_at: DateTime<Utc>,
    /// When the operation reached a terminal status.
    pub ended_at: Option<DateTime<Utc>>,
    /// Advisory: seconds the caller should wait before issuing the next
    /// operation against the library.
    pub wait_before_next_operation: Option<u64>,
    /// Advisory: seconds the caller should wait between trace polls.
    pub wait_before_next_trace: Option<u64>,
}

impl Operation {
    /// Register a fresh operation in the `Ongoing` state.
    pub fn new() -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            status: LibraryOperationStatus::Ongoing,
            message: String::new(),
            logs: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
            wait_before_next_operation: None,
            wait_before_next_trace: Some(WAIT_BEFORE_NEXT_TRACE_SECS),
        }
    }

    /// Create an already-terminal operation (used for immediate rejections
    /// such as `DriveBusy`).
    pub fn rejected(
        status: LibraryOperationStatus,
        message: impl Into<String>,
        wait_before_next_operation: Option<u64>,
    ) -> Self {
        let mut op = Self::new();
        op.complete(status, message);
        op.wait_before_next_operation = wait_before_next_operation;
        op
    }

    /// Append a timestamped log line.
    pub fn append_log(&mut self, message: impl Into<String>) {
        self.logs.push(LogEntry {
            at: Utc::now(),
            message: message.into(),
        });
    }

    /// Move the operation to a terminal status.
    pub fn complete(&mut self, status: LibraryOperationStatus, message: impl Into<String>) {
        self.status = status;
        self.message = message.into();
        self.ended_at = Some(Utc::now());
    }

    /// Whether the operation has finished.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Copy of this operation with only the log lines recorded strictly
    /// after `since` (milliseconds since the Unix epoch). Lets pollers
    /// fetch incremental logs.
    pub fn with_logs_since(&self, since_millis: i64) -> Self {
        let mut copy = self.clone();
        copy.logs
            .retain(|entry| entry.at.timestamp_millis() > since_millis);
        copy
    }
}

impl Default for Operation {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Operation {
    fn eq(&self, other: &Self) -> bool {
        self.trace_id == other.trace_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_operation_is_ongoing() {
        let op = Operation::new();
        assert_eq!(op.status, LibraryOperationStatus::Ongoing);
        assert!(!op.is_terminal());
        assert_eq!(op.wait_before_next_trace, Some(WAIT_BEFORE_NEXT_TRACE_SECS));
        assert!(op.ended_at.is_none());
    }

    #[test]
    fn test_complete_sets_terminal_state() {
        let mut op = Operation::new();
        op.complete(LibraryOperationStatus::Succeeded, "done");

        assert!(op.is_terminal());
        assert_eq!(op.message, "done");
        assert!(op.ended_at.is_some());
    }

    #[test]
    fn test_equality_is_by_trace_id() {
        let a = Operation::new();
        let mut b = a.clone();
        b.complete(LibraryOperationStatus::Failed, "boom");
        assert_eq!(a, b);
        assert_ne!(a, Operation::new());
    }

    #[test]
    fn test_rejected_carries_advisory() {
        let op = Operation::rejected(LibraryOperationStatus::DriveBusy, "drive 1 busy", Some(15));
        assert_eq!(op.status, LibraryOperationStatus::DriveBusy);
        assert_eq!(op.wait_before_next_operation, Some(15));
        assert!(op.is_terminal());
    }

    #[test]
    fn test_logs_since_filters() {
        let mut op = Operation::new();
        op.append_log("first");
        let cutoff = op.logs[0].at.timestamp_millis();
        op.logs.push(LogEntry {
            at: op.logs[0].at + chrono::Duration::milliseconds(5),
            message: "second".into(),
        });

        let filtered = op.with_logs_since(cutoff);
        assert_eq!(filtered.logs.len(), 1);
        assert_eq!(filtered.logs[0].message, "second");
    }
}
