//! Live operation tracking: cells, the trace-id map and its GC.

use super::context::OperationOutcome;
use crate::model::Operation;
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use uuid::Uuid;

/// How long a finished operation stays pollable.
pub const OPERATION_RETENTION_MINUTES: i64 = 60;

/// A live operation: the snapshot under a mutex plus completion signalling.
///
/// The cell is shared between the background task running the body, the
/// scheduler racing for an early reply, and pollers reading snapshots.
#[derive(Debug)]
pub struct OperationCell {
    inner: Mutex<Operation>,
    finished: AtomicBool,
    notify: Notify,
}

impl OperationCell {
    /// Wrap a freshly registered operation.
    pub fn new(operation: Operation) -> Self {
        let finished = operation.is_terminal();
        Self {
            inner: Mutex::new(operation),
            finished: AtomicBool::new(finished),
            notify: Notify::new(),
        }
    }

    /// Trace id of the operation.
    pub fn trace_id(&self) -> Uuid {
        self.inner.lock().unwrap().trace_id
    }

    /// By-value snapshot of the current state.
    pub fn snapshot(&self) -> Operation {
        self.inner.lock().unwrap().clone()
    }

    /// Append a log line.
    pub fn append_log(&self, message: &str) {
        self.inner.lock().unwrap().append_log(message);
    }

    /// Write the final outcome and wake every waiter.
    ///
    /// The operation keeps its identity; only status, message and the
    /// pacing advisory change.
    pub fn complete(&self, outcome: &OperationOutcome) {
        {
            let mut operation = self.inner.lock().unwrap();
            operation.complete(outcome.status, outcome.message.clone());
            operation.wait_before_next_operation = outcome.wait_before_next_operation;
        }
        self.finished.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Whether the operation reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Wait until the operation completes.
    pub async fn wait_done(&self) {
        while !self.is_finished() {
            let notified = self.notify.notified();
            if self.is_finished() {
                break;
            }
            notified.await;
        }
    }
}

/// Process-wide map of operations keyed by trace id.
///
/// Terminal operations are garbage-collected on lookup once they are
/// older than [`OPERATION_RETENTION_MINUTES`].
#[derive(Debug, Default)]
pub struct OperationsMap {
    cells: DashMap<Uuid, Arc<OperationCell>>,
}

impl OperationsMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cell under its trace id.
    pub fn register(&self, cell: Arc<OperationCell>) {
        self.cells.insert(cell.trace_id(), cell);
    }

    /// Look up an operation, sweeping out expired terminal entries first.
    pub fn get(&self, trace_id: Uuid) -> Option<Arc<OperationCell>> {
        self.sweep();
        self.cells.get(&trace_id).map(|entry| Arc::clone(&entry))
    }

    /// Number of tracked operations.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether no operations are tracked.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    fn sweep(&self) {
        let cutoff = Utc::now() - ChronoDuration::minutes(OPERATION_RETENTION_MINUTES);
        self.cells.retain(|_, cell| {
            let snapshot = cell.snapshot();
            match snapshot.ended_at {
                Some(ended_at) => ended_at > cutoff,
                None => true,
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LibraryOperationStatus;

    #[test]
    fn test_cell_snapshot_and_complete() {
        let cell = OperationCell::new(Operation::new());
        assert!(!cell.is_finished());

        cell.append_log("working");
        cell.complete(&OperationOutcome::succeeded("done").with_wait(5));

        let snapshot = cell.snapshot();
        assert_eq!(snapshot.status, LibraryOperationStatus::Succeeded);
        assert_eq!(snapshot.message, "done");
        assert_eq!(snapshot.wait_before_next_operation, Some(5));
        assert_eq!(snapshot.logs.len(), 1);
        assert!(cell.is_finished());
    }

    #[tokio::test]
    async fn test_wait_done_wakes_on_completion() {
        let cell = Arc::new(OperationCell::new(Operation::new()));
        let waiter = Arc::clone(&cell);
        let handle = tokio::spawn(async move {
            waiter.wait_done().await;
            waiter.snapshot().status
        });

        tokio::task::yield_now().await;
        cell.complete(&OperationOutcome::failed("boom"));

        assert_eq!(handle.await.unwrap(), LibraryOperationStatus::Failed);
    }

    #[test]
    fn test_map_returns_registered_operation() {
        let map = OperationsMap::new();
        let cell = Arc::new(OperationCell::new(Operation::new()));
        let trace_id = cell.trace_id();
        map.register(Arc::clone(&cell));

        assert!(map.get(trace_id).is_some());
        assert!(map.get(Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_old_terminal_operations_are_swept() {
        let map = OperationsMap::new();

        let mut stale = Operation::new();
        stale.complete(LibraryOperationStatus::Succeeded, "old");
        stale.ended_at = Some(Utc::now() - ChronoDuration::minutes(OPERATION_RETENTION_MINUTES + 1));
        let stale_id = stale.trace_id;
        map.register(Arc::new(OperationCell::new(stale)));

        let fresh = Operation::new();
        let fresh_id = fresh.trace_id;
        map.register(Arc::new(OperationCell::new(fresh)));

        assert!(map.get(stale_id).is_none(), "expired terminal op is gone");
        assert!(map.get(fresh_id).is_some(), "ongoing op survives");
    }
}
