//! The Library Control Engine.
//!
//! [`Engine`] is the facade everything outside this crate talks to: it
//! owns the model, the collector, the operation map and the single-flight
//! table, and wraps every public operation in the same scheduler:
//!
//! 1. Reject with `DriveBusy` when an operation is already in flight for
//!    the same drive (finished flights are harvested first).
//! 2. Register a fresh `Ongoing` operation and persist it best-effort.
//! 3. Run the playbook as a background task whose continuation writes the
//!    final status back and persists it best-effort.
//! 4. Race the task against a 15 s window: the caller gets either the
//!    final result or an `Ongoing` snapshot to poll by trace id.
//!
//! A caller that goes away does not cancel its operation; the task keeps
//! running and the operation stays pollable.

mod context;
mod operations;
mod playbooks;
#[cfg(test)]
pub(crate) mod testing;

pub use context::{OpContext, OperationOutcome, ScopedDriveLock, BUSY_RETRY_WAIT_SECS};
pub use operations::{OperationCell, OperationsMap, OPERATION_RETENTION_MINUTES};

use crate::config::{ConfigFile, LibrarySettings};
use crate::events::{EventHub, TracingEventSink};
use crate::library::{LibraryState, Platform, StatusCollector};
use crate::lock::{InProcessLocker, Locker};
use crate::ltfs::{platform_procedures, LtfsProcedures};
use crate::model::{Drive, LibraryOperationStatus, Media, Operation, StorageSlot};
use crate::process::{CommandRunner, TokioRunner};
use crate::repo::{NullRepository, OperationRepository};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use serde::Serialize;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

/// How long the scheduler waits for an early result before handing the
/// caller an `Ongoing` snapshot.
pub const REPLY_RACE_WINDOW: Duration = Duration::from_secs(15);

/// Key of the single-flight table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FlightKey {
    /// Operations owning one drive.
    Drive(u32),
    /// Operations owning the whole library (transfer, release).
    Library,
}

/// Combined drives-and-slots snapshot returned by `/library/data`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LibrarySnapshot {
    /// All configured drives.
    pub drives: Vec<Drive>,
    /// All known storage slots.
    pub slots: Vec<StorageSlot>,
}

/// Pluggable collaborators of the engine.
pub struct EngineDeps {
    /// Subprocess seam.
    pub runner: Arc<dyn CommandRunner>,
    /// Distributed-lock provider.
    pub locker: Arc<dyn Locker>,
    /// Operation history store.
    pub repo: Arc<dyn OperationRepository>,
    /// Event sinks.
    pub events: EventHub,
    /// Platform selection.
    pub platform: Platform,
}

impl Default for EngineDeps {
    fn default() -> Self {
        let mut events = EventHub::new();
        events.add_sink(Arc::new(TracingEventSink));
        Self {
            runner: Arc::new(TokioRunner::new()),
            locker: Arc::new(InProcessLocker::new()),
            repo: Arc::new(NullRepository),
            events,
            platform: Platform::current(),
        }
    }
}

/// The Library Control Engine.
pub struct Engine {
    state: Arc<LibraryState>,
    collector: Arc<StatusCollector>,
    runner: Arc<dyn CommandRunner>,
    locker: Arc<dyn Locker>,
    repo: Arc<dyn OperationRepository>,
    events: Arc<EventHub>,
    procedures: Arc<dyn LtfsProcedures>,
    settings: LibrarySettings,
    operations: OperationsMap,
    flights: DashMap<FlightKey, Arc<OperationCell>>,
    shutdown: CancellationToken,
}

impl Engine {
    /// Build an engine from configuration and collaborators.
    pub fn new(config: &ConfigFile, deps: EngineDeps) -> Arc<Self> {
        let state = Arc::new(LibraryState::new(&config.drives));
        let collector = Arc::new(StatusCollector::new(
            Arc::clone(&state),
            Arc::clone(&deps.runner),
            config.library.clone(),
            deps.platform,
        ));
        Arc::new(Self {
            state,
            collector,
            runner: deps.runner,
            locker: deps.locker,
            repo: deps.repo,
            events: Arc::new(deps.events),
            procedures: platform_procedures(deps.platform),
            settings: config.library.clone(),
            operations: OperationsMap::new(),
            flights: DashMap::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Build an engine with the production collaborators.
    pub fn with_defaults(config: &ConfigFile) -> Arc<Self> {
        Self::new(config, EngineDeps::default())
    }

    /// Initialize the library; true when it is ready for operations.
    pub async fn verify(&self) -> bool {
        match self.collector.initialize(&self.shutdown).await {
            Ok(()) => true,
            Err(err) => {
                warn!("library initialization failed: {err}");
                false
            }
        }
    }

    /// Drives-and-slots snapshot, refreshed best-effort.
    pub async fn data(&self, force: bool) -> LibrarySnapshot {
        self.try_refresh(force).await;
        LibrarySnapshot {
            drives: self.state.snapshot_drives(),
            slots: self.state.snapshot_slots(),
        }
    }

    /// Drive snapshot, refreshed best-effort.
    pub async fn drives(&self, force: bool) -> Vec<Drive> {
        self.try_refresh(force).await;
        self.state.snapshot_drives()
    }

    /// Storage slot snapshot, refreshed best-effort.
    pub async fn slots(&self, force: bool) -> Vec<StorageSlot> {
        self.try_refresh(force).await;
        self.state.snapshot_slots()
    }

    /// Cartridge snapshot, refreshed best-effort.
    pub async fn tapes(&self, force: bool) -> Vec<Media> {
        self.try_refresh(force).await;
        self.state.snapshot_media()
    }

    /// Poll an operation by trace id, optionally filtering its log to
    /// entries after `logs_since` (milliseconds since the Unix epoch).
    pub fn operation(&self, trace_id: Uuid, logs_since: Option<i64>) -> Option<Operation> {
        let cell = self.operations.get(trace_id)?;
        let snapshot = cell.snapshot();
        Some(match logs_since {
            Some(since) => snapshot.with_logs_since(since),
            None => snapshot,
        })
    }

    /// Load a cartridge into a drive and mount it.
    pub async fn load(&self, volume_tag: &str, drive_slot: u32) -> Operation {
        let tag = volume_tag.to_string();
        self.schedule(FlightKey::Drive(drive_slot), "Load", move |cx| {
            playbooks::load(cx, tag, drive_slot)
        })
        .await
    }

    /// Unmount and eject the cartridge in a drive.
    pub async fn unload(&self, drive_slot: u32) -> Operation {
        self.schedule(FlightKey::Drive(drive_slot), "Unload", move |cx| {
            playbooks::unload(cx, drive_slot)
        })
        .await
    }

    /// Mount the volume already in a drive.
    pub async fn mount(&self, drive_slot: u32) -> Operation {
        self.schedule(FlightKey::Drive(drive_slot), "Mount", move |cx| {
            playbooks::mount(cx, drive_slot)
        })
        .await
    }

    /// Unmount the volume in a drive without ejecting.
    pub async fn unmount(&self, drive_slot: u32) -> Operation {
        self.schedule(FlightKey::Drive(drive_slot), "Unmount", move |cx| {
            playbooks::unmount(cx, drive_slot)
        })
        .await
    }

    /// Format the cartridge in a drive with `mkltfs`.
    pub async fn format(&self, drive_slot: u32, force: bool) -> Operation {
        self.schedule(FlightKey::Drive(drive_slot), "Format", move |cx| {
            playbooks::format(cx, drive_slot, force)
        })
        .await
    }

    /// Check the cartridge in a drive with `ltfsck`.
    pub async fn ltfsck(&self, drive_slot: u32) -> Operation {
        self.schedule(FlightKey::Drive(drive_slot), "Ltfsck", move |cx| {
            playbooks::ltfsck(cx, drive_slot)
        })
        .await
    }

    /// Move a cartridge between storage slots.
    pub async fn transfer(&self, volume_tag: &str, target_slot: u32) -> Operation {
        let tag = volume_tag.to_string();
        self.schedule(FlightKey::Library, "Transfer", move |cx| {
            playbooks::transfer(cx, tag, target_slot)
        })
        .await
    }

    /// Unmount and unload every full drive.
    pub async fn release(&self) -> Operation {
        self.schedule(FlightKey::Library, "Release", playbooks::release)
            .await
    }

    /// Run `release` to completion; used at service shutdown.
    pub async fn release_and_wait(&self) -> Operation {
        let operation = self.release().await;
        match self.operations.get(operation.trace_id) {
            Some(cell) => {
                cell.wait_done().await;
                cell.snapshot()
            }
            None => operation,
        }
    }

    async fn try_refresh(&self, force: bool) {
        if let Err(err) = self.collector.collect_status(force, &self.shutdown).await {
            warn!("status refresh failed: {err}");
        }
    }

    fn context(&self, op_name: &'static str, cell: &Arc<OperationCell>) -> OpContext {
        OpContext {
            trace_id: cell.trace_id(),
            op_name,
            cancel: self.shutdown.child_token(),
            state: Arc::clone(&self.state),
            collector: Arc::clone(&self.collector),
            runner: Arc::clone(&self.runner),
            locker: Arc::clone(&self.locker),
            events: Arc::clone(&self.events),
            procedures: Arc::clone(&self.procedures),
            settings: self.settings.clone(),
            cell: Arc::clone(cell),
        }
    }

    /// The scheduler wrapper around every public operation.
    async fn schedule<F, Fut>(&self, key: FlightKey, op_name: &'static str, body: F) -> Operation
    where
        F: FnOnce(OpContext) -> Fut,
        Fut: Future<Output = OperationOutcome> + Send + 'static,
    {
        let cell = Arc::new(OperationCell::new(Operation::new()));

        match self.flights.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_finished() {
                    occupied.insert(Arc::clone(&cell));
                } else {
                    let status = match key {
                        FlightKey::Drive(_) => LibraryOperationStatus::DriveBusy,
                        FlightKey::Library => LibraryOperationStatus::MtxBusy,
                    };
                    let message = match key {
                        FlightKey::Drive(slot) => {
                            format!("an operation is already running for drive {slot}")
                        }
                        FlightKey::Library => {
                            "a library-wide operation is already running".to_string()
                        }
                    };
                    let rejected = Arc::new(OperationCell::new(Operation::rejected(
                        status,
                        message,
                        Some(BUSY_RETRY_WAIT_SECS),
                    )));
                    self.operations.register(Arc::clone(&rejected));
                    return rejected.snapshot();
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&cell));
            }
        }

        self.operations.register(Arc::clone(&cell));
        if let Err(err) = self.repo.add(&cell.snapshot()).await {
            warn!("operation repository add failed: {err}");
        }

        let cx = self.context(op_name, &cell);
        let future = body(cx);
        let repo = Arc::clone(&self.repo);
        let task_cell = Arc::clone(&cell);
        tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => OperationOutcome::failed("operation panicked"),
            };
            task_cell.complete(&outcome);
            if let Err(err) = repo.update_or_add(&task_cell.snapshot()).await {
                warn!("operation repository update failed: {err}");
            }
        });

        let _ = tokio::time::timeout(REPLY_RACE_WINDOW, cell.wait_done()).await;
        cell.snapshot()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("operations", &self.operations.len())
            .field("flights", &self.flights.len())
            .finish_non_exhaustive()
    }
}
