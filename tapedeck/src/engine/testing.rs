//! Shared fixtures for in-crate tests.
//!
//! Builds ready-to-use [`OpContext`] values over a scripted runner: one
//! configured drive (slot 1, address `1.0.0.0`) holding `000063L7` that
//! came from slot 10, with slots 10-12 known to the model.

use super::context::OpContext;
use super::operations::OperationCell;
use crate::config::{DriveSettings, LibrarySettings};
use crate::events::EventHub;
use crate::library::{LibraryState, Platform, StatusCollector};
use crate::lock::InProcessLocker;
use crate::ltfs::{LinuxLtfs, LtfsProcedures, WindowsLtfs};
use crate::model::Operation;
use crate::parse::parse_mtx_status;
use crate::process::ScriptedRunner;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const SCAN: &str = "\
Data Transfer Element 1:Full (Storage Element 10 Loaded):VolumeTag = 000063L7\n\
      Storage Element 10:Empty\n\
      Storage Element 11:Empty\n\
      Storage Element 12:Full :VolumeTag=000064L7\n";

fn seeded_state() -> Arc<LibraryState> {
    let state = Arc::new(LibraryState::new(&[DriveSettings {
        slot_number: 1,
        address: "1.0.0.0".to_string(),
        serial: Some("10WT012345".to_string()),
    }]));
    state.apply_elements(&parse_mtx_status(SCAN).unwrap(), true);
    state
}

fn context_over(
    runner: Arc<ScriptedRunner>,
    state: Arc<LibraryState>,
    settings: LibrarySettings,
    platform: Platform,
    procedures: Arc<dyn LtfsProcedures>,
) -> OpContext {
    let collector = Arc::new(StatusCollector::new(
        Arc::clone(&state),
        runner.clone(),
        settings.clone(),
        platform,
    ));
    OpContext {
        trace_id: uuid::Uuid::new_v4(),
        op_name: "Test",
        cancel: CancellationToken::new(),
        state,
        collector,
        runner,
        locker: Arc::new(InProcessLocker::new()),
        events: Arc::new(EventHub::new()),
        procedures,
        settings,
        cell: Arc::new(OperationCell::new(Operation::new())),
    }
}

/// Linux context with `/dev/sg3` resolved for drive 1 and a temporary
/// mount point base.
pub(crate) async fn test_context(
    runner: Arc<ScriptedRunner>,
) -> (OpContext, tempfile::TempDir) {
    let tmp = tempfile::TempDir::new().unwrap();
    let state = seeded_state();
    state.set_changer_device("/dev/sg5");
    state.with_drive(1, |drive| drive.device_name = Some("/dev/sg3".to_string()));

    let mut settings = LibrarySettings::default();
    settings.mount_point = tmp.path().to_path_buf();

    let cx = context_over(
        runner,
        state,
        settings,
        Platform::Linux,
        Arc::new(LinuxLtfs::new()),
    );
    (cx, tmp)
}

/// Windows context with the `Changer0` device configured.
pub(crate) async fn test_windows_context(runner: Arc<ScriptedRunner>) -> OpContext {
    let state = seeded_state();
    state.set_changer_device("Changer0");

    context_over(
        runner,
        state,
        LibrarySettings::default(),
        Platform::Windows,
        Arc::new(WindowsLtfs::new()),
    )
}
