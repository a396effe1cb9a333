//! LTFS procedure layer.
//!
//! Mounting, unmounting, formatting and checking a cartridge are
//! multi-step, failure-prone procedures that differ between the Linux
//! tools (`ltfs`, `umount`, `df`) and the Windows `LtfsCmd*` wrappers.
//! Each platform is a strategy object implementing [`LtfsProcedures`];
//! the orchestrator never cares which one it holds. The central
//! status-to-state reconciliation is shared as a default method so both
//! platforms apply the same recovery policy.

mod linux;
mod windows;

pub use linux::LinuxLtfs;
pub use windows::WindowsLtfs;

use crate::engine::{OpContext, OperationOutcome};
use crate::events::LibraryEvent;
use crate::library::Platform;
use crate::model::{Drive, LibraryOperationStatus, LtfsStatus};
use async_trait::async_trait;

/// Platform-specific LTFS procedures.
///
/// Implementations drive the external tools through the context's
/// subprocess seam and keep the drive model in step with what the tools
/// report.
#[async_trait]
pub trait LtfsProcedures: Send + Sync {
    /// Which platform stack this strategy drives.
    fn platform(&self) -> Platform;

    /// The device argument handed to `ltfsck`/`mkltfs` for this drive.
    fn device_argument(&self, drive: &Drive) -> Option<String>;

    /// Capacity and free bytes of the mounted volume, when obtainable.
    async fn drive_info(&self, cx: &OpContext, drive_slot: u32) -> Option<(u64, u64)>;

    /// Mount the LTFS volume in the drive.
    async fn mount(&self, cx: &OpContext, drive_slot: u32) -> OperationOutcome;

    /// Unmount the volume and release the tape device.
    async fn unmount(&self, cx: &OpContext, drive_slot: u32) -> OperationOutcome;

    /// Mount with the inconsistency-recovery playbook (`ltfsck` and
    /// retry), ending in [`LtfsProcedures::handle_common_status`].
    async fn mount_with_recovery(&self, cx: &OpContext, drive_slot: u32) -> OperationOutcome;

    /// Re-query real state and reconcile the drive model, returning an
    /// outcome describing what the drive actually holds.
    async fn verify_media(&self, cx: &OpContext, drive_slot: u32) -> OperationOutcome;

    /// Run `ltfsck` against the drive; on a consistent volume
    /// (`LTFS16022I`) verify, otherwise return the raw status.
    async fn check(&self, cx: &OpContext, drive_slot: u32) -> OperationOutcome {
        let Some(drive) = cx.state.drive(drive_slot) else {
            return OperationOutcome::new(
                LibraryOperationStatus::DriveNotFound,
                format!("drive {drive_slot} is not configured"),
            );
        };
        let Some(device) = self.device_argument(&drive) else {
            return OperationOutcome::failed(format!(
                "no device resolved for drive {drive_slot}"
            ));
        };

        let result = run_ltfsck(cx, &device).await;
        if result.status == LibraryOperationStatus::Ltfs16022I {
            let _ = self.verify_media(cx, drive_slot).await;
        }
        result
    }

    /// Hook run after a successful unmount-then-unload sequence.
    ///
    /// Windows unbinds the drive letter here; Linux needs nothing.
    async fn after_unload(&self, _cx: &OpContext, _drive_slot: u32) -> OperationOutcome {
        OperationOutcome::succeeded("")
    }

    /// The central status reconciler shared by both platforms.
    ///
    /// Interprets a procedure outcome, updates the drive model per the
    /// recovery policy and produces what the caller reports.
    async fn handle_common_status(
        &self,
        cx: &OpContext,
        drive_slot: u32,
        outcome: OperationOutcome,
    ) -> OperationOutcome {
        use LibraryOperationStatus as Status;

        match outcome.status {
            Status::Ltfs11331E | Status::Ltfs11006E | Status::Ltfs12019E => {
                cx.state.with_drive(drive_slot, |drive| {
                    if let Some(tag) = drive.volume_tag().map(str::to_string) {
                        drive.mark_failed(&tag);
                    }
                    drive.set_status(LtfsStatus::NoMedia);
                });
                cx.emit(LibraryEvent::DriveChanged {
                    slot_number: drive_slot,
                    operation: "Failure".to_string(),
                });
                OperationOutcome::new(outcome.status, "The drive or the tape is damaged")
            }
            Status::Ltfs17168E => {
                cx.state.with_drive(drive_slot, |drive| {
                    drive.set_status(LtfsStatus::LtfsUnformatted);
                });
                OperationOutcome::new(outcome.status, "The tape is not formatted")
            }
            Status::Ltfs11095E => {
                cx.state.with_drive(drive_slot, |drive| {
                    drive.set_status(LtfsStatus::WriteProtected);
                });
                OperationOutcome::new(outcome.status, "The tape is write-protected")
            }
            Status::Ltfs16021E | Status::Ltfs16087E => {
                cx.state.with_drive(drive_slot, |drive| {
                    drive.set_status(LtfsStatus::LtfsInconsistent);
                });
                OperationOutcome::new(outcome.status, "The tape is inconsistent")
            }
            Status::Ltfs15024I | Status::Ltfs11031I => {
                cx.state.with_drive(drive_slot, |drive| {
                    drive.set_status(LtfsStatus::LtfsMedia);
                });
                if let Some((capacity, free)) = self.drive_info(cx, drive_slot).await {
                    cx.state.set_drive_capacity(drive_slot, capacity, free);
                }
                cx.emit(LibraryEvent::DriveChanged {
                    slot_number: drive_slot,
                    operation: "Mount".to_string(),
                });
                outcome
            }
            _ => {
                let current = cx.state.drive(drive_slot).map(|drive| drive.status);
                match current {
                    Some(LtfsStatus::LtfsUnformatted) => OperationOutcome::new(
                        Status::Ltfs17168E,
                        "The tape is not formatted",
                    ),
                    Some(LtfsStatus::LtfsMedia) => {
                        if let Some((capacity, free)) = self.drive_info(cx, drive_slot).await {
                            cx.state.set_drive_capacity(drive_slot, capacity, free);
                        }
                        cx.emit(LibraryEvent::DriveChanged {
                            slot_number: drive_slot,
                            operation: "Mount".to_string(),
                        });
                        OperationOutcome::new(Status::Ltfs11031I, outcome.message)
                    }
                    _ => outcome,
                }
            }
        }
    }
}

/// Run `ltfsck` against a device and fold its output into an outcome.
pub(crate) async fn run_ltfsck(cx: &OpContext, device: &str) -> OperationOutcome {
    match cx
        .run_tool_with_codes(cx.settings.ltfs_tool("ltfsck"), &[device])
        .await
    {
        Ok((exec, Some(status))) => OperationOutcome::new(status, exec.last_message),
        Ok((exec, None)) if exec.success() => OperationOutcome::succeeded(exec.last_message),
        Ok((exec, None)) => OperationOutcome::failed(exec.last_message),
        Err(err) => OperationOutcome::failed(err.to_string()),
    }
}

/// The platform strategy for the running binary.
pub fn platform_procedures(platform: Platform) -> std::sync::Arc<dyn LtfsProcedures> {
    match platform {
        Platform::Linux => std::sync::Arc::new(LinuxLtfs::new()),
        Platform::Windows => std::sync::Arc::new(WindowsLtfs::new()),
    }
}
