//! Windows LTFS procedures: the `LtfsCmd*` wrapper tools.
//!
//! On Windows a drive must be bound to a drive letter (`LtfsCmdAssign`)
//! before the volume can be loaded; letters are handed out from Z
//! downwards. All drive state comes from `LtfsCmdDrives`, which the
//! procedures re-query after anything that may have changed it.

use super::{run_ltfsck, LtfsProcedures};
use crate::engine::{OpContext, OperationOutcome};
use crate::library::Platform;
use crate::model::{Drive, LibraryOperationStatus, LtfsStatus};
use crate::parse::parse_windows_drives;
use async_trait::async_trait;
use std::time::Duration;

/// Settle time after assigning a drive letter.
const ASSIGN_SETTLE_WAIT: Duration = Duration::from_secs(5);

/// Pause between `MEDIA_NOT_READY` polls.
const READY_POLL_WAIT: Duration = Duration::from_secs(10);

/// Give up waiting for a drive to become ready after this many polls.
const MAX_READY_POLLS: u32 = 18;

/// Lowest letter ever handed to a tape drive; C/D stay with the system.
const LOWEST_LETTER: char = 'E';

/// LTFS procedures over the Windows tool stack.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsLtfs;

impl WindowsLtfs {
    /// Create the strategy.
    pub fn new() -> Self {
        Self
    }

    /// Re-read `LtfsCmdDrives` into the model.
    async fn refresh_drives(&self, cx: &OpContext) -> Result<(), OperationOutcome> {
        match cx
            .run_tool_capture(cx.settings.ltfs_tool("LtfsCmdDrives"), &[])
            .await
        {
            Ok((outcome, output)) if outcome.success() => {
                cx.state.apply_windows_rows(&parse_windows_drives(&output));
                Ok(())
            }
            Ok((outcome, _)) => Err(OperationOutcome::failed(format!(
                "LtfsCmdDrives failed with exit code {}: {}",
                outcome.exit_code, outcome.last_message
            ))),
            Err(err) => Err(OperationOutcome::failed(err.to_string())),
        }
    }

    /// Bind the next free drive letter (Z downwards) to the drive.
    async fn assign_letter(&self, cx: &OpContext, drive_slot: u32) -> OperationOutcome {
        if let Err(outcome) = self.refresh_drives(cx).await {
            return outcome;
        }
        let used: Vec<char> = cx
            .state
            .snapshot_drives()
            .iter()
            .filter_map(|drive| drive.mount_point.as_ref())
            .filter_map(|mount_point| mount_point.chars().next())
            .map(|letter| letter.to_ascii_uppercase())
            .collect();
        let Some(letter) = (LOWEST_LETTER as u8..=b'Z')
            .rev()
            .map(char::from)
            .find(|candidate| !used.contains(candidate))
        else {
            return OperationOutcome::failed("no drive letter available for assignment");
        };

        let Some(drive) = cx.state.drive(drive_slot) else {
            return OperationOutcome::new(
                LibraryOperationStatus::DriveNotFound,
                format!("drive {drive_slot} is not configured"),
            );
        };
        let mount_point = format!("{letter}:");
        cx.log(format!("assigning {mount_point} to drive {drive_slot}"));
        match cx
            .run_tool(
                cx.settings.ltfs_tool("LtfsCmdAssign"),
                &[&mount_point, &drive.address],
            )
            .await
        {
            Ok(exec) if exec.success() => {
                cx.state
                    .with_drive(drive_slot, |drive| drive.assign(&mount_point));
                OperationOutcome::succeeded(format!("assigned {mount_point}"))
            }
            Ok(exec) => OperationOutcome::failed(exec.last_message),
            Err(err) => OperationOutcome::failed(err.to_string()),
        }
    }

    fn mount_point(&self, cx: &OpContext, drive_slot: u32) -> Option<String> {
        cx.state.drive(drive_slot)?.mount_point
    }
}

#[async_trait]
impl LtfsProcedures for WindowsLtfs {
    fn platform(&self) -> Platform {
        Platform::Windows
    }

    fn device_argument(&self, drive: &Drive) -> Option<String> {
        Some(drive.address.clone())
    }

    async fn drive_info(&self, _cx: &OpContext, _drive_slot: u32) -> Option<(u64, u64)> {
        // The Windows stack exposes no capacity query through the
        // LtfsCmd wrappers; capacity stays with the volume snapshot.
        None
    }

    async fn mount(&self, cx: &OpContext, drive_slot: u32) -> OperationOutcome {
        let Some(mount_point) = self.mount_point(cx, drive_slot) else {
            return OperationOutcome::failed(format!(
                "drive {drive_slot} has no drive letter assigned"
            ));
        };
        match cx
            .run_tool_with_codes(cx.settings.ltfs_tool("LtfsCmdLoad"), &[&mount_point])
            .await
        {
            Ok((_, Some(LibraryOperationStatus::Ltfs60233E))) => {
                // Another session already changed the drive; accept the
                // new state when it amounts to loaded media.
                if let Err(outcome) = self.refresh_drives(cx).await {
                    return outcome;
                }
                let status = cx.state.drive(drive_slot).map(|drive| drive.status);
                match status {
                    Some(
                        LtfsStatus::LtfsMedia
                        | LtfsStatus::LtfsInconsistent
                        | LtfsStatus::LtfsUnformatted
                        | LtfsStatus::MediaNotReady,
                    ) => OperationOutcome::succeeded(
                        "drive state changed by another session; volume is present",
                    ),
                    _ => OperationOutcome::new(
                        LibraryOperationStatus::Ltfs60233E,
                        "drive state changed by another session",
                    ),
                }
            }
            Ok((exec, code)) => {
                let ok = exec.success() && code.is_none_or(|code| code.is_success());
                if ok {
                    OperationOutcome::new(
                        code.unwrap_or(LibraryOperationStatus::Succeeded),
                        exec.last_message,
                    )
                } else {
                    OperationOutcome::new(
                        code.unwrap_or(LibraryOperationStatus::Failed),
                        exec.last_message,
                    )
                }
            }
            Err(err) => OperationOutcome::failed(err.to_string()),
        }
    }

    async fn unmount(&self, cx: &OpContext, drive_slot: u32) -> OperationOutcome {
        let Some(mount_point) = self.mount_point(cx, drive_slot) else {
            return OperationOutcome::no_action(format!(
                "drive {drive_slot} has no drive letter assigned"
            ));
        };
        match cx
            .run_tool_with_codes(cx.settings.ltfs_tool("LtfsCmdEject"), &[&mount_point])
            .await
        {
            Ok((_, Some(LibraryOperationStatus::Ltfs60233E))) => {
                if let Err(outcome) = self.refresh_drives(cx).await {
                    return outcome;
                }
                match cx.state.drive(drive_slot).map(|drive| drive.status) {
                    Some(LtfsStatus::NoMedia) => OperationOutcome::succeeded(
                        "drive already ejected by another session",
                    ),
                    _ => OperationOutcome::new(
                        LibraryOperationStatus::Ltfs60233E,
                        "drive state changed by another session",
                    ),
                }
            }
            Ok((_, Some(LibraryOperationStatus::Ltfs12035E))) => {
                if cx.settings.check_before_release {
                    cx.log("rewind failed; checking the volume before assuming release");
                    let device = cx
                        .state
                        .drive(drive_slot)
                        .and_then(|drive| self.device_argument(&drive))
                        .unwrap_or_default();
                    let check = run_ltfsck(cx, &device).await;
                    cx.log(format!("ltfsck after failed rewind: {}", check.status));
                }
                cx.state.with_drive(drive_slot, |drive| drive.release());
                OperationOutcome::succeeded(
                    "rewind failed while ejecting; the drive or the tape may be damaged, eject can proceed",
                )
            }
            Ok((exec, code)) => {
                let ok = exec.success() && code.is_none_or(|code| code.is_success());
                if ok {
                    cx.state.with_drive(drive_slot, |drive| drive.release());
                    OperationOutcome::new(
                        code.unwrap_or(LibraryOperationStatus::Ltfs11034I),
                        "volume ejected",
                    )
                } else {
                    OperationOutcome::new(
                        code.unwrap_or(LibraryOperationStatus::Failed),
                        exec.last_message,
                    )
                }
            }
            Err(err) => OperationOutcome::failed(err.to_string()),
        }
    }

    async fn mount_with_recovery(&self, cx: &OpContext, drive_slot: u32) -> OperationOutcome {
        if let Err(outcome) = self.refresh_drives(cx).await {
            return outcome;
        }

        if !cx
            .state
            .drive(drive_slot)
            .is_some_and(|drive| drive.is_assigned())
        {
            let assigned = self.assign_letter(cx, drive_slot).await;
            if !assigned.is_success() {
                return assigned;
            }
            if !cx.pause(ASSIGN_SETTLE_WAIT).await {
                return OperationOutcome::failed("operation cancelled");
            }
            if let Err(outcome) = self.refresh_drives(cx).await {
                return outcome;
            }
        }

        let mut polls = 0;
        while cx
            .state
            .drive(drive_slot)
            .is_some_and(|drive| drive.status == LtfsStatus::MediaNotReady)
        {
            if polls >= MAX_READY_POLLS {
                return OperationOutcome::failed("drive did not become ready");
            }
            polls += 1;
            cx.log(format!(
                "drive {drive_slot} not ready; polling again ({polls}/{MAX_READY_POLLS})"
            ));
            if !cx.pause(READY_POLL_WAIT).await {
                return OperationOutcome::failed("operation cancelled");
            }
            if let Err(outcome) = self.refresh_drives(cx).await {
                return outcome;
            }
        }

        let Some(drive) = cx.state.drive(drive_slot) else {
            return OperationOutcome::new(
                LibraryOperationStatus::DriveNotFound,
                format!("drive {drive_slot} is not configured"),
            );
        };
        let outcome = match drive.status {
            LtfsStatus::LtfsInconsistent => {
                let device = self.device_argument(&drive).unwrap_or_default();
                let check = run_ltfsck(cx, &device).await;
                if check.status == LibraryOperationStatus::Ltfs16022I {
                    self.verify_media(cx, drive_slot).await
                } else {
                    check
                }
            }
            LtfsStatus::LtfsUnformatted => OperationOutcome::new(
                LibraryOperationStatus::Ltfs17168E,
                "The tape is not formatted",
            ),
            LtfsStatus::NoMedia if drive.is_full() => self.mount(cx, drive_slot).await,
            _ => OperationOutcome::succeeded("volume available"),
        };

        self.handle_common_status(cx, drive_slot, outcome).await
    }

    async fn verify_media(&self, cx: &OpContext, drive_slot: u32) -> OperationOutcome {
        if let Err(outcome) = cx.refresh(true).await {
            return outcome;
        }
        if let Err(outcome) = self.refresh_drives(cx).await {
            return outcome;
        }
        let Some(drive) = cx.state.drive(drive_slot) else {
            return OperationOutcome::new(
                LibraryOperationStatus::DriveNotFound,
                format!("drive {drive_slot} is not configured"),
            );
        };
        if !drive.is_full() {
            return OperationOutcome::new(
                LibraryOperationStatus::Ltfs12016E,
                "no medium in the drive",
            );
        }
        match drive.status {
            LtfsStatus::LtfsMedia => {
                OperationOutcome::new(LibraryOperationStatus::Ltfs11031I, "volume mounted")
            }
            LtfsStatus::LtfsUnformatted => OperationOutcome::new(
                LibraryOperationStatus::Ltfs17168E,
                "The tape is not formatted",
            ),
            LtfsStatus::LtfsInconsistent => OperationOutcome::new(
                LibraryOperationStatus::Ltfs16021E,
                "The tape is inconsistent",
            ),
            _ => OperationOutcome::succeeded("drive state verified"),
        }
    }

    async fn after_unload(&self, cx: &OpContext, drive_slot: u32) -> OperationOutcome {
        let Some(mount_point) = self.mount_point(cx, drive_slot) else {
            return OperationOutcome::succeeded("no drive letter to unassign");
        };
        match cx
            .run_tool(cx.settings.ltfs_tool("LtfsCmdUnassign"), &[&mount_point])
            .await
        {
            Ok(exec) if exec.success() => {
                cx.state.with_drive(drive_slot, |drive| drive.unassign());
                if let Err(outcome) = self.refresh_drives(cx).await {
                    return outcome;
                }
                OperationOutcome::succeeded(format!("unassigned {mount_point}"))
            }
            Ok(exec) => OperationOutcome::failed(exec.last_message),
            Err(err) => OperationOutcome::failed(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::test_windows_context;
    use crate::process::ScriptedRunner;
    use std::sync::Arc;

    fn drives_row(letter: &str, status: &str) -> String {
        format!("{letter:<7} 1.0.0.0   10WT012345  {status}")
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_with_recovery_assigns_letter_first() {
        let runner = Arc::new(ScriptedRunner::new());
        // Unassigned at first, letter appears after LtfsCmdAssign.
        runner.respond("LtfsCmdDrives", 0, &[&drives_row("", "MEDIA_NOT_READY")]);
        runner.respond("LtfsCmdDrives", 0, &[&drives_row("", "MEDIA_NOT_READY")]);
        runner.respond("LtfsCmdAssign Z: 1.0.0.0", 0, &["Assigned"]);
        runner.respond("LtfsCmdDrives", 0, &[&drives_row("Z", "MEDIA_NOT_READY")]);
        runner.respond_always("LtfsCmdDrives", 0, &[&drives_row("Z", "LTFS_MEDIA")]);

        let cx = test_windows_context(Arc::clone(&runner)).await;
        let outcome = WindowsLtfs::new().mount_with_recovery(&cx, 1).await;

        assert!(outcome.is_success(), "outcome was {outcome:?}");
        assert_eq!(
            outcome.status,
            LibraryOperationStatus::Ltfs11031I,
            "media-present drive reports a mounted volume"
        );
        let drive = cx.state.drive(1).unwrap();
        assert_eq!(drive.mount_point.as_deref(), Some("Z:"));
        assert_eq!(drive.status, LtfsStatus::LtfsMedia);
        assert_eq!(runner.call_count("LtfsCmdAssign"), 1);
    }

    #[tokio::test]
    async fn test_mount_accepts_state_stolen_by_other_session() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond(
            "LtfsCmdLoad",
            1,
            &["LTFS60233E Drive state changed by another session"],
        );
        runner.respond("LtfsCmdDrives", 0, &[&drives_row("Z", "LTFS_MEDIA")]);

        let cx = test_windows_context(Arc::clone(&runner)).await;
        cx.state.with_drive(1, |drive| drive.assign("Z:"));

        let outcome = WindowsLtfs::new().mount(&cx, 1).await;
        assert_eq!(outcome.status, LibraryOperationStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_eject_with_no_media_after_steal_is_success() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond(
            "LtfsCmdEject",
            1,
            &["LTFS60233E Drive state changed by another session"],
        );
        runner.respond("LtfsCmdDrives", 0, &[&drives_row("Z", "NO_MEDIA")]);

        let cx = test_windows_context(Arc::clone(&runner)).await;
        cx.state.with_drive(1, |drive| drive.assign("Z:"));

        let outcome = WindowsLtfs::new().unmount(&cx, 1).await;
        assert_eq!(outcome.status, LibraryOperationStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_unformatted_drive_reports_ltfs17168e() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond_always("LtfsCmdDrives", 0, &[&drives_row("Z", "LTFS_UNFORMATTED")]);

        let cx = test_windows_context(Arc::clone(&runner)).await;
        cx.state.with_drive(1, |drive| drive.assign("Z:"));

        let outcome = WindowsLtfs::new().mount_with_recovery(&cx, 1).await;
        assert_eq!(outcome.status, LibraryOperationStatus::Ltfs17168E);
        assert_eq!(
            cx.state.drive(1).unwrap().status,
            LtfsStatus::LtfsUnformatted
        );
    }

    #[tokio::test]
    async fn test_after_unload_unassigns_letter() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("LtfsCmdUnassign Z:", 0, &["Unassigned"]);
        runner.respond("LtfsCmdDrives", 0, &[&drives_row("", "NO_MEDIA")]);

        let cx = test_windows_context(Arc::clone(&runner)).await;
        cx.state.with_drive(1, |drive| drive.assign("Z:"));

        let outcome = WindowsLtfs::new().after_unload(&cx, 1).await;
        assert!(outcome.is_success());
        assert!(cx.state.drive(1).unwrap().mount_point.is_none());
    }
}
