//! Linux LTFS procedures: `ltfs`, `umount` and `df`.

use super::{run_ltfsck, LtfsProcedures};
use crate::engine::{OpContext, OperationOutcome};
use crate::library::Platform;
use crate::model::{Drive, LibraryOperationStatus, LtfsStatus};
use crate::parse::{parse_df, LtfsMount};
use async_trait::async_trait;
use std::time::Duration;

/// Settle time before re-checking `df` after a failed `umount`.
const UNMOUNT_RECHECK_WAIT: Duration = Duration::from_secs(5);

/// Pause before running `ltfsck` on an inconsistent volume.
const INCONSISTENT_SETTLE_WAIT: Duration = Duration::from_secs(10);

/// Pause between a successful `ltfsck` and the mount retry.
const REMOUNT_WAIT: Duration = Duration::from_secs(5);

/// LTFS procedures over the Linux tool stack.
///
/// Mount state is always cross-checked against `df`, which makes mount
/// and unmount idempotent: a volume someone already mounted (or a mount
/// the kernel dropped behind our back) is detected instead of assumed.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxLtfs;

impl LinuxLtfs {
    /// Create the strategy.
    pub fn new() -> Self {
        Self
    }

    fn mount_dir(&self, cx: &OpContext, drive_slot: u32) -> String {
        format!("{}/drive{}", cx.settings.mount_point.display(), drive_slot)
    }

    /// Current `ltfs:` rows from `df`.
    async fn ltfs_mounts(&self, cx: &OpContext) -> Result<Vec<LtfsMount>, OperationOutcome> {
        match cx
            .run_tool_capture("df", &["-h", "--output=source,size,avail,target"])
            .await
        {
            Ok((outcome, output)) if outcome.success() => Ok(parse_df(&output)),
            Ok((outcome, _)) => Err(OperationOutcome::failed(format!(
                "df failed with exit code {}: {}",
                outcome.exit_code, outcome.last_message
            ))),
            Err(err) => Err(OperationOutcome::failed(err.to_string())),
        }
    }

    fn resolved_device(&self, cx: &OpContext, drive_slot: u32) -> Result<(Drive, String), OperationOutcome> {
        let Some(drive) = cx.state.drive(drive_slot) else {
            return Err(OperationOutcome::new(
                LibraryOperationStatus::DriveNotFound,
                format!("drive {drive_slot} is not configured"),
            ));
        };
        let Some(device) = drive.device_name.clone() else {
            return Err(OperationOutcome::failed(format!(
                "no device resolved for drive {drive_slot}"
            )));
        };
        Ok((drive, device))
    }
}

#[async_trait]
impl LtfsProcedures for LinuxLtfs {
    fn platform(&self) -> Platform {
        Platform::Linux
    }

    fn device_argument(&self, drive: &Drive) -> Option<String> {
        drive.device_name.clone()
    }

    async fn drive_info(&self, cx: &OpContext, drive_slot: u32) -> Option<(u64, u64)> {
        let device = cx.state.drive(drive_slot)?.device_name?;
        let mounts = self.ltfs_mounts(cx).await.ok()?;
        mounts
            .iter()
            .find(|mount| mount.device == device)
            .map(|mount| (mount.size, mount.avail))
    }

    async fn mount(&self, cx: &OpContext, drive_slot: u32) -> OperationOutcome {
        let (_, device) = match self.resolved_device(cx, drive_slot) {
            Ok(found) => found,
            Err(outcome) => return outcome,
        };
        let mount_dir = self.mount_dir(cx, drive_slot);
        if let Err(err) = tokio::fs::create_dir_all(&mount_dir).await {
            return OperationOutcome::failed(format!("cannot create {mount_dir}: {err}"));
        }

        match self.ltfs_mounts(cx).await {
            Ok(mounts) => {
                if let Some(mount) = mounts
                    .iter()
                    .find(|mount| mount.device == device && mount.target == mount_dir)
                {
                    cx.log(format!("{device} already mounted at {mount_dir}"));
                    cx.state.with_drive(drive_slot, |drive| {
                        drive.assign(&mount_dir);
                        drive.set_status(LtfsStatus::LtfsMedia);
                    });
                    cx.state
                        .set_drive_capacity(drive_slot, mount.size, mount.avail);
                    return OperationOutcome::new(
                        LibraryOperationStatus::Ltfs11031I,
                        "volume already mounted",
                    );
                }
            }
            Err(outcome) => cx.log(format!("mount pre-check skipped: {}", outcome.message)),
        }

        let devname = format!("devname={device}");
        let ltfs = cx.settings.ltfs_tool("ltfs");
        match cx
            .run_tool_with_codes(ltfs, &["-o", &devname, &mount_dir])
            .await
        {
            Ok((exec, code)) => {
                let ok = exec.success() && code.is_none_or(|code| code.is_success());
                if ok {
                    cx.state.with_drive(drive_slot, |drive| drive.assign(&mount_dir));
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
        let (drive, device) = match self.resolved_device(cx, drive_slot) {
            Ok(found) => found,
            Err(outcome) => return outcome,
        };

        // Unmount the filesystem when df still lists it.
        let target = match self.ltfs_mounts(cx).await {
            Ok(mounts) => mounts
                .iter()
                .find(|mount| mount.device == device)
                .map(|mount| mount.target.clone()),
            // df unavailable; trust the model.
            Err(_) => drive.mount_point.clone(),
        };
        if let Some(target) = target {
            match cx.run_tool("umount", &[&target]).await {
                Ok(exec) if exec.success() => {}
                Ok(exec) => {
                    cx.log(format!(
                        "umount exited {}; re-checking after settle",
                        exec.exit_code
                    ));
                    if !cx.pause(UNMOUNT_RECHECK_WAIT).await {
                        return OperationOutcome::failed("operation cancelled");
                    }
                    let still_mounted = self
                        .ltfs_mounts(cx)
                        .await
                        .map(|mounts| mounts.iter().any(|mount| mount.device == device))
                        .unwrap_or(true);
                    if still_mounted {
                        return OperationOutcome::failed(format!(
                            "cannot unmount {target}: {}",
                            exec.last_message
                        ));
                    }
                    cx.log(format!("{target} released on its own after the settle"));
                }
                Err(err) => return OperationOutcome::failed(err.to_string()),
            }
        } else {
            cx.log(format!("{device} not mounted; proceeding to release"));
        }
        cx.state.with_drive(drive_slot, |drive| drive.unassign());

        if cx
            .state
            .drive(drive_slot)
            .is_some_and(|drive| drive.is_released)
        {
            return OperationOutcome::succeeded("tape device already released");
        }

        let devname = format!("devname={device}");
        let ltfs = cx.settings.ltfs_tool("ltfs");
        match cx
            .run_tool_with_codes(ltfs, &["-o", &devname, "-o", "release_device"])
            .await
        {
            Ok((_, Some(LibraryOperationStatus::Ltfs12035E))) => {
                if cx.settings.check_before_release {
                    cx.log("rewind failed; checking the volume before assuming release");
                    let check = run_ltfsck(cx, &device).await;
                    cx.log(format!("ltfsck after failed rewind: {}", check.status));
                }
                cx.state.with_drive(drive_slot, |drive| drive.release());
                OperationOutcome::succeeded(
                    "rewind failed while releasing; the drive or the tape may be damaged, eject can proceed",
                )
            }
            Ok((exec, code)) => {
                if exec.success() {
                    cx.state.with_drive(drive_slot, |drive| drive.release());
                    OperationOutcome::new(
                        code.unwrap_or(LibraryOperationStatus::Succeeded),
                        "tape device released",
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
        let mut outcome = self.mount(cx, drive_slot).await;

        if matches!(
            outcome.status,
            LibraryOperationStatus::Ltfs16087E | LibraryOperationStatus::Ltfs16021E
        ) {
            cx.log("volume inconsistent; attempting ltfsck recovery");
            if !cx.pause(INCONSISTENT_SETTLE_WAIT).await {
                return OperationOutcome::failed("operation cancelled");
            }
            let device = match self.resolved_device(cx, drive_slot) {
                Ok((_, device)) => device,
                Err(outcome) => return outcome,
            };
            let check = run_ltfsck(cx, &device).await;
            if check.status != LibraryOperationStatus::Ltfs16022I {
                cx.log(format!("ltfsck did not restore consistency: {}", check.status));
                let _ = self.verify_media(cx, drive_slot).await;
                return check;
            }
            if !cx.pause(REMOUNT_WAIT).await {
                return OperationOutcome::failed("operation cancelled");
            }
            outcome = self.mount(cx, drive_slot).await;
        }

        self.handle_common_status(cx, drive_slot, outcome).await
    }

    async fn verify_media(&self, cx: &OpContext, drive_slot: u32) -> OperationOutcome {
        if let Err(outcome) = cx.refresh(true).await {
            return outcome;
        }
        let Some(drive) = cx.state.drive(drive_slot) else {
            return OperationOutcome::new(
                LibraryOperationStatus::DriveNotFound,
                format!("drive {drive_slot} is not configured"),
            );
        };

        if let (Some(device), Ok(mounts)) =
            (drive.device_name.as_deref(), self.ltfs_mounts(cx).await)
        {
            if let Some(mount) = mounts.iter().find(|mount| mount.device == device) {
                cx.state.with_drive(drive_slot, |drive| {
                    drive.assign(&mount.target);
                    drive.set_status(LtfsStatus::LtfsMedia);
                });
                cx.state
                    .set_drive_capacity(drive_slot, mount.size, mount.avail);
                return OperationOutcome::new(
                    LibraryOperationStatus::Ltfs11031I,
                    "volume mounted",
                );
            }
        }

        if !drive.is_full() {
            return OperationOutcome::new(
                LibraryOperationStatus::Ltfs12016E,
                "no medium in the drive",
            );
        }
        match drive.status {
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
}
