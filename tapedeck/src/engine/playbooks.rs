//! Operation playbooks.
//!
//! Each playbook is the body of one public operation: it refreshes state,
//! takes the locks it needs, drives the tools and reconciles the model.
//! Physical `mtx` failures are never trusted blindly; the playbook
//! re-queries `mtx status` and accepts the outcome the hardware actually
//! reached.

use super::context::{OpContext, OperationOutcome};
use crate::events::LibraryEvent;
use crate::lock::{LockGuard, CHANGER_LOCK, CHANGER_LOCK_SHORT_TTL, CHANGER_LOCK_TTL};
use crate::model::LibraryOperationStatus;
use std::time::Duration;

/// Pause between swapping cartridges in a drive.
const SWAP_SETTLE_WAIT: Duration = Duration::from_millis(500);

/// Settle time between LTFS unmount and the robot pull.
const UNLOAD_SETTLE_WAIT: Duration = Duration::from_secs(5);

/// Pause before re-querying `mtx status` after a failed robot motion.
const MTX_RECHECK_WAIT: Duration = Duration::from_secs(10);

async fn acquire_changer(cx: &OpContext, ttl: Duration) -> Option<LockGuard> {
    cx.locker.acquire(CHANGER_LOCK, &cx.owner(), ttl).await
}

fn cancelled() -> OperationOutcome {
    OperationOutcome::failed("operation cancelled")
}

/// Load `volume_tag` into `drive_slot`, then mount it.
pub(super) async fn load(cx: OpContext, volume_tag: String, drive_slot: u32) -> OperationOutcome {
    if let Err(outcome) = cx.refresh(true).await {
        return outcome;
    }
    let Some(drive) = cx.state.drive(drive_slot) else {
        return OperationOutcome::new(
            LibraryOperationStatus::DriveNotFound,
            format!("drive {drive_slot} is not configured"),
        );
    };

    if drive.is_full() && drive.volume_tag() != Some(volume_tag.as_str()) {
        cx.log(format!(
            "drive {drive_slot} holds {}; unloading it first",
            drive.volume_tag().unwrap_or("an unknown cartridge")
        ));
        let unloaded = unmount_then_unload(&cx, drive_slot).await;
        if !unloaded.is_success() {
            return unloaded;
        }
        if !cx.pause(SWAP_SETTLE_WAIT).await {
            return cancelled();
        }
    }

    let Some(_drive_lock) = cx.lock_drive(drive_slot).await else {
        return OperationOutcome::busy(
            LibraryOperationStatus::DriveBusy,
            format!("drive {drive_slot} is locked by another operation"),
        );
    };

    let already_loaded = cx.state.drive_holds_tag(drive_slot, &volume_tag);
    if already_loaded {
        cx.log(format!("{volume_tag} is already in drive {drive_slot}"));
    } else {
        let Some(source_slot) = cx.state.find_slot_with_tag(&volume_tag) else {
            return OperationOutcome::new(
                LibraryOperationStatus::TapeNotFound,
                format!("cartridge {volume_tag} is not in any storage slot"),
            );
        };

        let Some(_changer_lock) = acquire_changer(&cx, CHANGER_LOCK_TTL).await else {
            return OperationOutcome::busy(
                LibraryOperationStatus::MtxBusy,
                "the changer is locked by another operation",
            );
        };
        let Some(changer) = cx.state.changer_device() else {
            return OperationOutcome::failed("changer device not resolved");
        };
        let exec = cx
            .run_tool(
                cx.settings.mtx_tool(),
                &[
                    "-f",
                    &changer,
                    "load",
                    &source_slot.to_string(),
                    &drive_slot.to_string(),
                ],
            )
            .await;
        match exec {
            Ok(exec) if exec.success() => {
                cx.state.move_tag_to_drive(&volume_tag, drive_slot);
            }
            Ok(exec) => {
                cx.log(format!(
                    "mtx load exited {}; re-querying the robot",
                    exec.exit_code
                ));
                if !cx.pause(MTX_RECHECK_WAIT).await {
                    return cancelled();
                }
                if let Err(outcome) = cx.refresh(true).await {
                    return outcome;
                }
                if !cx.state.drive_holds_tag(drive_slot, &volume_tag) {
                    return OperationOutcome::failed(format!(
                        "mtx load failed: {}",
                        exec.last_message
                    ));
                }
                cx.log("cartridge arrived in the drive despite the mtx error");
            }
            Err(err) => return OperationOutcome::failed(err.to_string()),
        }
        cx.emit(LibraryEvent::MediaChanged {
            volume_tag: volume_tag.clone(),
        });
        cx.emit(LibraryEvent::DriveChanged {
            slot_number: drive_slot,
            operation: "Load".to_string(),
        });
    }

    cx.procedures.mount_with_recovery(&cx, drive_slot).await
}

/// Unmount and eject the cartridge in `drive_slot` back to storage.
pub(super) async fn unload(cx: OpContext, drive_slot: u32) -> OperationOutcome {
    if let Err(outcome) = cx.refresh(true).await {
        return outcome;
    }
    let Some(drive) = cx.state.drive(drive_slot) else {
        return OperationOutcome::new(
            LibraryOperationStatus::DriveNotFound,
            format!("drive {drive_slot} is not configured"),
        );
    };
    if !drive.is_full() {
        return OperationOutcome::no_action(format!("drive {drive_slot} is already empty"));
    }

    let Some(_drive_lock) = cx.lock_drive(drive_slot).await else {
        return OperationOutcome::busy(
            LibraryOperationStatus::DriveBusy,
            format!("drive {drive_slot} is locked by another operation"),
        );
    };
    unmount_then_unload(&cx, drive_slot).await
}

/// Mount the volume already sitting in `drive_slot`.
pub(super) async fn mount(cx: OpContext, drive_slot: u32) -> OperationOutcome {
    if let Err(outcome) = cx.refresh(true).await {
        return outcome;
    }
    if cx.state.drive(drive_slot).is_none() {
        return OperationOutcome::new(
            LibraryOperationStatus::DriveNotFound,
            format!("drive {drive_slot} is not configured"),
        );
    }
    let Some(_drive_lock) = cx.lock_drive(drive_slot).await else {
        return OperationOutcome::busy(
            LibraryOperationStatus::DriveBusy,
            format!("drive {drive_slot} is locked by another operation"),
        );
    };
    let outcome = cx.procedures.mount(&cx, drive_slot).await;
    cx.procedures
        .handle_common_status(&cx, drive_slot, outcome)
        .await
}

/// Unmount the volume in `drive_slot` without moving the cartridge.
pub(super) async fn unmount(cx: OpContext, drive_slot: u32) -> OperationOutcome {
    if let Err(outcome) = cx.refresh(true).await {
        return outcome;
    }
    if cx.state.drive(drive_slot).is_none() {
        return OperationOutcome::new(
            LibraryOperationStatus::DriveNotFound,
            format!("drive {drive_slot} is not configured"),
        );
    }
    let Some(_drive_lock) = cx.lock_drive(drive_slot).await else {
        return OperationOutcome::busy(
            LibraryOperationStatus::DriveBusy,
            format!("drive {drive_slot} is locked by another operation"),
        );
    };
    cx.procedures.unmount(&cx, drive_slot).await
}

/// Format the cartridge in `drive_slot` with `mkltfs`.
pub(super) async fn format(cx: OpContext, drive_slot: u32, force: bool) -> OperationOutcome {
    if let Err(outcome) = cx.refresh(true).await {
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
            LibraryOperationStatus::TapeNotFound,
            format!("no cartridge in drive {drive_slot}"),
        );
    }

    let Some(_drive_lock) = cx.lock_drive(drive_slot).await else {
        return OperationOutcome::busy(
            LibraryOperationStatus::DriveBusy,
            format!("drive {drive_slot} is locked by another operation"),
        );
    };

    let Some(device) = cx.procedures.device_argument(&drive) else {
        return OperationOutcome::failed(format!("no device resolved for drive {drive_slot}"));
    };
    let mut args = vec![format!("--device={device}")];
    if let Some(media) = drive.loaded_media.as_ref() {
        args.push(format!("--tape-serial={}", media.volume_tag.serial()));
    }
    if force {
        args.push("--force".to_string());
    }
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    match cx
        .run_tool_with_codes(cx.settings.ltfs_tool("mkltfs"), &args)
        .await
    {
        Ok((exec, code)) => {
            if !exec.success() {
                let status = code.unwrap_or(LibraryOperationStatus::Failed);
                return cx
                    .procedures
                    .handle_common_status(
                        &cx,
                        drive_slot,
                        OperationOutcome::new(status, exec.last_message),
                    )
                    .await;
            }
            let verified = cx.procedures.verify_media(&cx, drive_slot).await;
            match code {
                Some(code) => {
                    cx.procedures
                        .handle_common_status(
                            &cx,
                            drive_slot,
                            OperationOutcome::new(code, exec.last_message),
                        )
                        .await
                }
                None => verified,
            }
        }
        Err(err) => OperationOutcome::failed(err.to_string()),
    }
}

/// Run `ltfsck` against the cartridge in `drive_slot`.
pub(super) async fn ltfsck(cx: OpContext, drive_slot: u32) -> OperationOutcome {
    if let Err(outcome) = cx.refresh(false).await {
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
            LibraryOperationStatus::TapeNotFound,
            format!("no cartridge in drive {drive_slot}"),
        );
    }
    let Some(_drive_lock) = cx.lock_drive(drive_slot).await else {
        return OperationOutcome::busy(
            LibraryOperationStatus::DriveBusy,
            format!("drive {drive_slot} is locked by another operation"),
        );
    };
    cx.procedures.check(&cx, drive_slot).await
}

/// Move `volume_tag` from its current storage slot to `target_slot`.
pub(super) async fn transfer(
    cx: OpContext,
    volume_tag: String,
    target_slot: u32,
) -> OperationOutcome {
    if let Err(outcome) = cx.refresh(true).await {
        return outcome;
    }
    let Some(target) = cx.state.slot(target_slot) else {
        return OperationOutcome::failed(format!("storage slot {target_slot} does not exist"));
    };
    if target.volume_tag() == Some(volume_tag.as_str()) {
        return OperationOutcome::no_action(format!(
            "cartridge {volume_tag} is already in slot {target_slot}"
        ));
    }
    if target.is_full() {
        return OperationOutcome::failed(format!("storage slot {target_slot} is occupied"));
    }
    let Some(source_slot) = cx.state.find_slot_with_tag(&volume_tag) else {
        return OperationOutcome::new(
            LibraryOperationStatus::TapeNotFound,
            format!("cartridge {volume_tag} is not in any storage slot"),
        );
    };

    {
        let Some(_changer_lock) = acquire_changer(&cx, CHANGER_LOCK_SHORT_TTL).await else {
            return OperationOutcome::busy(
                LibraryOperationStatus::MtxBusy,
                "the changer is locked by another operation",
            );
        };
        let Some(changer) = cx.state.changer_device() else {
            return OperationOutcome::failed("changer device not resolved");
        };
        let exec = cx
            .run_tool(
                cx.settings.mtx_tool(),
                &[
                    "-f",
                    &changer,
                    "transfer",
                    &source_slot.to_string(),
                    &target_slot.to_string(),
                ],
            )
            .await;
        match exec {
            Ok(exec) if exec.success() => {
                cx.state.move_tag_between_slots(&volume_tag, target_slot);
            }
            Ok(exec) => {
                cx.log(format!(
                    "mtx transfer exited {}; re-querying the robot",
                    exec.exit_code
                ));
                if !cx.pause(MTX_RECHECK_WAIT).await {
                    return cancelled();
                }
                if let Err(outcome) = cx.refresh(true).await {
                    return outcome;
                }
                if cx.state.find_slot_with_tag(&volume_tag) != Some(target_slot) {
                    return OperationOutcome::failed(format!(
                        "mtx transfer failed: {}",
                        exec.last_message
                    ));
                }
                cx.log("cartridge arrived in the target slot despite the mtx error");
            }
            Err(err) => return OperationOutcome::failed(err.to_string()),
        }
    }

    cx.emit(LibraryEvent::MediaChanged {
        volume_tag: volume_tag.clone(),
    });
    OperationOutcome::succeeded(format!(
        "cartridge {volume_tag} moved from slot {source_slot} to slot {target_slot}"
    ))
}

/// Unmount and unload every full drive, stopping at the first failure.
pub(super) async fn release(cx: OpContext) -> OperationOutcome {
    if let Err(outcome) = cx.refresh(true).await {
        return outcome;
    }
    let mut released = 0u32;
    for drive in cx.state.snapshot_drives() {
        if !drive.is_full() {
            continue;
        }
        cx.log(format!("releasing drive {}", drive.slot_number));
        let Some(_drive_lock) = cx.lock_drive(drive.slot_number).await else {
            return OperationOutcome::busy(
                LibraryOperationStatus::DriveBusy,
                format!("drive {} is locked by another operation", drive.slot_number),
            );
        };
        let result = unmount_then_unload(&cx, drive.slot_number).await;
        if !result.is_success() {
            return result;
        }
        released += 1;
    }
    OperationOutcome::succeeded(format!("released {released} drive(s)"))
}

/// The shared unmount-then-unload sequence.
///
/// Callers hold the drive lock where the spec requires one; this helper
/// only takes the changer lock around the robot pull.
pub(super) async fn unmount_then_unload(cx: &OpContext, drive_slot: u32) -> OperationOutcome {
    let Some(drive) = cx.state.drive(drive_slot) else {
        return OperationOutcome::new(
            LibraryOperationStatus::DriveNotFound,
            format!("drive {drive_slot} is not configured"),
        );
    };
    if !drive.is_full() {
        return OperationOutcome::no_action(format!("drive {drive_slot} is already empty"));
    }
    let Some(volume_tag) = drive.volume_tag().map(str::to_string) else {
        return OperationOutcome::failed(format!(
            "drive {drive_slot} holds an unidentified cartridge"
        ));
    };

    if drive.is_assigned() {
        let unmounted = cx.procedures.unmount(cx, drive_slot).await;
        if !unmounted.is_success() {
            return unmounted;
        }
        if !cx.pause(UNLOAD_SETTLE_WAIT).await {
            return cancelled();
        }
    }

    let origin = drive
        .origin_slot_number
        .or_else(|| cx.state.first_empty_slot());
    let Some(origin) = origin else {
        return OperationOutcome::failed("no storage slot available to unload into");
    };

    {
        let Some(_changer_lock) = acquire_changer(cx, CHANGER_LOCK_TTL).await else {
            return OperationOutcome::busy(
                LibraryOperationStatus::MtxBusy,
                "the changer is locked by another operation",
            );
        };
        let Some(changer) = cx.state.changer_device() else {
            return OperationOutcome::failed("changer device not resolved");
        };
        let exec = cx
            .run_tool(
                cx.settings.mtx_tool(),
                &[
                    "-f",
                    &changer,
                    "unload",
                    &origin.to_string(),
                    &drive_slot.to_string(),
                ],
            )
            .await;
        match exec {
            Ok(exec) if exec.success() => {
                cx.state.move_drive_media_to_slot(drive_slot, origin);
            }
            Ok(exec) => {
                cx.log(format!(
                    "mtx unload exited {}; re-querying the robot",
                    exec.exit_code
                ));
                if !cx.pause(MTX_RECHECK_WAIT).await {
                    return cancelled();
                }
                if let Err(outcome) = cx.refresh(true).await {
                    return outcome;
                }
                if cx.state.find_slot_with_tag(&volume_tag) != Some(origin) {
                    return OperationOutcome::failed(format!(
                        "mtx unload failed: {}",
                        exec.last_message
                    ));
                }
                cx.log("cartridge returned to its slot despite the mtx error");
            }
            Err(err) => return OperationOutcome::failed(err.to_string()),
        }
    }

    cx.emit(LibraryEvent::MediaChanged {
        volume_tag: volume_tag.clone(),
    });
    cx.emit(LibraryEvent::DriveChanged {
        slot_number: drive_slot,
        operation: "Unload".to_string(),
    });

    let after = cx.procedures.after_unload(cx, drive_slot).await;
    if !after.is_success() {
        return after;
    }
    OperationOutcome::succeeded(format!(
        "cartridge {volume_tag} returned to slot {origin}"
    ))
}
