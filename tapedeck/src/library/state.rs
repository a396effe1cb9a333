//! The coarse-locked model store.

use crate::config::DriveSettings;
use crate::model::{Drive, LtfsStatus, Media, StorageSlot, VolumeTag};
use crate::parse::{ElementKind, ElementRecord, WindowsDriveRow};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;

#[derive(Debug, Default)]
struct Inner {
    drives: Vec<Drive>,
    slots: Vec<StorageSlot>,
    changer_device: Option<String>,
}

/// In-memory model of the library.
///
/// One mutex protects the whole structure; every read returns clones, so
/// holders of a snapshot never observe a half-applied update. All
/// mutation goes through methods that keep the model invariants: a volume
/// tag lives in at most one element, a drive whose status says no media
/// holds none, and loaded media always carries its drive's slot number.
pub struct LibraryState {
    inner: Mutex<Inner>,
}

impl LibraryState {
    /// Materialize the drives from configuration; slots appear with the
    /// first `mtx status` scan.
    pub fn new(drives: &[DriveSettings]) -> Self {
        let drives = drives
            .iter()
            .map(|settings| {
                Drive::new(
                    settings.slot_number,
                    settings.address.clone(),
                    settings.serial.clone(),
                )
            })
            .collect();
        Self {
            inner: Mutex::new(Inner {
                drives,
                slots: Vec::new(),
                changer_device: None,
            }),
        }
    }

    /// Device path (Linux) or changer name (Windows) for `mtx -f`.
    pub fn changer_device(&self) -> Option<String> {
        self.inner.lock().unwrap().changer_device.clone()
    }

    /// Record the resolved changer device.
    pub fn set_changer_device(&self, device: impl Into<String>) {
        self.inner.lock().unwrap().changer_device = Some(device.into());
    }

    /// By-value snapshot of every drive.
    pub fn snapshot_drives(&self) -> Vec<Drive> {
        self.inner.lock().unwrap().drives.clone()
    }

    /// By-value snapshot of every storage slot.
    pub fn snapshot_slots(&self) -> Vec<StorageSlot> {
        self.inner.lock().unwrap().slots.clone()
    }

    /// By-value snapshot of every cartridge currently in the library.
    pub fn snapshot_media(&self) -> Vec<Media> {
        let inner = self.inner.lock().unwrap();
        let mut media: Vec<Media> = inner
            .slots
            .iter()
            .filter_map(|slot| slot.media.clone())
            .collect();
        media.extend(inner.drives.iter().filter_map(|d| d.loaded_media.clone()));
        media
    }

    /// Clone of one drive.
    pub fn drive(&self, slot_number: u32) -> Option<Drive> {
        self.inner
            .lock()
            .unwrap()
            .drives
            .iter()
            .find(|drive| drive.slot_number == slot_number)
            .cloned()
    }

    /// Clone of one storage slot.
    pub fn slot(&self, slot_number: u32) -> Option<StorageSlot> {
        self.inner
            .lock()
            .unwrap()
            .slots
            .iter()
            .find(|slot| slot.slot_number == slot_number)
            .cloned()
    }

    /// Run `mutate` against one drive under the model lock.
    pub fn with_drive<R>(
        &self,
        slot_number: u32,
        mutate: impl FnOnce(&mut Drive) -> R,
    ) -> Option<R> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .drives
            .iter_mut()
            .find(|drive| drive.slot_number == slot_number)
            .map(mutate)
    }

    /// Run `mutate` against the drive with the given element address.
    pub fn with_drive_by_address<R>(
        &self,
        address: &str,
        mutate: impl FnOnce(&mut Drive) -> R,
    ) -> Option<R> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .drives
            .iter_mut()
            .find(|drive| drive.address == address)
            .map(mutate)
    }

    /// Run `mutate` against the drive with the given serial.
    pub fn with_drive_by_serial<R>(
        &self,
        serial: &str,
        mutate: impl FnOnce(&mut Drive) -> R,
    ) -> Option<R> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .drives
            .iter_mut()
            .find(|drive| drive.serial.as_deref() == Some(serial))
            .map(mutate)
    }

    /// Storage slot currently holding `volume_tag`.
    pub fn find_slot_with_tag(&self, volume_tag: &str) -> Option<u32> {
        self.inner
            .lock()
            .unwrap()
            .slots
            .iter()
            .find(|slot| slot.volume_tag() == Some(volume_tag))
            .map(|slot| slot.slot_number)
    }

    /// Lowest-numbered empty cartridge slot (I/O ports excluded).
    pub fn first_empty_slot(&self) -> Option<u32> {
        self.inner
            .lock()
            .unwrap()
            .slots
            .iter()
            .filter(|slot| !slot.is_io && !slot.is_full())
            .map(|slot| slot.slot_number)
            .min()
    }

    /// Whether `drive` currently holds `volume_tag`.
    pub fn drive_holds_tag(&self, slot_number: u32, volume_tag: &str) -> bool {
        self.drive(slot_number)
            .is_some_and(|drive| drive.volume_tag() == Some(volume_tag))
    }

    /// Move the cartridge `volume_tag` from its storage slot into `drive`.
    ///
    /// Returns false when the tag is not in any slot or the drive is
    /// unknown. The drive comes up `MEDIA_NOT_READY`; LTFS status arrives
    /// with the mount.
    pub fn move_tag_to_drive(&self, volume_tag: &str, drive_slot: u32) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(source) = inner
            .slots
            .iter_mut()
            .find(|slot| slot.volume_tag() == Some(volume_tag))
        else {
            return false;
        };
        let origin = source.slot_number;
        let Some(media) = source.media.take() else {
            return false;
        };
        let Some(drive) = inner
            .drives
            .iter_mut()
            .find(|drive| drive.slot_number == drive_slot)
        else {
            return false;
        };
        drive.load_media(media, Some(origin));
        drive.set_status(LtfsStatus::MediaNotReady);
        true
    }

    /// Move the cartridge out of `drive` into storage slot `slot_number`.
    pub fn move_drive_media_to_slot(&self, drive_slot: u32, slot_number: u32) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(drive) = inner
            .drives
            .iter_mut()
            .find(|drive| drive.slot_number == drive_slot)
        else {
            return false;
        };
        let Some(mut media) = drive.take_media() else {
            return false;
        };
        media.move_to_slot(slot_number);
        let Some(slot) = inner
            .slots
            .iter_mut()
            .find(|slot| slot.slot_number == slot_number)
        else {
            return false;
        };
        slot.media = Some(media);
        true
    }

    /// Move `volume_tag` between two storage slots.
    pub fn move_tag_between_slots(&self, volume_tag: &str, target_slot: u32) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(source) = inner
            .slots
            .iter_mut()
            .find(|slot| slot.volume_tag() == Some(volume_tag))
        else {
            return false;
        };
        let Some(mut media) = source.media.take() else {
            return false;
        };
        media.move_to_slot(target_slot);
        let Some(target) = inner
            .slots
            .iter_mut()
            .find(|slot| slot.slot_number == target_slot)
        else {
            return false;
        };
        target.media = Some(media);
        true
    }

    /// Record mounted-volume capacity on a drive's loaded cartridge.
    pub fn set_drive_capacity(&self, drive_slot: u32, capacity: u64, remaining: u64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(media) = inner
            .drives
            .iter_mut()
            .find(|drive| drive.slot_number == drive_slot)
            .and_then(|drive| drive.loaded_media.as_mut())
        {
            media.capacity = Some(capacity);
            media.remaining = Some(remaining);
        }
    }

    /// Apply a parsed `mtx status` scan.
    ///
    /// Unknown drives are warned about and ignored; unknown storage slots
    /// are created only when `create_missing_slots` is set (the initial
    /// scan) and ignored afterwards. When a tag shows up in two elements
    /// at once (transiently possible during a robot move) the
    /// lower-numbered storage slot wins and the other sighting is
    /// dropped with a warning.
    pub fn apply_elements(&self, records: &[ElementRecord], create_missing_slots: bool) {
        let winners = tag_winners(records);
        let mut inner = self.inner.lock().unwrap();

        for record in records {
            let tag = record.volume_tag.as_ref().filter(|tag| {
                let winner = winners.get(tag.as_str());
                winner == Some(&(record.kind, record.slot_number))
            });
            if record.volume_tag.is_some() && tag.is_none() {
                warn!(
                    tag = %record.volume_tag.as_ref().unwrap(),
                    kind = ?record.kind,
                    element = record.slot_number,
                    "volume tag reported by two elements; keeping the lower storage slot"
                );
            }

            match record.kind {
                ElementKind::DataTransfer => {
                    apply_drive_record(&mut inner, record, tag);
                }
                ElementKind::Storage => {
                    apply_slot_record(&mut inner, record, tag, create_missing_slots);
                }
            }
        }
    }

    /// Apply a parsed `LtfsCmdDrives` listing (Windows).
    pub fn apply_windows_rows(&self, rows: &[WindowsDriveRow]) {
        let mut inner = self.inner.lock().unwrap();
        for row in rows {
            let Some(drive) = inner
                .drives
                .iter_mut()
                .find(|drive| drive.address == row.address)
            else {
                warn!(address = %row.address, "drive listing for unknown address ignored");
                continue;
            };
            drive.serial = Some(row.serial.clone());
            match row.assigned_letter {
                Some(letter) => {
                    drive.device_name = Some(format!("{letter}:"));
                    drive.assign(format!("{letter}:"));
                }
                None => drive.unassign(),
            }
            if let Some(status) = row.status {
                drive.set_status(status);
                if !status.media_present() {
                    drive.loaded_media = None;
                    drive.origin_slot_number = None;
                }
            }
        }
    }
}

/// For every tag, the element allowed to keep it: the lowest-numbered
/// storage slot, or the lowest drive when no slot claims it.
fn tag_winners(records: &[ElementRecord]) -> HashMap<&str, (ElementKind, u32)> {
    let mut winners: HashMap<&str, (ElementKind, u32)> = HashMap::new();
    for record in records {
        let Some(tag) = record.volume_tag.as_ref() else {
            continue;
        };
        let candidate = (record.kind, record.slot_number);
        winners
            .entry(tag.as_str())
            .and_modify(|current| {
                if rank(candidate) < rank(*current) {
                    *current = candidate;
                }
            })
            .or_insert(candidate);
    }
    winners
}

fn rank(claim: (ElementKind, u32)) -> (u8, u32) {
    match claim {
        (ElementKind::Storage, slot) => (0, slot),
        (ElementKind::DataTransfer, slot) => (1, slot),
    }
}

fn apply_drive_record(inner: &mut Inner, record: &ElementRecord, tag: Option<&VolumeTag>) {
    let Some(drive) = inner
        .drives
        .iter_mut()
        .find(|drive| drive.slot_number == record.slot_number)
    else {
        warn!(
            element = record.slot_number,
            "data transfer element not present in configuration; ignoring"
        );
        return;
    };

    if !record.is_full {
        drive.loaded_media = None;
        drive.origin_slot_number = None;
        drive.status = LtfsStatus::NoMedia;
        return;
    }

    match tag {
        Some(tag) if drive.volume_tag() == Some(tag.as_str()) => {
            // Same cartridge as before; just refresh the origin.
            if record.origin_slot.is_some() {
                drive.origin_slot_number = record.origin_slot;
            }
        }
        Some(tag) => {
            drive.load_media(Media::new(tag.clone()), record.origin_slot);
        }
        None => {
            // Full but no readable tag; keep whatever we knew.
        }
    }
    if !drive.status.media_present() {
        drive.set_status(LtfsStatus::MediaNotReady);
    }
}

fn apply_slot_record(
    inner: &mut Inner,
    record: &ElementRecord,
    tag: Option<&VolumeTag>,
    create_missing_slots: bool,
) {
    let index = inner
        .slots
        .iter()
        .position(|slot| slot.slot_number == record.slot_number);
    let slot = match index {
        Some(index) => &mut inner.slots[index],
        None if create_missing_slots => {
            inner
                .slots
                .push(StorageSlot::new(record.slot_number, record.is_io));
            inner.slots.sort_by_key(|slot| slot.slot_number);
            inner
                .slots
                .iter_mut()
                .find(|slot| slot.slot_number == record.slot_number)
                .expect("slot just inserted")
        }
        None => {
            warn!(
                element = record.slot_number,
                "storage element not present in model; ignoring"
            );
            return;
        }
    };

    slot.is_io = record.is_io;
    match (record.is_full, tag) {
        (true, Some(tag)) => {
            if slot.volume_tag() != Some(tag.as_str()) {
                slot.media = Some(Media::in_slot(tag.clone(), record.slot_number));
            }
        }
        (true, None) => {
            // Occupied but unreadable; an identified cartridge cannot be
            // fabricated, so the slot shows full-with-unknown as empty.
            slot.media = None;
        }
        (false, _) => {
            slot.media = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_mtx_status;

    fn drive_settings(slot: u32, address: &str) -> DriveSettings {
        DriveSettings {
            slot_number: slot,
            address: address.to_string(),
            serial: None,
        }
    }

    fn state_with_scan(scan: &str) -> LibraryState {
        let state = LibraryState::new(&[
            drive_settings(0, "0.0.0.0"),
            drive_settings(1, "1.0.0.0"),
        ]);
        let records = parse_mtx_status(scan).unwrap();
        state.apply_elements(&records, true);
        state
    }

    const SCAN: &str = "\
Data Transfer Element 0:Empty\n\
Data Transfer Element 1:Full (Storage Element 11 Loaded):VolumeTag = 000064L7\n\
      Storage Element 10:Full :VolumeTag=000063L7\n\
      Storage Element 11:Empty\n\
      Storage Element 12:Empty\n\
      Storage Element 21 IMPORT/EXPORT:Empty\n";

    #[test]
    fn test_initial_scan_creates_slots() {
        let state = state_with_scan(SCAN);
        let slots = state.snapshot_slots();
        assert_eq!(slots.len(), 4);
        assert!(slots.iter().any(|slot| slot.slot_number == 21 && slot.is_io));
        assert_eq!(state.find_slot_with_tag("000063L7"), Some(10));
    }

    #[test]
    fn test_scan_populates_drives() {
        let state = state_with_scan(SCAN);
        let drive = state.drive(1).unwrap();
        assert_eq!(drive.volume_tag(), Some("000064L7"));
        assert_eq!(drive.origin_slot_number, Some(11));
        assert_eq!(drive.status, LtfsStatus::MediaNotReady);

        let empty = state.drive(0).unwrap();
        assert!(!empty.is_full());
        assert_eq!(empty.status, LtfsStatus::NoMedia);
    }

    #[test]
    fn test_later_scan_ignores_unknown_slots() {
        let state = state_with_scan(SCAN);
        let extra = parse_mtx_status("      Storage Element 99:Full :VolumeTag=000099L7\n").unwrap();
        state.apply_elements(&extra, false);
        assert!(state.slot(99).is_none());
    }

    #[test]
    fn test_unknown_drive_is_ignored() {
        let state = state_with_scan(SCAN);
        let extra =
            parse_mtx_status("Data Transfer Element 7:Full :VolumeTag=000099L7\n").unwrap();
        state.apply_elements(&extra, false);
        assert!(state.drive(7).is_none());
    }

    #[test]
    fn test_duplicate_tag_prefers_lower_storage_slot() {
        let scan = "\
Data Transfer Element 1:Full :VolumeTag=000063L7\n\
      Storage Element 12:Full :VolumeTag=000063L7\n\
      Storage Element 10:Full :VolumeTag=000063L7\n";
        let state = LibraryState::new(&[drive_settings(1, "1.0.0.0")]);
        state.apply_elements(&parse_mtx_status(scan).unwrap(), true);

        assert_eq!(state.find_slot_with_tag("000063L7"), Some(10));
        assert_eq!(state.slot(12).unwrap().volume_tag(), None);
        assert_eq!(state.drive(1).unwrap().volume_tag(), None);
    }

    #[test]
    fn test_move_tag_to_drive_and_back() {
        let state = state_with_scan(SCAN);
        assert!(state.move_tag_to_drive("000063L7", 0));

        let drive = state.drive(0).unwrap();
        assert_eq!(drive.volume_tag(), Some("000063L7"));
        assert_eq!(drive.origin_slot_number, Some(10));
        assert!(state.slot(10).unwrap().media.is_none());
        // The tag must not be claimed by any slot while loaded.
        assert_eq!(state.find_slot_with_tag("000063L7"), None);

        assert!(state.move_drive_media_to_slot(0, 10));
        assert_eq!(state.find_slot_with_tag("000063L7"), Some(10));
        let drive = state.drive(0).unwrap();
        assert!(!drive.is_full());
        assert_eq!(drive.status, LtfsStatus::NoMedia);
    }

    #[test]
    fn test_move_between_slots() {
        let state = state_with_scan(SCAN);
        assert!(state.move_tag_between_slots("000063L7", 12));
        assert_eq!(state.find_slot_with_tag("000063L7"), Some(12));
        assert!(state.slot(10).unwrap().media.is_none());
    }

    #[test]
    fn test_first_empty_slot_skips_io_ports() {
        let state = state_with_scan(SCAN);
        assert_eq!(state.first_empty_slot(), Some(11));
    }

    #[test]
    fn test_set_drive_capacity() {
        let state = state_with_scan(SCAN);
        state.set_drive_capacity(1, 600, 500);
        let media = state.drive(1).unwrap().loaded_media.unwrap();
        assert_eq!(media.capacity, Some(600));
        assert_eq!(media.remaining, Some(500));
    }

    #[test]
    fn test_apply_windows_rows() {
        let state = state_with_scan(SCAN);
        state.apply_windows_rows(&[
            WindowsDriveRow {
                assigned_letter: Some('Z'),
                address: "1.0.0.0".to_string(),
                serial: "10WT012345".to_string(),
                status: Some(LtfsStatus::LtfsMedia),
            },
            WindowsDriveRow {
                assigned_letter: None,
                address: "9.9.9.9".to_string(),
                serial: "ZZZ".to_string(),
                status: Some(LtfsStatus::NoMedia),
            },
        ]);

        let drive = state.drive(1).unwrap();
        assert_eq!(drive.mount_point.as_deref(), Some("Z:"));
        assert_eq!(drive.serial.as_deref(), Some("10WT012345"));
        assert_eq!(drive.status, LtfsStatus::LtfsMedia);
    }

    #[test]
    fn test_windows_no_media_clears_loaded_media() {
        let state = state_with_scan(SCAN);
        state.apply_windows_rows(&[WindowsDriveRow {
            assigned_letter: None,
            address: "1.0.0.0".to_string(),
            serial: "10WT054321".to_string(),
            status: Some(LtfsStatus::NoMedia),
        }]);
        let drive = state.drive(1).unwrap();
        assert!(!drive.is_full());
        assert_eq!(drive.status, LtfsStatus::NoMedia);
    }
}
