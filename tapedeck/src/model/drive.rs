//! A tape drive and its LTFS state.

use super::media::Media;
use super::status::LtfsStatus;
use serde::Serialize;
use std::collections::BTreeSet;

/// A tape drive (a SCSI data transfer element).
///
/// `slot_number` and `address` are fixed by configuration; everything else
/// is mutable runtime state maintained by the status collector and the
/// LTFS procedures.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Drive {
    /// Data transfer element number reported by `mtx status`.
    pub slot_number: u32,
    /// SCSI address (Windows) or element address (Linux) from configuration.
    pub address: String,
    /// Resolved device: `/dev/sgX` on Linux, `Changer{N}` or a drive
    /// letter on Windows.
    pub device_name: Option<String>,
    /// Drive serial number, resolved during initialization.
    pub serial: Option<String>,
    /// Where LTFS exposes the drive: a directory on Linux, a drive letter
    /// on Windows.
    pub mount_point: Option<String>,
    /// LTFS state of the drive.
    pub status: LtfsStatus,
    /// Cartridge currently loaded, if any.
    pub loaded_media: Option<Media>,
    /// Storage slot the loaded cartridge came from.
    pub origin_slot_number: Option<u32>,
    /// Tags of cartridges that failed in this drive.
    pub failed_volume_tags: BTreeSet<String>,
    /// Whether the tape device was explicitly released.
    pub is_released: bool,
}

impl Drive {
    /// Create a drive from its configured identity.
    pub fn new(slot_number: u32, address: impl Into<String>, serial: Option<String>) -> Self {
        Self {
            slot_number,
            address: address.into(),
            device_name: None,
            serial,
            mount_point: None,
            status: LtfsStatus::Reset,
            loaded_media: None,
            origin_slot_number: None,
            failed_volume_tags: BTreeSet::new(),
            is_released: false,
        }
    }

    /// Whether a cartridge is in the drive.
    pub fn is_full(&self) -> bool {
        self.loaded_media.is_some()
    }

    /// Whether LTFS currently exposes the drive at a mount point.
    pub fn is_assigned(&self) -> bool {
        self.mount_point.is_some()
    }

    /// Volume tag of the loaded cartridge, if any.
    pub fn volume_tag(&self) -> Option<&str> {
        self.loaded_media.as_ref().map(|m| m.volume_tag.as_str())
    }

    /// Transition the LTFS status.
    ///
    /// Any status implying media presence clears the released flag, and a
    /// write-protected status cascades onto the loaded cartridge.
    pub fn set_status(&mut self, status: LtfsStatus) {
        if status.media_present() {
            self.is_released = false;
        }
        if status == LtfsStatus::WriteProtected {
            if let Some(media) = self.loaded_media.as_mut() {
                media.is_write_protected = true;
            }
        }
        self.status = status;
    }

    /// Record that LTFS exposes this drive at `mount_point`.
    pub fn assign(&mut self, mount_point: impl Into<String>) {
        self.mount_point = Some(mount_point.into());
    }

    /// Drop the mount point binding.
    pub fn unassign(&mut self) {
        self.mount_point = None;
    }

    /// Mark the tape device as released.
    pub fn release(&mut self) {
        self.is_released = true;
    }

    /// Put a cartridge into the drive, remembering its origin slot.
    pub fn load_media(&mut self, mut media: Media, origin_slot: Option<u32>) {
        media.move_to_drive(self.slot_number);
        self.loaded_media = Some(media);
        self.origin_slot_number = origin_slot;
    }

    /// Take the cartridge out of the drive.
    ///
    /// The drive drops to `NO_MEDIA`; the caller decides where the
    /// cartridge goes.
    pub fn take_media(&mut self) -> Option<Media> {
        self.origin_slot_number = None;
        let media = self.loaded_media.take();
        self.status = LtfsStatus::NoMedia;
        media
    }

    /// Remember that a cartridge failed in this drive.
    pub fn mark_failed(&mut self, volume_tag: &str) {
        self.failed_volume_tags.insert(volume_tag.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VolumeTag;

    fn media(tag: &str) -> Media {
        Media::new(VolumeTag::parse(tag).unwrap())
    }

    #[test]
    fn test_new_drive_is_empty() {
        let drive = Drive::new(1, "1.0.0.0", None);
        assert!(!drive.is_full());
        assert!(!drive.is_assigned());
        assert_eq!(drive.status, LtfsStatus::Reset);
    }

    #[test]
    fn test_load_media_sets_location_and_origin() {
        let mut drive = Drive::new(1, "1.0.0.0", None);
        drive.load_media(media("000063L7"), Some(10));

        assert!(drive.is_full());
        assert_eq!(drive.volume_tag(), Some("000063L7"));
        assert_eq!(drive.origin_slot_number, Some(10));
        let loaded = drive.loaded_media.as_ref().unwrap();
        assert_eq!(loaded.drive_slot_number, Some(1));
        assert_eq!(loaded.storage_slot_number, None);
    }

    #[test]
    fn test_take_media_resets_to_no_media() {
        let mut drive = Drive::new(1, "1.0.0.0", None);
        drive.load_media(media("000063L7"), Some(10));
        drive.set_status(LtfsStatus::LtfsMedia);

        let taken = drive.take_media().unwrap();
        assert_eq!(taken.volume_tag.as_str(), "000063L7");
        assert!(!drive.is_full());
        assert_eq!(drive.status, LtfsStatus::NoMedia);
        assert_eq!(drive.origin_slot_number, None);
    }

    #[test]
    fn test_status_with_media_clears_released() {
        let mut drive = Drive::new(1, "1.0.0.0", None);
        drive.release();
        assert!(drive.is_released);

        drive.set_status(LtfsStatus::NoMedia);
        assert!(drive.is_released, "NO_MEDIA keeps the released flag");

        drive.set_status(LtfsStatus::MediaNotReady);
        assert!(!drive.is_released, "media presence clears the released flag");
    }

    #[test]
    fn test_write_protected_cascades_to_media() {
        let mut drive = Drive::new(1, "1.0.0.0", None);
        drive.load_media(media("000063L7"), None);
        drive.set_status(LtfsStatus::WriteProtected);

        assert!(drive.loaded_media.as_ref().unwrap().is_write_protected);
    }

    #[test]
    fn test_mark_failed_accumulates() {
        let mut drive = Drive::new(1, "1.0.0.0", None);
        drive.mark_failed("000063L7");
        drive.mark_failed("000064L7");
        drive.mark_failed("000063L7");
        assert_eq!(drive.failed_volume_tags.len(), 2);
    }
}
