//! A physical cartridge and its location.

use super::volume_tag::VolumeTag;
use serde::Serialize;

/// A physical LTO cartridge.
///
/// A cartridge lives in at most one storage slot or one drive at a time;
/// with neither location set it is outside the library. Capacity figures
/// stay unset until an LTFS mount reports them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Media {
    /// Barcode label (6-char serial + 2-char generation).
    pub volume_tag: VolumeTag,
    /// Total capacity in bytes, known after an LTFS mount.
    pub capacity: Option<u64>,
    /// Remaining capacity in bytes, known after an LTFS mount.
    pub remaining: Option<u64>,
    /// Whether this is a cleaning cartridge (derived from the tag).
    pub is_cleaner: bool,
    /// Whether the cartridge is write-protected.
    pub is_write_protected: bool,
    /// Storage slot currently holding the cartridge.
    pub storage_slot_number: Option<u32>,
    /// Drive currently holding the cartridge.
    pub drive_slot_number: Option<u32>,
}

impl Media {
    /// Create a cartridge with no known location.
    pub fn new(volume_tag: VolumeTag) -> Self {
        let is_cleaner = volume_tag.is_cleaner();
        Self {
            volume_tag,
            capacity: None,
            remaining: None,
            is_cleaner,
            is_write_protected: false,
            storage_slot_number: None,
            drive_slot_number: None,
        }
    }

    /// Create a cartridge sitting in a storage slot.
    pub fn in_slot(volume_tag: VolumeTag, slot_number: u32) -> Self {
        let mut media = Self::new(volume_tag);
        media.storage_slot_number = Some(slot_number);
        media
    }

    /// Create a cartridge sitting in a drive.
    pub fn in_drive(volume_tag: VolumeTag, drive_slot_number: u32) -> Self {
        let mut media = Self::new(volume_tag);
        media.drive_slot_number = Some(drive_slot_number);
        media
    }

    /// Relocate the cartridge into a drive, clearing any slot location.
    pub fn move_to_drive(&mut self, drive_slot_number: u32) {
        self.storage_slot_number = None;
        self.drive_slot_number = Some(drive_slot_number);
    }

    /// Relocate the cartridge into a storage slot, clearing any drive location.
    pub fn move_to_slot(&mut self, slot_number: u32) {
        self.drive_slot_number = None;
        self.storage_slot_number = Some(slot_number);
    }

    /// Whether the cartridge is outside the library.
    pub fn is_external(&self) -> bool {
        self.storage_slot_number.is_none() && self.drive_slot_number.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(s: &str) -> VolumeTag {
        VolumeTag::parse(s).unwrap()
    }

    #[test]
    fn test_new_media_is_external() {
        let media = Media::new(tag("000063L7"));
        assert!(media.is_external());
        assert!(!media.is_cleaner);
        assert_eq!(media.capacity, None);
    }

    #[test]
    fn test_cleaner_flag_derived_from_tag() {
        assert!(Media::new(tag("CLN001L7")).is_cleaner);
        assert!(!Media::new(tag("000063L7")).is_cleaner);
    }

    #[test]
    fn test_location_is_exclusive() {
        let mut media = Media::in_slot(tag("000063L7"), 10);
        assert_eq!(media.storage_slot_number, Some(10));

        media.move_to_drive(1);
        assert_eq!(media.storage_slot_number, None);
        assert_eq!(media.drive_slot_number, Some(1));

        media.move_to_slot(12);
        assert_eq!(media.drive_slot_number, None);
        assert_eq!(media.storage_slot_number, Some(12));
    }

    #[test]
    fn test_serializes_pascal_case() {
        let media = Media::in_slot(tag("000063L7"), 10);
        let json = serde_json::to_value(&media).unwrap();
        assert_eq!(json["VolumeTag"], "000063L7");
        assert_eq!(json["StorageSlotNumber"], 10);
        assert_eq!(json["IsCleaner"], false);
    }
}
