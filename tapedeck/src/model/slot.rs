//! A numbered cartridge slot.

use super::media::Media;
use serde::Serialize;

/// A storage element of the library: either a plain cartridge slot or an
/// I/O port used to insert and remove cartridges without opening the rack.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StorageSlot {
    /// Fixed element number reported by `mtx status`.
    pub slot_number: u32,
    /// Whether this is an IMPORT/EXPORT port.
    pub is_io: bool,
    /// Cartridge currently in the slot.
    pub media: Option<Media>,
}

impl StorageSlot {
    /// Create an empty slot.
    pub fn new(slot_number: u32, is_io: bool) -> Self {
        Self {
            slot_number,
            is_io,
            media: None,
        }
    }

    /// Whether a cartridge sits in the slot.
    pub fn is_full(&self) -> bool {
        self.media.is_some()
    }

    /// Volume tag of the cartridge in the slot, if any.
    pub fn volume_tag(&self) -> Option<&str> {
        self.media.as_ref().map(|m| m.volume_tag.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VolumeTag;

    #[test]
    fn test_empty_slot() {
        let slot = StorageSlot::new(10, false);
        assert!(!slot.is_full());
        assert_eq!(slot.volume_tag(), None);
    }

    #[test]
    fn test_full_slot_reports_tag() {
        let mut slot = StorageSlot::new(10, false);
        slot.media = Some(Media::in_slot(VolumeTag::parse("000063L7").unwrap(), 10));
        assert!(slot.is_full());
        assert_eq!(slot.volume_tag(), Some("000063L7"));
    }
}
