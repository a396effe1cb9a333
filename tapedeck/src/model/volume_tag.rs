//! Volume tag handling.
//!
//! A volume tag is the 8-character barcode label on an LTO cartridge:
//! a 6-character serial followed by a 2-character generation code
//! (`000063L7` = serial `000063`, generation `L7`). Cleaning cartridges
//! are labelled `CLN...` or `...CL`.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Exact length of a volume tag barcode.
pub const VOLUME_TAG_LEN: usize = 8;

/// Error returned when a string is not a valid volume tag.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid volume tag '{tag}': expected {VOLUME_TAG_LEN} printable ASCII characters")]
pub struct InvalidVolumeTag {
    /// The rejected input.
    pub tag: String,
}

/// A validated 8-character cartridge barcode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct VolumeTag(String);

impl VolumeTag {
    /// Parse a volume tag, rejecting anything that is not exactly
    /// 8 printable ASCII characters.
    pub fn parse(tag: &str) -> Result<Self, InvalidVolumeTag> {
        if tag.len() == VOLUME_TAG_LEN && tag.bytes().all(|b| b.is_ascii_graphic()) {
            Ok(Self(tag.to_string()))
        } else {
            Err(InvalidVolumeTag {
                tag: tag.to_string(),
            })
        }
    }

    /// The full 8-character tag.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 6-character tape serial (first six characters).
    pub fn serial(&self) -> &str {
        &self.0[..6]
    }

    /// The 2-character generation code (last two characters), e.g. `L7`.
    pub fn generation(&self) -> &str {
        &self.0[6..]
    }

    /// Native (uncompressed) capacity in bytes for known LTO generations.
    pub fn native_capacity(&self) -> Option<u64> {
        match self.generation() {
            "L5" => Some(150_000_000_000),
            "L6" => Some(250_000_000_000),
            "L7" => Some(600_000_000_000),
            "L8" => Some(1_200_000_000_000),
            "L9" => Some(1_800_000_000_000),
            _ => None,
        }
    }

    /// Whether this tag labels a cleaning cartridge (`CLN...` or `...CL`).
    pub fn is_cleaner(&self) -> bool {
        self.0.starts_with("CLN") || self.0.ends_with("CL")
    }
}

impl FromStr for VolumeTag {
    type Err = InvalidVolumeTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for VolumeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for VolumeTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_tag() {
        let tag = VolumeTag::parse("000063L7").unwrap();
        assert_eq!(tag.serial(), "000063");
        assert_eq!(tag.generation(), "L7");
        assert_eq!(tag.as_str(), "000063L7");
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert!(VolumeTag::parse("000063L").is_err());
        assert!(VolumeTag::parse("000063L77").is_err());
        assert!(VolumeTag::parse("").is_err());
    }

    #[test]
    fn test_parse_rejects_non_printable() {
        assert!(VolumeTag::parse("00006\tL7").is_err());
        assert!(VolumeTag::parse("00006 L7").is_err());
    }

    #[test]
    fn test_native_capacity_per_generation() {
        let capacity = |tag: &str| VolumeTag::parse(tag).unwrap().native_capacity();
        assert_eq!(capacity("000001L5"), Some(150_000_000_000));
        assert_eq!(capacity("000001L6"), Some(250_000_000_000));
        assert_eq!(capacity("000001L7"), Some(600_000_000_000));
        assert_eq!(capacity("000001L8"), Some(1_200_000_000_000));
        assert_eq!(capacity("000001L9"), Some(1_800_000_000_000));
        assert_eq!(capacity("000001L4"), None);
    }

    #[test]
    fn test_cleaner_detection() {
        assert!(VolumeTag::parse("CLN001L7").unwrap().is_cleaner());
        assert!(VolumeTag::parse("000001CL").unwrap().is_cleaner());
        assert!(!VolumeTag::parse("000063L7").unwrap().is_cleaner());
    }

    #[test]
    fn test_serde_round_trip() {
        let tag = VolumeTag::parse("000063L7").unwrap();
        let json = serde_json::to_string(&tag).unwrap();
        assert_eq!(json, "\"000063L7\"");
        let back: VolumeTag = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tag);
    }

    #[test]
    fn test_deserialize_rejects_invalid() {
        assert!(serde_json::from_str::<VolumeTag>("\"short\"").is_err());
    }
}
