//! Parser for `mtx status` element listings.

use super::ParseError;
use crate::model::VolumeTag;
use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;

/// Kind of SCSI element a status line describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// A cartridge slot (`Storage Element`).
    Storage,
    /// A tape drive (`Data Transfer Element`).
    DataTransfer,
}

/// One element row of `mtx status`.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementRecord {
    /// Storage slot or drive.
    pub kind: ElementKind,
    /// Element number.
    pub slot_number: u32,
    /// Whether the element is an IMPORT/EXPORT port.
    pub is_io: bool,
    /// Whether a cartridge occupies the element.
    pub is_full: bool,
    /// For drives: the storage slot the cartridge was loaded from.
    pub origin_slot: Option<u32>,
    /// Barcode of the cartridge, when the library read one.
    pub volume_tag: Option<VolumeTag>,
}

fn element_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?P<kind>Storage|Data Transfer) Element +(?P<slot>\d+) *(?P<io>IMPORT/EXPORT)? *:(?P<state>[^\s:]+)(?: +\(Storage Element (?P<origin>\d+) Loaded\))?(?: *:VolumeTag *= *(?P<tag>\S+)?)?",
        )
        .expect("mtx element regex")
    })
}

/// Parse the element rows out of an `mtx status` dump.
///
/// Unknown lines are skipped. The sentinel `Sense Key=Not Ready` anywhere
/// in the output is a hard error: the robot cannot be trusted to report
/// element state while it is not ready.
pub fn parse_mtx_status(output: &str) -> Result<Vec<ElementRecord>, ParseError> {
    if output.contains("Sense Key=Not Ready") {
        return Err(ParseError::ChangerNotReady);
    }

    let mut records = Vec::new();
    for line in output.lines() {
        let Some(captures) = element_regex().captures(line) else {
            continue;
        };

        let kind = match &captures["kind"] {
            "Storage" => ElementKind::Storage,
            _ => ElementKind::DataTransfer,
        };
        let Ok(slot_number) = captures["slot"].parse::<u32>() else {
            continue;
        };

        let volume_tag = captures.name("tag").and_then(|tag| {
            match VolumeTag::parse(tag.as_str()) {
                Ok(tag) => Some(tag),
                Err(err) => {
                    warn!(line, "ignoring malformed volume tag: {err}");
                    None
                }
            }
        });

        records.push(ElementRecord {
            kind,
            slot_number,
            is_io: captures.name("io").is_some(),
            is_full: &captures["state"] == "Full",
            origin_slot: captures
                .name("origin")
                .and_then(|origin| origin.as_str().parse().ok()),
            volume_tag,
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = "  Storage Changer /dev/sg5:2 Drives, 24 Slots ( 4 Import/Export )\n\
Data Transfer Element 0:Empty\n\
Data Transfer Element 1:Full (Storage Element 10 Loaded):VolumeTag = 000063L7\n\
      Storage Element 1:Full :VolumeTag=A00001L5\n\
      Storage Element 2:Empty\n\
      Storage Element 10:Empty\n\
      Storage Element 21 IMPORT/EXPORT:Empty\n\
      Storage Element 22 IMPORT/EXPORT:Full :VolumeTag=CLN010CL\n";

    #[test]
    fn test_parses_drives_and_slots() {
        let records = parse_mtx_status(FIXTURE).unwrap();
        assert_eq!(records.len(), 7);

        let drive = &records[1];
        assert_eq!(drive.kind, ElementKind::DataTransfer);
        assert_eq!(drive.slot_number, 1);
        assert!(drive.is_full);
        assert_eq!(drive.origin_slot, Some(10));
        assert_eq!(drive.volume_tag.as_ref().unwrap().as_str(), "000063L7");

        let empty_drive = &records[0];
        assert!(!empty_drive.is_full);
        assert_eq!(empty_drive.volume_tag, None);
    }

    #[test]
    fn test_detects_io_ports() {
        let records = parse_mtx_status(FIXTURE).unwrap();
        let io_port = records
            .iter()
            .find(|record| record.slot_number == 22 && record.kind == ElementKind::Storage)
            .unwrap();
        assert!(io_port.is_io);
        assert!(io_port.is_full);
        assert_eq!(io_port.volume_tag.as_ref().unwrap().as_str(), "CLN010CL");

        let plain = records
            .iter()
            .find(|record| record.slot_number == 1 && record.kind == ElementKind::Storage)
            .unwrap();
        assert!(!plain.is_io);
    }

    #[test]
    fn test_unknown_lines_are_skipped() {
        let records = parse_mtx_status("mtx: some banner\nnothing here\n").unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_malformed_tag_is_dropped_but_element_kept() {
        let records =
            parse_mtx_status("      Storage Element 3:Full :VolumeTag=BADTAG\n").unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_full);
        assert_eq!(records[0].volume_tag, None);
    }

    #[test]
    fn test_sense_key_not_ready_is_fatal() {
        let output = "mtx: Request Sense: Sense Key=Not Ready, ASC=04, ASCQ=01\n";
        assert_eq!(
            parse_mtx_status(output),
            Err(ParseError::ChangerNotReady)
        );
    }
}
