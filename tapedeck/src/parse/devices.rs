//! Parsers for device discovery output (`ltfs -o device_list`, `ls -l /dev/sg`).

use regex::Regex;
use std::sync::OnceLock;

/// One tape drive reported by `ltfs -o device_list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceListing {
    /// Device node, e.g. `/dev/sg3`.
    pub device_name: String,
    /// Element address, e.g. `1.0.0.0`.
    pub address: String,
    /// Drive serial number when the tool reports one.
    pub serial: Option<String>,
}

fn device_list_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"Device Name *= *(?P<dev>[^\s,(]+) *\((?P<addr>[\d.]+)\)(?:.*Serial Number *= *(?P<serial>[A-Za-z0-9]+))?",
        )
        .expect("device list regex")
    })
}

/// Extract drive listings from `ltfs -o device_list` output.
pub fn parse_device_list(output: &str) -> Vec<DeviceListing> {
    output
        .lines()
        .filter_map(|line| {
            let captures = device_list_regex().captures(line)?;
            Some(DeviceListing {
                device_name: captures["dev"].to_string(),
                address: captures["addr"].to_string(),
                serial: captures.name("serial").map(|m| m.as_str().to_string()),
            })
        })
        .collect()
}

/// Kind of device behind an SG symlink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SgKind {
    /// A tape drive; carries the serial embedded in the link name.
    Tape {
        /// Serial parsed from the trailing `_<serial>` of the link name.
        serial: String,
    },
    /// The media changer.
    Changer,
}

/// One `Tape-...` / `Changer-...` symlink from `ls -l /dev/sg`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SgEntry {
    /// Device kind and identity.
    pub kind: SgKind,
    /// Resolved generic SCSI node, e.g. `/dev/sg5`.
    pub device: String,
}

fn sg_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?P<kind>Tape|Changer)-(?P<name>\S+)\s+->\s+\S*?sg(?P<num>\d+)")
            .expect("sg listing regex")
    })
}

/// Map udev `Tape-.../Changer-...` symlinks to their `/dev/sg{N}` targets.
pub fn parse_sg_listing(output: &str) -> Vec<SgEntry> {
    output
        .lines()
        .filter_map(|line| {
            let captures = sg_regex().captures(line)?;
            let device = format!("/dev/sg{}", &captures["num"]);
            let kind = match &captures["kind"] {
                "Changer" => SgKind::Changer,
                _ => {
                    let name = &captures["name"];
                    let serial = name.rsplit('_').next().unwrap_or(name).to_string();
                    SgKind::Tape { serial }
                }
            };
            Some(SgEntry { kind, device })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_list() {
        let output = "\
LTFS30263I Device Name = /dev/sg3 (1.0.0.0), Vendor ID = IBM, Product ID = ULT3580-TD7, Serial Number = 10WT012345, Product Name = TS2270\n\
LTFS30263I Device Name = /dev/sg4 (2.0.0.0), Vendor ID = IBM, Product ID = ULT3580-TD7, Serial Number = 10WT054321, Product Name = TS2270\n\
unrelated noise\n";

        let listings = parse_device_list(output);
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].device_name, "/dev/sg3");
        assert_eq!(listings[0].address, "1.0.0.0");
        assert_eq!(listings[0].serial.as_deref(), Some("10WT012345"));
        assert_eq!(listings[1].device_name, "/dev/sg4");
    }

    #[test]
    fn test_parse_device_list_without_serial() {
        let listings = parse_device_list("Device Name = /dev/sg9 (3.0.0.0)\n");
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].serial, None);
    }

    #[test]
    fn test_parse_sg_listing() {
        let output = "\
total 0\n\
lrwxrwxrwx 1 root root 9 Jan  5 10:02 Changer-QUANTUM_G255XXA01 -> ../../sg5\n\
lrwxrwxrwx 1 root root 9 Jan  5 10:02 Tape-IBM_ULT3580-TD7_10WT012345 -> ../../sg3\n\
lrwxrwxrwx 1 root root 9 Jan  5 10:02 Tape-IBM_ULT3580-TD7_10WT054321 -> ../../sg4\n";

        let entries = parse_sg_listing(output);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].kind, SgKind::Changer);
        assert_eq!(entries[0].device, "/dev/sg5");
        assert_eq!(
            entries[1].kind,
            SgKind::Tape {
                serial: "10WT012345".to_string()
            }
        );
        assert_eq!(entries[1].device, "/dev/sg3");
    }

    #[test]
    fn test_sg_listing_ignores_unrelated_lines() {
        assert!(parse_sg_listing("crw-rw---- 1 root tape /dev/sg0\n").is_empty());
    }
}
