//! Parser for the Windows `LtfsCmdDrives` listing.

use crate::model::LtfsStatus;
use regex::Regex;
use std::sync::OnceLock;

/// One drive row from `LtfsCmdDrives`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowsDriveRow {
    /// Assigned drive letter, when the drive is bound to one.
    pub assigned_letter: Option<char>,
    /// SCSI address, e.g. `1.0.0.0`.
    pub address: String,
    /// Drive serial number.
    pub serial: String,
    /// LTFS state by name; `None` when the name is not recognized.
    pub status: Option<LtfsStatus>,
}

fn drives_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<assigned>[A-Za-z]?)\s+(?P<address>[\d.]+)\s+(?P<serial>\S+)\s+(?P<status>[A-Z_]+)")
            .expect("windows drives regex")
    })
}

/// Parse the drive table printed by `LtfsCmdDrives`.
pub fn parse_windows_drives(output: &str) -> Vec<WindowsDriveRow> {
    output
        .lines()
        .filter_map(|line| {
            let captures = drives_regex().captures(line)?;
            Some(WindowsDriveRow {
                assigned_letter: captures["assigned"].chars().next(),
                address: captures["address"].to_string(),
                serial: captures["serial"].to_string(),
                status: captures["status"].parse().ok(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = "\
Letter  Address   Serial      Status\n\
Z       1.0.0.0   10WT012345  LTFS_MEDIA\n\
        2.0.0.0   10WT054321  NO_MEDIA\n\
Y       3.0.0.0   10WT099999  MEDIA_NOT_READY\n";

    #[test]
    fn test_parses_assigned_and_unassigned_rows() {
        let rows = parse_windows_drives(FIXTURE);
        assert_eq!(rows.len(), 3);

        assert_eq!(rows[0].assigned_letter, Some('Z'));
        assert_eq!(rows[0].address, "1.0.0.0");
        assert_eq!(rows[0].serial, "10WT012345");
        assert_eq!(rows[0].status, Some(LtfsStatus::LtfsMedia));

        assert_eq!(rows[1].assigned_letter, None);
        assert_eq!(rows[1].status, Some(LtfsStatus::NoMedia));

        assert_eq!(rows[2].status, Some(LtfsStatus::MediaNotReady));
    }

    #[test]
    fn test_unknown_status_name_yields_none() {
        let rows = parse_windows_drives("Z  1.0.0.0  ABC  SOMETHING_NEW\n");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, None);
    }

    #[test]
    fn test_header_line_is_ignored() {
        let rows = parse_windows_drives("Letter  Address  Serial  Status\n");
        assert!(rows.is_empty());
    }
}
