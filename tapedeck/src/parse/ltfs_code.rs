//! LTFS diagnostic code extraction.
//!
//! Every LTFS tool prefixes its messages with codes like `LTFS11031I`.
//! The extractor pulls the first code out of a line; the tracker
//! accumulates codes across all lines of one invocation, where the last
//! interpreted code wins (later messages override earlier ones).

use crate::model::LibraryOperationStatus;
use regex::Regex;
use std::sync::{Mutex, OnceLock};

fn code_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"LTFS\d{5}[EI]").expect("ltfs code regex"))
}

/// First `LTFSnnnnnX` code in the line, if any.
pub fn extract_ltfs_code(line: &str) -> Option<&str> {
    code_regex().find(line).map(|found| &line[found.range()])
}

/// First code in the line that maps to an interpreted status.
pub fn extract_ltfs_status(line: &str) -> Option<LibraryOperationStatus> {
    extract_ltfs_code(line).and_then(LibraryOperationStatus::from_code)
}

/// Accumulates interpreted codes over the lines of one tool invocation.
#[derive(Debug, Default)]
pub struct LtfsCodeTracker {
    latest: Mutex<Option<LibraryOperationStatus>>,
}

impl LtfsCodeTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one output line; remembers the status of the last
    /// interpretable code seen.
    pub fn observe(&self, line: &str) {
        if let Some(status) = extract_ltfs_status(line) {
            *self.latest.lock().unwrap() = Some(status);
        }
    }

    /// Status of the last interpreted code, if any code was seen.
    pub fn latest(&self) -> Option<LibraryOperationStatus> {
        *self.latest.lock().unwrap()
    }
}
