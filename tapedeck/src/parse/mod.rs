//! Parsers for the weakly structured output of the external tools.
//!
//! Tool output is a stable-but-not-contractual interface, so every regex
//! lives here with fixture strings as ground truth in the tests. All
//! parsers are pure (`&str` → records) and ignore lines they do not
//! recognize rather than failing.

mod devices;
mod df;
mod ltfs_code;
mod mtx;
mod windows;

pub use devices::{parse_device_list, parse_sg_listing, DeviceListing, SgEntry, SgKind};
pub use df::{parse_df, size_to_bytes, LtfsMount};
pub use ltfs_code::{extract_ltfs_code, extract_ltfs_status, LtfsCodeTracker};
pub use mtx::{parse_mtx_status, ElementKind, ElementRecord};
pub use windows::{parse_windows_drives, WindowsDriveRow};

use thiserror::Error;

/// Errors a parser can surface.
///
/// Parsers skip unknown lines; an error means the tool reported a
/// condition the caller must handle, not a formatting surprise.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// `mtx` reported the changer as not ready.
    #[error("media changer is not ready (Sense Key=Not Ready)")]
    ChangerNotReady,
}
