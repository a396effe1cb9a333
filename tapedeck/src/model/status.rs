//! Status enums for drives and operations.
//!
//! [`LtfsStatus`] is the per-drive LTFS state as reported by the tooling.
//! [`LibraryOperationStatus`] is the outcome space of an orchestrated
//! operation: synthetic control results produced by the engine itself plus
//! the closed set of LTFS diagnostic codes the engine interprets. Codes are
//! propagated verbatim so callers see the vendor diagnostic.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// LTFS state of a tape drive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LtfsStatus {
    /// Drive has not been observed yet.
    #[default]
    Reset,

    /// No cartridge in the drive.
    NoMedia,

    /// An LTFS volume is present (mounted or mountable).
    LtfsMedia,

    /// Cartridge present but carries no LTFS volume.
    LtfsUnformatted,

    /// LTFS volume present but the index is inconsistent.
    LtfsInconsistent,

    /// Cartridge is write-protected.
    WriteProtected,

    /// Cartridge present, drive still positioning or calibrating.
    MediaNotReady,
}

impl LtfsStatus {
    /// Whether this status implies a cartridge is (or may be) in the drive.
    ///
    /// Any transition into such a status clears the drive's released flag.
    pub fn media_present(&self) -> bool {
        !matches!(self, Self::Reset | Self::NoMedia)
    }
}

impl fmt::Display for LtfsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Reset => "RESET",
            Self::NoMedia => "NO_MEDIA",
            Self::LtfsMedia => "LTFS_MEDIA",
            Self::LtfsUnformatted => "LTFS_UNFORMATTED",
            Self::LtfsInconsistent => "LTFS_INCONSISTENT",
            Self::WriteProtected => "WRITE_PROTECTED",
            Self::MediaNotReady => "MEDIA_NOT_READY",
        };
        f.write_str(name)
    }
}

impl FromStr for LtfsStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RESET" => Ok(Self::Reset),
            "NO_MEDIA" => Ok(Self::NoMedia),
            "LTFS_MEDIA" => Ok(Self::LtfsMedia),
            "LTFS_UNFORMATTED" => Ok(Self::LtfsUnformatted),
            "LTFS_INCONSISTENT" => Ok(Self::LtfsInconsistent),
            "WRITE_PROTECTED" | "LTFS_READ_ONLY" => Ok(Self::WriteProtected),
            "MEDIA_NOT_READY" => Ok(Self::MediaNotReady),
            _ => Err(()),
        }
    }
}

/// Outcome of an orchestrated library operation.
///
/// Synthetic variants are produced by the engine; `Ltfs*` variants are
/// diagnostic codes extracted from tool output and passed through to the
/// caller unchanged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LibraryOperationStatus {
    /// Nothing needed to be done; the requested state already held.
    NoAction,
    /// Operation completed successfully.
    Succeeded,
    /// Operation failed for a reason without a dedicated LTFS code.
    Failed,
    /// Operation is still running; poll again by trace id.
    #[default]
    Ongoing,
    /// The addressed drive is not configured.
    DriveNotFound,
    /// The requested cartridge is not in the library.
    TapeNotFound,
    /// The operation is not supported on this platform.
    NotSupported,
    /// The changer lock is held by another operation.
    MtxBusy,
    /// The drive lock is held (or an operation is in flight) for this drive.
    DriveBusy,

    /// Cannot open the tape device.
    #[serde(rename = "LTFS10004E")]
    Ltfs10004E,
    /// The drive or the tape is damaged.
    #[serde(rename = "LTFS11006E")]
    Ltfs11006E,
    /// Volume mounted successfully.
    #[serde(rename = "LTFS11031I")]
    Ltfs11031I,
    /// Volume unmounted successfully.
    #[serde(rename = "LTFS11034I")]
    Ltfs11034I,
    /// Cartridge is write-protected.
    #[serde(rename = "LTFS11095E")]
    Ltfs11095E,
    /// The drive or the tape is damaged.
    #[serde(rename = "LTFS11331E")]
    Ltfs11331E,
    /// Cannot open the tape device.
    #[serde(rename = "LTFS12012E")]
    Ltfs12012E,
    /// No medium in the drive.
    #[serde(rename = "LTFS12016E")]
    Ltfs12016E,
    /// The drive or the tape is damaged.
    #[serde(rename = "LTFS12019E")]
    Ltfs12019E,
    /// Rewind failed while releasing the device.
    #[serde(rename = "LTFS12035E")]
    Ltfs12035E,
    /// Volume formatted successfully.
    #[serde(rename = "LTFS15024I")]
    Ltfs15024I,
    /// Volume is inconsistent.
    #[serde(rename = "LTFS16021E")]
    Ltfs16021E,
    /// Volume is consistent.
    #[serde(rename = "LTFS16022I")]
    Ltfs16022I,
    /// Volume is inconsistent (journal replay required).
    #[serde(rename = "LTFS16087E")]
    Ltfs16087E,
    /// Cartridge carries no LTFS volume.
    #[serde(rename = "LTFS17168E")]
    Ltfs17168E,
    /// Windows LTFS stack error.
    #[serde(rename = "LTFS60086E")]
    Ltfs60086E,
    /// Windows LTFS stack error.
    #[serde(rename = "LTFS60201E")]
    Ltfs60201E,
    /// Drive state was changed by another session.
    #[serde(rename = "LTFS60233E")]
    Ltfs60233E,
}

impl LibraryOperationStatus {
    /// Map an `LTFSnnnnnX` code string to its status, if it is one of the
    /// codes the engine interprets.
    pub fn from_code(code: &str) -> Option<Self> {
        let status = match code {
            "LTFS10004E" => Self::Ltfs10004E,
            "LTFS11006E" => Self::Ltfs11006E,
            "LTFS11031I" => Self::Ltfs11031I,
            "LTFS11034I" => Self::Ltfs11034I,
            "LTFS11095E" => Self::Ltfs11095E,
            "LTFS11331E" => Self::Ltfs11331E,
            "LTFS12012E" => Self::Ltfs12012E,
            "LTFS12016E" => Self::Ltfs12016E,
            "LTFS12019E" => Self::Ltfs12019E,
            "LTFS12035E" => Self::Ltfs12035E,
            "LTFS15024I" => Self::Ltfs15024I,
            "LTFS16021E" => Self::Ltfs16021E,
            "LTFS16022I" => Self::Ltfs16022I,
            "LTFS16087E" => Self::Ltfs16087E,
            "LTFS17168E" => Self::Ltfs17168E,
            "LTFS60086E" => Self::Ltfs60086E,
            "LTFS60201E" => Self::Ltfs60201E,
            "LTFS60233E" => Self::Ltfs60233E,
            _ => return None,
        };
        Some(status)
    }

    /// Whether the operation ended well.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::Succeeded
                | Self::NoAction
                | Self::Ltfs15024I
                | Self::Ltfs16022I
                | Self::Ltfs11034I
                | Self::Ltfs11031I
        )
    }

    /// Whether the cartridge can still be ejected despite this status.
    pub fn is_ejectable(&self) -> bool {
        matches!(
            self,
            Self::Ltfs11331E
                | Self::Ltfs12035E
                | Self::Ltfs12016E
                | Self::Ltfs11006E
                | Self::Ltfs12019E
        )
    }

    /// Whether this is a definitive error the engine will not recover from.
    pub fn is_finally_error(&self) -> bool {
        matches!(
            self,
            Self::Ltfs10004E
                | Self::Ltfs11006E
                | Self::Ltfs11095E
                | Self::Ltfs11331E
                | Self::Ltfs12012E
                | Self::Ltfs12016E
                | Self::Ltfs12019E
                | Self::Ltfs12035E
                | Self::Ltfs16021E
                | Self::Ltfs16087E
                | Self::Ltfs17168E
                | Self::Ltfs60086E
                | Self::Ltfs60201E
                | Self::Ltfs60233E
        )
    }

    /// Whether the operation has reached a final state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Ongoing)
    }
}

impl fmt::Display for LibraryOperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoAction => "NoAction",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Ongoing => "Ongoing",
            Self::DriveNotFound => "DriveNotFound",
            Self::TapeNotFound => "TapeNotFound",
            Self::NotSupported => "NotSupported",
            Self::MtxBusy => "MtxBusy",
            Self::DriveBusy => "DriveBusy",
            Self::Ltfs10004E => "LTFS10004E",
            Self::Ltfs11006E => "LTFS11006E",
            Self::Ltfs11031I => "LTFS11031I",
            Self::Ltfs11034I => "LTFS11034I",
            Self::Ltfs11095E => "LTFS11095E",
            Self::Ltfs11331E => "LTFS11331E",
            Self::Ltfs12012E => "LTFS12012E",
            Self::Ltfs12016E => "LTFS12016E",
            Self::Ltfs12019E => "LTFS12019E",
            Self::Ltfs12035E => "LTFS12035E",
            Self::Ltfs15024I => "LTFS15024I",
            Self::Ltfs16021E => "LTFS16021E",
            Self::Ltfs16022I => "LTFS16022I",
            Self::Ltfs16087E => "LTFS16087E",
            Self::Ltfs17168E => "LTFS17168E",
            Self::Ltfs60086E => "LTFS60086E",
            Self::Ltfs60201E => "LTFS60201E",
            Self::Ltfs60233E => "LTFS60233E",
        };
        f.write_str(name)
    }
}
