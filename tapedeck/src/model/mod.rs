//! Domain model for the tape library.
//!
//! Pure data types shared by every other module: cartridges ([`Media`]),
//! tape drives ([`Drive`]), storage slots ([`StorageSlot`]), orchestrated
//! units of work ([`Operation`]) and the status enums that tie them to the
//! LTFS tooling. All snapshot types serialize to JSON with enums by name,
//! which is the wire format of the HTTP API.

mod drive;
mod media;
mod operation;
mod slot;
mod status;
mod volume_tag;

pub use drive::Drive;
pub use media::Media;
pub use operation::{LogEntry, Operation};
pub use slot::StorageSlot;
pub use status::{LibraryOperationStatus, LtfsStatus};
pub use volume_tag::{InvalidVolumeTag, VolumeTag};
