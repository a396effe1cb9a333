//! In-memory model of the physical library and its refresh loop.
//!
//! [`LibraryState`] owns the drives and slots behind one coarse mutex;
//! snapshot reads return by-value arrays so readers never race with
//! structural updates. [`StatusCollector`] keeps the state in sync with
//! reality by running `mtx status` (rate-limited) and, on Windows,
//! `LtfsCmdDrives`.

mod collector;
mod state;

pub use collector::{CollectorError, Platform, StatusCollector, STATUS_CACHE_WINDOW};
pub use state::LibraryState;
