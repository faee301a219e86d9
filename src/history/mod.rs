//! Persistent record of which units completed which stages.
//!
//! The history makes campaign runs resumable: a unit that completed a stage in
//! an earlier run is skipped for that stage when history is enabled.
//! Reprocessing is always safe because stage programs are required to
//! overwrite their outputs in place.

pub mod record;
pub mod store;

pub use record::{HistoryRecord, HistoryStatus};
pub use store::{HistoryStore, HISTORY_EXTENSION};
