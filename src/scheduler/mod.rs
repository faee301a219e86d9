//! Host slots and stage dispatch.
//!
//! ```text
//!   units ──► Dispatcher ── stage 1 ──► SlotPool ──► StageInvoker (host#slot)
//!                 │           (drain, flush history)
//!                 └──────── stage 2 ──► ...
//! ```
//!
//! - **HostSpec / SlotPool**: the worker hosts of a run and the bounded,
//!   round-robin lease of their slots
//! - **Dispatcher**: sequences stages, skips completed or blocked units,
//!   applies retries and the failure tolerance
//! - **ProgressMonitor**: periodic progress logging during dispatch

pub mod dispatcher;
pub mod hosts;
pub mod progress;

pub use dispatcher::{
    DispatchReport, Dispatcher, StageReport, UnitOutcome, UnitResult, DEFAULT_PROGRESS_INTERVAL,
};
pub use hosts::{fill_order, total_slots, HostSlot, HostSpec, SlotGuard, SlotPool, LOCALHOST};
pub use progress::{ProgressCounters, ProgressMonitor, ProgressSnapshot};
