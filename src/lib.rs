//! mms-workflow: orchestration engine for satellite sensor matchup campaigns.
//!
//! This library turns a declarative campaign (period, primary sensors,
//! sampling density, stage programs, worker hosts) into an ordered, resumable
//! and partially parallel execution of external stage programs.

// Core modules
pub mod catalog;
pub mod cli;
pub mod error;
pub mod history;
pub mod period;
pub mod pipeline;
pub mod runner;
pub mod scheduler;
pub mod svr;

// Re-export commonly used types
pub use catalog::{PrimarySensor, ProcessingUnit, SamplingConfig, SensorCatalog, UnitKey};
pub use error::{ConfigurationError, HistoryError, InvokeError, PeriodError};
pub use period::{MonthRange, Period};
pub use pipeline::{CampaignConfig, RunOptions, RunResult, Workflow, WorkflowState};
