//! Campaign pipeline: configuration, validation and execution.
//!
//! # Pipeline Flow
//!
//! 1. **Configuration**: a [`Workflow`] is built directly or from a
//!    [`CampaignConfig`] file
//! 2. **Validation**: period, sensors, sampling, hosts and stages are checked
//!    before anything runs
//! 3. **Unit generation**: the sensor catalog crosses every sensor with the
//!    months of the period it is valid for
//! 4. **Dispatch**: stages run in order; completed units are skipped when
//!    history is enabled
//! 5. **Summary**: a [`RunResult`] is written to `<output_root>/runs/`
//!
//! # Example
//!
//! ```rust,ignore
//! use mms_workflow::pipeline::{RunOptions, Workflow};
//! use mms_workflow::runner::ProcessInvoker;
//! use std::sync::Arc;
//!
//! let mut workflow = Workflow::new("mms6b", "2012-07-02", "2015-01-01");
//! workflow
//!     .add_primary_sensor("amsr2", "2012-07-02", "2015-04-01")
//!     .set_samples_per_month(3_000_000);
//!
//! let options = RunOptions::new("mmd6")
//!     .with_hosts([("localhost", 48)])
//!     .with_calls([
//!         ("sampling-start.sh", 1),
//!         ("coincidence-start.sh", 1),
//!         ("sub-start.sh", 12),
//!         ("mmd-start.sh", 6),
//!     ])
//!     .with_history(true)
//!     .without_arc(true);
//!
//! let result = workflow.run(options, Arc::new(ProcessInvoker::new())).await?;
//! ```

pub mod config;
pub mod result;
pub mod workflow;

pub use config::{CampaignConfig, PeriodConfig};
pub use result::RunResult;
pub use workflow::{RunOptions, SensorDeclaration, Workflow, WorkflowRun, WorkflowState};
