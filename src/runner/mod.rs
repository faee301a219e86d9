//! Stage runner: turns a (stage, unit, host) triple into an external process.
//!
//! # Architecture
//!
//! ```text
//! StageSpec + ProcessingUnit + InvocationContext
//!        │  ArgumentContract::render
//!        ▼
//!   CommandLine ──► localhost: tokio::process
//!               └─► remote:    ssh -o BatchMode=yes <host> '<shell string>'
//! ```
//!
//! The [`StageInvoker`] trait is the seam between scheduling and execution;
//! [`ProcessInvoker`] is the production implementation.

pub mod command;
pub mod contract;
pub mod invoker;
pub mod stage;

pub use command::{shell_quote, CommandLine};
pub use contract::{ArgSlot, ArgumentContract, InvocationContext, CONTRACT_VERSION};
pub use invoker::{InvocationOutcome, ProcessInvoker, StageInvoker};
pub use stage::{default_stages, StageSpec, ARC_STAGE_PREFIX};
