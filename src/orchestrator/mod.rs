//! Batch run orchestration
//!
//! A run moves through a fixed sequence of states:
//!
//! ```text
//! created -> dependencies-resolved -> files-uploaded -> pool-ready
//!         -> job-created -> tasks-submitted -> monitoring
//!         -> succeeded | timed-out | failed | cancelled
//!         -> cleaned-up (when cleanup is requested)
//! ```
//!
//! - `core` - [`ExecutionOrchestrator`], which owns the sequence
//! - `staging` - Pure construction of uploads, pool specs and task definitions
//! - `monitor` - The poll loop and terminal-outcome evaluation
//! - `state` - States, outcomes and the final [`RunReport`]
//! - `statistics` - Optional `statistics.json` written with the outputs

mod core;
pub mod monitor;
pub mod staging;
pub mod state;
pub mod statistics;


pub use core::ExecutionOrchestrator;
pub use state::{CleanupReport, FailureReason, RunOutcome, RunReport, RunState, TaskFailure};
pub use statistics::{RunStatistics, STATISTICS_FILE};
