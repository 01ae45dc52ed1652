//! # Batchrun
//!
//! Run a batch of command-line tasks on a pool of compute nodes: upload the
//! files the tasks need, provision a pool and a job, submit the tasks, watch
//! them until they finish or time out, collect their outputs and tear down
//! what was created.
//!
//! ## Usage
//!
//! ```bash
//! batchrun validate run.yml
//! batchrun run run.yml [--workspace DIR] [--no-cleanup]
//! ```
//!
//! ## Modules
//!
//! - `builder` - Staged construction of an [`ExecutionPlan`]
//! - `cli` - Argument parsing, command routing and terminal progress
//! - `clock` - Time source used for polling, backoff and deadlines
//! - `config` - Accounts, machines, commands and YAML run files
//! - `dependencies` - Manual and automatic dependency resolution
//! - `error` - Error taxonomy
//! - `grid` - Compute-grid capability and a local emulator
//! - `orchestrator` - The run lifecycle
//! - `status` - Status snapshots, reports and progress events
//! - `transfer` - Blob transfer capability, retries and a local store
//! - `testing` - Mocks, fixtures and a manual clock for tests
pub mod builder;
pub mod cli;
pub mod clock;
pub mod config;
pub mod dependencies;
pub mod error;
pub mod grid;
pub mod orchestrator;
pub mod status;
pub mod transfer;

pub mod testing;

pub use builder::StagedPlanBuilder;
pub use config::ExecutionPlan;
pub use error::{BatchError, BatchResult, ConfigurationError};
pub use orchestrator::{ExecutionOrchestrator, RunOutcome, RunReport, RunState};
