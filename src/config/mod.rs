//! Configuration types for batch execution
//!
//! - `settings` - Batch and storage account credentials
//! - `machine` - Machine spec, pool setup and application packages
//! - `command` - Console commands and executables run on nodes
//! - `plan` - The immutable [`ExecutionPlan`]
//! - `run_file` - YAML run files with environment overrides

pub mod command;
pub mod machine;
pub mod plan;
pub mod run_file;
pub mod settings;

pub use command::{BatchConsoleCommand, BatchExecutableInfo, SHARED_DIR_VAR, TASK_DIR_VAR};
pub use machine::{
    ApplicationPackageReference, AzureMachineConfig, ImageReference, MachineSpec, OsFamily,
    PoolSetup,
};
pub use plan::{BatchOutputContainer, ExecutionPlan, StatusFormat};
pub use run_file::{EnvLookup, ProcessEnv, RunFile};
pub use settings::{BatchAccountSettings, BatchEnvironment, StorageAccountSettings};
