//! Error taxonomy for batch execution
//!
//! Configuration and provisioning problems abort a run before or during
//! setup. Transfer problems are retried and only surface once retries are
//! exhausted. Task failures and timeouts are never errors; they are part of
//! the [`RunOutcome`](crate::orchestrator::RunOutcome).

use std::path::PathBuf;
use thiserror::Error;

pub use crate::grid::GridError;
pub use crate::transfer::BlobError;

/// Result type for fallible batch operations
pub type BatchResult<T> = Result<T, BatchError>;

/// Top-level error surfaced by the orchestrator
#[derive(Error, Debug)]
pub enum BatchError {
    /// The plan is incomplete or contradictory
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Dependency resolution produced an unusable file set
    #[error("Dependency error: {0}")]
    Dependency(String),

    /// An upload or download failed after all retries
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Pool or job creation failed
    #[error("Provisioning of {resource} '{id}' failed: {source}")]
    Provisioning {
        resource: &'static str,
        id: String,
        #[source]
        source: GridError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BatchError {
    pub fn provisioning(resource: &'static str, id: impl Into<String>, source: GridError) -> Self {
        Self::Provisioning {
            resource,
            id: id.into(),
            source,
        }
    }

    /// Check if this error happened before any remote call was made
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    pub fn is_provisioning(&self) -> bool {
        matches!(self, Self::Provisioning { .. })
    }

    pub fn is_transfer(&self) -> bool {
        matches!(self, Self::Transfer(_))
    }
}

/// Validation failures raised by the plan builder and the run-file loader
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("missing required setting: {0}")]
    MissingSetting(&'static str),

    #[error("invalid value for {field}: {reason}")]
    InvalidSetting { field: &'static str, reason: String },

    #[error("predefined environment is not valid: {}", .0.join(", "))]
    InvalidEnvironment(Vec<String>),

    #[error("at least one task command is required")]
    NoTaskCommands,

    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    #[error("pool setup conflicts with machine config: {0}")]
    InconsistentPool(String),

    #[error("failed to read run file {path}: {reason}")]
    RunFile { path: PathBuf, reason: String },
}

impl ConfigurationError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            field,
            reason: reason.into(),
        }
    }
}

/// An upload or download that kept failing after every retry
#[derive(Error, Debug)]
#[error("{operation} of '{target}' failed after {attempts} attempt(s): {source}")]
pub struct TransferError {
    pub operation: TransferOperation,
    pub target: String,
    pub attempts: u32,
    #[source]
    pub source: BlobError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOperation {
    CreateContainer,
    Upload,
    Download,
}

impl std::fmt::Display for TransferOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::CreateContainer => "container creation",
            Self::Upload => "upload",
            Self::Download => "download",
        };
        f.write_str(name)
    }
}

/// A teardown step that failed; never changes the run's primary outcome
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to delete {resource} '{id}': {message}")]
pub struct CleanupError {
    pub resource: &'static str,
    pub id: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err: BatchError = ConfigurationError::NoTaskCommands.into();
        assert!(err.is_configuration());
        assert!(!err.is_provisioning());

        let err = BatchError::provisioning("pool", "p1", GridError::Capacity("quota".into()));
        assert!(err.is_provisioning());
        assert!(err.to_string().contains("pool 'p1'"));
    }

    #[test]
    fn test_invalid_environment_lists_problems() {
        let err = ConfigurationError::InvalidEnvironment(vec![
            "batch account key is empty".into(),
            "storage account name is empty".into(),
        ]);
        assert_eq!(
            err.to_string(),
            "predefined environment is not valid: batch account key is empty, storage account name is empty"
        );
    }

    #[test]
    fn test_transfer_error_display() {
        let err = TransferError {
            operation: TransferOperation::Upload,
            target: "app.py".into(),
            attempts: 3,
            source: BlobError::Transient("connection reset".into()),
        };
        assert_eq!(
            err.to_string(),
            "upload of 'app.py' failed after 3 attempt(s): transient storage failure: connection reset"
        );
    }
}
