//! Run states, outcomes and the report handed back to the caller

use crate::error::CleanupError;
use crate::status::StatusSnapshot;
use crate::transfer::{DownloadSummary, ResourceFileRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Position of a run in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    Created,
    DependenciesResolved,
    FilesUploaded,
    PoolReady,
    JobCreated,
    TasksSubmitted,
    Monitoring,
    Succeeded,
    TimedOut,
    Failed,
    Cancelled,
    CleanedUp,
}

impl RunState {
    pub fn is_terminal_outcome(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::TimedOut | Self::Failed | Self::Cancelled
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::DependenciesResolved => "dependencies-resolved",
            Self::FilesUploaded => "files-uploaded",
            Self::PoolReady => "pool-ready",
            Self::JobCreated => "job-created",
            Self::TasksSubmitted => "tasks-submitted",
            Self::Monitoring => "monitoring",
            Self::Succeeded => "succeeded",
            Self::TimedOut => "timed-out",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::CleanedUp => "cleaned-up",
        };
        f.write_str(name)
    }
}

/// A task that finished without success
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub task_id: String,
    pub exit_code: Option<i32>,
    /// Scheduling or preparation failure reported by the grid
    pub message: Option<String>,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.task_id)?;
        if let Some(code) = self.exit_code {
            write!(f, " exited with {code}")?;
        }
        if let Some(message) = &self.message {
            write!(f, " ({message})")?;
        }
        Ok(())
    }
}

/// Why a run ended in `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// One or more tasks exited non-zero or could not run
    TasksFailed { failures: Vec<TaskFailure> },
    /// The pool could not allocate usable nodes
    PoolResize { errors: Vec<String> },
    /// Monitoring hit a remote error that cannot be retried
    Remote { message: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TasksFailed { failures } => {
                let list = failures
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{} task(s) failed: {list}", failures.len())
            }
            Self::PoolResize { errors } => write!(f, "pool resize failed: {}", errors.join("; ")),
            Self::Remote { message } => write!(f, "remote error: {message}"),
        }
    }
}

/// Terminal result of monitoring; task failures and timeouts are data here
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    /// The deadline passed with tasks still pending; remote tasks may keep
    /// running
    TimedOut,
    Failed(FailureReason),
    Cancelled,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn state(&self) -> RunState {
        match self {
            Self::Succeeded => RunState::Succeeded,
            Self::TimedOut => RunState::TimedOut,
            Self::Failed(_) => RunState::Failed,
            Self::Cancelled => RunState::Cancelled,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => f.write_str("succeeded"),
            Self::TimedOut => f.write_str("timed out"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// What teardown removed and what it could not
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: Vec<String>,
    pub errors: Vec<CleanupError>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Everything a finished run reports back
#[derive(Debug, Clone)]
pub struct RunReport {
    pub pool_id: String,
    pub job_id: String,
    pub outcome: RunOutcome,
    /// Every state the run passed through, in order
    pub history: Vec<RunState>,
    pub pool_reused: bool,
    pub uploaded: Vec<ResourceFileRef>,
    pub polls: u32,
    /// The last snapshot fetched; consistent with one real point in time
    pub last_snapshot: Option<StatusSnapshot>,
    pub downloaded: DownloadSummary,
    pub cleanup: Option<CleanupReport>,
    pub statistics_path: Option<PathBuf>,
    /// Non-fatal problems: missing dependencies, failed downloads
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn final_state(&self) -> RunState {
        self.history.last().copied().unwrap_or(RunState::Created)
    }
}
