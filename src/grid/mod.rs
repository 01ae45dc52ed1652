//! Compute-grid capability
//!
//! Pools, jobs, tasks and nodes are owned by the grid service and referenced
//! here only by identifier. Snapshots returned by [`ComputeGridClient`] are
//! fresh copies; callers never hold on to remote state between polls.

pub mod local;

pub use local::LocalComputeGrid;

use crate::config::{ApplicationPackageReference, MachineSpec};
use crate::transfer::{ResourceFileRef, Retryable};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Grid-side failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GridError {
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Quota or capacity exhausted; the caller has to intervene
    #[error("insufficient capacity: {0}")]
    Capacity(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("transient grid failure: {0}")]
    Transient(String),

    #[error("grid service error: {0}")]
    Remote(String),
}

impl GridError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl Retryable for GridError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Command run on every node when it joins the pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartTask {
    pub command_line: String,
    pub wait_for_success: bool,
}

/// Pool creation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSpec {
    pub id: String,
    pub machine: MachineSpec,
    pub task_slots_per_node: u32,
    pub application_packages: Vec<ApplicationPackageReference>,
    pub start_task: Option<StartTask>,
    /// Fail with `AlreadyExists` instead of reusing an existing pool
    pub must_not_exist: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolHandle {
    pub id: String,
    /// The pool existed before this request
    pub reused: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: String,
    pub pool_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub id: String,
}

/// Command run once per node, before the first task of a job lands on it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePreparation {
    pub command_line: String,
    /// Exit codes in `min_success_exit_code..=max_success_exit_code` count as
    /// success
    pub min_success_exit_code: i32,
    pub max_success_exit_code: i32,
}

impl NodePreparation {
    pub fn is_success(&self, exit_code: i32) -> bool {
        (self.min_success_exit_code..=self.max_success_exit_code).contains(&exit_code)
    }
}

/// Files a task persists into a container after it finishes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFileSpec {
    /// Glob relative to the task working directory
    pub file_pattern: String,
    pub container_url: String,
    /// Blob-name prefix inside the container
    pub path_prefix: String,
}

/// One task submitted as part of a batched add
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: String,
    pub command_line: String,
    pub resource_files: Vec<ResourceFileRef>,
    pub node_preparation: Option<NodePreparation>,
    pub output_files: Vec<OutputFileSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Active,
    Preparing,
    Running,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub state: TaskState,
    pub exit_code: Option<i32>,
    pub node_id: Option<String>,
    /// Scheduling or preparation failure reported by the grid
    pub failure: Option<String>,
}

impl TaskSnapshot {
    pub fn new(id: impl Into<String>, state: TaskState) -> Self {
        Self {
            id: id.into(),
            state,
            exit_code: None,
            node_id: None,
            failure: None,
        }
    }

    pub fn completed(id: impl Into<String>, exit_code: i32) -> Self {
        Self {
            exit_code: Some(exit_code),
            ..Self::new(id, TaskState::Completed)
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state == TaskState::Completed
    }

    pub fn succeeded(&self) -> bool {
        self.is_terminal() && self.exit_code == Some(0) && self.failure.is_none()
    }

    pub fn failed(&self) -> bool {
        self.is_terminal() && !self.succeeded()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Creating,
    Starting,
    WaitingForStartTask,
    StartTaskFailed,
    Idle,
    Running,
    Unusable,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: String,
    pub state: NodeState,
    pub running_tasks: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub pool_id: String,
    pub nodes: Vec<NodeSnapshot>,
    /// Allocation failures; any entry makes the pool unusable for the run
    pub resize_errors: Vec<String>,
}

/// Trait for compute-grid operations
#[async_trait]
pub trait ComputeGridClient: Send + Sync {
    /// Create a pool; an existing pool with the same id is reused unless
    /// `spec.must_not_exist` is set
    async fn create_pool(&self, spec: &PoolSpec) -> Result<PoolHandle, GridError>;

    async fn create_job(&self, job_id: &str, pool_id: &str) -> Result<JobHandle, GridError>;

    /// Submit all tasks in one request
    async fn add_tasks(
        &self,
        job_id: &str,
        tasks: Vec<TaskDefinition>,
    ) -> Result<Vec<TaskHandle>, GridError>;

    async fn list_tasks(&self, job_id: &str) -> Result<Vec<TaskSnapshot>, GridError>;

    async fn list_nodes(&self, pool_id: &str) -> Result<PoolSnapshot, GridError>;

    async fn delete_job(&self, job_id: &str) -> Result<(), GridError>;

    async fn delete_pool(&self, pool_id: &str) -> Result<(), GridError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_snapshot_classification() {
        assert!(TaskSnapshot::completed("t", 0).succeeded());
        assert!(TaskSnapshot::completed("t", 2).failed());
        assert!(!TaskSnapshot::new("t", TaskState::Running).is_terminal());

        let mut scheduling_failure = TaskSnapshot::completed("t", 0);
        scheduling_failure.failure = Some("resource file missing".into());
        assert!(scheduling_failure.failed());
    }

    #[test]
    fn test_preparation_exit_code_range() {
        let prep = NodePreparation {
            command_line: "robocopy".into(),
            min_success_exit_code: 0,
            max_success_exit_code: 7,
        };
        assert!(prep.is_success(0));
        assert!(prep.is_success(7));
        assert!(!prep.is_success(8));
        assert!(!prep.is_success(-1));
    }
}
