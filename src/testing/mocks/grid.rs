//! Scripted compute grid

use crate::grid::{
    ComputeGridClient, GridError, JobHandle, NodeSnapshot, NodeState, PoolHandle, PoolSnapshot,
    PoolSpec, TaskDefinition, TaskHandle, TaskSnapshot, TaskState,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct MockGridState {
    calls: Vec<String>,
    pools: Vec<PoolSpec>,
    submitted: Vec<Vec<TaskDefinition>>,
    list_tasks_calls: u32,
    completion_poll: Option<u32>,
    exit_codes: HashMap<String, i32>,
    existing_pools: HashSet<String>,
    create_pool_error: Option<GridError>,
    create_job_error: Option<GridError>,
    add_tasks_error: Option<GridError>,
    delete_job_error: Option<GridError>,
    delete_pool_error: Option<GridError>,
    poll_errors: VecDeque<GridError>,
    resize_errors: Vec<String>,
}

/// Compute grid whose task states follow a script
///
/// Tasks report `Running` until the configured completion poll, then
/// `Completed` with exit code 0 unless another code was set for them. Every
/// call is logged as `"<operation>:<id>"` for ordering assertions.
#[derive(Debug, Default)]
pub struct MockComputeGrid {
    state: Mutex<MockGridState>,
}

impl MockComputeGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// All submitted tasks complete on the `poll`-th `list_tasks` call
    pub fn complete_on_poll(mut self, poll: u32) -> Self {
        self.state.get_mut().completion_poll = Some(poll);
        self
    }

    /// Tasks never leave `Running`
    pub fn never_complete(mut self) -> Self {
        self.state.get_mut().completion_poll = None;
        self
    }

    pub fn with_exit_code(mut self, task_id: impl Into<String>, exit_code: i32) -> Self {
        self.state.get_mut().exit_codes.insert(task_id.into(), exit_code);
        self
    }

    /// Pretend a pool with this id already exists
    pub fn with_existing_pool(mut self, pool_id: impl Into<String>) -> Self {
        self.state.get_mut().existing_pools.insert(pool_id.into());
        self
    }

    pub fn fail_create_pool(mut self, error: GridError) -> Self {
        self.state.get_mut().create_pool_error = Some(error);
        self
    }

    pub fn fail_create_job(mut self, error: GridError) -> Self {
        self.state.get_mut().create_job_error = Some(error);
        self
    }

    pub fn fail_add_tasks(mut self, error: GridError) -> Self {
        self.state.get_mut().add_tasks_error = Some(error);
        self
    }

    pub fn fail_delete_job(mut self, error: GridError) -> Self {
        self.state.get_mut().delete_job_error = Some(error);
        self
    }

    pub fn fail_delete_pool(mut self, error: GridError) -> Self {
        self.state.get_mut().delete_pool_error = Some(error);
        self
    }

    /// Queue errors returned by the next `list_tasks` calls
    pub fn with_poll_errors(mut self, errors: impl IntoIterator<Item = GridError>) -> Self {
        self.state.get_mut().poll_errors.extend(errors);
        self
    }

    pub fn with_resize_errors(mut self, errors: Vec<String>) -> Self {
        self.state.get_mut().resize_errors = errors;
        self
    }

    /// Get the list of calls in the order they were made
    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    async fn count(&self, operation: &str) -> usize {
        let prefix = format!("{operation}:");
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|call| call.starts_with(&prefix))
            .count()
    }

    pub async fn create_pool_calls(&self) -> usize {
        self.count("create_pool").await
    }

    pub async fn create_job_calls(&self) -> usize {
        self.count("create_job").await
    }

    pub async fn add_tasks_calls(&self) -> usize {
        self.count("add_tasks").await
    }

    pub async fn list_tasks_calls(&self) -> usize {
        self.count("list_tasks").await
    }

    pub async fn list_nodes_calls(&self) -> usize {
        self.count("list_nodes").await
    }

    pub async fn delete_job_calls(&self) -> usize {
        self.count("delete_job").await
    }

    pub async fn delete_pool_calls(&self) -> usize {
        self.count("delete_pool").await
    }

    /// Total number of calls of any kind
    pub async fn total_calls(&self) -> usize {
        self.state.lock().await.calls.len()
    }

    /// Pool specs passed to `create_pool`
    pub async fn created_pools(&self) -> Vec<PoolSpec> {
        self.state.lock().await.pools.clone()
    }

    /// Task batches passed to `add_tasks`
    pub async fn submitted_tasks(&self) -> Vec<Vec<TaskDefinition>> {
        self.state.lock().await.submitted.clone()
    }
}

#[async_trait]
impl ComputeGridClient for MockComputeGrid {
    async fn create_pool(&self, spec: &PoolSpec) -> Result<PoolHandle, GridError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("create_pool:{}", spec.id));
        if let Some(error) = state.create_pool_error.clone() {
            return Err(error);
        }
        let reused = state.existing_pools.contains(&spec.id);
        if reused && spec.must_not_exist {
            return Err(GridError::AlreadyExists(format!("pool {}", spec.id)));
        }
        state.existing_pools.insert(spec.id.clone());
        state.pools.push(spec.clone());
        Ok(PoolHandle {
            id: spec.id.clone(),
            reused,
        })
    }

    async fn create_job(&self, job_id: &str, pool_id: &str) -> Result<JobHandle, GridError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("create_job:{job_id}"));
        if let Some(error) = state.create_job_error.clone() {
            return Err(error);
        }
        Ok(JobHandle {
            id: job_id.to_string(),
            pool_id: pool_id.to_string(),
        })
    }

    async fn add_tasks(
        &self,
        job_id: &str,
        tasks: Vec<TaskDefinition>,
    ) -> Result<Vec<TaskHandle>, GridError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("add_tasks:{job_id}"));
        if let Some(error) = state.add_tasks_error.clone() {
            return Err(error);
        }
        let handles = tasks
            .iter()
            .map(|task| TaskHandle {
                id: task.id.clone(),
            })
            .collect();
        state.submitted.push(tasks);
        Ok(handles)
    }

    async fn list_tasks(&self, job_id: &str) -> Result<Vec<TaskSnapshot>, GridError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("list_tasks:{job_id}"));
        state.list_tasks_calls += 1;
        if let Some(error) = state.poll_errors.pop_front() {
            return Err(error);
        }
        let poll = state.list_tasks_calls;
        let state = &*state;
        let complete = state.completion_poll.is_some_and(|n| poll >= n);
        Ok(state
            .submitted
            .iter()
            .flatten()
            .enumerate()
            .map(|(index, task)| {
                let mut snapshot = if complete {
                    let code = state.exit_codes.get(&task.id).copied().unwrap_or(0);
                    TaskSnapshot::completed(task.id.clone(), code)
                } else {
                    TaskSnapshot::new(task.id.clone(), TaskState::Running)
                };
                snapshot.node_id = Some(format!("node-{index:03}"));
                snapshot
            })
            .collect())
    }

    async fn list_nodes(&self, pool_id: &str) -> Result<PoolSnapshot, GridError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("list_nodes:{pool_id}"));
        let node_count = state
            .pools
            .iter()
            .find(|pool| pool.id == pool_id)
            .map(|pool| pool.machine.node_count)
            .unwrap_or(0);
        Ok(PoolSnapshot {
            pool_id: pool_id.to_string(),
            nodes: (0..node_count)
                .map(|i| NodeSnapshot {
                    id: format!("node-{i:03}"),
                    state: NodeState::Running,
                    running_tasks: 1,
                })
                .collect(),
            resize_errors: state.resize_errors.clone(),
        })
    }

    async fn delete_job(&self, job_id: &str) -> Result<(), GridError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("delete_job:{job_id}"));
        match state.delete_job_error.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn delete_pool(&self, pool_id: &str) -> Result<(), GridError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("delete_pool:{pool_id}"));
        match state.delete_pool_error.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
