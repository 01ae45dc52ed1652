//! Local compute-grid emulator
//!
//! Pools are sets of simulated nodes laid out under a root directory:
//!
//! ```text
//! <root>/<pool>/nodes/<node>/shared/
//! <root>/<pool>/nodes/<node>/tasks/<job>/<task>/
//! ```
//!
//! Tasks run as local processes, at most `nodes x slots` at once. Resource
//! files and output containers must be `file://` URLs, as produced by
//! [`LocalBlobStore`](crate::transfer::LocalBlobStore).

use super::{
    ComputeGridClient, GridError, JobHandle, NodeSnapshot, NodeState, PoolHandle, PoolSnapshot,
    PoolSpec, TaskDefinition, TaskHandle, TaskSnapshot, TaskState,
};
use crate::config::{OsFamily, SHARED_DIR_VAR, TASK_DIR_VAR};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

const DEFAULT_MAX_NODES: u32 = 16;
pub const STDOUT_FILE: &str = "stdout.txt";
pub const STDERR_FILE: &str = "stderr.txt";

struct LocalNode {
    id: String,
    shared_dir: PathBuf,
    tasks_dir: PathBuf,
    usable: bool,
    running: u32,
    /// Jobs whose preparation already ran on this node
    prepared_jobs: Arc<Mutex<HashSet<String>>>,
}

struct LocalPool {
    dir: PathBuf,
    nodes: Vec<LocalNode>,
    slots: Arc<Semaphore>,
}

impl LocalPool {
    fn release(&mut self, node_id: &str) {
        if let Some(node) = self.nodes.iter_mut().find(|node| node.id == node_id) {
            node.running = node.running.saturating_sub(1);
        }
    }
}

struct LocalJob {
    pool_id: String,
    tasks: BTreeMap<String, TaskSnapshot>,
    workers: Vec<JoinHandle<()>>,
}

#[derive(Default)]
struct GridState {
    pools: HashMap<String, LocalPool>,
    jobs: HashMap<String, LocalJob>,
}

impl GridState {
    fn task_mut(&mut self, job_id: &str, task_id: &str) -> Option<&mut TaskSnapshot> {
        self.jobs
            .get_mut(job_id)
            .and_then(|job| job.tasks.get_mut(task_id))
    }
}

/// Node picked for one task
struct Placement {
    pool_id: String,
    task_id: String,
    node_id: String,
    shared_dir: PathBuf,
    task_dir: PathBuf,
    prepared_jobs: Arc<Mutex<HashSet<String>>>,
}

/// Compute grid that runs every task on this machine
pub struct LocalComputeGrid {
    root: PathBuf,
    max_nodes: u32,
    state: Arc<Mutex<GridState>>,
    /// Held for the whole of `create_pool` so one id is provisioned once
    creating: Mutex<()>,
}

impl LocalComputeGrid {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_nodes: DEFAULT_MAX_NODES,
            state: Arc::new(Mutex::new(GridState::default())),
            creating: Mutex::new(()),
        }
    }

    /// Nodes the emulator is willing to provision per pool
    pub fn with_max_nodes(mut self, max_nodes: u32) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    fn host_os() -> OsFamily {
        if cfg!(windows) {
            OsFamily::Windows
        } else {
            OsFamily::Linux
        }
    }

    async fn provision_node(
        &self,
        spec: &PoolSpec,
        pool_dir: &Path,
        index: u32,
    ) -> Result<LocalNode, GridError> {
        let id = format!("node-{index:03}");
        let node_dir = pool_dir.join("nodes").join(&id);
        let shared_dir = node_dir.join("shared");
        let tasks_dir = node_dir.join("tasks");
        let startup_dir = node_dir.join("startup");
        for dir in [&shared_dir, &tasks_dir, &startup_dir] {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| GridError::Remote(format!("cannot provision {id}: {e}")))?;
        }

        let mut usable = true;
        if let Some(start_task) = &spec.start_task {
            let code = run_command(&start_task.command_line, &startup_dir, &shared_dir).await;
            match code {
                Ok(0) => {}
                Ok(code) if start_task.wait_for_success => {
                    warn!("Start task on {} exited with {}", id, code);
                    usable = false;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Start task on {} could not run: {}", id, e);
                    usable = !start_task.wait_for_success;
                }
            }
        }

        Ok(LocalNode {
            id,
            shared_dir,
            tasks_dir,
            usable,
            running: 0,
            prepared_jobs: Arc::new(Mutex::new(HashSet::new())),
        })
    }
}

#[async_trait]
impl ComputeGridClient for LocalComputeGrid {
    async fn create_pool(&self, spec: &PoolSpec) -> Result<PoolHandle, GridError> {
        let _creating = self.creating.lock().await;
        if self.state.lock().await.pools.contains_key(&spec.id) {
            if spec.must_not_exist {
                return Err(GridError::AlreadyExists(format!("pool '{}'", spec.id)));
            }
            return Ok(PoolHandle {
                id: spec.id.clone(),
                reused: true,
            });
        }
        if spec.machine.os_family != Self::host_os() {
            return Err(GridError::InvalidRequest(format!(
                "{:?} pools cannot run on this host",
                spec.machine.os_family
            )));
        }
        if spec.machine.node_count > self.max_nodes {
            return Err(GridError::Capacity(format!(
                "{} nodes requested, {} available",
                spec.machine.node_count, self.max_nodes
            )));
        }

        let pool_dir = self.root.join(&spec.id);
        let mut nodes = Vec::with_capacity(spec.machine.node_count as usize);
        for index in 0..spec.machine.node_count {
            nodes.push(self.provision_node(spec, &pool_dir, index).await?);
        }
        let slots = spec.machine.node_count as usize * spec.task_slots_per_node as usize;
        info!("Provisioned local pool {} with {} node(s)", spec.id, nodes.len());

        let mut state = self.state.lock().await;
        state.pools.insert(
            spec.id.clone(),
            LocalPool {
                dir: pool_dir,
                nodes,
                slots: Arc::new(Semaphore::new(slots)),
            },
        );
        Ok(PoolHandle {
            id: spec.id.clone(),
            reused: false,
        })
    }

    async fn create_job(&self, job_id: &str, pool_id: &str) -> Result<JobHandle, GridError> {
        let mut state = self.state.lock().await;
        if !state.pools.contains_key(pool_id) {
            return Err(GridError::NotFound(format!("pool '{pool_id}'")));
        }
        if state.jobs.contains_key(job_id) {
            return Err(GridError::AlreadyExists(format!("job '{job_id}'")));
        }
        state.jobs.insert(
            job_id.to_string(),
            LocalJob {
                pool_id: pool_id.to_string(),
                tasks: BTreeMap::new(),
                workers: Vec::new(),
            },
        );
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
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| GridError::NotFound(format!("job '{job_id}'")))?;

        let mut seen = HashSet::new();
        for task in &tasks {
            if job.tasks.contains_key(&task.id) || !seen.insert(task.id.as_str()) {
                return Err(GridError::AlreadyExists(format!("task '{}'", task.id)));
            }
        }

        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            job.tasks
                .insert(task.id.clone(), TaskSnapshot::new(&task.id, TaskState::Active));
            handles.push(TaskHandle {
                id: task.id.clone(),
            });
            let worker = tokio::spawn(run_task(
                Arc::clone(&self.state),
                job_id.to_string(),
                job.pool_id.clone(),
                task,
            ));
            job.workers.push(worker);
        }
        Ok(handles)
    }

    async fn list_tasks(&self, job_id: &str) -> Result<Vec<TaskSnapshot>, GridError> {
        let state = self.state.lock().await;
        let job = state
            .jobs
            .get(job_id)
            .ok_or_else(|| GridError::NotFound(format!("job '{job_id}'")))?;
        Ok(job.tasks.values().cloned().collect())
    }

    async fn list_nodes(&self, pool_id: &str) -> Result<PoolSnapshot, GridError> {
        let state = self.state.lock().await;
        let pool = state
            .pools
            .get(pool_id)
            .ok_or_else(|| GridError::NotFound(format!("pool '{pool_id}'")))?;

        let nodes: Vec<NodeSnapshot> = pool
            .nodes
            .iter()
            .map(|node| NodeSnapshot {
                id: node.id.clone(),
                state: match (node.usable, node.running) {
                    (false, _) => NodeState::StartTaskFailed,
                    (true, 0) => NodeState::Idle,
                    (true, _) => NodeState::Running,
                },
                running_tasks: node.running,
            })
            .collect();
        let resize_errors = if nodes.iter().all(|n| n.state == NodeState::StartTaskFailed) {
            vec!["no usable nodes: start task failed on every node".to_string()]
        } else {
            Vec::new()
        };

        Ok(PoolSnapshot {
            pool_id: pool_id.to_string(),
            nodes,
            resize_errors,
        })
    }

    async fn delete_job(&self, job_id: &str) -> Result<(), GridError> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .remove(job_id)
            .ok_or_else(|| GridError::NotFound(format!("job '{job_id}'")))?;
        for worker in &job.workers {
            worker.abort();
        }
        // Aborted workers never reach finish_task, so their nodes are freed here
        if let Some(pool) = state.pools.get_mut(&job.pool_id) {
            let placed = job
                .tasks
                .values()
                .filter(|task| !task.is_terminal())
                .filter_map(|task| task.node_id.as_deref());
            for node_id in placed {
                pool.release(node_id);
            }
        }
        drop(state);
        debug!("Deleted local job {}", job_id);
        Ok(())
    }

    async fn delete_pool(&self, pool_id: &str) -> Result<(), GridError> {
        let pool = self
            .state
            .lock()
            .await
            .pools
            .remove(pool_id)
            .ok_or_else(|| GridError::NotFound(format!("pool '{pool_id}'")))?;
        pool.slots.close();
        if let Err(e) = fs::remove_dir_all(&pool.dir).await {
            warn!("Could not remove {}: {}", pool.dir.display(), e);
        }
        debug!("Deleted local pool {}", pool_id);
        Ok(())
    }
}

async fn update_task<F>(state: &Mutex<GridState>, job_id: &str, task_id: &str, update: F)
where
    F: FnOnce(&mut TaskSnapshot),
{
    if let Some(task) = state.lock().await.task_mut(job_id, task_id) {
        update(task);
    }
}

/// Free the task's node and record its final state under one lock
async fn finish_task<F>(state: &Mutex<GridState>, job_id: &str, placement: &Placement, update: F)
where
    F: FnOnce(&mut TaskSnapshot),
{
    let mut state = state.lock().await;
    if let Some(pool) = state.pools.get_mut(&placement.pool_id) {
        pool.release(&placement.node_id);
    }
    if let Some(task) = state.task_mut(job_id, &placement.task_id) {
        update(task);
    }
}

async fn fail_task(state: &Mutex<GridState>, job_id: &str, task_id: &str, reason: String) {
    warn!("Task {} failed: {}", task_id, reason);
    update_task(state, job_id, task_id, |task| {
        task.state = TaskState::Completed;
        task.failure = Some(reason);
    })
    .await;
}

async fn place_task(
    state: &Mutex<GridState>,
    job_id: &str,
    pool_id: &str,
    task_id: &str,
) -> Option<Placement> {
    let mut state = state.lock().await;
    let pool = state.pools.get_mut(pool_id)?;
    let node = pool
        .nodes
        .iter_mut()
        .filter(|node| node.usable)
        .min_by_key(|node| node.running)?;
    node.running += 1;
    let placement = Placement {
        pool_id: pool_id.to_string(),
        task_id: task_id.to_string(),
        node_id: node.id.clone(),
        shared_dir: node.shared_dir.clone(),
        task_dir: node.tasks_dir.join(job_id).join(task_id),
        prepared_jobs: Arc::clone(&node.prepared_jobs),
    };
    if let Some(task) = state.task_mut(job_id, task_id) {
        task.state = TaskState::Preparing;
        task.node_id = Some(placement.node_id.clone());
    }
    Some(placement)
}

async fn run_task(
    state: Arc<Mutex<GridState>>,
    job_id: String,
    pool_id: String,
    task: TaskDefinition,
) {
    let slots = {
        let guard = state.lock().await;
        guard.pools.get(&pool_id).map(|pool| Arc::clone(&pool.slots))
    };
    let Some(slots) = slots else {
        fail_task(&state, &job_id, &task.id, format!("pool '{pool_id}' no longer exists")).await;
        return;
    };
    let Ok(_permit) = slots.acquire_owned().await else {
        fail_task(&state, &job_id, &task.id, "pool was deleted".to_string()).await;
        return;
    };
    let Some(placement) = place_task(&state, &job_id, &pool_id, &task.id).await else {
        fail_task(&state, &job_id, &task.id, "no usable nodes in pool".to_string()).await;
        return;
    };

    match execute_on_node(&state, &job_id, &task, &placement).await {
        Ok(exit_code) => {
            debug!("Task {} exited with {}", task.id, exit_code);
            finish_task(&state, &job_id, &placement, |snapshot| {
                snapshot.state = TaskState::Completed;
                snapshot.exit_code = Some(exit_code);
            })
            .await;
        }
        Err(reason) => {
            warn!("Task {} failed: {}", task.id, reason);
            finish_task(&state, &job_id, &placement, |snapshot| {
                snapshot.state = TaskState::Completed;
                snapshot.failure = Some(reason);
            })
            .await;
        }
    }
}

async fn execute_on_node(
    state: &Mutex<GridState>,
    job_id: &str,
    task: &TaskDefinition,
    placement: &Placement,
) -> Result<i32, String> {
    let task_dir = &placement.task_dir;
    fs::create_dir_all(task_dir)
        .await
        .map_err(|e| format!("cannot create task directory: {e}"))?;

    for resource in &task.resource_files {
        let source = file_url_to_path(&resource.source_url)?;
        let target = task_dir.join(&resource.blob_name);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("cannot stage {}: {e}", resource.blob_name))?;
        }
        fs::copy(&source, &target)
            .await
            .map_err(|e| format!("resource file {} unavailable: {e}", resource.blob_name))?;
    }

    if let Some(preparation) = &task.node_preparation {
        let mut prepared = placement.prepared_jobs.lock().await;
        if !prepared.contains(job_id) {
            let code =
                run_command(&preparation.command_line, task_dir, &placement.shared_dir).await?;
            if !preparation.is_success(code) {
                return Err(format!(
                    "node preparation on {} exited with {code}",
                    placement.node_id
                ));
            }
            prepared.insert(job_id.to_string());
        }
    }

    update_task(state, job_id, &task.id, |snapshot| {
        snapshot.state = TaskState::Running;
    })
    .await;
    let exit_code =
        run_command_capturing(&task.command_line, task_dir, &placement.shared_dir).await?;

    for output in &task.output_files {
        if let Err(e) = persist_outputs(task_dir, output).await {
            warn!("Output upload for task {} failed: {}", task.id, e);
        }
    }
    Ok(exit_code)
}

async fn persist_outputs(task_dir: &Path, output: &super::OutputFileSpec) -> Result<(), String> {
    let container = file_url_to_path(&output.container_url)?;
    let pattern = task_dir.join(&output.file_pattern);
    let pattern = pattern.to_string_lossy();
    let matches = glob::glob(&pattern).map_err(|e| e.to_string())?;
    for entry in matches.flatten() {
        if !entry.is_file() {
            continue;
        }
        let relative = entry.strip_prefix(task_dir).map_err(|e| e.to_string())?;
        let target = container.join(&output.path_prefix).join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await.map_err(|e| e.to_string())?;
        }
        fs::copy(&entry, &target).await.map_err(|e| e.to_string())?;
    }
    Ok(())
}

fn file_url_to_path(raw: &str) -> Result<PathBuf, String> {
    let url = Url::parse(raw).map_err(|e| format!("invalid URL '{raw}': {e}"))?;
    if url.scheme() != "file" {
        return Err(format!("unsupported URL scheme in '{raw}'"));
    }
    url.to_file_path()
        .map_err(|_| format!("URL '{raw}' is not a local path"))
}

fn build_command(
    command_line: &str,
    cwd: &Path,
    shared_dir: &Path,
) -> Result<tokio::process::Command, String> {
    let words = shell_words::split(command_line)
        .map_err(|e| format!("cannot parse command line: {e}"))?;
    let (program, args) = words
        .split_first()
        .ok_or_else(|| "empty command line".to_string())?;
    let mut command = tokio::process::Command::new(program);
    command
        .args(args)
        .current_dir(cwd)
        .env(SHARED_DIR_VAR, shared_dir)
        .env(TASK_DIR_VAR, cwd)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    Ok(command)
}

async fn run_command(command_line: &str, cwd: &Path, shared_dir: &Path) -> Result<i32, String> {
    let mut command = build_command(command_line, cwd, shared_dir)?;
    let status = command
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|e| format!("cannot start '{command_line}': {e}"))?;
    Ok(status.code().unwrap_or(-1))
}

async fn run_command_capturing(
    command_line: &str,
    cwd: &Path,
    shared_dir: &Path,
) -> Result<i32, String> {
    let stdout = std::fs::File::create(cwd.join(STDOUT_FILE)).map_err(|e| e.to_string())?;
    let stderr = std::fs::File::create(cwd.join(STDERR_FILE)).map_err(|e| e.to_string())?;
    let mut command = build_command(command_line, cwd, shared_dir)?;
    let status = command
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .status()
        .await
        .map_err(|e| format!("cannot start '{command_line}': {e}"))?;
    Ok(status.code().unwrap_or(-1))
}
