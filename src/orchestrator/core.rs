//! Run lifecycle: resolve, upload, provision, submit, monitor, collect, clean up

use super::monitor::{self, MonitorConfig};
use super::staging::{self, UploadItem};
use super::state::{CleanupReport, RunReport, RunState};
use super::statistics::RunStatistics;
use crate::clock::{Clock, SystemClock};
use crate::config::ExecutionPlan;
use crate::error::{BatchError, BatchResult, CleanupError, TransferError, TransferOperation};
use crate::grid::ComputeGridClient;
use crate::status::{PoolStatusReporter, ProgressEvent, ProgressObserver};
use crate::transfer::{with_retry, BlobTransferClient, DownloadSummary, ResourceFileRef};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fallback horizon when `now + timeout` does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Drives one [`ExecutionPlan`] against a compute grid and a blob store
pub struct ExecutionOrchestrator {
    grid: Arc<dyn ComputeGridClient>,
    blobs: Arc<dyn BlobTransferClient>,
    clock: Arc<dyn Clock>,
}

/// Mutable bookkeeping for a single run
struct RunContext<'a> {
    plan: &'a ExecutionPlan,
    observer: &'a dyn ProgressObserver,
    history: Vec<RunState>,
    warnings: Vec<String>,
    input_container_created: bool,
    pool_created: bool,
    pool_reused: bool,
    job_created: bool,
    uploaded: Vec<ResourceFileRef>,
}

impl<'a> RunContext<'a> {
    fn new(plan: &'a ExecutionPlan, observer: &'a dyn ProgressObserver) -> Self {
        Self {
            plan,
            observer,
            history: vec![RunState::Created],
            warnings: Vec::new(),
            input_container_created: false,
            pool_created: false,
            pool_reused: false,
            job_created: false,
            uploaded: Vec::new(),
        }
    }

    fn state(&self) -> RunState {
        self.history.last().copied().unwrap_or(RunState::Created)
    }

    async fn transition(&mut self, to: RunState) {
        let from = self.state();
        self.history.push(to);
        info!("Job {}: {} -> {}", self.plan.job_id(), from, to);
        self.observer
            .on_event(&ProgressEvent::StateChanged { from, to })
            .await;
    }
}

impl ExecutionOrchestrator {
    pub fn new(grid: Arc<dyn ComputeGridClient>, blobs: Arc<dyn BlobTransferClient>) -> Self {
        Self {
            grid,
            blobs,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Execute the plan to a terminal outcome
    ///
    /// Returns `Err` only when the run could not be set up: dependency,
    /// transfer or provisioning failures. Task failures, timeouts and
    /// cancellation are reported through [`RunReport::outcome`].
    pub async fn run(
        &self,
        plan: ExecutionPlan,
        observer: &dyn ProgressObserver,
        cancel: CancellationToken,
    ) -> BatchResult<RunReport> {
        let started_at = Utc::now();
        let started = self.clock.now();
        let deadline = started
            .checked_add(plan.timeout())
            .or_else(|| started.checked_add(FAR_FUTURE))
            .unwrap_or(started);
        info!("Starting batch run: {}", plan.summary().replace('\n', "; "));

        let mut run = RunContext::new(&plan, observer);
        if let Err(error) = self.provision(&mut run).await {
            warn!("Run setup failed: {}", error);
            if plan.cleanup_afterwards() {
                let cleanup = self.cleanup(&run).await;
                debug!("Cleanup after failed setup removed {:?}", cleanup.deleted);
            }
            return Err(error);
        }

        run.transition(RunState::Monitoring).await;
        let watched = monitor::watch(
            self.grid.as_ref(),
            self.clock.as_ref(),
            observer,
            MonitorConfig {
                job_id: plan.job_id(),
                pool_id: plan.pool_id(),
                started,
                deadline,
                poll_interval: plan.poll_interval(),
                max_consecutive_errors: plan.max_consecutive_poll_errors(),
                reporter: PoolStatusReporter::new(plan.status_format()),
            },
            &cancel,
        )
        .await;
        info!(
            "Job {} {} after {} poll(s)",
            plan.job_id(),
            watched.outcome,
            watched.polls
        );
        run.transition(watched.outcome.state()).await;

        let downloaded = self.collect_outputs(&mut run).await;

        let mut report = RunReport {
            pool_id: plan.pool_id().to_string(),
            job_id: plan.job_id().to_string(),
            outcome: watched.outcome,
            history: Vec::new(),
            pool_reused: run.pool_reused,
            uploaded: std::mem::take(&mut run.uploaded),
            polls: watched.polls,
            last_snapshot: watched.last_snapshot,
            downloaded,
            cleanup: None,
            statistics_path: None,
            warnings: std::mem::take(&mut run.warnings),
            started_at,
            finished_at: Utc::now(),
        };

        if plan.save_statistics() {
            let statistics = RunStatistics::from_report(&report, Utc::now());
            match statistics.write_to(plan.output_directory()).await {
                Ok(path) => report.statistics_path = Some(path),
                Err(error) => {
                    warn!("Could not write run statistics: {}", error);
                    report
                        .warnings
                        .push(format!("could not write run statistics: {error}"));
                }
            }
        }

        if plan.cleanup_afterwards() {
            report.cleanup = Some(self.cleanup(&run).await);
            run.transition(RunState::CleanedUp).await;
        }

        report.history = run.history;
        report.finished_at = Utc::now();
        observer
            .on_event(&ProgressEvent::Finished {
                outcome: report.outcome.clone(),
            })
            .await;
        Ok(report)
    }

    /// Everything up to and including task submission
    async fn provision(&self, run: &mut RunContext<'_>) -> BatchResult<()> {
        let plan = run.plan;

        let resolution = plan.dependencies().resolve();
        if plan.requires_input_files() && resolution.files.is_empty() {
            return Err(BatchError::Dependency(format!(
                "no dependency files resolved for {} declared executable(s)",
                plan.executables().len()
            )));
        }
        run.observer
            .on_event(&ProgressEvent::DependenciesResolved {
                files: resolution.files.len(),
                warnings: resolution.warnings.clone(),
            })
            .await;
        let (items, warnings) = staging::plan_uploads(plan, &resolution)?;
        for warning in &warnings {
            warn!("{}", warning);
        }
        run.warnings.extend(warnings);
        run.transition(RunState::DependenciesResolved).await;

        if !items.is_empty() {
            self.create_container(plan, plan.input_container()).await?;
            run.input_container_created = true;
            run.uploaded = self.upload_all(plan, run.observer, &items).await?;
        }
        run.transition(RunState::FilesUploaded).await;

        let pool = self
            .grid
            .create_pool(&staging::pool_spec(plan))
            .await
            .map_err(|e| BatchError::provisioning("pool", plan.pool_id(), e))?;
        run.pool_reused = pool.reused;
        run.pool_created = !pool.reused;
        if pool.reused {
            info!("Reusing existing pool {}", pool.id);
        }
        run.transition(RunState::PoolReady).await;

        self.grid
            .create_job(plan.job_id(), plan.pool_id())
            .await
            .map_err(|e| BatchError::provisioning("job", plan.job_id(), e))?;
        run.job_created = true;
        run.transition(RunState::JobCreated).await;

        let output = &plan.output().name;
        self.create_container(plan, output).await?;
        let definitions =
            staging::task_definitions(plan, &run.uploaded, &self.blobs.container_url(output));
        let handles = self
            .grid
            .add_tasks(plan.job_id(), definitions)
            .await
            .map_err(|e| BatchError::provisioning("tasks", plan.job_id(), e))?;
        debug!("Submitted {} task(s) to job {}", handles.len(), plan.job_id());
        run.transition(RunState::TasksSubmitted).await;
        Ok(())
    }

    async fn create_container(&self, plan: &ExecutionPlan, container: &str) -> BatchResult<()> {
        let created = with_retry(
            plan.retry_policy(),
            self.clock.as_ref(),
            &format!("creation of container {container}"),
            || self.blobs.create_container_if_absent(container),
        )
        .await
        .map_err(|exhausted| TransferError {
            operation: TransferOperation::CreateContainer,
            target: container.to_string(),
            attempts: exhausted.attempts,
            source: exhausted.error,
        })?;
        if !created {
            debug!("Container {} already existed", container);
        }
        Ok(())
    }

    /// Upload every item with bounded parallelism; results keep item order
    async fn upload_all(
        &self,
        plan: &ExecutionPlan,
        observer: &dyn ProgressObserver,
        items: &[UploadItem],
    ) -> BatchResult<Vec<ResourceFileRef>> {
        let total = items.len();
        let pending: Vec<_> = items
            .iter()
            .enumerate()
            .map(|(index, item)| async move { (index, self.upload_one(plan, item).await) })
            .collect();
        let mut uploads = stream::iter(pending).buffer_unordered(plan.upload_parallelism().max(1));

        let mut uploaded: Vec<Option<ResourceFileRef>> = vec![None; total];
        let mut done = 0;
        while let Some((index, result)) = uploads.next().await {
            let file = result?;
            done += 1;
            observer
                .on_event(&ProgressEvent::FileUploaded {
                    blob_name: file.blob_name.clone(),
                    bytes: file.size_bytes,
                    uploaded: done,
                    total,
                })
                .await;
            uploaded[index] = Some(file);
        }
        Ok(uploaded.into_iter().flatten().collect())
    }

    async fn upload_one(
        &self,
        plan: &ExecutionPlan,
        item: &UploadItem,
    ) -> Result<ResourceFileRef, TransferError> {
        let container = plan.input_container();
        with_retry(
            plan.retry_policy(),
            self.clock.as_ref(),
            &format!("upload of {}", item.blob_name),
            || self.blobs.upload(&item.local_path, container, &item.blob_name),
        )
        .await
        .map_err(|exhausted| TransferError {
            operation: TransferOperation::Upload,
            target: item.blob_name.clone(),
            attempts: exhausted.attempts,
            source: exhausted.error,
        })
    }

    /// Download the output container; failures become warnings
    async fn collect_outputs(&self, run: &mut RunContext<'_>) -> DownloadSummary {
        let output = run.plan.output();
        let result = with_retry(
            run.plan.retry_policy(),
            self.clock.as_ref(),
            &format!("download of container {}", output.name),
            || self.blobs.download(&output.name, &output.local_directory),
        )
        .await;

        let summary = match result {
            Ok(summary) => summary,
            Err(exhausted) if exhausted.error.is_not_found() => {
                debug!("Output container {} has no blobs", output.name);
                DownloadSummary::default()
            }
            Err(exhausted) => {
                let error = TransferError {
                    operation: TransferOperation::Download,
                    target: output.name.clone(),
                    attempts: exhausted.attempts,
                    source: exhausted.error,
                };
                warn!("{}", error);
                run.warnings.push(error.to_string());
                DownloadSummary::default()
            }
        };
        run.observer
            .on_event(&ProgressEvent::OutputsCollected {
                files: summary.files.len(),
                bytes: summary.bytes,
            })
            .await;
        summary
    }

    /// Best-effort teardown of what this run created
    ///
    /// The output container is kept. A pool that existed before the run is
    /// left alone.
    async fn cleanup(&self, run: &RunContext<'_>) -> CleanupReport {
        let plan = run.plan;
        let mut report = CleanupReport::default();

        if run.job_created {
            let result = self
                .grid
                .delete_job(plan.job_id())
                .await
                .map_err(|e| (e.is_not_found(), e.to_string()));
            record(&mut report, "job", plan.job_id(), result);
        }
        if run.pool_created {
            let result = self
                .grid
                .delete_pool(plan.pool_id())
                .await
                .map_err(|e| (e.is_not_found(), e.to_string()));
            record(&mut report, "pool", plan.pool_id(), result);
        }
        if run.input_container_created {
            let container = plan.input_container();
            let result = self
                .blobs
                .delete_container(container)
                .await
                .map_err(|e| (e.is_not_found(), e.to_string()));
            record(&mut report, "container", container, result);
        }

        for error in &report.errors {
            warn!("{}", error);
            run.observer
                .on_event(&ProgressEvent::CleanupFailed {
                    resource: format!("{} '{}'", error.resource, error.id),
                    error: error.message.clone(),
                })
                .await;
        }
        report
    }
}

/// A resource that is already gone counts as deleted
fn record(
    report: &mut CleanupReport,
    resource: &'static str,
    id: &str,
    result: Result<(), (bool, String)>,
) {
    match result {
        Ok(()) | Err((true, _)) => report.deleted.push(format!("{resource} '{id}'")),
        Err((false, message)) => report.errors.push(CleanupError {
            resource,
            id: id.to_string(),
            message,
        }),
    }
}
