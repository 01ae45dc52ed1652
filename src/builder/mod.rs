//! Staged construction of an [`ExecutionPlan`]
//!
//! Each stage is a distinct type exposing only the next legal step:
//!
//! ```text
//! new() -> with_account_settings -> with_storage_settings
//!       -> with_machine_config -> with_commands -> with_dependencies
//!       -> [optional settings] -> build()
//! ```
//!
//! [`StagedPlanBuilder::in_predefined_environment`] and
//! [`StagedPlanBuilder::non_primary_batch`] start directly at the machine
//! stage. Nothing here talks to a remote service; `build` only validates.

use crate::config::plan::container_name_for;
use crate::config::{
    ApplicationPackageReference, AzureMachineConfig, BatchAccountSettings, BatchConsoleCommand,
    BatchEnvironment, BatchExecutableInfo, BatchOutputContainer, ExecutionPlan, PoolSetup,
    StatusFormat, StorageAccountSettings,
};
use crate::config::machine::validate_identifier;
use crate::dependencies::DependencyResolver;
use crate::error::ConfigurationError;
use crate::transfer::RetryPolicy;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_UPLOAD_PARALLELISM: usize = 4;
pub const DEFAULT_MAX_CONSECUTIVE_POLL_ERRORS: u32 = 3;

/// Waiting for batch account settings
#[derive(Debug)]
pub struct AccountStage;
/// Waiting for storage account settings
#[derive(Debug)]
pub struct StorageStage;
/// Waiting for machine config and pool setup
#[derive(Debug)]
pub struct MachineStage;
/// Waiting for startup and task commands
#[derive(Debug)]
pub struct CommandStage;
/// Waiting for a dependency resolver
#[derive(Debug)]
pub struct DependencyStage;
/// All required settings present; optional settings and `build`
#[derive(Debug)]
pub struct ReadyStage;

#[derive(Debug)]
struct PlanDraft {
    account: Option<BatchAccountSettings>,
    storage: Option<StorageAccountSettings>,
    machine: Option<AzureMachineConfig>,
    pool: Option<PoolSetup>,
    startup_command: Option<BatchConsoleCommand>,
    task_commands: Vec<BatchConsoleCommand>,
    dependencies: Option<Arc<dyn DependencyResolver>>,
    application_packages: Vec<ApplicationPackageReference>,
    executables: Vec<BatchExecutableInfo>,
    output: Option<BatchOutputContainer>,
    output_root: Option<PathBuf>,
    timeout: Duration,
    poll_interval: Duration,
    cleanup_afterwards: bool,
    save_statistics: bool,
    status_format: StatusFormat,
    retry: RetryPolicy,
    upload_parallelism: usize,
    max_consecutive_poll_errors: u32,
}

impl Default for PlanDraft {
    fn default() -> Self {
        Self {
            account: None,
            storage: None,
            machine: None,
            pool: None,
            startup_command: None,
            task_commands: Vec::new(),
            dependencies: None,
            application_packages: Vec::new(),
            executables: Vec::new(),
            output: None,
            output_root: None,
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cleanup_afterwards: false,
            save_statistics: false,
            status_format: StatusFormat::default(),
            retry: RetryPolicy::default(),
            upload_parallelism: DEFAULT_UPLOAD_PARALLELISM,
            max_consecutive_poll_errors: DEFAULT_MAX_CONSECUTIVE_POLL_ERRORS,
        }
    }
}

/// Builder for [`ExecutionPlan`], parameterized by its current stage
#[derive(Debug)]
pub struct StagedPlanBuilder<S> {
    draft: PlanDraft,
    _stage: PhantomData<S>,
}

impl<S> StagedPlanBuilder<S> {
    fn advance<T>(self) -> StagedPlanBuilder<T> {
        StagedPlanBuilder {
            draft: self.draft,
            _stage: PhantomData,
        }
    }
}

impl StagedPlanBuilder<AccountStage> {
    pub fn new() -> Self {
        Self {
            draft: PlanDraft::default(),
            _stage: PhantomData,
        }
    }

    pub fn with_account_settings(
        mut self,
        settings: BatchAccountSettings,
    ) -> StagedPlanBuilder<StorageStage> {
        self.draft.account = Some(settings);
        self.advance()
    }

    /// Start from a pre-validated account + storage bundle
    ///
    /// Fails immediately if the environment is incomplete.
    pub fn in_predefined_environment(
        environment: BatchEnvironment,
    ) -> Result<StagedPlanBuilder<MachineStage>, ConfigurationError> {
        let problems = environment.problems();
        if !problems.is_empty() {
            return Err(ConfigurationError::InvalidEnvironment(problems));
        }
        Ok(Self::new()
            .with_account_settings(environment.batch)
            .with_storage_settings(environment.storage))
    }

    /// Start a follow-up batch that shares the account, storage and run
    /// policy of `previous`; only machine, commands and dependencies change
    pub fn non_primary_batch(previous: &ExecutionPlan) -> StagedPlanBuilder<MachineStage> {
        let environment = previous.environment().clone();
        let mut builder = Self::new()
            .with_account_settings(environment.batch)
            .with_storage_settings(environment.storage);
        let draft = &mut builder.draft;
        draft.timeout = previous.timeout();
        draft.poll_interval = previous.poll_interval();
        draft.cleanup_afterwards = previous.cleanup_afterwards();
        draft.save_statistics = previous.save_statistics();
        draft.status_format = previous.status_format();
        draft.retry = previous.retry_policy().clone();
        draft.upload_parallelism = previous.upload_parallelism();
        draft.max_consecutive_poll_errors = previous.max_consecutive_poll_errors();
        builder
    }
}

impl Default for StagedPlanBuilder<AccountStage> {
    fn default() -> Self {
        Self::new()
    }
}

impl StagedPlanBuilder<StorageStage> {
    pub fn with_storage_settings(
        mut self,
        settings: StorageAccountSettings,
    ) -> StagedPlanBuilder<MachineStage> {
        self.draft.storage = Some(settings);
        self.advance()
    }
}

impl StagedPlanBuilder<MachineStage> {
    pub fn with_machine_config(
        mut self,
        machine: AzureMachineConfig,
        pool: PoolSetup,
    ) -> StagedPlanBuilder<CommandStage> {
        self.draft.machine = Some(machine);
        self.draft.pool = Some(pool);
        self.advance()
    }
}

impl StagedPlanBuilder<CommandStage> {
    /// Set the per-node startup command and the ordered task commands
    pub fn with_commands(
        mut self,
        startup: Option<BatchConsoleCommand>,
        tasks: Vec<BatchConsoleCommand>,
    ) -> StagedPlanBuilder<DependencyStage> {
        self.draft.startup_command = startup;
        self.draft.task_commands = tasks;
        self.advance()
    }
}

impl StagedPlanBuilder<DependencyStage> {
    pub fn with_dependencies<R>(mut self, resolver: R) -> StagedPlanBuilder<ReadyStage>
    where
        R: DependencyResolver + 'static,
    {
        self.draft.dependencies = Some(Arc::new(resolver));
        self.advance()
    }
}

impl StagedPlanBuilder<ReadyStage> {
    pub fn with_output_container(mut self, output: BatchOutputContainer) -> Self {
        self.draft.output = Some(output);
        self
    }

    /// Directory the default `batch-output/<job>` download folder lives
    /// under when no output container is given
    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.draft.output_root = Some(root.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.draft.timeout = timeout;
        self
    }

    pub fn with_cleanup(mut self, cleanup_afterwards: bool) -> Self {
        self.draft.cleanup_afterwards = cleanup_afterwards;
        self
    }

    pub fn with_application_packages(
        mut self,
        packages: impl IntoIterator<Item = ApplicationPackageReference>,
    ) -> Self {
        self.draft.application_packages.extend(packages);
        self
    }

    pub fn with_executables(
        mut self,
        executables: impl IntoIterator<Item = BatchExecutableInfo>,
    ) -> Self {
        self.draft.executables.extend(executables);
        self
    }

    pub fn with_statistics(mut self, save_statistics: bool) -> Self {
        self.draft.save_statistics = save_statistics;
        self
    }

    pub fn with_status_format(mut self, format: StatusFormat) -> Self {
        self.draft.status_format = format;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.draft.poll_interval = interval;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.draft.retry = retry;
        self
    }

    pub fn with_upload_parallelism(mut self, parallelism: usize) -> Self {
        self.draft.upload_parallelism = parallelism;
        self
    }

    pub fn with_max_consecutive_poll_errors(mut self, errors: u32) -> Self {
        self.draft.max_consecutive_poll_errors = errors;
        self
    }

    /// Validate every field and produce the immutable plan
    pub fn build(self) -> Result<ExecutionPlan, ConfigurationError> {
        let draft = self.draft;

        let batch = draft
            .account
            .ok_or(ConfigurationError::MissingSetting("batch account settings"))?;
        batch.validate()?;
        let storage = draft
            .storage
            .ok_or(ConfigurationError::MissingSetting("storage account settings"))?;
        storage.resolve()?;

        let machine = draft
            .machine
            .ok_or(ConfigurationError::MissingSetting("machine config"))?
            .to_spec()?;
        let pool = draft
            .pool
            .ok_or(ConfigurationError::MissingSetting("pool setup"))?;
        pool.validate(&machine)?;

        if draft.task_commands.is_empty() {
            return Err(ConfigurationError::NoTaskCommands);
        }
        if let Some(index) = draft
            .task_commands
            .iter()
            .position(|command| command.base_command.trim().is_empty())
        {
            return Err(ConfigurationError::invalid(
                "task_commands",
                format!("command #{} has an empty base command", index + 1),
            ));
        }
        if draft
            .startup_command
            .as_ref()
            .is_some_and(|command| command.base_command.trim().is_empty())
        {
            return Err(ConfigurationError::invalid(
                "startup_command",
                "base command is empty",
            ));
        }
        let dependencies = draft
            .dependencies
            .ok_or(ConfigurationError::MissingSetting("dependency resolver"))?;

        if draft.timeout.is_zero() {
            return Err(ConfigurationError::ZeroTimeout);
        }
        if draft.poll_interval.is_zero() {
            return Err(ConfigurationError::invalid(
                "poll_interval",
                "must be greater than zero",
            ));
        }
        if draft.upload_parallelism == 0 {
            return Err(ConfigurationError::invalid(
                "upload_parallelism",
                "must be at least 1",
            ));
        }
        if draft.retry.max_attempts == 0 {
            return Err(ConfigurationError::invalid(
                "retry.max_attempts",
                "must be at least 1",
            ));
        }

        validate_executables(&draft.executables)?;
        for package in &draft.application_packages {
            if package.application_id.trim().is_empty() {
                return Err(ConfigurationError::invalid(
                    "application_packages",
                    "application id is empty",
                ));
            }
        }

        let job_id = match &pool.job_id {
            Some(job_id) => job_id.clone(),
            None => generated_job_id(&pool.pool_id),
        };
        validate_identifier("job_id", &job_id)?;

        let output = draft.output.unwrap_or_else(|| {
            let root = draft.output_root.unwrap_or_default();
            BatchOutputContainer::new(
                container_name_for(&job_id, "output"),
                root.join("batch-output").join(&job_id),
            )
        });
        output.validate()?;

        debug!(
            "Built plan for pool {} / job {} with {} task(s)",
            pool.pool_id,
            job_id,
            draft.task_commands.len()
        );

        Ok(ExecutionPlan {
            environment: BatchEnvironment::new(batch, storage),
            machine,
            input_container: container_name_for(&job_id, "inputs"),
            job_id,
            pool,
            application_packages: draft.application_packages,
            executables: draft.executables,
            startup_command: draft.startup_command,
            task_commands: draft.task_commands,
            dependencies,
            output,
            timeout: draft.timeout,
            poll_interval: draft.poll_interval,
            cleanup_afterwards: draft.cleanup_afterwards,
            save_statistics: draft.save_statistics,
            status_format: draft.status_format,
            retry: draft.retry,
            upload_parallelism: draft.upload_parallelism,
            max_consecutive_poll_errors: draft.max_consecutive_poll_errors,
        })
    }
}

fn validate_executables(executables: &[BatchExecutableInfo]) -> Result<(), ConfigurationError> {
    let mut names = HashSet::new();
    for executable in executables {
        let name = executable.target_name.as_str();
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(ConfigurationError::invalid(
                "executables.target_name",
                format!("'{name}' is not a plain file name"),
            ));
        }
        if !names.insert(name) {
            return Err(ConfigurationError::invalid(
                "executables.target_name",
                format!("'{name}' is used more than once"),
            ));
        }
    }
    Ok(())
}

fn generated_job_id(pool_id: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    let prefix: String = pool_id.chars().take(55).collect();
    format!("{prefix}-{}", &suffix[..8])
}
