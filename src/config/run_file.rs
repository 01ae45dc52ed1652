//! YAML run files
//!
//! A run file describes one batch. Secrets may be left out of the file and
//! supplied through `BATCHRUN_*` environment variables instead; the file is
//! only ever turned into a plan through the staged builder.

use super::{
    ApplicationPackageReference, AzureMachineConfig, BatchAccountSettings, BatchConsoleCommand,
    BatchExecutableInfo, BatchOutputContainer, ExecutionPlan, PoolSetup, StatusFormat,
    StorageAccountSettings,
};
use crate::builder::StagedPlanBuilder;
use crate::dependencies::{
    AutomaticDependencyResolver, DependencyResolver, ManualDependencyResolver, ReferenceScanner,
    RegexRule,
};
use crate::error::ConfigurationError;
use crate::transfer::RetryPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const ENV_BATCH_ACCOUNT_KEY: &str = "BATCHRUN_BATCH_ACCOUNT_KEY";
pub const ENV_BATCH_ACCOUNT_URL: &str = "BATCHRUN_BATCH_ACCOUNT_URL";
pub const ENV_STORAGE_CONNECTION_STRING: &str = "BATCHRUN_STORAGE_CONNECTION_STRING";
pub const ENV_STORAGE_ACCOUNT_KEY: &str = "BATCHRUN_STORAGE_ACCOUNT_KEY";

/// Source of environment variables
pub trait EnvLookup {
    fn var(&self, name: &str) -> Option<String>;
}

/// The real process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl<F> EnvLookup for F
where
    F: Fn(&str) -> Option<String>,
{
    fn var(&self, name: &str) -> Option<String> {
        self(name)
    }
}

/// An executable entry; the target name defaults to the file name
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutableEntry {
    pub path: PathBuf,
    #[serde(default)]
    pub target_name: Option<String>,
}

/// An extra reference rule for automatic discovery
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleEntry {
    pub name: String,
    /// Regex whose first capture group is a relative path
    pub pattern: String,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum DependencySection {
    Manual {
        #[serde(default)]
        files: Vec<PathBuf>,
    },
    Automatic {
        entry_points: Vec<PathBuf>,
        #[serde(default)]
        max_depth: Option<usize>,
        #[serde(default)]
        rules: Vec<RuleEntry>,
        /// Use only `rules`, without the built-in rule set
        #[serde(default)]
        replace_builtin_rules: bool,
    },
}

impl Default for DependencySection {
    fn default() -> Self {
        Self::Manual { files: Vec::new() }
    }
}

impl DependencySection {
    fn resolver(&self, base_dir: &Path) -> Result<Arc<dyn DependencyResolver>, ConfigurationError> {
        match self {
            Self::Manual { files } => Ok(Arc::new(
                ManualDependencyResolver::new().with_all(files.iter().map(|f| base_dir.join(f))),
            )),
            Self::Automatic {
                entry_points,
                max_depth,
                rules,
                replace_builtin_rules,
            } => {
                let mut resolver = AutomaticDependencyResolver::new(
                    entry_points.iter().map(|p| base_dir.join(p)),
                );
                let mut custom = Vec::with_capacity(rules.len());
                for rule in rules {
                    let mut compiled = RegexRule::new(rule.name.clone(), &rule.pattern)
                        .map_err(|e| {
                            ConfigurationError::invalid(
                                "dependencies.rules",
                                format!("rule '{}': {e}", rule.name),
                            )
                        })?
                        .for_extensions(rule.extensions.iter().cloned());
                    if rule.optional {
                        compiled = compiled.optional();
                    }
                    custom.push(compiled);
                }
                if *replace_builtin_rules {
                    resolver = resolver.with_scanners(
                        custom
                            .into_iter()
                            .map(|rule| Arc::new(rule) as Arc<dyn ReferenceScanner>)
                            .collect(),
                    );
                } else {
                    for rule in custom {
                        resolver = resolver.with_scanner(rule);
                    }
                }
                if let Some(depth) = max_depth {
                    resolver = resolver.with_max_depth(*depth);
                }
                Ok(Arc::new(resolver))
            }
        }
    }
}

/// Deserialized run file
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunFile {
    #[serde(default)]
    pub batch_account: BatchAccountSettings,
    #[serde(default)]
    pub storage_account: StorageAccountSettings,
    pub machine: AzureMachineConfig,
    pub pool: PoolSetup,
    #[serde(default)]
    pub application_packages: Vec<ApplicationPackageReference>,
    #[serde(default)]
    pub executables: Vec<ExecutableEntry>,
    #[serde(default)]
    pub startup_command: Option<BatchConsoleCommand>,
    #[serde(default)]
    pub tasks: Vec<BatchConsoleCommand>,
    #[serde(default)]
    pub dependencies: DependencySection,
    #[serde(default)]
    pub output: Option<BatchOutputContainer>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub poll_interval: Option<Duration>,
    #[serde(default)]
    pub cleanup: bool,
    #[serde(default)]
    pub save_statistics: bool,
    #[serde(default)]
    pub status_format: StatusFormat,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub upload_parallelism: Option<usize>,
    #[serde(default)]
    pub max_consecutive_poll_errors: Option<u32>,
    /// Directory that relative paths are resolved against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl RunFile {
    /// Parse YAML; relative paths are resolved against `base_dir`
    pub fn parse(yaml: &str, base_dir: impl Into<PathBuf>) -> Result<Self, ConfigurationError> {
        let mut run_file: RunFile =
            serde_yaml::from_str(yaml).map_err(|e| ConfigurationError::RunFile {
                path: PathBuf::from("<inline>"),
                reason: e.to_string(),
            })?;
        run_file.base_dir = base_dir.into();
        Ok(run_file)
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| ConfigurationError::RunFile {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::parse(&content, base_dir).map_err(|e| match e {
            ConfigurationError::RunFile { reason, .. } => ConfigurationError::RunFile {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Override secrets and endpoints from the environment
    pub fn apply_env(&mut self, env: &dyn EnvLookup) {
        let lookup = |name: &str| env.var(name).filter(|value| !value.trim().is_empty());

        if let Some(key) = lookup(ENV_BATCH_ACCOUNT_KEY) {
            debug!("Using batch account key from {}", ENV_BATCH_ACCOUNT_KEY);
            self.batch_account.account_key = key;
        }
        if let Some(url) = lookup(ENV_BATCH_ACCOUNT_URL) {
            self.batch_account.account_url = url;
        }
        if let Some(connection_string) = lookup(ENV_STORAGE_CONNECTION_STRING) {
            debug!("Using storage connection string from {}", ENV_STORAGE_CONNECTION_STRING);
            self.storage_account.connection_string = Some(connection_string);
        }
        if let Some(key) = lookup(ENV_STORAGE_ACCOUNT_KEY) {
            self.storage_account.account_key = Some(key);
        }
    }

    /// Run the file's contents through the staged builder
    pub fn into_plan(self) -> Result<ExecutionPlan, ConfigurationError> {
        let base_dir = self.base_dir;
        let resolver = self.dependencies.resolver(&base_dir)?;
        let executables = self
            .executables
            .iter()
            .map(|entry| {
                let local_path = base_dir.join(&entry.path);
                match &entry.target_name {
                    Some(name) => Ok(BatchExecutableInfo::new(local_path, name.clone())),
                    None => BatchExecutableInfo::from_path(&local_path).ok_or_else(|| {
                        ConfigurationError::invalid(
                            "executables.path",
                            format!("'{}' has no file name", entry.path.display()),
                        )
                    }),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut builder = StagedPlanBuilder::new()
            .with_account_settings(self.batch_account)
            .with_storage_settings(self.storage_account)
            .with_machine_config(self.machine, self.pool)
            .with_commands(self.startup_command, self.tasks)
            .with_dependencies(resolver)
            .with_application_packages(self.application_packages)
            .with_executables(executables)
            .with_cleanup(self.cleanup)
            .with_statistics(self.save_statistics)
            .with_status_format(self.status_format)
            .with_retry_policy(self.retry)
            .with_output_root(base_dir.clone());

        if let Some(output) = self.output {
            let local_directory = base_dir.join(&output.local_directory);
            builder = builder.with_output_container(BatchOutputContainer {
                local_directory,
                ..output
            });
        }
        if let Some(timeout) = self.timeout {
            builder = builder.with_timeout(timeout);
        }
        if let Some(interval) = self.poll_interval {
            builder = builder.with_poll_interval(interval);
        }
        if let Some(parallelism) = self.upload_parallelism {
            builder = builder.with_upload_parallelism(parallelism);
        }
        if let Some(errors) = self.max_consecutive_poll_errors {
            builder = builder.with_max_consecutive_poll_errors(errors);
        }
        builder.build()
    }

    /// Load, apply environment overrides, and build
    pub async fn load_plan(
        path: &Path,
        env: &dyn EnvLookup,
    ) -> Result<ExecutionPlan, ConfigurationError> {
        let mut run_file = Self::load(path).await?;
        run_file.apply_env(env);
        run_file.into_plan()
    }
}
