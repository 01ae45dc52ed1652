//! The immutable execution plan handed to the orchestrator

use super::command::{BatchConsoleCommand, BatchExecutableInfo};
use super::machine::{ApplicationPackageReference, MachineSpec, PoolSetup};
use super::settings::BatchEnvironment;
use crate::dependencies::DependencyResolver;
use crate::error::ConfigurationError;
use crate::transfer::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// How much detail each status report carries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFormat {
    /// Counts only
    #[default]
    Terse,
    /// Counts plus one line per node and per task
    Verbose,
    /// The raw snapshot as JSON
    Json,
}

/// Where task outputs are collected and where they are downloaded to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutputContainer {
    pub name: String,
    pub local_directory: PathBuf,
    /// Glob patterns, relative to the task working directory, of files to
    /// persist in addition to stdout/stderr
    #[serde(default)]
    pub file_patterns: Vec<String>,
}

impl BatchOutputContainer {
    pub fn new(name: impl Into<String>, local_directory: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            local_directory: local_directory.into(),
            file_patterns: Vec::new(),
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.file_patterns.push(pattern.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        validate_container_name("output_container.name", &self.name)?;
        for pattern in &self.file_patterns {
            glob::Pattern::new(pattern).map_err(|e| {
                ConfigurationError::invalid(
                    "output_container.file_patterns",
                    format!("'{pattern}': {e}"),
                )
            })?;
        }
        Ok(())
    }
}

/// Storage container names: 3..=63 chars, lowercase letters, digits and
/// single hyphens, starting and ending with a letter or digit
pub fn validate_container_name(field: &'static str, name: &str) -> Result<(), ConfigurationError> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let valid_edges = name
        .chars()
        .next()
        .zip(name.chars().last())
        .is_some_and(|(first, last)| first != '-' && last != '-');
    if !(3..=63).contains(&name.len()) || !valid_chars || !valid_edges || name.contains("--") {
        return Err(ConfigurationError::invalid(
            field,
            format!("'{name}' is not a valid container name"),
        ));
    }
    Ok(())
}

/// Derive a container name from an arbitrary identifier.
///
/// Identifiers that are already valid container prefixes map straight
/// through. Anything lowercased, replaced or truncated on the way gets an
/// eight-digit hash of the raw identifier, so distinct identifiers never
/// share a container.
pub fn container_name_for(id: &str, suffix: &str) -> String {
    let mut sanitized: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    while sanitized.contains("--") {
        sanitized = sanitized.replace("--", "-");
    }
    let sanitized = sanitized.trim_matches('-');

    let max_base = 63 - suffix.len() - 1;
    if !sanitized.is_empty() && sanitized == id && sanitized.len() <= max_base {
        return format!("{sanitized}-{suffix}");
    }

    let tag = format!("{:08x}", fnv1a(id.as_bytes()));
    let mut base = sanitized.to_string();
    base.truncate(max_base - tag.len() - 1);
    let base = base.trim_end_matches('-');
    let base = if base.is_empty() { "batch" } else { base };
    format!("{base}-{tag}-{suffix}")
}

// Stable across toolchains, unlike the std hasher.
fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5, |hash: u32, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(0x0100_0193)
    })
}

/// Everything required to run one batch.
///
/// Built only by [`StagedPlanBuilder`](crate::builder::StagedPlanBuilder),
/// never mutated afterwards, and consumed exactly once by the orchestrator.
pub struct ExecutionPlan {
    pub(crate) environment: BatchEnvironment,
    pub(crate) machine: MachineSpec,
    pub(crate) pool: PoolSetup,
    pub(crate) job_id: String,
    pub(crate) application_packages: Vec<ApplicationPackageReference>,
    pub(crate) executables: Vec<BatchExecutableInfo>,
    pub(crate) startup_command: Option<BatchConsoleCommand>,
    pub(crate) task_commands: Vec<BatchConsoleCommand>,
    pub(crate) dependencies: Arc<dyn DependencyResolver>,
    pub(crate) input_container: String,
    pub(crate) output: BatchOutputContainer,
    pub(crate) timeout: Duration,
    pub(crate) poll_interval: Duration,
    pub(crate) cleanup_afterwards: bool,
    pub(crate) save_statistics: bool,
    pub(crate) status_format: StatusFormat,
    pub(crate) retry: RetryPolicy,
    pub(crate) upload_parallelism: usize,
    pub(crate) max_consecutive_poll_errors: u32,
}

impl ExecutionPlan {
    pub fn environment(&self) -> &BatchEnvironment {
        &self.environment
    }

    pub fn machine(&self) -> &MachineSpec {
        &self.machine
    }

    pub fn pool(&self) -> &PoolSetup {
        &self.pool
    }

    pub fn pool_id(&self) -> &str {
        &self.pool.pool_id
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn application_packages(&self) -> &[ApplicationPackageReference] {
        &self.application_packages
    }

    pub fn executables(&self) -> &[BatchExecutableInfo] {
        &self.executables
    }

    pub fn startup_command(&self) -> Option<&BatchConsoleCommand> {
        self.startup_command.as_ref()
    }

    pub fn task_commands(&self) -> &[BatchConsoleCommand] {
        &self.task_commands
    }

    pub fn dependencies(&self) -> &dyn DependencyResolver {
        self.dependencies.as_ref()
    }

    /// Transient container holding uploaded dependencies
    pub fn input_container(&self) -> &str {
        &self.input_container
    }

    pub fn output(&self) -> &BatchOutputContainer {
        &self.output
    }

    pub fn output_directory(&self) -> &Path {
        &self.output.local_directory
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn cleanup_afterwards(&self) -> bool {
        self.cleanup_afterwards
    }

    pub fn save_statistics(&self) -> bool {
        self.save_statistics
    }

    pub fn status_format(&self) -> StatusFormat {
        self.status_format
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn upload_parallelism(&self) -> usize {
        self.upload_parallelism
    }

    pub fn max_consecutive_poll_errors(&self) -> u32 {
        self.max_consecutive_poll_errors
    }

    /// Tasks need uploaded inputs whenever executables are declared
    pub fn requires_input_files(&self) -> bool {
        !self.executables.is_empty()
    }

    /// One-line-per-field summary for the `validate` command
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!(
                "pool:        {} ({} x {}, {:?})",
                self.pool.pool_id,
                self.machine.node_count,
                self.machine.vm_size,
                self.machine.os_family
            ),
            format!("job:         {}", self.job_id),
            format!("tasks:       {}", self.task_commands.len()),
            format!("executables: {}", self.executables.len()),
            format!("inputs:      {}", self.input_container),
            format!(
                "outputs:     {} -> {}",
                self.output.name,
                self.output.local_directory.display()
            ),
            format!("timeout:     {}", crate::status::format_duration(self.timeout)),
            format!("cleanup:     {}", self.cleanup_afterwards),
        ];
        if let Some(startup) = &self.startup_command {
            lines.push(format!("startup:     {}", startup.compose(self.machine.os_family)));
        }
        lines.join("\n")
    }
}

impl fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionPlan")
            .field("pool", &self.pool)
            .field("job_id", &self.job_id)
            .field("machine", &self.machine)
            .field("task_commands", &self.task_commands.len())
            .field("executables", &self.executables)
            .field("input_container", &self.input_container)
            .field("output", &self.output)
            .field("timeout", &self.timeout)
            .field("cleanup_afterwards", &self.cleanup_afterwards)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_name_rules() {
        assert!(validate_container_name("c", "job-output").is_ok());
        assert!(validate_container_name("c", "ab").is_err());
        assert!(validate_container_name("c", "Job-Output").is_err());
        assert!(validate_container_name("c", "-output").is_err());
        assert!(validate_container_name("c", "job--output").is_err());
        assert!(validate_container_name("c", &"a".repeat(64)).is_err());
    }

    #[test]
    fn test_container_name_for_identifier() {
        assert_eq!(container_name_for("render-job-01", "inputs"), "render-job-01-inputs");
        assert_eq!(container_name_for("Render_Job-01", "inputs"), "render-job-01-263183af-inputs");

        let empty = container_name_for("__", "output");
        assert!(empty.starts_with("batch-") && empty.ends_with("-output"));
        assert!(validate_container_name("c", &empty).is_ok());

        let long = container_name_for(&"x".repeat(100), "inputs");
        assert!(validate_container_name("c", &long).is_ok());
    }

    #[test]
    fn test_container_names_of_distinct_identifiers_differ() {
        let pairs = [
            ("Render_1", "render-1"),
            ("render.1", "render-1"),
            ("Render_1", "render_1"),
            ("__", "--"),
        ];
        for (left, right) in pairs {
            let a = container_name_for(left, "inputs");
            let b = container_name_for(right, "inputs");
            assert_ne!(a, b, "{left} and {right} share a container");
            assert!(validate_container_name("c", &a).is_ok());
            assert!(validate_container_name("c", &b).is_ok());
        }

        let prefix = "y".repeat(70);
        assert_ne!(
            container_name_for(&format!("{prefix}-a"), "output"),
            container_name_for(&format!("{prefix}-b"), "output")
        );
    }

    #[test]
    fn test_output_container_rejects_bad_pattern() {
        let container = BatchOutputContainer::new("job-output", "out").with_pattern("[");
        assert!(container.validate().is_err());
        let container = BatchOutputContainer::new("job-output", "out").with_pattern("*.csv");
        assert!(container.validate().is_ok());
    }
}
