//! Command routing and execution

use super::args::Commands;
use super::progress::ConsoleProgress;
use crate::config::{ProcessEnv, RunFile};
use crate::grid::LocalComputeGrid;
use crate::orchestrator::{ExecutionOrchestrator, RunOutcome, RunReport};
use crate::status::{ProgressObserver, TracingObserver};
use crate::transfer::LocalBlobStore;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub const EXIT_SUCCESS: i32 = 0;
/// Configuration, dependency, transfer or provisioning error
pub const EXIT_ERROR: i32 = 1;
pub const EXIT_TASKS_FAILED: i32 = 2;
/// Timed out or cancelled with tasks still pending
pub const EXIT_INCOMPLETE: i32 = 3;

const DEFAULT_WORKSPACE: &str = ".batchrun";

pub fn exit_code(outcome: &RunOutcome) -> i32 {
    match outcome {
        RunOutcome::Succeeded => EXIT_SUCCESS,
        RunOutcome::Failed(_) => EXIT_TASKS_FAILED,
        RunOutcome::TimedOut | RunOutcome::Cancelled => EXIT_INCOMPLETE,
    }
}

/// Execute a CLI command and return the process exit code
pub async fn execute_command(command: Commands) -> Result<i32> {
    match command {
        Commands::Validate { run_file } => validate(&run_file).await,
        Commands::Run {
            run_file,
            workspace,
            no_cleanup,
            quiet,
        } => run(&run_file, workspace, no_cleanup, quiet).await,
    }
}

async fn load_run_file(path: &Path) -> Result<RunFile> {
    let mut run_file = RunFile::load(path).await?;
    run_file.apply_env(&ProcessEnv);
    Ok(run_file)
}

async fn validate(path: &Path) -> Result<i32> {
    let plan = load_run_file(path).await?.into_plan()?;
    println!("{} is valid", path.display());
    println!("{}", plan.summary());
    Ok(EXIT_SUCCESS)
}

async fn run(
    path: &Path,
    workspace: Option<PathBuf>,
    no_cleanup: bool,
    quiet: bool,
) -> Result<i32> {
    let mut run_file = load_run_file(path).await?;
    if no_cleanup {
        run_file.cleanup = false;
    }
    let workspace = workspace.unwrap_or_else(|| run_file.base_dir.join(DEFAULT_WORKSPACE));
    let plan = run_file.into_plan()?;

    // Nodes run with their own working directories; every path must be absolute
    tokio::fs::create_dir_all(&workspace)
        .await
        .with_context(|| format!("Failed to create workspace {}", workspace.display()))?;
    let workspace = workspace.canonicalize()?;

    let grid = Arc::new(LocalComputeGrid::new(workspace.join("grid")));
    let blobs = Arc::new(
        LocalBlobStore::new(workspace.join("blobs"))
            .with_context(|| format!("Failed to open blob store in {}", workspace.display()))?,
    );
    let orchestrator = ExecutionOrchestrator::new(grid, blobs);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current poll");
            interrupt.cancel();
        }
    });

    let observer: Box<dyn ProgressObserver> = if quiet {
        Box::new(TracingObserver)
    } else {
        Box::new(ConsoleProgress::new())
    };
    let report = orchestrator.run(plan, observer.as_ref(), cancel).await?;
    print_report(&report);
    Ok(exit_code(&report.outcome))
}

fn print_report(report: &RunReport) {
    println!("Job {} on pool {}: {}", report.job_id, report.pool_id, report.outcome);
    println!(
        "  {} file(s) uploaded, {} output file(s) downloaded, {} poll(s)",
        report.uploaded.len(),
        report.downloaded.files.len(),
        report.polls
    );
    if let Some(path) = &report.statistics_path {
        println!("  statistics: {}", path.display());
    }
    for warning in &report.warnings {
        println!("  warning: {warning}");
    }
    if let Some(cleanup) = &report.cleanup {
        for error in &cleanup.errors {
            println!("  cleanup: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::FailureReason;

    #[test]
    fn test_exit_codes_follow_outcome() {
        assert_eq!(exit_code(&RunOutcome::Succeeded), EXIT_SUCCESS);
        assert_eq!(
            exit_code(&RunOutcome::Failed(FailureReason::Remote {
                message: "gone".into()
            })),
            EXIT_TASKS_FAILED
        );
        assert_eq!(exit_code(&RunOutcome::TimedOut), EXIT_INCOMPLETE);
        assert_eq!(exit_code(&RunOutcome::Cancelled), EXIT_INCOMPLETE);
    }
}
