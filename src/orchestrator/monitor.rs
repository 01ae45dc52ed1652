//! Poll loop that watches a submitted job until a terminal outcome

use super::state::{FailureReason, RunOutcome, TaskFailure};
use crate::clock::Clock;
use crate::grid::{ComputeGridClient, GridError, TaskSnapshot};
use crate::status::{PoolStatusReporter, ProgressEvent, ProgressObserver, StatusSnapshot};
use crate::transfer::Retryable;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Inputs to one monitoring session
pub struct MonitorConfig<'a> {
    pub job_id: &'a str,
    pub pool_id: &'a str,
    pub started: Instant,
    pub deadline: Instant,
    pub poll_interval: Duration,
    pub max_consecutive_errors: u32,
    pub reporter: PoolStatusReporter,
}

pub struct MonitorResult {
    pub outcome: RunOutcome,
    pub polls: u32,
    pub last_snapshot: Option<StatusSnapshot>,
}

/// Poll until every task is terminal, the deadline passes, a fatal error
/// occurs, or `cancel` fires
///
/// At most one status fetch is outstanding at any time.
pub async fn watch(
    grid: &dyn ComputeGridClient,
    clock: &dyn Clock,
    observer: &dyn ProgressObserver,
    config: MonitorConfig<'_>,
    cancel: &CancellationToken,
) -> MonitorResult {
    let mut polls = 0u32;
    let mut consecutive_errors = 0u32;
    let mut last_snapshot: Option<StatusSnapshot> = None;

    let outcome = loop {
        if cancel.is_cancelled() {
            break RunOutcome::Cancelled;
        }

        polls += 1;
        match fetch(grid, config.job_id, config.pool_id).await {
            Ok((tasks, pool)) => {
                consecutive_errors = 0;
                let snapshot = StatusSnapshot {
                    poll: polls,
                    elapsed: clock.now().saturating_duration_since(config.started),
                    pool,
                    tasks,
                };
                let report = config.reporter.report(&snapshot);
                observer
                    .on_event(&ProgressEvent::Status {
                        snapshot: snapshot.clone(),
                        report,
                    })
                    .await;
                let decision = evaluate(&snapshot);
                last_snapshot = Some(snapshot);
                if let Some(outcome) = decision {
                    break outcome;
                }
            }
            Err(error)
                if error.is_retryable() && consecutive_errors < config.max_consecutive_errors =>
            {
                consecutive_errors += 1;
                warn!(
                    "Poll {} failed ({}), {} of {} tolerated",
                    polls, error, consecutive_errors, config.max_consecutive_errors
                );
                observer
                    .on_event(&ProgressEvent::Retrying {
                        operation: format!("status poll of job {}", config.job_id),
                        attempt: consecutive_errors,
                        error: error.to_string(),
                    })
                    .await;
            }
            Err(error) => {
                warn!("Monitoring of job {} failed: {}", config.job_id, error);
                break RunOutcome::Failed(FailureReason::Remote {
                    message: error.to_string(),
                });
            }
        }

        let now = clock.now();
        if now >= config.deadline {
            info!("Job {} did not finish before the deadline", config.job_id);
            break RunOutcome::TimedOut;
        }
        let wait = config.poll_interval.min(config.deadline - now);
        debug!("Next poll of job {} in {:?}", config.job_id, wait);
        let cancelled = tokio::select! {
            _ = cancel.cancelled() => true,
            _ = clock.sleep(wait) => false,
        };
        if cancelled {
            break RunOutcome::Cancelled;
        }
    };

    MonitorResult {
        outcome,
        polls,
        last_snapshot,
    }
}

async fn fetch(
    grid: &dyn ComputeGridClient,
    job_id: &str,
    pool_id: &str,
) -> Result<(Vec<TaskSnapshot>, crate::grid::PoolSnapshot), GridError> {
    let tasks = grid.list_tasks(job_id).await?;
    let pool = grid.list_nodes(pool_id).await?;
    Ok((tasks, pool))
}

/// Decide whether a snapshot ends monitoring
pub fn evaluate(snapshot: &StatusSnapshot) -> Option<RunOutcome> {
    if !snapshot.pool.resize_errors.is_empty() {
        return Some(RunOutcome::Failed(FailureReason::PoolResize {
            errors: snapshot.pool.resize_errors.clone(),
        }));
    }
    if snapshot.tasks.is_empty() || !snapshot.tasks.iter().all(TaskSnapshot::is_terminal) {
        return None;
    }
    let failures: Vec<TaskFailure> = snapshot
        .tasks
        .iter()
        .filter(|task| task.failed())
        .map(|task| TaskFailure {
            task_id: task.id.clone(),
            exit_code: task.exit_code,
            message: task.failure.clone(),
        })
        .collect();
    if failures.is_empty() {
        Some(RunOutcome::Succeeded)
    } else {
        Some(RunOutcome::Failed(FailureReason::TasksFailed { failures }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{PoolSnapshot, TaskState};

    fn snapshot(tasks: Vec<TaskSnapshot>) -> StatusSnapshot {
        StatusSnapshot {
            tasks,
            ..Default::default()
        }
    }

    #[test]
    fn test_pending_tasks_keep_monitoring() {
        let snap = snapshot(vec![
            TaskSnapshot::completed("a", 0),
            TaskSnapshot::new("b", TaskState::Running),
        ]);
        assert_eq!(evaluate(&snap), None);
        assert_eq!(evaluate(&snapshot(vec![])), None);
    }

    #[test]
    fn test_all_succeeded() {
        let snap = snapshot(vec![
            TaskSnapshot::completed("a", 0),
            TaskSnapshot::completed("b", 0),
        ]);
        assert_eq!(evaluate(&snap), Some(RunOutcome::Succeeded));
    }

    #[test]
    fn test_any_failure_fails_the_run() {
        let snap = snapshot(vec![
            TaskSnapshot::completed("a", 0),
            TaskSnapshot::completed("b", 1),
        ]);
        match evaluate(&snap) {
            Some(RunOutcome::Failed(FailureReason::TasksFailed { failures })) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].task_id, "b");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_resize_errors_fail_immediately() {
        let snap = StatusSnapshot {
            pool: PoolSnapshot {
                resize_errors: vec!["quota exceeded".into()],
                ..Default::default()
            },
            tasks: vec![TaskSnapshot::new("a", TaskState::Active)],
            ..Default::default()
        };
        assert!(matches!(
            evaluate(&snap),
            Some(RunOutcome::Failed(FailureReason::PoolResize { .. }))
        ));
    }
}
