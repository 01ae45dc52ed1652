//! Pool and task status reporting
//!
//! [`PoolStatusReporter`] turns a snapshot into text; it performs no remote
//! calls and mutates nothing. Progress events flow to a caller-supplied
//! [`ProgressObserver`].

pub mod events;

pub use events::{ChannelObserver, NoopObserver, ProgressEvent, ProgressObserver, TracingObserver};

use crate::config::StatusFormat;
use crate::grid::{NodeState, PoolSnapshot, TaskSnapshot, TaskState};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

/// Node and task states observed in one polling cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub poll: u32,
    pub elapsed: Duration,
    pub pool: PoolSnapshot,
    pub tasks: Vec<TaskSnapshot>,
}

/// Task counts derived from a snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub total: usize,
    pub active: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl TaskCounts {
    pub fn from_tasks(tasks: &[TaskSnapshot]) -> Self {
        let mut counts = Self {
            total: tasks.len(),
            ..Default::default()
        };
        for task in tasks {
            match task.state {
                TaskState::Active => counts.active += 1,
                TaskState::Preparing | TaskState::Running => counts.running += 1,
                TaskState::Completed if task.succeeded() => counts.succeeded += 1,
                TaskState::Completed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn completed(&self) -> usize {
        self.succeeded + self.failed
    }
}

impl StatusSnapshot {
    pub fn task_counts(&self) -> TaskCounts {
        TaskCounts::from_tasks(&self.tasks)
    }
}

/// Formats status snapshots at a fixed verbosity
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStatusReporter {
    format: StatusFormat,
}

impl PoolStatusReporter {
    pub fn new(format: StatusFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> StatusFormat {
        self.format
    }

    pub fn report(&self, snapshot: &StatusSnapshot) -> String {
        match self.format {
            StatusFormat::Terse => Self::summary_line(snapshot),
            StatusFormat::Verbose => Self::verbose(snapshot),
            StatusFormat::Json => serde_json::to_string(snapshot)
                .unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}")),
        }
    }

    fn summary_line(snapshot: &StatusSnapshot) -> String {
        let counts = snapshot.task_counts();
        let mut node_states: BTreeMap<&'static str, usize> = BTreeMap::new();
        for node in &snapshot.pool.nodes {
            *node_states.entry(node_state_name(node.state)).or_default() += 1;
        }
        let nodes = node_states
            .iter()
            .map(|(state, count)| format!("{count} {state}"))
            .collect::<Vec<_>>()
            .join(", ");

        let mut line = format!(
            "[{}] poll {}: tasks {}/{} completed",
            format_duration(snapshot.elapsed),
            snapshot.poll,
            counts.completed(),
            counts.total
        );
        if counts.failed > 0 {
            let _ = write!(line, " ({} failed)", counts.failed);
        }
        let _ = write!(
            line,
            ", {} running, {} active | nodes: {}",
            counts.running,
            counts.active,
            if nodes.is_empty() { "none".to_string() } else { nodes }
        );
        if !snapshot.pool.resize_errors.is_empty() {
            let _ = write!(line, " | {} resize error(s)", snapshot.pool.resize_errors.len());
        }
        line
    }

    fn verbose(snapshot: &StatusSnapshot) -> String {
        let mut out = Self::summary_line(snapshot);
        for error in &snapshot.pool.resize_errors {
            let _ = write!(out, "\n  resize error: {error}");
        }
        for node in &snapshot.pool.nodes {
            let _ = write!(
                out,
                "\n  node {:<12} {:<22} {} task(s)",
                node.id,
                node_state_name(node.state),
                node.running_tasks
            );
        }
        for task in &snapshot.tasks {
            let _ = write!(out, "\n  task {:<12} {:<10}", task.id, task_state_name(task));
            if let Some(node) = &task.node_id {
                let _ = write!(out, " on {node}");
            }
            if let Some(code) = task.exit_code {
                let _ = write!(out, " exit {code}");
            }
            if let Some(failure) = &task.failure {
                let _ = write!(out, " ({failure})");
            }
        }
        out
    }
}

fn node_state_name(state: NodeState) -> &'static str {
    match state {
        NodeState::Creating => "creating",
        NodeState::Starting => "starting",
        NodeState::WaitingForStartTask => "waiting-for-start-task",
        NodeState::StartTaskFailed => "start-task-failed",
        NodeState::Idle => "idle",
        NodeState::Running => "running",
        NodeState::Unusable => "unusable",
        NodeState::Offline => "offline",
    }
}

fn task_state_name(task: &TaskSnapshot) -> &'static str {
    match task.state {
        TaskState::Active => "active",
        TaskState::Preparing => "preparing",
        TaskState::Running => "running",
        TaskState::Completed if task.succeeded() => "succeeded",
        TaskState::Completed => "failed",
    }
}

/// Format time duration for display
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::NodeSnapshot;

    fn snapshot() -> StatusSnapshot {
        let mut failed = TaskSnapshot::completed("task-0002", 3);
        failed.node_id = Some("node-001".into());
        let mut running = TaskSnapshot::new("task-0003", TaskState::Running);
        running.node_id = Some("node-000".into());
        StatusSnapshot {
            poll: 4,
            elapsed: Duration::from_secs(75),
            pool: PoolSnapshot {
                pool_id: "pool".into(),
                nodes: vec![
                    NodeSnapshot {
                        id: "node-000".into(),
                        state: NodeState::Running,
                        running_tasks: 1,
                    },
                    NodeSnapshot {
                        id: "node-001".into(),
                        state: NodeState::Idle,
                        running_tasks: 0,
                    },
                ],
                resize_errors: vec![],
            },
            tasks: vec![
                TaskSnapshot::completed("task-0001", 0),
                failed,
                running,
                TaskSnapshot::new("task-0004", TaskState::Active),
            ],
        }
    }

    #[test]
    fn test_terse_report_counts_only() {
        let report = PoolStatusReporter::new(StatusFormat::Terse).report(&snapshot());
        assert_eq!(
            report,
            "[1m 15s] poll 4: tasks 2/4 completed (1 failed), 1 running, 1 active | nodes: 1 idle, 1 running"
        );
    }

    #[test]
    fn test_verbose_report_lists_nodes_and_tasks() {
        let report = PoolStatusReporter::new(StatusFormat::Verbose).report(&snapshot());
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines.len(), 1 + 2 + 4);
        assert!(lines[1].contains("node-000") && lines[1].contains("running"));
        assert!(lines[4].contains("task-0002"));
        assert!(lines[4].contains("failed") && lines[4].contains("exit 3"));
        assert!(lines[5].contains("on node-000"));
    }

    #[test]
    fn test_json_report_round_trips_counts() {
        let report = PoolStatusReporter::new(StatusFormat::Json).report(&snapshot());
        let value: serde_json::Value = serde_json::from_str(&report).unwrap();
        assert_eq!(value["poll"], 4);
        assert_eq!(value["tasks"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_report_is_pure() {
        let reporter = PoolStatusReporter::new(StatusFormat::Verbose);
        let snap = snapshot();
        assert_eq!(reporter.report(&snap), reporter.report(&snap));
    }

    #[test]
    fn test_empty_pool() {
        let report = PoolStatusReporter::default().report(&StatusSnapshot::default());
        assert!(report.ends_with("nodes: none"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(5)), "5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }
}
