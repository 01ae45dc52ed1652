//! Progress events emitted while a run executes

use super::StatusSnapshot;
use crate::orchestrator::{RunOutcome, RunState};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Events that can occur during a run
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// The run moved to a new state
    StateChanged { from: RunState, to: RunState },
    /// Dependency resolution finished
    DependenciesResolved { files: usize, warnings: Vec<String> },
    /// One input file was uploaded
    FileUploaded {
        blob_name: String,
        bytes: u64,
        uploaded: usize,
        total: usize,
    },
    /// A transient failure is being retried
    Retrying {
        operation: String,
        attempt: u32,
        error: String,
    },
    /// One polling cycle completed
    Status {
        snapshot: StatusSnapshot,
        report: String,
    },
    /// Outputs were copied to the local directory
    OutputsCollected { files: usize, bytes: u64 },
    /// Monitoring reached a terminal outcome
    Finished { outcome: RunOutcome },
    /// A cleanup step failed; the outcome is unaffected
    CleanupFailed { resource: String, error: String },
}

impl ProgressEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            ProgressEvent::StateChanged { from, to } => format!("{from} -> {to}"),
            ProgressEvent::DependenciesResolved { files, warnings } => {
                if warnings.is_empty() {
                    format!("Resolved {files} dependency file(s)")
                } else {
                    format!(
                        "Resolved {files} dependency file(s) with {} warning(s)",
                        warnings.len()
                    )
                }
            }
            ProgressEvent::FileUploaded {
                blob_name,
                uploaded,
                total,
                ..
            } => format!("Uploaded {blob_name} ({uploaded}/{total})"),
            ProgressEvent::Retrying {
                operation,
                attempt,
                error,
            } => format!("Retrying {operation} (attempt {attempt}): {error}"),
            ProgressEvent::Status { report, .. } => report.clone(),
            ProgressEvent::OutputsCollected { files, bytes } => {
                format!("Collected {files} output file(s), {bytes} bytes")
            }
            ProgressEvent::Finished { outcome } => format!("Run finished: {outcome}"),
            ProgressEvent::CleanupFailed { resource, error } => {
                format!("Cleanup of {resource} failed: {error}")
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Finished { .. })
    }
}

/// Observer for run progress
#[async_trait]
pub trait ProgressObserver: Send + Sync {
    async fn on_event(&self, event: &ProgressEvent);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

#[async_trait]
impl ProgressObserver for NoopObserver {
    async fn on_event(&self, _event: &ProgressEvent) {}
}

/// Writes events to the tracing subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

#[async_trait]
impl ProgressObserver for TracingObserver {
    async fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::FileUploaded { .. } => debug!("{}", event.description()),
            ProgressEvent::Retrying { .. } | ProgressEvent::CleanupFailed { .. } => {
                warn!("{}", event.description())
            }
            ProgressEvent::DependenciesResolved { warnings, .. } => {
                for warning in warnings {
                    warn!("{warning}");
                }
                info!("{}", event.description());
            }
            _ => info!("{}", event.description()),
        }
    }
}

/// Forwards events into a channel consumed by the caller
///
/// Events are dropped once the receiver is gone; a slow consumer applies
/// backpressure to the run.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::Sender<ProgressEvent>,
}

impl ChannelObserver {
    pub fn new(sender: mpsc::Sender<ProgressEvent>) -> Self {
        Self { sender }
    }

    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::channel(buffer);
        (Self::new(sender), receiver)
    }
}

#[async_trait]
impl ProgressObserver for ChannelObserver {
    async fn on_event(&self, event: &ProgressEvent) {
        if self.sender.send(event.clone()).await.is_err() {
            debug!("Progress receiver dropped");
        }
    }
}
