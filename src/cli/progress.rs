//! Terminal progress display for `batchrun run`

use crate::status::{ProgressEvent, ProgressObserver, TaskCounts};
use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing::{info, warn};

/// Draws one progress bar: uploads first, then completed tasks
pub struct ConsoleProgress {
    bar: ProgressBar,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(spinner_style());
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.blue} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} | {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

#[async_trait]
impl ProgressObserver for ConsoleProgress {
    async fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::FileUploaded {
                blob_name,
                uploaded,
                total,
                ..
            } => {
                self.bar.set_style(bar_style());
                self.bar.set_length(*total as u64);
                self.bar.set_position(*uploaded as u64);
                self.bar.set_message(format!("uploaded {blob_name}"));
            }
            ProgressEvent::Status { snapshot, .. } => {
                let counts = TaskCounts::from_tasks(&snapshot.tasks);
                self.bar.set_style(bar_style());
                self.bar.set_length(counts.total as u64);
                self.bar.set_position(counts.completed() as u64);
                self.bar.set_message(format!(
                    "poll {}: {} running, {} failed",
                    snapshot.poll, counts.running, counts.failed
                ));
            }
            ProgressEvent::StateChanged { to, .. } => {
                self.bar.set_message(to.to_string());
            }
            ProgressEvent::Retrying { .. } | ProgressEvent::CleanupFailed { .. } => {
                self.bar.suspend(|| warn!("{}", event.description()));
            }
            ProgressEvent::DependenciesResolved { .. } | ProgressEvent::OutputsCollected { .. } => {
                self.bar.suspend(|| info!("{}", event.description()));
            }
            ProgressEvent::Finished { outcome } => {
                self.bar.finish_with_message(format!("run {outcome}"));
            }
        }
    }
}
