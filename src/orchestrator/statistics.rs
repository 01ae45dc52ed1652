//! `statistics.json` written next to downloaded outputs

use super::state::{RunOutcome, RunReport};
use crate::error::BatchResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const STATISTICS_FILE: &str = "statistics.json";

/// Summary of one run, persisted for later inspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub pool_id: String,
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: i64,
    pub polls: u32,
    pub files_uploaded: usize,
    pub bytes_uploaded: u64,
    pub files_downloaded: usize,
    pub bytes_downloaded: u64,
    /// Exit code per task id; `None` for tasks that never finished
    pub task_exit_codes: BTreeMap<String, Option<i32>>,
    pub outcome: RunOutcome,
    pub warnings: Vec<String>,
}

impl RunStatistics {
    pub fn from_report(report: &RunReport, finished_at: DateTime<Utc>) -> Self {
        let task_exit_codes = report
            .last_snapshot
            .iter()
            .flat_map(|snapshot| snapshot.tasks.iter())
            .map(|task| (task.id.clone(), task.exit_code))
            .collect();
        Self {
            pool_id: report.pool_id.clone(),
            job_id: report.job_id.clone(),
            started_at: report.started_at,
            finished_at,
            duration_secs: (finished_at - report.started_at).num_seconds(),
            polls: report.polls,
            files_uploaded: report.uploaded.len(),
            bytes_uploaded: report.uploaded.iter().map(|f| f.size_bytes).sum(),
            files_downloaded: report.downloaded.files.len(),
            bytes_downloaded: report.downloaded.bytes,
            task_exit_codes,
            outcome: report.outcome.clone(),
            warnings: report.warnings.clone(),
        }
    }

    /// Write as pretty JSON into `directory`, creating it if needed
    pub async fn write_to(&self, directory: &Path) -> BatchResult<PathBuf> {
        tokio::fs::create_dir_all(directory).await?;
        let path = directory.join(STATISTICS_FILE);
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        tokio::fs::write(&path, json).await?;
        debug!("Wrote run statistics to {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{TaskSnapshot, TaskState};
    use crate::orchestrator::RunState;
    use crate::status::StatusSnapshot;
    use crate::transfer::{DownloadSummary, ResourceFileRef};
    use tempfile::TempDir;

    fn report() -> RunReport {
        let started_at = Utc::now();
        RunReport {
            pool_id: "pool".into(),
            job_id: "job".into(),
            outcome: RunOutcome::TimedOut,
            history: vec![RunState::Created, RunState::TimedOut],
            pool_reused: false,
            uploaded: vec![ResourceFileRef {
                blob_name: "solver".into(),
                source_url: "file:///solver".into(),
                size_bytes: 40,
            }],
            polls: 6,
            last_snapshot: Some(StatusSnapshot {
                tasks: vec![
                    TaskSnapshot::completed("task-0001", 0),
                    TaskSnapshot::new("task-0002", TaskState::Running),
                ],
                ..Default::default()
            }),
            downloaded: DownloadSummary {
                files: vec![PathBuf::from("task-0001/stdout.txt")],
                bytes: 12,
            },
            cleanup: None,
            statistics_path: None,
            warnings: vec![],
            started_at,
            finished_at: started_at,
        }
    }

    #[test]
    fn test_statistics_from_report() {
        let report = report();
        let stats = RunStatistics::from_report(&report, report.started_at);
        assert_eq!(stats.files_uploaded, 1);
        assert_eq!(stats.bytes_uploaded, 40);
        assert_eq!(stats.files_downloaded, 1);
        assert_eq!(stats.task_exit_codes["task-0001"], Some(0));
        assert_eq!(stats.task_exit_codes["task-0002"], None);
        assert_eq!(stats.outcome, RunOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_write_creates_directory() {
        let dir = TempDir::new().unwrap();
        let report = report();
        let stats = RunStatistics::from_report(&report, report.started_at);
        let path = stats.write_to(&dir.path().join("out")).await.unwrap();

        let written: RunStatistics =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written, stats);
    }
}
