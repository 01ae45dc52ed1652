//! End-to-end runs on the local grid emulator and blob store
#![cfg(unix)]

use batchrun::config::RunFile;
use batchrun::grid::LocalComputeGrid;
use batchrun::orchestrator::{FailureReason, STATISTICS_FILE};
use batchrun::status::NoopObserver;
use batchrun::transfer::LocalBlobStore;
use batchrun::{ExecutionOrchestrator, RunOutcome};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const RUN_SCRIPT: &str = r#"#!/bin/sh
. ./helper.sh
greet "$1"
echo "$1" > "result-$1.txt"
"#;

const HELPER_SCRIPT: &str = r#"greet() {
    echo "solved $1"
}
"#;

fn run_file(tasks: &str) -> String {
    format!(
        r#"
batch_account:
  account_name: local
  account_url: https://local.batch.example.net
  account_key: bG9jYWw=
storage_account:
  account_name: local
  account_key: bG9jYWw=
machine:
  node_count: 2
  vm_size: local
  image:
    publisher: local
    offer: local
    sku: local
    version: latest
    node_agent_sku_id: batch.node.ubuntu 22.04
pool:
  pool_id: local-pool
  job_id: local-job
executables:
  - path: bin/run.sh
tasks:
{tasks}
dependencies:
  mode: automatic
  entry_points: [bin/run.sh]
output:
  name: local-job-output
  local_directory: results
  file_patterns: ["result-*.txt"]
timeout: 60s
poll_interval: 50ms
cleanup: true
save_statistics: true
"#
    )
}

fn write_project(root: &Path, tasks: &str) {
    fs::create_dir_all(root.join("bin")).unwrap();
    fs::write(root.join("bin/run.sh"), RUN_SCRIPT).unwrap();
    fs::write(root.join("bin/helper.sh"), HELPER_SCRIPT).unwrap();
    fs::write(root.join("run.yml"), run_file(tasks)).unwrap();
}

fn orchestrator(workspace: &Path) -> ExecutionOrchestrator {
    let grid = Arc::new(LocalComputeGrid::new(workspace.join("grid")));
    let blobs = Arc::new(LocalBlobStore::new(workspace.join("blobs")).unwrap());
    ExecutionOrchestrator::new(grid, blobs)
}

#[tokio::test]
async fn test_scripts_run_on_local_nodes() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let project = root.join("project");
    write_project(
        &project,
        r#"  - base_command: "sh {shared_dir}/run.sh"
    arguments: [a]
  - base_command: "sh {shared_dir}/run.sh"
    arguments: [b]"#,
    );

    let plan = RunFile::load(&project.join("run.yml"))
        .await
        .unwrap()
        .into_plan()
        .unwrap();
    let report = orchestrator(&root.join("workspace"))
        .run(plan, &NoopObserver, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Succeeded, "{report:?}");
    let mut uploaded: Vec<&str> = report.uploaded.iter().map(|f| f.blob_name.as_str()).collect();
    uploaded.sort();
    assert_eq!(uploaded, vec!["helper.sh", "run.sh"]);

    let results = project.join("results");
    assert_eq!(
        fs::read_to_string(results.join("task-0001/stdout.txt")).unwrap(),
        "solved a\n"
    );
    assert_eq!(
        fs::read_to_string(results.join("task-0002/result-b.txt")).unwrap(),
        "b\n"
    );
    assert!(results.join(STATISTICS_FILE).is_file());
    assert!(report.cleanup.unwrap().is_clean());
    assert!(!root.join("workspace/grid/local-pool").exists());
}

#[tokio::test]
async fn test_non_zero_exit_fails_the_run() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let project = root.join("project");
    write_project(
        &project,
        r#"  - base_command: "sh {shared_dir}/run.sh"
    arguments: [ok]
  - base_command: "exit 4""#,
    );

    let plan = RunFile::load(&project.join("run.yml"))
        .await
        .unwrap()
        .into_plan()
        .unwrap();
    let report = orchestrator(&root.join("workspace"))
        .run(plan, &NoopObserver, CancellationToken::new())
        .await
        .unwrap();

    match &report.outcome {
        RunOutcome::Failed(FailureReason::TasksFailed { failures }) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].task_id, "task-0002");
            assert_eq!(failures[0].exit_code, Some(4));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(project.join("results/task-0001/result-ok.txt").is_file());
}
