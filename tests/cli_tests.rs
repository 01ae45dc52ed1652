//! Integration tests for the CLI interface

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const ENV_VARS: [&str; 4] = [
    "BATCHRUN_BATCH_ACCOUNT_KEY",
    "BATCHRUN_BATCH_ACCOUNT_URL",
    "BATCHRUN_STORAGE_CONNECTION_STRING",
    "BATCHRUN_STORAGE_ACCOUNT_KEY",
];

fn batchrun() -> Command {
    let mut cmd = Command::cargo_bin("batchrun").unwrap();
    for name in ENV_VARS {
        cmd.env_remove(name);
    }
    cmd
}

fn write_run_file(dir: &Path, account_key: &str, task: &str) -> std::path::PathBuf {
    let path = dir.join("run.yml");
    fs::write(
        &path,
        format!(
            r#"
batch_account:
  account_name: cli
  account_url: https://cli.batch.example.net
  account_key: "{account_key}"
storage_account:
  account_name: cli
  account_key: Y2xp
machine:
  node_count: 1
  vm_size: local
  image:
    publisher: local
    offer: local
    sku: local
    version: latest
    node_agent_sku_id: batch.node.ubuntu 22.04
pool:
  pool_id: cli-pool
  job_id: cli-job
tasks:
  - base_command: "{task}"
output:
  name: cli-job-output
  local_directory: results
timeout: 60s
poll_interval: 50ms
cleanup: true
"#
        ),
    )
    .unwrap();
    path
}

#[test]
fn test_cli_help_flag() {
    batchrun()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("Commands:"))
        .stdout(predicate::str::contains("validate"));
}

#[test]
fn test_invalid_command() {
    batchrun()
        .arg("invalid-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn test_validate_prints_plan_summary() {
    let dir = TempDir::new().unwrap();
    let path = write_run_file(dir.path(), "Y2xp", "echo hello");

    batchrun()
        .arg("validate")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid"))
        .stdout(predicate::str::contains("cli-pool"))
        .stdout(predicate::str::contains("tasks:       1"));
}

#[test]
fn test_validate_reports_missing_secret() {
    let dir = TempDir::new().unwrap();
    let path = write_run_file(dir.path(), "", "echo hello");

    batchrun()
        .arg("validate")
        .arg(&path)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("batch account key is empty"));
}

#[test]
fn test_secret_from_environment() {
    let dir = TempDir::new().unwrap();
    let path = write_run_file(dir.path(), "", "echo hello");

    batchrun()
        .env("BATCHRUN_BATCH_ACCOUNT_KEY", "Y2xp")
        .arg("validate")
        .arg(&path)
        .assert()
        .success();
}

#[test]
fn test_missing_run_file() {
    batchrun()
        .arg("validate")
        .arg("does-not-exist.yml")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("does-not-exist.yml"));
}

#[cfg(unix)]
#[test]
fn test_run_reports_success() {
    let dir = TempDir::new().unwrap();
    let path = write_run_file(dir.path(), "Y2xp", "echo hello");

    batchrun()
        .arg("run")
        .arg(&path)
        .arg("--workspace")
        .arg(dir.path().join("ws"))
        .arg("--quiet")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("Job cli-job on pool cli-pool: succeeded"));

    let stdout = fs::read_to_string(dir.path().join("results/task-0001/stdout.txt")).unwrap();
    assert_eq!(stdout, "hello\n");
}

#[cfg(unix)]
#[test]
fn test_run_exit_code_for_failed_tasks() {
    let dir = TempDir::new().unwrap();
    let path = write_run_file(dir.path(), "Y2xp", "exit 5");

    batchrun()
        .arg("run")
        .arg(&path)
        .arg("--workspace")
        .arg(dir.path().join("ws"))
        .arg("--quiet")
        .assert()
        .code(2)
        .stdout(predicate::str::contains("failed"));
}
