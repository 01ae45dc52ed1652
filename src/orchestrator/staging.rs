//! Pure construction of upload sets, pool specs and task definitions
//!
//! Nothing here performs I/O; everything is derived from the plan and the
//! results of earlier steps.

use crate::config::{ExecutionPlan, OsFamily, SHARED_DIR_VAR, TASK_DIR_VAR};
use crate::config::command::wrap_in_shell;
use crate::dependencies::{normalize, Resolution};
use crate::error::{BatchError, BatchResult};
use crate::grid::local::{STDERR_FILE, STDOUT_FILE};
use crate::grid::{NodePreparation, OutputFileSpec, PoolSpec, StartTask, TaskDefinition};
use crate::transfer::ResourceFileRef;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Highest robocopy exit code that still means "copied"
const ROBOCOPY_MAX_SUCCESS: i32 = 7;

/// One local file and the blob name it is uploaded under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadItem {
    pub local_path: PathBuf,
    pub blob_name: String,
}

/// Turn a resolution into the upload set
///
/// Executables keep their target names; every other file is uploaded under
/// its file name. Executables the resolver missed are added with a warning.
/// Two files mapping to the same blob name is an error.
pub fn plan_uploads(
    plan: &ExecutionPlan,
    resolution: &Resolution,
) -> BatchResult<(Vec<UploadItem>, Vec<String>)> {
    let mut warnings = resolution.warnings.clone();
    let targets: HashMap<PathBuf, &str> = plan
        .executables()
        .iter()
        .map(|exe| (normalize(&exe.local_path), exe.target_name.as_str()))
        .collect();

    let mut items: Vec<UploadItem> = Vec::with_capacity(resolution.files.len());
    for path in resolution.files.iter() {
        let blob_name = match targets.get(path) {
            Some(target) => target.to_string(),
            None => file_name(path)?,
        };
        items.push(UploadItem {
            local_path: path.clone(),
            blob_name,
        });
    }

    for exe in plan.executables() {
        if !resolution.files.contains(&exe.local_path) {
            warnings.push(format!(
                "executable {} was not among the resolved dependencies; adding it",
                exe.local_path.display()
            ));
            items.push(UploadItem {
                local_path: normalize(&exe.local_path),
                blob_name: exe.target_name.clone(),
            });
        }
    }

    let mut owners: HashMap<&str, &Path> = HashMap::new();
    for item in &items {
        if let Some(previous) = owners.insert(&item.blob_name, &item.local_path) {
            return Err(BatchError::Dependency(format!(
                "{} and {} would both be uploaded as '{}'",
                previous.display(),
                item.local_path.display(),
                item.blob_name
            )));
        }
    }
    Ok((items, warnings))
}

fn file_name(path: &Path) -> BatchResult<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            BatchError::Dependency(format!("{} has no usable file name", path.display()))
        })
}

pub fn pool_spec(plan: &ExecutionPlan) -> PoolSpec {
    let os = plan.machine().os_family;
    PoolSpec {
        id: plan.pool_id().to_string(),
        machine: plan.machine().clone(),
        task_slots_per_node: plan.pool().task_slots_per_node,
        application_packages: plan.application_packages().to_vec(),
        start_task: plan.startup_command().map(|command| StartTask {
            command_line: command.command_line(os),
            wait_for_success: true,
        }),
        must_not_exist: plan.pool().must_not_exist,
    }
}

/// Copy everything staged in the task directory into the node's shared
/// directory
pub fn staging_command(os: OsFamily) -> NodePreparation {
    match os {
        OsFamily::Linux => NodePreparation {
            command_line: wrap_in_shell(
                &format!(
                    "cp -rf \"{}\"/. \"{}\"/",
                    os.env_ref(TASK_DIR_VAR),
                    os.env_ref(SHARED_DIR_VAR)
                ),
                os,
            ),
            min_success_exit_code: 0,
            max_success_exit_code: 0,
        },
        OsFamily::Windows => NodePreparation {
            command_line: wrap_in_shell(
                &format!(
                    "robocopy \"{}\" \"{}\" /E",
                    os.env_ref(TASK_DIR_VAR),
                    os.env_ref(SHARED_DIR_VAR)
                ),
                os,
            ),
            min_success_exit_code: 0,
            max_success_exit_code: ROBOCOPY_MAX_SUCCESS,
        },
    }
}

pub fn task_id(index: usize) -> String {
    format!("task-{:04}", index + 1)
}

/// One definition per task command, in command order
pub fn task_definitions(
    plan: &ExecutionPlan,
    resource_files: &[ResourceFileRef],
    output_container_url: &str,
) -> Vec<TaskDefinition> {
    let os = plan.machine().os_family;
    let preparation = (!resource_files.is_empty()).then(|| staging_command(os));

    plan.task_commands()
        .iter()
        .enumerate()
        .map(|(index, command)| {
            let id = task_id(index);
            let output_files = [STDOUT_FILE, STDERR_FILE]
                .into_iter()
                .map(str::to_string)
                .chain(plan.output().file_patterns.iter().cloned())
                .map(|file_pattern| OutputFileSpec {
                    file_pattern,
                    container_url: output_container_url.to_string(),
                    path_prefix: id.clone(),
                })
                .collect();
            TaskDefinition {
                command_line: command.command_line(os),
                resource_files: resource_files.to_vec(),
                node_preparation: preparation.clone(),
                output_files,
                id,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BatchExecutableInfo;
    use crate::dependencies::DependencySet;
    use crate::testing::sample_plan_builder;

    fn resolution(files: &[&str]) -> Resolution {
        Resolution {
            files: files.iter().collect::<DependencySet>(),
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_executables_use_target_names() {
        let plan = sample_plan_builder()
            .with_executables([BatchExecutableInfo::new("bin/run.sh", "run")])
            .build()
            .unwrap();
        let resolved = resolution(&["./bin/solver", "data/a.cnf", "bin/run.sh"]);
        let (items, warnings) = plan_uploads(&plan, &resolved).unwrap();

        let names: Vec<&str> = items.iter().map(|i| i.blob_name.as_str()).collect();
        assert_eq!(names, vec!["solver", "a.cnf", "run"]);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_missing_executable_is_merged_with_warning() {
        let plan = sample_plan_builder().build().unwrap();
        let (items, warnings) = plan_uploads(&plan, &resolution(&["data/a.cnf"])).unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[1].blob_name, "solver");
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_colliding_blob_names_are_rejected() {
        let plan = sample_plan_builder().build().unwrap();
        let resolved = resolution(&["bin/solver", "a/x.cnf", "b/x.cnf"]);
        let err = plan_uploads(&plan, &resolved).unwrap_err();
        assert!(matches!(err, BatchError::Dependency(_)));
    }

    #[test]
    fn test_task_definitions_stage_then_run() {
        let plan = sample_plan_builder().build().unwrap();
        let files = vec![ResourceFileRef {
            blob_name: "solver".into(),
            source_url: "file:///inputs/solver".into(),
            size_bytes: 1,
        }];
        let defs = task_definitions(&plan, &files, "file:///outputs");

        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].id, "task-0001");
        assert_eq!(defs[1].id, "task-0002");
        let prep = defs[0].node_preparation.as_ref().unwrap();
        assert!(prep.command_line.contains("cp -rf"));
        assert!(defs[0]
            .command_line
            .contains("$AZ_BATCH_NODE_SHARED_DIR/solver input-1.cnf"));
        assert!(defs[0].output_files.iter().all(|o| o.path_prefix == "task-0001"));
        assert_eq!(defs[0].output_files[0].file_pattern, STDOUT_FILE);
    }

    #[test]
    fn test_windows_staging_tolerates_robocopy_codes() {
        let prep = staging_command(OsFamily::Windows);
        assert!(prep.command_line.starts_with("cmd /c robocopy"));
        assert!(prep.is_success(3));
        assert!(!prep.is_success(8));
    }

    #[test]
    fn test_no_preparation_without_inputs() {
        let plan = sample_plan_builder().build().unwrap();
        let defs = task_definitions(&plan, &[], "file:///outputs");
        assert!(defs.iter().all(|d| d.node_preparation.is_none()));
    }
}
