//! Ready-made plan pieces for tests

use crate::builder::{ReadyStage, StagedPlanBuilder};
use crate::config::{
    AzureMachineConfig, BatchAccountSettings, BatchConsoleCommand, BatchEnvironment,
    BatchExecutableInfo, ImageReference, PoolSetup, StorageAccountSettings,
};
use crate::dependencies::ManualDependencyResolver;
use std::time::Duration;

pub const SAMPLE_POOL_ID: &str = "test-pool";
pub const SAMPLE_JOB_ID: &str = "test-job";
pub const SAMPLE_POLL_INTERVAL: Duration = Duration::from_secs(10);

pub fn sample_environment() -> BatchEnvironment {
    BatchEnvironment::new(
        BatchAccountSettings::new(
            "testaccount",
            "https://testaccount.westeurope.batch.example.net",
            "YmF0Y2gta2V5",
        ),
        StorageAccountSettings::from_account_key("teststorage", "c3RvcmFnZS1rZXk="),
    )
}

pub fn sample_machine(node_count: u32) -> AzureMachineConfig {
    AzureMachineConfig::new(
        node_count,
        "standard_d2s_v3",
        ImageReference::new(
            "canonical",
            "0001-com-ubuntu-server-jammy",
            "22_04-lts",
            "batch.node.ubuntu 22.04",
        ),
    )
}

/// Builder with one executable, two task commands, a 10s poll interval and
/// a timeout of five intervals; cleanup enabled
pub fn sample_plan_builder() -> StagedPlanBuilder<ReadyStage> {
    StagedPlanBuilder::new()
        .with_account_settings(sample_environment().batch)
        .with_storage_settings(sample_environment().storage)
        .with_machine_config(
            sample_machine(2),
            PoolSetup::new(SAMPLE_POOL_ID).with_job_id(SAMPLE_JOB_ID),
        )
        .with_commands(
            None,
            vec![
                BatchConsoleCommand::new("{shared_dir}/solver").arg("input-1.cnf"),
                BatchConsoleCommand::new("{shared_dir}/solver").arg("input-2.cnf"),
            ],
        )
        .with_dependencies(ManualDependencyResolver::new().with("bin/solver"))
        .with_executables([BatchExecutableInfo::new("bin/solver", "solver")])
        .with_poll_interval(SAMPLE_POLL_INTERVAL)
        .with_timeout(SAMPLE_POLL_INTERVAL * 5)
        .with_cleanup(true)
}
