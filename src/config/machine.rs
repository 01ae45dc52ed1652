//! Pool and machine configuration

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};

/// Maximum task slots a single node may expose
pub const MAX_TASK_SLOTS_PER_NODE: u32 = 256;

/// Operating system family of the pool's nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Linux,
    Windows,
}

impl OsFamily {
    /// Infer the OS family from a node agent SKU id
    pub fn from_node_agent_sku(sku: &str) -> Self {
        if sku.to_ascii_lowercase().starts_with("batch.node.windows") {
            OsFamily::Windows
        } else {
            OsFamily::Linux
        }
    }

    /// Environment-variable reference as understood by this family's shell
    pub fn env_ref(&self, name: &str) -> String {
        match self {
            OsFamily::Linux => format!("${name}"),
            OsFamily::Windows => format!("%{name}%"),
        }
    }
}

/// Marketplace image used to provision nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    pub publisher: String,
    pub offer: String,
    pub sku: String,
    pub version: String,
    pub node_agent_sku_id: String,
}

impl ImageReference {
    /// The `latest` version of the given image; use
    /// [`with_version`](Self::with_version) to pin one
    pub fn new(
        publisher: impl Into<String>,
        offer: impl Into<String>,
        sku: impl Into<String>,
        node_agent_sku_id: impl Into<String>,
    ) -> Self {
        Self {
            publisher: publisher.into(),
            offer: offer.into(),
            sku: sku.into(),
            version: "latest".to_string(),
            node_agent_sku_id: node_agent_sku_id.into(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

/// Raw machine configuration as supplied by the caller.
///
/// Every field is optional at input so that a missing value is reported as
/// a validation error instead of being silently defaulted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureMachineConfig {
    #[serde(default)]
    pub node_count: Option<u32>,
    #[serde(default)]
    pub vm_size: Option<String>,
    #[serde(default)]
    pub image: Option<ImageReference>,
    #[serde(default)]
    pub os_family: Option<OsFamily>,
}

impl AzureMachineConfig {
    pub fn new(node_count: u32, vm_size: impl Into<String>, image: ImageReference) -> Self {
        Self {
            node_count: Some(node_count),
            vm_size: Some(vm_size.into()),
            image: Some(image),
            os_family: None,
        }
    }

    /// Validate into a [`MachineSpec`]
    pub fn to_spec(&self) -> Result<MachineSpec, ConfigurationError> {
        let node_count = self
            .node_count
            .ok_or(ConfigurationError::MissingSetting("machine.node_count"))?;
        if node_count == 0 {
            return Err(ConfigurationError::invalid(
                "machine.node_count",
                "must be at least 1",
            ));
        }

        let vm_size = self
            .vm_size
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ConfigurationError::MissingSetting("machine.vm_size"))?
            .to_string();

        let image = self
            .image
            .clone()
            .ok_or(ConfigurationError::MissingSetting("machine.image"))?;
        for (field, value) in [
            ("machine.image.publisher", &image.publisher),
            ("machine.image.offer", &image.offer),
            ("machine.image.sku", &image.sku),
            ("machine.image.version", &image.version),
            ("machine.image.node_agent_sku_id", &image.node_agent_sku_id),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigurationError::MissingSetting(field));
            }
        }

        let inferred = OsFamily::from_node_agent_sku(&image.node_agent_sku_id);
        if let Some(declared) = self.os_family {
            if declared != inferred {
                return Err(ConfigurationError::InconsistentPool(format!(
                    "os_family {declared:?} does not match node agent '{}'",
                    image.node_agent_sku_id
                )));
            }
        }

        Ok(MachineSpec {
            node_count,
            vm_size,
            image,
            os_family: inferred,
        })
    }
}

/// Validated machine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineSpec {
    pub node_count: u32,
    pub vm_size: String,
    pub image: ImageReference,
    pub os_family: OsFamily,
}

/// Application package installed on every node of the pool
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationPackageReference {
    pub application_id: String,
    #[serde(default)]
    pub version: Option<String>,
}

impl ApplicationPackageReference {
    pub fn new(application_id: impl Into<String>, version: Option<&str>) -> Self {
        Self {
            application_id: application_id.into(),
            version: version.map(str::to_string),
        }
    }
}

/// Identity and shape of the pool a run executes on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSetup {
    pub pool_id: String,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default = "default_task_slots")]
    pub task_slots_per_node: u32,
    /// Fail instead of reusing a pool that already exists
    #[serde(default)]
    pub must_not_exist: bool,
}

fn default_task_slots() -> u32 {
    1
}

impl PoolSetup {
    pub fn new(pool_id: impl Into<String>) -> Self {
        Self {
            pool_id: pool_id.into(),
            job_id: None,
            task_slots_per_node: default_task_slots(),
            must_not_exist: false,
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_task_slots(mut self, slots: u32) -> Self {
        self.task_slots_per_node = slots;
        self
    }

    pub fn must_not_exist(mut self) -> Self {
        self.must_not_exist = true;
        self
    }

    /// Check this setup against the validated machine spec
    pub fn validate(&self, machine: &MachineSpec) -> Result<(), ConfigurationError> {
        validate_identifier("pool_setup.pool_id", &self.pool_id)?;
        if let Some(job_id) = &self.job_id {
            validate_identifier("pool_setup.job_id", job_id)?;
        }
        if self.task_slots_per_node == 0 || self.task_slots_per_node > MAX_TASK_SLOTS_PER_NODE {
            return Err(ConfigurationError::InconsistentPool(format!(
                "task_slots_per_node must be within 1..={MAX_TASK_SLOTS_PER_NODE}, got {}",
                self.task_slots_per_node
            )));
        }
        if u64::from(self.task_slots_per_node) * u64::from(machine.node_count) > u64::from(u32::MAX)
        {
            return Err(ConfigurationError::InconsistentPool(
                "total task slots overflow".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pool, job, and task identifiers: 1..=64 chars of `[A-Za-z0-9_-]`
pub fn validate_identifier(field: &'static str, id: &str) -> Result<(), ConfigurationError> {
    if id.is_empty() || id.len() > 64 {
        return Err(ConfigurationError::invalid(
            field,
            format!("'{id}' must be 1 to 64 characters"),
        ));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigurationError::invalid(
            field,
            format!("'{id}' may only contain letters, digits, '-' and '_'"),
        ));
    }
    Ok(())
}
