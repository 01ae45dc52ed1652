//! Account credentials for the compute grid and its storage account

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

/// Credentials for the compute-grid (batch) account
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAccountSettings {
    #[serde(default)]
    pub account_name: String,
    #[serde(default)]
    pub account_url: String,
    #[serde(default)]
    pub account_key: String,
}

impl fmt::Debug for BatchAccountSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchAccountSettings")
            .field("account_name", &self.account_name)
            .field("account_url", &self.account_url)
            .field("account_key", &redact(&self.account_key))
            .finish()
    }
}

impl BatchAccountSettings {
    pub fn new(
        account_name: impl Into<String>,
        account_url: impl Into<String>,
        account_key: impl Into<String>,
    ) -> Self {
        Self {
            account_name: account_name.into(),
            account_url: account_url.into(),
            account_key: account_key.into(),
        }
    }

    /// Collect every problem with these settings
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.account_name.trim().is_empty() {
            problems.push("batch account name is empty".to_string());
        }
        if self.account_key.trim().is_empty() {
            problems.push("batch account key is empty".to_string());
        }
        if self.account_url.trim().is_empty() {
            problems.push("batch account url is empty".to_string());
        } else {
            match Url::parse(&self.account_url) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => problems.push(format!(
                    "batch account url has unsupported scheme '{}'",
                    url.scheme()
                )),
                Err(e) => problems.push(format!("batch account url is malformed: {e}")),
            }
        }
        problems
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        match self.problems().into_iter().next() {
            None => Ok(()),
            Some(reason) => Err(ConfigurationError::invalid("batch_account", reason)),
        }
    }

    /// Render as `AccountName=..;AccountUrl=..;AccountKey=..`
    pub fn connection_string(&self) -> String {
        format!(
            "AccountName={};AccountUrl={};AccountKey={}",
            self.account_name, self.account_url, self.account_key
        )
    }
}

/// Credentials for the storage account used for inputs and outputs.
///
/// Either `connection_string` or the `account_name`/`account_key` pair must
/// be supplied. Both forms render to the same canonical connection string.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageAccountSettings {
    #[serde(default)]
    pub connection_string: Option<String>,
    #[serde(default)]
    pub account_name: Option<String>,
    #[serde(default)]
    pub account_key: Option<String>,
    #[serde(default)]
    pub endpoint_suffix: Option<String>,
}

impl fmt::Debug for StorageAccountSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageAccountSettings")
            .field("account_name", &self.account_name)
            .field("has_connection_string", &self.connection_string.is_some())
            .field("account_key", &self.account_key.as_deref().map(redact))
            .finish()
    }
}

const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";

impl StorageAccountSettings {
    pub fn from_connection_string(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: Some(connection_string.into()),
            ..Default::default()
        }
    }

    pub fn from_account_key(
        account_name: impl Into<String>,
        account_key: impl Into<String>,
    ) -> Self {
        Self {
            account_name: Some(account_name.into()),
            account_key: Some(account_key.into()),
            ..Default::default()
        }
    }

    /// Parse and normalize into a canonical connection string
    pub fn resolve(&self) -> Result<String, ConfigurationError> {
        if let Some(raw) = self.connection_string.as_deref().filter(|s| !s.trim().is_empty()) {
            let parts = parse_connection_string(raw)?;
            if parts
                .get("UseDevelopmentStorage")
                .is_some_and(|v| v.eq_ignore_ascii_case("true"))
            {
                return Ok("UseDevelopmentStorage=true".to_string());
            }
            let name = required_part(&parts, "AccountName")?;
            let key = required_part(&parts, "AccountKey")?;
            let protocol = parts
                .get("DefaultEndpointsProtocol")
                .map(String::as_str)
                .unwrap_or("https");
            let suffix = parts
                .get("EndpointSuffix")
                .map(String::as_str)
                .unwrap_or(DEFAULT_ENDPOINT_SUFFIX);
            return Ok(render(protocol, name, key, suffix));
        }

        let name = self
            .account_name
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigurationError::MissingSetting("storage account name"))?;
        let key = self
            .account_key
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigurationError::MissingSetting("storage account key"))?;
        let suffix = self
            .endpoint_suffix
            .as_deref()
            .unwrap_or(DEFAULT_ENDPOINT_SUFFIX);
        Ok(render("https", name, key, suffix))
    }

    pub fn problems(&self) -> Vec<String> {
        match self.resolve() {
            Ok(_) => Vec::new(),
            Err(e) => vec![e.to_string()],
        }
    }
}

/// Validated account and storage credentials shared by every batch of a
/// pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEnvironment {
    pub batch: BatchAccountSettings,
    pub storage: StorageAccountSettings,
}

impl BatchEnvironment {
    pub fn new(batch: BatchAccountSettings, storage: StorageAccountSettings) -> Self {
        Self { batch, storage }
    }

    pub fn is_valid(&self) -> bool {
        self.problems().is_empty()
    }

    pub fn problems(&self) -> Vec<String> {
        let mut problems = self.batch.problems();
        problems.extend(self.storage.problems());
        problems
    }
}

fn parse_connection_string(raw: &str) -> Result<BTreeMap<String, String>, ConfigurationError> {
    let mut parts = BTreeMap::new();
    for segment in raw.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let (key, value) = segment.split_once('=').ok_or_else(|| {
            ConfigurationError::invalid(
                "storage connection string",
                format!("segment '{segment}' is not a key=value pair"),
            )
        })?;
        parts.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(parts)
}

fn required_part<'a>(
    parts: &'a BTreeMap<String, String>,
    key: &'static str,
) -> Result<&'a str, ConfigurationError> {
    parts
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            ConfigurationError::invalid("storage connection string", format!("{key} is missing"))
        })
}

fn render(protocol: &str, name: &str, key: &str, suffix: &str) -> String {
    format!(
        "DefaultEndpointsProtocol={protocol};AccountName={name};AccountKey={key};EndpointSuffix={suffix}"
    )
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<empty>"
    } else {
        "<redacted>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> BatchAccountSettings {
        BatchAccountSettings::new("acct", "https://acct.westeurope.batch.azure.com", "c2VjcmV0")
    }

    #[test]
    fn test_batch_settings_valid() {
        assert!(batch().problems().is_empty());
        assert!(batch().validate().is_ok());
    }

    #[test]
    fn test_batch_settings_rejects_bad_url() {
        let mut settings = batch();
        settings.account_url = "ftp://acct".into();
        assert!(settings.problems()[0].contains("unsupported scheme"));

        settings.account_url = "not a url".into();
        assert!(settings.problems()[0].contains("malformed"));
    }

    #[test]
    fn test_storage_connection_string_normalized() {
        let storage = StorageAccountSettings::from_connection_string(
            "AccountName=store; AccountKey=abc==;DefaultEndpointsProtocol=http",
        );
        assert_eq!(
            storage.resolve().unwrap(),
            "DefaultEndpointsProtocol=http;AccountName=store;AccountKey=abc==;EndpointSuffix=core.windows.net"
        );
    }

    #[test]
    fn test_storage_from_key_matches_connection_string() {
        let by_key = StorageAccountSettings::from_account_key("store", "abc");
        let by_string = StorageAccountSettings::from_connection_string(
            "DefaultEndpointsProtocol=https;AccountName=store;AccountKey=abc;EndpointSuffix=core.windows.net",
        );
        assert_eq!(by_key.resolve().unwrap(), by_string.resolve().unwrap());
    }

    #[test]
    fn test_storage_missing_key() {
        let storage = StorageAccountSettings::from_connection_string("AccountName=store");
        assert!(storage.resolve().is_err());

        let empty = StorageAccountSettings::default();
        assert_eq!(
            empty.resolve(),
            Err(ConfigurationError::MissingSetting("storage account name"))
        );
    }

    #[test]
    fn test_development_storage_is_well_formed() {
        let storage = StorageAccountSettings::from_connection_string("UseDevelopmentStorage=true");
        assert_eq!(storage.resolve().unwrap(), "UseDevelopmentStorage=true");
    }

    #[test]
    fn test_environment_validity() {
        let env =
            BatchEnvironment::new(batch(), StorageAccountSettings::from_account_key("s", "k"));
        assert!(env.is_valid());

        let env = BatchEnvironment::new(
            BatchAccountSettings::default(),
            StorageAccountSettings::default(),
        );
        assert!(!env.is_valid());
        assert_eq!(env.problems().len(), 4);
    }

    #[test]
    fn test_debug_redacts_keys() {
        let rendered = format!("{:?}", batch());
        assert!(!rendered.contains("c2VjcmV0"));
        assert!(rendered.contains("<redacted>"));
    }
}
