//! Blob transfer capability
//!
//! The orchestrator only needs container creation, upload, bulk download
//! and container deletion. Real storage accounts and the local emulator
//! implement [`BlobTransferClient`].

pub mod local;
pub mod retry;

pub use local::LocalBlobStore;
pub use retry::{with_retry, RetryExhausted, RetryPolicy, Retryable};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Storage-side failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlobError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("local source file missing: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("access denied: {0}")]
    PermissionDenied(String),

    #[error("transient storage failure: {0}")]
    Transient(String),

    #[error("storage I/O failure: {0}")]
    Io(String),
}

impl BlobError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl Retryable for BlobError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Io(_))
    }
}

impl From<std::io::Error> for BlobError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(err.to_string()),
            _ => Self::Io(err.to_string()),
        }
    }
}

/// Reference to an uploaded blob that a task declares as input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFileRef {
    /// Name of the blob inside its container
    pub blob_name: String,
    /// URL the node downloads the blob from
    pub source_url: String,
    pub size_bytes: u64,
}

/// Files written to the local directory by a download
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub files: Vec<PathBuf>,
    pub bytes: u64,
}

/// Trait for blob storage operations
#[async_trait]
pub trait BlobTransferClient: Send + Sync {
    /// Create the container; returns `false` when it already existed
    async fn create_container_if_absent(&self, container: &str) -> Result<bool, BlobError>;

    /// Upload one local file as `blob_name`
    async fn upload(
        &self,
        local_path: &Path,
        container: &str,
        blob_name: &str,
    ) -> Result<ResourceFileRef, BlobError>;

    /// Download every blob of the container into `local_directory`,
    /// preserving blob names as relative paths
    async fn download(
        &self,
        container: &str,
        local_directory: &Path,
    ) -> Result<DownloadSummary, BlobError>;

    /// Delete the container and everything in it
    async fn delete_container(&self, container: &str) -> Result<(), BlobError>;

    /// URL under which nodes can write into the container
    fn container_url(&self, container: &str) -> String;
}
