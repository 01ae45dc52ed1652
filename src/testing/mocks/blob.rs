//! Recording blob transfer client

use crate::transfer::{BlobError, BlobTransferClient, DownloadSummary, ResourceFileRef};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// One recorded `upload` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedUpload {
    pub local_path: PathBuf,
    pub container: String,
    pub blob_name: String,
}

#[derive(Debug, Default)]
struct MockBlobState {
    containers: HashSet<String>,
    created: Vec<String>,
    uploads: Vec<RecordedUpload>,
    upload_attempts: usize,
    downloads: Vec<(String, PathBuf)>,
    deleted: Vec<String>,
    upload_errors: VecDeque<BlobError>,
    download_errors: VecDeque<BlobError>,
    download_result: DownloadSummary,
    delete_error: Option<BlobError>,
}

/// Blob client that stores nothing and records every call
///
/// Uploads never read the local file; the reported size is always zero.
#[derive(Debug, Default)]
pub struct MockBlobTransfer {
    state: Mutex<MockBlobState>,
}

impl MockBlobTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend the container already exists
    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.state.get_mut().containers.insert(container.into());
        self
    }

    /// Queue errors returned by the next upload attempts
    pub fn with_upload_errors(mut self, errors: impl IntoIterator<Item = BlobError>) -> Self {
        self.state.get_mut().upload_errors.extend(errors);
        self
    }

    /// Queue errors returned by the next download attempts
    pub fn with_download_errors(mut self, errors: impl IntoIterator<Item = BlobError>) -> Self {
        self.state.get_mut().download_errors.extend(errors);
        self
    }

    pub fn with_download_result(mut self, summary: DownloadSummary) -> Self {
        self.state.get_mut().download_result = summary;
        self
    }

    pub fn fail_delete(mut self, error: BlobError) -> Self {
        self.state.get_mut().delete_error = Some(error);
        self
    }

    /// Successful uploads
    pub async fn uploads(&self) -> Vec<RecordedUpload> {
        self.state.lock().await.uploads.clone()
    }

    pub async fn upload_calls(&self) -> usize {
        self.state.lock().await.uploads.len()
    }

    /// Upload attempts, including failed ones
    pub async fn upload_attempts(&self) -> usize {
        self.state.lock().await.upload_attempts
    }

    /// `(container, local directory)` of every download attempt
    pub async fn downloads(&self) -> Vec<(String, PathBuf)> {
        self.state.lock().await.downloads.clone()
    }

    pub async fn download_calls(&self) -> usize {
        self.state.lock().await.downloads.len()
    }

    /// Containers created by this client, in order
    pub async fn created_containers(&self) -> Vec<String> {
        self.state.lock().await.created.clone()
    }

    pub async fn deleted_containers(&self) -> Vec<String> {
        self.state.lock().await.deleted.clone()
    }
}

#[async_trait]
impl BlobTransferClient for MockBlobTransfer {
    async fn create_container_if_absent(&self, container: &str) -> Result<bool, BlobError> {
        let mut state = self.state.lock().await;
        if !state.containers.insert(container.to_string()) {
            return Ok(false);
        }
        state.created.push(container.to_string());
        Ok(true)
    }

    async fn upload(
        &self,
        local_path: &Path,
        container: &str,
        blob_name: &str,
    ) -> Result<ResourceFileRef, BlobError> {
        let mut state = self.state.lock().await;
        state.upload_attempts += 1;
        if let Some(error) = state.upload_errors.pop_front() {
            return Err(error);
        }
        if !state.containers.contains(container) {
            return Err(BlobError::NotFound(format!("container {container}")));
        }
        state.uploads.push(RecordedUpload {
            local_path: local_path.to_path_buf(),
            container: container.to_string(),
            blob_name: blob_name.to_string(),
        });
        Ok(ResourceFileRef {
            blob_name: blob_name.to_string(),
            source_url: format!("{}/{blob_name}", self.container_url(container)),
            size_bytes: 0,
        })
    }

    async fn download(
        &self,
        container: &str,
        local_directory: &Path,
    ) -> Result<DownloadSummary, BlobError> {
        let mut state = self.state.lock().await;
        state
            .downloads
            .push((container.to_string(), local_directory.to_path_buf()));
        if let Some(error) = state.download_errors.pop_front() {
            return Err(error);
        }
        Ok(state.download_result.clone())
    }

    async fn delete_container(&self, container: &str) -> Result<(), BlobError> {
        let mut state = self.state.lock().await;
        state.deleted.push(container.to_string());
        if let Some(error) = state.delete_error.clone() {
            return Err(error);
        }
        state.containers.remove(container);
        Ok(())
    }

    fn container_url(&self, container: &str) -> String {
        format!("https://mock.blob.local/{container}")
    }
}
