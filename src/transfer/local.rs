//! Filesystem-backed blob store
//!
//! Containers are directories under a root; blobs are files. Container URLs
//! are `file://` URLs so the local grid emulator can resolve them.

use super::{BlobError, BlobTransferClient, DownloadSummary, ResourceFileRef};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use url::Url;
use walkdir::WalkDir;

const DEFAULT_DOWNLOAD_PARALLELISM: usize = 8;

/// Blob store rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
    download_parallelism: usize,
}

impl LocalBlobStore {
    /// Create the store, creating and canonicalizing `root`
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        std::fs::create_dir_all(root.as_ref())?;
        Ok(Self {
            root: root.as_ref().canonicalize()?,
            download_parallelism: DEFAULT_DOWNLOAD_PARALLELISM,
        })
    }

    pub fn with_download_parallelism(mut self, parallelism: usize) -> Self {
        self.download_parallelism = parallelism.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn container_path(&self, container: &str) -> PathBuf {
        self.root.join(container)
    }

    fn blob_path(&self, container: &str, blob_name: &str) -> Result<PathBuf, BlobError> {
        let relative = Path::new(blob_name);
        if blob_name.is_empty()
            || relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(BlobError::PermissionDenied(format!(
                "blob name '{blob_name}' escapes its container"
            )));
        }
        Ok(self.container_path(container).join(relative))
    }

    /// Every blob in the container, as (absolute path, blob name)
    fn list_blobs(&self, container: &str) -> Result<Vec<(PathBuf, String)>, BlobError> {
        let dir = self.container_path(container);
        if !dir.is_dir() {
            return Err(BlobError::NotFound(format!("container '{container}'")));
        }
        let mut blobs = Vec::new();
        for entry in WalkDir::new(&dir).sort_by_file_name() {
            let entry = entry.map_err(|e| BlobError::Io(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry
                .path()
                .strip_prefix(&dir)
                .map_err(|e| BlobError::Io(e.to_string()))?
                .to_string_lossy()
                .replace('\\', "/");
            blobs.push((entry.path().to_path_buf(), name));
        }
        Ok(blobs)
    }
}

#[async_trait]
impl BlobTransferClient for LocalBlobStore {
    async fn create_container_if_absent(&self, container: &str) -> Result<bool, BlobError> {
        let dir = self.container_path(container);
        if fs::metadata(&dir).await.is_ok_and(|m| m.is_dir()) {
            return Ok(false);
        }
        fs::create_dir_all(&dir).await?;
        debug!("Created container {}", container);
        Ok(true)
    }

    async fn upload(
        &self,
        local_path: &Path,
        container: &str,
        blob_name: &str,
    ) -> Result<ResourceFileRef, BlobError> {
        if !fs::metadata(local_path).await.is_ok_and(|m| m.is_file()) {
            return Err(BlobError::SourceMissing(local_path.to_path_buf()));
        }
        let target = self.blob_path(container, blob_name)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let size_bytes = fs::copy(local_path, &target).await?;
        let source_url = Url::from_file_path(&target)
            .map_err(|_| BlobError::Io(format!("cannot express {} as URL", target.display())))?
            .to_string();
        debug!("Uploaded {} -> {}/{}", local_path.display(), container, blob_name);

        Ok(ResourceFileRef {
            blob_name: blob_name.to_string(),
            source_url,
            size_bytes,
        })
    }

    async fn download(
        &self,
        container: &str,
        local_directory: &Path,
    ) -> Result<DownloadSummary, BlobError> {
        let blobs = self.list_blobs(container)?;
        fs::create_dir_all(local_directory).await?;

        let copied: Vec<(PathBuf, u64)> = stream::iter(blobs)
            .map(|(source, name)| async move {
                let target = local_directory.join(&name);
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).await?;
                }
                let bytes = fs::copy(&source, &target).await?;
                Ok::<_, BlobError>((target, bytes))
            })
            .buffer_unordered(self.download_parallelism)
            .try_collect()
            .await?;

        let mut summary = DownloadSummary::default();
        for (path, bytes) in copied {
            summary.bytes += bytes;
            summary.files.push(path);
        }
        summary.files.sort();
        Ok(summary)
    }

    async fn delete_container(&self, container: &str) -> Result<(), BlobError> {
        let dir = self.container_path(container);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(format!("container '{container}'")))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn container_url(&self, container: &str) -> String {
        Url::from_directory_path(self.container_path(container))
            .map(|url| url.to_string())
            .unwrap_or_else(|_| format!("file://{}", self.container_path(container).display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_container_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path().join("blobs")).unwrap();
        assert!(store.create_container_if_absent("inputs").await.unwrap());
        assert!(!store.create_container_if_absent("inputs").await.unwrap());
    }

    #[tokio::test]
    async fn test_upload_and_download() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path().join("blobs")).unwrap();
        let source = dir.path().join("solver.sh");
        std::fs::write(&source, "echo solved").unwrap();

        store.create_container_if_absent("inputs").await.unwrap();
        let reference = store.upload(&source, "inputs", "bin/solver.sh").await.unwrap();
        assert_eq!(reference.size_bytes, 11);
        assert!(reference.source_url.starts_with("file://"));
        assert!(reference.source_url.ends_with("inputs/bin/solver.sh"));

        let out = dir.path().join("out");
        let summary = store.download("inputs", &out).await.unwrap();
        assert_eq!(summary.files, vec![out.join("bin/solver.sh")]);
        assert_eq!(summary.bytes, 11);
        assert_eq!(
            std::fs::read_to_string(out.join("bin/solver.sh")).unwrap(),
            "echo solved"
        );
    }

    #[tokio::test]
    async fn test_upload_missing_source() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path()).unwrap();
        let err = store
            .upload(&dir.path().join("nope"), "inputs", "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::SourceMissing(_)));
    }

    #[tokio::test]
    async fn test_blob_name_cannot_escape_container() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path().join("blobs")).unwrap();
        let source = dir.path().join("f");
        std::fs::write(&source, "x").unwrap();
        let err = store.upload(&source, "inputs", "../f").await.unwrap_err();
        assert!(matches!(err, BlobError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_missing_container() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path()).unwrap();
        assert!(store.download("ghost", dir.path()).await.unwrap_err().is_not_found());
        assert!(store.delete_container("ghost").await.unwrap_err().is_not_found());
    }
}
