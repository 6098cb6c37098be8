//! Blob store for rendered artifacts

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::PersistenceError;
use crate::utils::retry::{with_retry, RetryConfig};
use crate::utils::sanitize_filename;

/// Destination for finished videos and thumbnails
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a video and return its public URL
    async fn upload_video(&self, path: &Path) -> Result<String, PersistenceError>;

    /// Store an image and return its public URL
    async fn upload_image(&self, path: &Path) -> Result<String, PersistenceError>;
}

/// Copies artifacts under a media directory served at `base_url`
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
    base_url: String,
    retry: RetryConfig,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryConfig::with_delays(2, 200, 2_000),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn store(&self, kind: &str, source: &Path) -> Result<String, PersistenceError> {
        let file_name = source
            .file_name()
            .map(|n| sanitize_filename(&n.to_string_lossy()))
            .filter(|n| !n.is_empty())
            .ok_or_else(|| PersistenceError::Upload(format!("no file name in {}", source.display())))?;

        let stored_name = format!("{}-{}", uuid::Uuid::new_v4().simple(), file_name);
        let dir = self.root.join(kind);
        let target = dir.join(&stored_name);

        with_retry(&self.retry, || async {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| PersistenceError::io(&dir, e))?;
            tokio::fs::copy(source, &target)
                .await
                .map_err(|e| PersistenceError::io(source, e))
        })
        .await?;

        let url = format!("{}/{}/{}", self.base_url, kind, stored_name);
        tracing::info!(source = %source.display(), url = %url, "Artifact stored");
        Ok(url)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload_video(&self, path: &Path) -> Result<String, PersistenceError> {
        self.store("videos", path).await
    }

    async fn upload_image(&self, path: &Path) -> Result<String, PersistenceError> {
        self.store("images", path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upload_video_copies_and_returns_url() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("final cut.mp4");
        std::fs::write(&source, b"video").unwrap();

        let store = LocalBlobStore::new(dir.path().join("media"), "http://cdn.test/media/");
        let url = store.upload_video(&source).await.unwrap();

        assert!(url.starts_with("http://cdn.test/media/videos/"));
        assert!(url.ends_with("-final_cut.mp4"));

        let stored_name = url.rsplit('/').next().unwrap();
        let stored = dir.path().join("media/videos").join(stored_name);
        assert_eq!(std::fs::read(stored).unwrap(), b"video");
    }

    #[tokio::test]
    async fn test_missing_source_is_io_error() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path(), "http://x").with_retry(RetryConfig::none());
        let err = store
            .upload_image(&dir.path().join("nope.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Io { .. }));
    }
}
