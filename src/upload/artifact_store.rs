//! Artifact Store
//!
//! Final assembled files, keyed by `fileId + extension`. Artifacts are
//! written to a staging location and only become visible when published, so a
//! crashed or failed assembly never leaves a partial artifact behind.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::types::{parse_artifact_name, UploadError};

/// Readable artifact body
pub struct ArtifactBody {
    pub size: u64,
    pub reader: Pin<Box<dyn AsyncRead + Send>>,
}

// ============================================================================
// Storage Traits
// ============================================================================

/// Trait for artifact storage backends
#[async_trait::async_trait]
pub trait ArtifactStorage: Send + Sync {
    /// Check whether a published artifact exists
    async fn exists(&self, name: &str) -> Result<bool, UploadError>;

    /// Find the published artifact name for a file id, whatever its extension
    async fn find_by_file_id(&self, file_id: &str) -> Result<Option<String>, UploadError>;

    /// Begin staging a new artifact
    async fn stage(&self, name: &str) -> Result<Box<dyn ArtifactWriter>, UploadError>;

    /// Open a published artifact for reading
    async fn open(&self, name: &str) -> Result<Option<ArtifactBody>, UploadError>;
}

/// Staged artifact being written.
///
/// Nothing is visible under the artifact name until `publish` succeeds.
/// Dropping a writer without publishing leaves at most an orphaned staging
/// file, never a visible artifact.
#[async_trait::async_trait]
pub trait ArtifactWriter: Send {
    async fn append(&mut self, data: &[u8]) -> Result<(), UploadError>;

    /// Make the staged bytes durable and visible; returns the artifact size
    async fn publish(&mut self) -> Result<u64, UploadError>;

    /// Throw the staged bytes away
    async fn discard(&mut self);
}

// ============================================================================
// Artifact Store
// ============================================================================

/// Artifact store with pluggable backends
#[derive(Clone)]
pub struct ArtifactStore {
    inner: Arc<dyn ArtifactStorage>,
}

impl ArtifactStore {
    /// Create with local filesystem storage
    pub fn with_local_storage(base_path: PathBuf) -> Self {
        Self::with_backend(Arc::new(LocalArtifactStorage::new(base_path)))
    }

    /// Create with in-memory storage
    pub fn in_memory() -> Self {
        Self::with_backend(Arc::new(MemoryArtifactStorage::default()))
    }

    pub fn with_backend(backend: Arc<dyn ArtifactStorage>) -> Self {
        Self { inner: backend }
    }

    pub async fn exists(&self, name: &str) -> Result<bool, UploadError> {
        self.inner.exists(name).await
    }

    pub async fn find_by_file_id(&self, file_id: &str) -> Result<Option<String>, UploadError> {
        self.inner.find_by_file_id(file_id).await
    }

    pub async fn stage(&self, name: &str) -> Result<Box<dyn ArtifactWriter>, UploadError> {
        self.inner.stage(name).await
    }

    pub async fn open(&self, name: &str) -> Result<ArtifactBody, UploadError> {
        self.inner
            .open(name)
            .await?
            .ok_or_else(|| UploadError::ArtifactNotFound(name.to_string()))
    }
}

// ============================================================================
// Local Filesystem Storage
// ============================================================================

/// Local filesystem artifact storage.
///
/// Layout: `<base>/artifacts/<fileId>/<fileId><ext>`, staging files are hidden
/// siblings so the publishing rename never crosses a filesystem boundary.
pub struct LocalArtifactStorage {
    base_path: PathBuf,
}

impl LocalArtifactStorage {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn file_dir(&self, file_id: &str) -> PathBuf {
        self.base_path.join("artifacts").join(file_id)
    }

    fn artifact_path(&self, name: &str) -> Result<PathBuf, UploadError> {
        let identity = parse_artifact_name(name)?;
        Ok(self.file_dir(&identity.file_id).join(name))
    }
}

#[async_trait::async_trait]
impl ArtifactStorage for LocalArtifactStorage {
    async fn exists(&self, name: &str) -> Result<bool, UploadError> {
        tokio::fs::try_exists(self.artifact_path(name)?)
            .await
            .map_err(|e| UploadError::StorageError(e.to_string()))
    }

    async fn find_by_file_id(&self, file_id: &str) -> Result<Option<String>, UploadError> {
        let dir = self.file_dir(file_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(UploadError::StorageError(e.to_string())),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| UploadError::StorageError(e.to_string()))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with('.') {
                return Ok(Some(name));
            }
        }

        Ok(None)
    }

    async fn stage(&self, name: &str) -> Result<Box<dyn ArtifactWriter>, UploadError> {
        let final_path = self.artifact_path(name)?;
        let dir = final_path
            .parent()
            .ok_or_else(|| UploadError::InternalError(format!("bad artifact path for {}", name)))?
            .to_path_buf();

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| UploadError::StorageError(e.to_string()))?;

        let staging_path = dir.join(format!(".{}.{}.part", name, Uuid::new_v4()));
        let file = tokio::fs::File::create(&staging_path)
            .await
            .map_err(|e| UploadError::StorageError(e.to_string()))?;

        Ok(Box::new(LocalArtifactWriter {
            file: Some(file),
            staging_path,
            final_path,
            written: 0,
            finished: false,
        }))
    }

    async fn open(&self, name: &str) -> Result<Option<ArtifactBody>, UploadError> {
        let path = self.artifact_path(name)?;
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(UploadError::StorageError(e.to_string())),
        };
        let size = file
            .metadata()
            .await
            .map_err(|e| UploadError::StorageError(e.to_string()))?
            .len();

        Ok(Some(ArtifactBody {
            size,
            reader: Box::pin(file),
        }))
    }
}

struct LocalArtifactWriter {
    file: Option<tokio::fs::File>,
    staging_path: PathBuf,
    final_path: PathBuf,
    written: u64,
    /// Set once publish or discard has run to completion
    finished: bool,
}

impl Drop for LocalArtifactWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Abandoned mid-assembly, e.g. the request future was dropped
        self.file.take();
        if let Err(e) = std::fs::remove_file(&self.staging_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    path = %self.staging_path.display(),
                    error = %e,
                    "Failed to remove abandoned staged artifact"
                );
            }
        }
    }
}

#[async_trait::async_trait]
impl ArtifactWriter for LocalArtifactWriter {
    async fn append(&mut self, data: &[u8]) -> Result<(), UploadError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| UploadError::InternalError("artifact writer already closed".into()))?;
        file.write_all(data)
            .await
            .map_err(|e| UploadError::StorageError(e.to_string()))?;
        self.written += data.len() as u64;
        Ok(())
    }

    async fn publish(&mut self) -> Result<u64, UploadError> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| UploadError::InternalError("artifact writer already closed".into()))?;

        let result = async {
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&self.staging_path, &self.final_path).await
        }
        .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&self.staging_path).await;
            self.finished = true;
            return Err(UploadError::StorageError(format!(
                "Failed to publish {}: {}",
                self.final_path.display(),
                e
            )));
        }

        self.finished = true;
        Ok(self.written)
    }

    async fn discard(&mut self) {
        self.file.take();
        if let Err(e) = tokio::fs::remove_file(&self.staging_path).await {
            tracing::warn!(
                path = %self.staging_path.display(),
                error = %e,
                "Failed to remove staged artifact"
            );
        }
        self.finished = true;
    }
}

// ============================================================================
// Memory Storage
// ============================================================================

type ArtifactMap = Arc<RwLock<HashMap<String, Vec<u8>>>>;

/// In-memory artifact storage
#[derive(Default)]
pub struct MemoryArtifactStorage {
    artifacts: ArtifactMap,
}

#[async_trait::async_trait]
impl ArtifactStorage for MemoryArtifactStorage {
    async fn exists(&self, name: &str) -> Result<bool, UploadError> {
        Ok(self.artifacts.read().await.contains_key(name))
    }

    async fn find_by_file_id(&self, file_id: &str) -> Result<Option<String>, UploadError> {
        let artifacts = self.artifacts.read().await;
        Ok(artifacts
            .keys()
            .find(|name| {
                parse_artifact_name(name)
                    .map(|identity| identity.file_id == file_id)
                    .unwrap_or(false)
            })
            .cloned())
    }

    async fn stage(&self, name: &str) -> Result<Box<dyn ArtifactWriter>, UploadError> {
        parse_artifact_name(name)?;
        Ok(Box::new(MemoryArtifactWriter {
            name: name.to_string(),
            buffer: Vec::new(),
            artifacts: self.artifacts.clone(),
        }))
    }

    async fn open(&self, name: &str) -> Result<Option<ArtifactBody>, UploadError> {
        let artifacts = self.artifacts.read().await;
        Ok(artifacts.get(name).map(|data| ArtifactBody {
            size: data.len() as u64,
            reader: Box::pin(Cursor::new(data.clone())),
        }))
    }
}

struct MemoryArtifactWriter {
    name: String,
    buffer: Vec<u8>,
    artifacts: ArtifactMap,
}

#[async_trait::async_trait]
impl ArtifactWriter for MemoryArtifactWriter {
    async fn append(&mut self, data: &[u8]) -> Result<(), UploadError> {
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    async fn publish(&mut self) -> Result<u64, UploadError> {
        let data = std::mem::take(&mut self.buffer);
        let size = data.len() as u64;
        self.artifacts.write().await.insert(self.name.clone(), data);
        Ok(size)
    }

    async fn discard(&mut self) {
        self.buffer.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
