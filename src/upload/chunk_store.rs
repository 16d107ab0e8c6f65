//! Chunk Store
//!
//! Storage for uploaded chunks. Fingerprint-form chunk ids are content
//! addresses shared by every upload; other ids are scoped to their file.
//! Chunks are written once and kept after assembly.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::types::{ChunkId, UploadError};

// ============================================================================
// Chunk Store Trait
// ============================================================================

/// Trait for chunk storage backends
#[async_trait::async_trait]
pub trait ChunkStorage: Send + Sync {
    /// Store a chunk unless one is already stored under `chunk_id`.
    ///
    /// Returns `true` when bytes were written. The write must be durable
    /// and never leave a partially written chunk visible under `chunk_id`.
    async fn store_chunk(&self, chunk_id: &str, data: &[u8]) -> Result<bool, UploadError>;

    /// Check if a chunk exists
    async fn chunk_exists(&self, chunk_id: &str) -> Result<bool, UploadError>;

    /// Read a stored chunk
    async fn get_chunk(&self, chunk_id: &str) -> Result<Vec<u8>, UploadError>;
}

// ============================================================================
// Chunk Store (Main Implementation)
// ============================================================================

/// Main chunk store with pluggable backends
#[derive(Clone)]
pub struct ChunkStore {
    inner: Arc<dyn ChunkStorage>,
}

impl ChunkStore {
    /// Create with local filesystem storage
    pub fn with_local_storage(base_path: PathBuf) -> Self {
        Self::with_backend(Arc::new(LocalChunkStorage::new(base_path)))
    }

    /// Create with in-memory storage
    pub fn in_memory() -> Self {
        Self::with_backend(Arc::new(MemoryChunkStorage::default()))
    }

    /// Create over any backend
    pub fn with_backend(backend: Arc<dyn ChunkStorage>) -> Self {
        Self { inner: backend }
    }

    /// Store a chunk of `file_id`, verifying its digest when the id is in fingerprint form
    pub async fn store_chunk(
        &self,
        file_id: &str,
        chunk_id: &str,
        data: &[u8],
    ) -> Result<(), UploadError> {
        if let Some(parsed) = ChunkId::parse(chunk_id) {
            let actual_hash = compute_hash(data);
            if actual_hash != parsed.digest {
                return Err(UploadError::ChunkHashMismatch {
                    expected: parsed.digest,
                    actual: actual_hash,
                });
            }
        }

        let key = storage_key(file_id, chunk_id);
        let written = self.inner.store_chunk(&key, data).await?;
        if written {
            tracing::debug!(chunk_id = %chunk_id, key = %key, size = data.len(), "Stored chunk");
        } else {
            tracing::debug!(chunk_id = %chunk_id, key = %key, "Chunk already stored, reusing");
        }

        Ok(())
    }

    /// Read a stored chunk of `file_id`
    pub async fn get_chunk(&self, file_id: &str, chunk_id: &str) -> Result<Vec<u8>, UploadError> {
        self.inner.get_chunk(&storage_key(file_id, chunk_id)).await
    }

    /// Check if a chunk of `file_id` exists
    pub async fn chunk_exists(&self, file_id: &str, chunk_id: &str) -> Result<bool, UploadError> {
        self.inner.chunk_exists(&storage_key(file_id, chunk_id)).await
    }
}

/// Backend key for a chunk.
///
/// Fingerprint-form ids name their content and are shared across files.
/// Any other id only means something within its own upload, so it is
/// prefixed with the file id. Keys never contain `.`, which keeps the two
/// forms from colliding.
pub fn storage_key(file_id: &str, chunk_id: &str) -> String {
    if ChunkId::parse(chunk_id).is_some() {
        chunk_id.to_string()
    } else {
        format!("{}.{}", file_id, chunk_id)
    }
}

// ============================================================================
// Local Filesystem Storage
// ============================================================================

/// Local filesystem chunk storage
pub struct LocalChunkStorage {
    base_path: PathBuf,
}

impl LocalChunkStorage {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn chunk_path(&self, chunk_id: &str) -> PathBuf {
        // First 2 chars as directory to keep listings small
        let prefix = &chunk_id[..2.min(chunk_id.len())];
        self.base_path.join("chunks").join(prefix).join(chunk_id)
    }
}

#[async_trait::async_trait]
impl ChunkStorage for LocalChunkStorage {
    async fn store_chunk(&self, chunk_id: &str, data: &[u8]) -> Result<bool, UploadError> {
        let path = self.chunk_path(chunk_id);
        if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| UploadError::StorageError(e.to_string()))?
        {
            return Ok(false);
        }

        let parent = path
            .parent()
            .ok_or_else(|| UploadError::InternalError(format!("bad chunk path for {}", chunk_id)))?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| UploadError::StorageError(e.to_string()))?;

        // Write next to the target and rename so readers never see a torn chunk
        let temp_path = parent.join(format!(".{}.{}.part", chunk_id, Uuid::new_v4()));
        let result = async {
            let mut file = tokio::fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            tokio::fs::rename(&temp_path, &path).await
        }
        .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(UploadError::StorageError(format!(
                "Failed to store chunk {}: {}",
                chunk_id, e
            )));
        }

        Ok(true)
    }

    async fn chunk_exists(&self, chunk_id: &str) -> Result<bool, UploadError> {
        tokio::fs::try_exists(self.chunk_path(chunk_id))
            .await
            .map_err(|e| UploadError::StorageError(e.to_string()))
    }

    async fn get_chunk(&self, chunk_id: &str) -> Result<Vec<u8>, UploadError> {
        tokio::fs::read(self.chunk_path(chunk_id))
            .await
            .map_err(|e| UploadError::StorageError(format!("Failed to read chunk {}: {}", chunk_id, e)))
    }
}

// ============================================================================
// Memory Storage
// ============================================================================

/// In-memory chunk storage
#[derive(Default)]
pub struct MemoryChunkStorage {
    chunks: RwLock<HashMap<String, Vec<u8>>>,
}

#[async_trait::async_trait]
impl ChunkStorage for MemoryChunkStorage {
    async fn store_chunk(&self, chunk_id: &str, data: &[u8]) -> Result<bool, UploadError> {
        let mut chunks = self.chunks.write().await;
        if chunks.contains_key(chunk_id) {
            return Ok(false);
        }
        chunks.insert(chunk_id.to_string(), data.to_vec());
        Ok(true)
    }

    async fn chunk_exists(&self, chunk_id: &str) -> Result<bool, UploadError> {
        let chunks = self.chunks.read().await;
        Ok(chunks.contains_key(chunk_id))
    }

    async fn get_chunk(&self, chunk_id: &str) -> Result<Vec<u8>, UploadError> {
        let chunks = self.chunks.read().await;
        chunks
            .get(chunk_id)
            .cloned()
            .ok_or_else(|| UploadError::StorageError(format!("Chunk not stored: {}", chunk_id)))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Compute SHA-256 hash of data
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

// ============================================================================
// Tests
// ============================================================================
