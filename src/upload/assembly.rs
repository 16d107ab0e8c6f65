//! Assembly Engine
//!
//! Concatenates a completed session's chunks, in plan order, into the final
//! artifact. Output is staged and published atomically; the session is
//! deleted only after publication. Callers hold the session lock.

use sha2::{Digest, Sha256};

use super::artifact_store::ArtifactStore;
use super::chunk_store::ChunkStore;
use super::session::SessionManager;
use super::types::{is_sha256_hex, UploadError, UploadSession};

/// Result of an assembly attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyOutcome {
    /// The artifact was built and published by this call
    Assembled { name: String, size: u64 },
    /// A previous attempt already published the artifact
    AlreadyPresent { name: String },
}

impl AssemblyOutcome {
    pub fn name(&self) -> &str {
        match self {
            Self::Assembled { name, .. } | Self::AlreadyPresent { name } => name,
        }
    }
}

/// Builds final artifacts from stored chunks
#[derive(Clone)]
pub struct Assembler {
    chunks: ChunkStore,
    artifacts: ArtifactStore,
    sessions: SessionManager,
}

impl Assembler {
    pub fn new(chunks: ChunkStore, artifacts: ArtifactStore, sessions: SessionManager) -> Self {
        Self {
            chunks,
            artifacts,
            sessions,
        }
    }

    /// Assemble the artifact for a session whose `needs` is empty.
    ///
    /// Safe to call redundantly: if the artifact is already published the
    /// lingering session is removed and nothing is appended.
    pub async fn assemble(&self, session: &UploadSession) -> Result<AssemblyOutcome, UploadError> {
        if !session.is_complete() {
            return Err(UploadError::MissingChunks(session.needs.clone()));
        }

        let name = session.identity().artifact_name();

        if self.artifacts.exists(&name).await? {
            tracing::debug!(
                file_id = %session.file_id,
                artifact = %name,
                "Artifact already published, skipping assembly"
            );
            self.sessions.remove_session(&session.file_id).await?;
            return Ok(AssemblyOutcome::AlreadyPresent { name });
        }

        tracing::info!(
            file_id = %session.file_id,
            artifact = %name,
            chunks = session.chunk_ids.len(),
            "Assembling file from chunks"
        );

        let mut writer = self.artifacts.stage(&name).await?;
        let mut hasher = Sha256::new();

        for chunk_id in &session.chunk_ids {
            let appended = match self.chunks.get_chunk(&session.file_id, chunk_id).await {
                Ok(data) => {
                    hasher.update(&data);
                    writer.append(&data).await
                }
                Err(e) => Err(e),
            };

            if let Err(e) = appended {
                tracing::warn!(
                    file_id = %session.file_id,
                    chunk_id = %chunk_id,
                    error = %e,
                    "Assembly aborted"
                );
                writer.discard().await;
                return Err(e);
            }
        }

        // Verify final file hash when the id is a SHA-256 fingerprint
        if is_sha256_hex(&session.file_id) {
            let actual_hash = hex::encode(hasher.finalize());
            if actual_hash != session.file_id {
                writer.discard().await;
                tracing::warn!(
                    file_id = %session.file_id,
                    actual = %actual_hash,
                    "Assembled bytes do not match file id"
                );
                return Err(UploadError::FileHashMismatch {
                    expected: session.file_id.clone(),
                    actual: actual_hash,
                });
            }
        }

        let size = writer.publish().await?;
        self.sessions.remove_session(&session.file_id).await?;

        tracing::info!(
            file_id = %session.file_id,
            artifact = %name,
            size = size,
            "File assembled successfully"
        );

        Ok(AssemblyOutcome::Assembled { name, size })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::chunk_store::{compute_hash, ChunkStorage, MemoryChunkStorage};
    use crate::upload::types::{ChunkId, FileIdentity};
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;

    struct Fixture {
        chunks: ChunkStore,
        artifacts: ArtifactStore,
        sessions: SessionManager,
        assembler: Assembler,
    }

    fn fixture_with_chunks(chunks: ChunkStore) -> Fixture {
        let artifacts = ArtifactStore::in_memory();
        let sessions = SessionManager::in_memory();
        let assembler = Assembler::new(chunks.clone(), artifacts.clone(), sessions.clone());
        Fixture {
            chunks,
            artifacts,
            sessions,
            assembler,
        }
    }

    fn identity(file_id: &str) -> FileIdentity {
        FileIdentity {
            file_id: file_id.to_string(),
            extension: ".txt".to_string(),
        }
    }

    async fn read_artifact(artifacts: &ArtifactStore, name: &str) -> Vec<u8> {
        let mut body = artifacts.open(name).await.unwrap();
        let mut data = Vec::new();
        body.reader.read_to_end(&mut data).await.unwrap();
        data
    }

    #[tokio::test]
    async fn test_assembles_in_plan_order() {
        let fx = fixture_with_chunks(ChunkStore::in_memory());
        // Stored in reverse order of the plan
        fx.chunks.store_chunk("f1", "c3", b"!").await.unwrap();
        fx.chunks.store_chunk("f1", "c2", b"World").await.unwrap();
        fx.chunks.store_chunk("f1", "c1", b"Hello, ").await.unwrap();

        let ids = vec!["c1".to_string(), "c2".to_string(), "c3".to_string()];
        let mut session = fx.sessions.create_session(identity("f1"), ids.clone()).await.unwrap();
        for id in &ids {
            session.mark_chunk_received(id);
        }

        let outcome = fx.assembler.assemble(&session).await.unwrap();

        assert_eq!(
            outcome,
            AssemblyOutcome::Assembled {
                name: "f1.txt".to_string(),
                size: 13
            }
        );
        assert_eq!(read_artifact(&fx.artifacts, "f1.txt").await, b"Hello, World!");
        assert!(fx.sessions.get_session("f1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_redundant_assembly_is_noop() {
        let fx = fixture_with_chunks(ChunkStore::in_memory());
        fx.chunks.store_chunk("f2", "c1", b"data").await.unwrap();

        let mut session = fx
            .sessions
            .create_session(identity("f2"), vec!["c1".to_string()])
            .await
            .unwrap();
        session.mark_chunk_received("c1");

        fx.assembler.assemble(&session).await.unwrap();
        // A lingering session record, as after a crash between publish and delete
        fx.sessions.save_session(&session).await.unwrap();

        let second = fx.assembler.assemble(&session).await.unwrap();

        assert_eq!(second, AssemblyOutcome::AlreadyPresent { name: "f2.txt".to_string() });
        assert_eq!(read_artifact(&fx.artifacts, "f2.txt").await, b"data");
        assert!(fx.sessions.get_session("f2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_incomplete_session_is_rejected() {
        let fx = fixture_with_chunks(ChunkStore::in_memory());
        let session = fx
            .sessions
            .create_session(identity("f3"), vec!["c1".to_string()])
            .await
            .unwrap();

        let result = fx.assembler.assemble(&session).await;
        assert!(matches!(result, Err(UploadError::MissingChunks(_))));
    }

    /// Chunk storage whose reads fail until switched on
    struct FlakyChunks {
        inner: MemoryChunkStorage,
        readable: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl ChunkStorage for FlakyChunks {
        async fn store_chunk(&self, chunk_id: &str, data: &[u8]) -> Result<bool, UploadError> {
            self.inner.store_chunk(chunk_id, data).await
        }

        async fn chunk_exists(&self, chunk_id: &str) -> Result<bool, UploadError> {
            self.inner.chunk_exists(chunk_id).await
        }

        async fn get_chunk(&self, key: &str) -> Result<Vec<u8>, UploadError> {
            if !self.readable.load(std::sync::atomic::Ordering::SeqCst) && key.ends_with(".c2") {
                return Err(UploadError::StorageError("disk unavailable".into()));
            }
            self.inner.get_chunk(key).await
        }
    }

    #[tokio::test]
    async fn test_read_failure_leaves_state_untouched() {
        let flaky = Arc::new(FlakyChunks {
            inner: MemoryChunkStorage::default(),
            readable: std::sync::atomic::AtomicBool::new(false),
        });
        let fx = fixture_with_chunks(ChunkStore::with_backend(flaky.clone()));
        fx.chunks.store_chunk("f4", "c1", b"ab").await.unwrap();
        fx.chunks.store_chunk("f4", "c2", b"cd").await.unwrap();

        let ids = vec!["c1".to_string(), "c2".to_string()];
        let mut session = fx.sessions.create_session(identity("f4"), ids).await.unwrap();
        session.mark_chunk_received("c1");
        session.mark_chunk_received("c2");
        fx.sessions.save_session(&session).await.unwrap();

        let result = fx.assembler.assemble(&session).await;
        assert!(matches!(result, Err(UploadError::StorageError(_))));
        assert!(!fx.artifacts.exists("f4.txt").await.unwrap());
        assert!(fx.sessions.get_session("f4").await.unwrap().is_some());

        flaky.readable.store(true, std::sync::atomic::Ordering::SeqCst);
        fx.assembler.assemble(&session).await.unwrap();
        assert_eq!(read_artifact(&fx.artifacts, "f4.txt").await, b"abcd");
    }

    #[tokio::test]
    async fn test_file_hash_is_verified() {
        let fx = fixture_with_chunks(ChunkStore::in_memory());
        let data = b"payload";
        let chunk_id = ChunkId::new(compute_hash(data), 0).to_string();
        let wrong_file_id = compute_hash(b"something else");
        fx.chunks.store_chunk(&wrong_file_id, &chunk_id, data).await.unwrap();

        let mut session = fx
            .sessions
            .create_session(identity(&wrong_file_id), vec![chunk_id.clone()])
            .await
            .unwrap();
        session.mark_chunk_received(&chunk_id);

        let result = fx.assembler.assemble(&session).await;

        assert!(matches!(result, Err(UploadError::FileHashMismatch { .. })));
        assert!(fx.artifacts.find_by_file_id(&wrong_file_id).await.unwrap().is_none());
        // Only a successful assembly ends the session
        let kept = fx.sessions.get_session(&wrong_file_id).await.unwrap().unwrap();
        assert_eq!(kept.chunk_ids, vec![chunk_id]);
    }
}
