//! Upload Service
//!
//! Wires the session manager, chunk store, artifact store and assembler into
//! one cloneable handle shared by the HTTP handlers. The handshake and chunk
//! ingestion operations live in `handshake.rs` and `ingest.rs`.

use std::sync::Arc;

use super::artifact_store::{ArtifactBody, ArtifactStore};
use super::assembly::{Assembler, AssemblyOutcome};
use super::chunk_store::ChunkStore;
use super::session::SessionManager;
use super::types::{parse_artifact_name, validate_key, UploadError, UploadSession};

/// Path under which artifacts are served
pub const ARTIFACT_ROUTE: &str = "/api/v1/upload/artifact";

/// Shared upload engine
#[derive(Clone)]
pub struct UploadService {
    inner: Arc<UploadServiceInner>,
}

struct UploadServiceInner {
    sessions: SessionManager,
    chunks: ChunkStore,
    artifacts: ArtifactStore,
    assembler: Assembler,
    /// Prefix for download locators, e.g. `https://uploads.example.com`
    public_url: String,
}

impl UploadService {
    pub fn new(
        sessions: SessionManager,
        chunks: ChunkStore,
        artifacts: ArtifactStore,
        public_url: impl Into<String>,
    ) -> Self {
        let assembler = Assembler::new(chunks.clone(), artifacts.clone(), sessions.clone());
        Self {
            inner: Arc::new(UploadServiceInner {
                sessions,
                chunks,
                artifacts,
                assembler,
                public_url: public_url.into().trim_end_matches('/').to_string(),
            }),
        }
    }

    /// Upload service with every store in memory
    pub fn in_memory() -> Self {
        Self::new(
            SessionManager::in_memory(),
            ChunkStore::in_memory(),
            ArtifactStore::in_memory(),
            "",
        )
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.inner.sessions
    }

    pub fn chunks(&self) -> &ChunkStore {
        &self.inner.chunks
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.inner.artifacts
    }

    /// Download locator for an artifact name
    pub fn locator_for(&self, name: &str) -> String {
        format!("{}{}/{}", self.inner.public_url, ARTIFACT_ROUTE, name)
    }

    /// Run assembly for a completed session; the caller holds its lock
    pub(super) async fn assemble(&self, session: &UploadSession) -> Result<String, UploadError> {
        let outcome = self.inner.assembler.assemble(session).await?;
        if let AssemblyOutcome::Assembled { size, .. } = &outcome {
            tracing::debug!(file_id = %session.file_id, size = size, "Upload finalized");
        }
        Ok(self.locator_for(outcome.name()))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Open a published artifact by its `fileId + extension` name
    pub async fn open_artifact(&self, name: &str) -> Result<ArtifactBody, UploadError> {
        parse_artifact_name(name)?;
        self.inner.artifacts.open(name).await
    }

    /// Current session for a file id
    pub async fn session_status(&self, file_id: &str) -> Result<UploadSession, UploadError> {
        validate_key("fileId", file_id)?;
        self.inner
            .sessions
            .get_session(file_id)
            .await?
            .ok_or_else(|| UploadError::SessionNotFound(file_id.to_string()))
    }
}
