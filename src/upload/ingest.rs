//! Chunk Ingestion
//!
//! Accepts one chunk per call, persists it once, shrinks the session's
//! missing-set under the session lock, and triggers assembly when the last
//! missing chunk lands. Retried and duplicated chunks are no-ops.

use super::service::UploadService;
use super::types::{require, validate_key, ChunkUpload, ChunkUploadResponse, UploadError};

impl UploadService {
    /// Ingest one chunk of an upload
    pub async fn ingest_chunk(
        &self,
        upload: ChunkUpload,
    ) -> Result<ChunkUploadResponse, UploadError> {
        let file_id = require(upload.file_id, "fileId")?;
        validate_key("fileId", &file_id)?;
        let chunk_id = require(upload.chunk_id, "chunkId")?;
        validate_key("chunkId", &chunk_id)?;
        if upload.data.is_empty() {
            return Err(UploadError::MissingField("chunk"));
        }

        let _guard = self.sessions().lock(&file_id).await;

        let Some(mut session) = self.sessions().get_session(&file_id).await? else {
            // A late duplicate of the final chunk arrives after assembly removed the session
            if let Some(name) = self.artifacts().find_by_file_id(&file_id).await? {
                tracing::debug!(
                    file_id = %file_id,
                    chunk_id = %chunk_id,
                    "Chunk for already assembled file, ignoring"
                );
                return Ok(ChunkUploadResponse {
                    needs: Vec::new(),
                    locator: Some(self.locator_for(&name)),
                });
            }
            return Err(UploadError::SessionNotFound(file_id));
        };

        if !session.contains_chunk(&chunk_id) {
            return Err(UploadError::UnknownChunk { file_id, chunk_id });
        }

        if !session.is_needed(&chunk_id) {
            if session.is_complete() {
                // Previous assembly attempt did not finish; retry it
                let locator = self.assemble(&session).await?;
                return Ok(ChunkUploadResponse {
                    needs: Vec::new(),
                    locator: Some(locator),
                });
            }

            tracing::debug!(
                file_id = %file_id,
                chunk_id = %chunk_id,
                "Chunk already received"
            );
            return Ok(ChunkUploadResponse {
                needs: session.needs,
                locator: None,
            });
        }

        // Chunk first, then the session: a failed session write leaves an
        // unreferenced chunk that the retry reuses.
        self.chunks().store_chunk(&file_id, &chunk_id, &upload.data).await?;
        session.mark_chunk_received(&chunk_id);
        self.sessions().save_session(&session).await?;

        tracing::debug!(
            file_id = %file_id,
            chunk_id = %chunk_id,
            remaining = session.needs.len(),
            total_chunks = session.chunk_ids.len(),
            progress = format!("{:.1}%", session.progress()),
            "Chunk uploaded"
        );

        if session.is_complete() {
            let locator = self.assemble(&session).await?;
            return Ok(ChunkUploadResponse {
                needs: Vec::new(),
                locator: Some(locator),
            });
        }

        Ok(ChunkUploadResponse {
            needs: session.needs,
            locator: None,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
