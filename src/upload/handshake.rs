//! Handshake Service
//!
//! First contact for an upload. Decides between the instant-upload fast path
//! (artifact already stored), resuming an existing session, and starting a
//! fresh one.

use std::collections::HashSet;

use super::service::UploadService;
use super::types::{
    normalize_extension, require, validate_key, FileIdentity, HandshakeRequest,
    HandshakeResponse, UploadError,
};

impl UploadService {
    /// Negotiate which chunks of a file still need to be transferred
    pub async fn handshake(
        &self,
        request: HandshakeRequest,
    ) -> Result<HandshakeResponse, UploadError> {
        let file_id = require(request.file_id, "fileId")?;
        validate_key("fileId", &file_id)?;
        let extension = normalize_extension(&require(request.extension, "extension")?)?;
        let chunk_ids = require(request.chunk_ids, "chunkIds")?;

        let identity = FileIdentity { file_id, extension };
        let name = identity.artifact_name();

        // Assembly for this file holds the same lock, so the artifact check
        // and the session lookup below see a consistent state.
        let _guard = self.sessions().lock(&identity.file_id).await;

        if self.artifacts().exists(&name).await? {
            tracing::info!(
                file_id = %identity.file_id,
                artifact = %name,
                "Duplicate file detected - instant upload"
            );
            return Ok(HandshakeResponse::complete(self.locator_for(&name)));
        }

        if let Some(session) = self.sessions().get_session(&identity.file_id).await? {
            if !session.same_plan(&chunk_ids) || session.extension != identity.extension {
                tracing::warn!(
                    file_id = %identity.file_id,
                    stored_chunks = session.chunk_ids.len(),
                    supplied_chunks = chunk_ids.len(),
                    stored_extension = %session.extension,
                    supplied_extension = %identity.extension,
                    "Handshake plan differs from stored session, keeping stored plan"
                );
            }

            if session.is_complete() {
                // An earlier assembly attempt failed after the last chunk landed
                let locator = self.assemble(&session).await?;
                return Ok(HandshakeResponse::complete(locator));
            }

            tracing::info!(
                file_id = %identity.file_id,
                needed_chunks = session.needs.len(),
                total_chunks = session.chunk_ids.len(),
                "Resuming upload session"
            );
            return Ok(HandshakeResponse::resume(session.needs));
        }

        let mut seen = HashSet::with_capacity(chunk_ids.len());
        for chunk_id in &chunk_ids {
            validate_key("chunkIds", chunk_id)?;
            if !seen.insert(chunk_id.as_str()) {
                return Err(UploadError::DuplicateChunkId(chunk_id.clone()));
            }
        }

        let session = self.sessions().create_session(identity, chunk_ids).await?;

        if session.is_complete() {
            // Zero-byte file: nothing to transfer, publish the empty artifact now
            let locator = self.assemble(&session).await?;
            return Ok(HandshakeResponse::complete(locator));
        }

        Ok(HandshakeResponse::start(session.needs))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::types::{HandshakeStatus, UploadSession};

    fn request(file_id: &str, chunk_ids: &[&str]) -> HandshakeRequest {
        HandshakeRequest {
            file_id: Some(file_id.to_string()),
            extension: Some("bin".to_string()),
            chunk_ids: Some(chunk_ids.iter().map(|s| s.to_string()).collect()),
        }
    }

    async fn publish(service: &UploadService, name: &str, data: &[u8]) {
        let mut writer = service.artifacts().stage(name).await.unwrap();
        writer.append(data).await.unwrap();
        writer.publish().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_fields_are_rejected() {
        let service = UploadService::in_memory();

        let mut missing_id = request("f1", &["c1"]);
        missing_id.file_id = None;
        assert!(matches!(
            service.handshake(missing_id).await,
            Err(UploadError::MissingField("fileId"))
        ));

        let mut missing_ext = request("f1", &["c1"]);
        missing_ext.extension = None;
        assert!(matches!(
            service.handshake(missing_ext).await,
            Err(UploadError::MissingField("extension"))
        ));

        let mut missing_chunks = request("f1", &["c1"]);
        missing_chunks.chunk_ids = None;
        assert!(matches!(
            service.handshake(missing_chunks).await,
            Err(UploadError::MissingField("chunkIds"))
        ));

        assert_eq!(service.sessions().session_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_start_creates_session() {
        let service = UploadService::in_memory();

        let response = service.handshake(request("f1", &["c1", "c2"])).await.unwrap();

        assert_eq!(response.status, HandshakeStatus::Start);
        assert_eq!(response.needs, vec!["c1".to_string(), "c2".to_string()]);
        assert!(response.locator.is_none());

        let session = service.sessions().get_session("f1").await.unwrap().unwrap();
        assert_eq!(session.extension, ".bin");
        assert_eq!(session.needs, session.chunk_ids);
    }

    #[tokio::test]
    async fn test_dedup_skips_session() {
        let service = UploadService::in_memory();
        publish(&service, "f1.bin", b"already here").await;

        // Whatever plan is supplied, even a malformed one
        let response = service.handshake(request("f1", &["x", "x"])).await.unwrap();

        assert_eq!(response.status, HandshakeStatus::Complete);
        assert_eq!(response.locator.as_deref(), Some("/api/v1/upload/artifact/f1.bin"));
        assert!(response.needs.is_empty());
        assert_eq!(service.sessions().session_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_resume_keeps_stored_plan() {
        let service = UploadService::in_memory();
        service.handshake(request("f1", &["c1", "c2", "c3"])).await.unwrap();

        let mut session = service.sessions().get_session("f1").await.unwrap().unwrap();
        session.mark_chunk_received("c2");
        service.sessions().save_session(&session).await.unwrap();

        let response = service.handshake(request("f1", &["d1", "d2"])).await.unwrap();

        assert_eq!(response.status, HandshakeStatus::Resume);
        assert_eq!(response.needs, vec!["c1".to_string(), "c3".to_string()]);
        let stored: UploadSession = service.sessions().get_session("f1").await.unwrap().unwrap();
        assert_eq!(stored.chunk_ids.len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_chunk_ids_rejected() {
        let service = UploadService::in_memory();

        let result = service.handshake(request("f1", &["c1", "c1"])).await;

        assert!(matches!(result, Err(UploadError::DuplicateChunkId(id)) if id == "c1"));
        assert!(service.sessions().get_session("f1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_ids_rejected() {
        let service = UploadService::in_memory();

        assert!(matches!(
            service.handshake(request("../f1", &["c1"])).await,
            Err(UploadError::InvalidField { field: "fileId", .. })
        ));
        assert!(matches!(
            service.handshake(request("f1", &["c/1"])).await,
            Err(UploadError::InvalidField { field: "chunkIds", .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_plan_completes_immediately() {
        let service = UploadService::in_memory();

        let response = service.handshake(request("empty", &[])).await.unwrap();

        assert_eq!(response.status, HandshakeStatus::Complete);
        assert!(service.artifacts().exists("empty.bin").await.unwrap());
        assert!(service.sessions().get_session("empty").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resume_retries_pending_assembly() {
        let service = UploadService::in_memory();
        service.handshake(request("f1", &["c1"])).await.unwrap();
        service.chunks().store_chunk("f1", "c1", b"abc").await.unwrap();

        // Simulate an assembly that failed after the last chunk was recorded
        let mut session = service.sessions().get_session("f1").await.unwrap().unwrap();
        session.mark_chunk_received("c1");
        service.sessions().save_session(&session).await.unwrap();

        let response = service.handshake(request("f1", &["c1"])).await.unwrap();

        assert_eq!(response.status, HandshakeStatus::Complete);
        assert!(service.artifacts().exists("f1.bin").await.unwrap());
    }
}
