//! Upload Transports
//!
//! The driver talks to the receiving side through [`UploadTransport`]:
//! over HTTP with [`HttpTransport`], or in-process with [`LocalTransport`].

use axum::body::Bytes;
use serde::de::DeserializeOwned;

use super::fingerprint::FingerprintError;
use crate::routes::upload::ErrorResponse;
use crate::upload::{
    ChunkUpload, ChunkUploadResponse, HandshakeRequest, HandshakeResponse, UploadError,
    UploadService,
};

/// Client-side upload errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server rejected request ({status} {code}): {message}")]
    Rejected {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Invalid server response: {0}")]
    InvalidResponse(String),

    #[error("File changed since fingerprinting: chunk {0}")]
    FileChanged(String),

    #[error("Upload incomplete after {0} rounds")]
    Stalled(usize),

    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Failures worth repeating the same request for
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Rejected { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Failures a fresh handshake can recover from
    pub fn needs_handshake(&self) -> bool {
        matches!(self, Self::Rejected { code, .. } if code == "SESSION_NOT_FOUND")
    }
}

impl From<UploadError> for ClientError {
    fn from(e: UploadError) -> Self {
        ClientError::Rejected {
            status: e.status_code().as_u16(),
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Transport(e.to_string())
    }
}

/// Request/response channel to an upload server
#[async_trait::async_trait]
pub trait UploadTransport: Send + Sync {
    async fn handshake(&self, request: &HandshakeRequest) -> Result<HandshakeResponse, ClientError>;

    async fn upload_chunk(
        &self,
        file_id: &str,
        chunk_id: &str,
        data: Vec<u8>,
    ) -> Result<ChunkUploadResponse, ClientError>;
}

// ============================================================================
// HTTP
// ============================================================================

/// Transport over the HTTP API
#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// `base_url` is the server root, e.g. `http://localhost:3000`
    pub fn new(base_url: &str) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/upload{}", self.base_url, path)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(error) => ClientError::Rejected {
                    status: status.as_u16(),
                    code: error.code,
                    message: error.error,
                },
                Err(_) => ClientError::Rejected {
                    status: status.as_u16(),
                    code: "HTTP_ERROR".to_string(),
                    message: body,
                },
            });
        }

        serde_json::from_str(&body).map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }
}

#[async_trait::async_trait]
impl UploadTransport for HttpTransport {
    async fn handshake(&self, request: &HandshakeRequest) -> Result<HandshakeResponse, ClientError> {
        self.send_json(self.http.post(self.url("/handshake")).json(request))
            .await
    }

    async fn upload_chunk(
        &self,
        file_id: &str,
        chunk_id: &str,
        data: Vec<u8>,
    ) -> Result<ChunkUploadResponse, ClientError> {
        let request = self
            .http
            .post(self.url("/chunk"))
            .query(&[("fileId", file_id), ("chunkId", chunk_id)])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data);
        self.send_json(request).await
    }
}

// ============================================================================
// In-process
// ============================================================================

/// Transport calling an [`UploadService`] directly
#[derive(Clone)]
pub struct LocalTransport {
    service: UploadService,
}

impl LocalTransport {
    pub fn new(service: UploadService) -> Self {
        Self { service }
    }
}

#[async_trait::async_trait]
impl UploadTransport for LocalTransport {
    async fn handshake(&self, request: &HandshakeRequest) -> Result<HandshakeResponse, ClientError> {
        Ok(self.service.handshake(request.clone()).await?)
    }

    async fn upload_chunk(
        &self,
        file_id: &str,
        chunk_id: &str,
        data: Vec<u8>,
    ) -> Result<ChunkUploadResponse, ClientError> {
        let upload = ChunkUpload {
            file_id: Some(file_id.to_string()),
            chunk_id: Some(chunk_id.to_string()),
            data: Bytes::from(data),
        };
        Ok(self.service.ingest_chunk(upload).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(ClientError::Transport("reset".into()).is_retryable());
        assert!(ClientError::from(UploadError::StorageError("disk".into())).is_retryable());

        let missing = ClientError::from(UploadError::SessionNotFound("f1".into()));
        assert!(!missing.is_retryable());
        assert!(missing.needs_handshake());

        let mismatch = ClientError::from(UploadError::ChunkHashMismatch {
            expected: "a".into(),
            actual: "b".into(),
        });
        assert!(!mismatch.is_retryable());
        assert!(!mismatch.needs_handshake());
    }

    #[tokio::test]
    async fn test_local_transport_maps_errors() {
        let transport = LocalTransport::new(UploadService::in_memory());

        let result = transport.upload_chunk("f1", "c1", b"data".to_vec()).await;

        match result {
            Err(ClientError::Rejected { status, code, .. }) => {
                assert_eq!(status, 404);
                assert_eq!(code, "SESSION_NOT_FOUND");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_http_transport_unreachable_is_retryable() {
        // Reserved port that nothing listens on
        let transport = HttpTransport::new("http://127.0.0.1:9");

        let result = transport
            .handshake(&HandshakeRequest {
                file_id: Some("f1".into()),
                extension: Some("bin".into()),
                chunk_ids: Some(vec![]),
            })
            .await;

        assert!(matches!(result, Err(ref e) if e.is_retryable()));
    }
}
