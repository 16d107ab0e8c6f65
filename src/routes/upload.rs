//! Upload Routes
//!
//! HTTP endpoints for the resumable chunked upload protocol.
//!
//! Endpoints:
//! - POST /api/v1/upload/handshake - Negotiate needed chunks, detect duplicates
//! - POST /api/v1/upload/chunk?fileId=..&chunkId=.. - Upload one chunk (raw body)
//! - GET /api/v1/upload/artifact/:name - Download an assembled file
//! - GET /api/v1/upload/session/:file_id - Get session status

use axum::{
    body::{Body, Bytes},
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use crate::state::AppState;
use crate::upload::{
    ChunkQuery, ChunkUpload, ChunkUploadResponse, HandshakeRequest, HandshakeResponse,
    UploadError, UploadSession,
};

// ============================================================================
// Error Response
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "Upload request failed: {}", self);
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        });

        (status, body).into_response()
    }
}

// ============================================================================
// Session Status
// ============================================================================

/// Session progress as reported to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusResponse {
    pub file_id: String,
    pub extension: String,
    pub total_chunks: usize,
    pub needs: Vec<String>,
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UploadSession> for SessionStatusResponse {
    fn from(session: UploadSession) -> Self {
        Self {
            progress: session.progress(),
            total_chunks: session.chunk_ids.len(),
            file_id: session.file_id,
            extension: session.extension,
            needs: session.needs,
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

// ============================================================================
// Router
// ============================================================================

/// Create the upload router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/handshake", post(handshake))
        .route("/chunk", post(upload_chunk))
        .route("/artifact/:name", get(get_artifact))
        .route("/session/:file_id", get(get_session))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/upload/handshake
///
/// Returns `complete` with a locator when the file is already stored,
/// otherwise `start` or `resume` with the chunk ids still needed.
async fn handshake(
    State(state): State<AppState>,
    payload: Result<Json<HandshakeRequest>, JsonRejection>,
) -> Result<Json<HandshakeResponse>, UploadError> {
    let Json(request) = payload.map_err(|e| UploadError::InvalidField {
        field: "body",
        reason: e.body_text(),
    })?;

    let response = state.upload().handshake(request).await?;

    tracing::info!(
        status = ?response.status,
        needed_chunks = response.needs.len(),
        "Upload handshake complete"
    );

    Ok(Json(response))
}

/// POST /api/v1/upload/chunk?fileId=..&chunkId=..
///
/// Upload a single chunk. The chunk data is the raw request body.
async fn upload_chunk(
    State(state): State<AppState>,
    Query(query): Query<ChunkQuery>,
    body: Bytes,
) -> Result<Json<ChunkUploadResponse>, UploadError> {
    let response = state
        .upload()
        .ingest_chunk(ChunkUpload {
            file_id: query.file_id,
            chunk_id: query.chunk_id,
            data: body,
        })
        .await?;

    Ok(Json(response))
}

/// GET /api/v1/upload/artifact/:name
///
/// Stream an assembled file.
async fn get_artifact(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, UploadError> {
    let artifact = state.upload().open_artifact(&name).await?;

    let content_type = mime_guess::from_path(&name)
        .first_or_octet_stream()
        .to_string();

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_LENGTH, artifact.size.to_string()),
        ],
        Body::from_stream(ReaderStream::new(artifact.reader)),
    )
        .into_response())
}

/// GET /api/v1/upload/session/:file_id
async fn get_session(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Json<SessionStatusResponse>, UploadError> {
    let session = state.upload().session_status(&file_id).await?;
    Ok(Json(session.into()))
}

// ============================================================================
// Tests
// ============================================================================
