//! Upload types for the chunked upload protocol

use axum::body::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Default chunk size: 2MB
pub const DEFAULT_CHUNK_SIZE: usize = 2 * 1024 * 1024;

/// Length of a hex-encoded SHA-256 digest
pub const DIGEST_HEX_LEN: usize = 64;

/// Maximum length of a file or chunk id
pub const MAX_KEY_LEN: usize = 128;

/// Maximum length of a normalized extension (including the leading dot)
pub const MAX_EXTENSION_LEN: usize = 32;

// ============================================================================
// Handshake Types
// ============================================================================

/// Request to initiate or resume a chunked upload
///
/// Every field is optional on the wire so that absent fields surface as
/// protocol errors instead of extractor rejections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeRequest {
    /// Fingerprint of the whole file
    pub file_id: Option<String>,

    /// File extension, with or without the leading dot
    #[serde(alias = "ext")]
    pub extension: Option<String>,

    /// Chunk ids in plan order
    pub chunk_ids: Option<Vec<String>>,
}

/// Outcome of a handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandshakeStatus {
    /// The artifact already exists; nothing to transfer
    Complete,
    /// An existing session was found
    Resume,
    /// A new session was created
    Start,
}

/// Response to handshake request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeResponse {
    pub status: HandshakeStatus,

    /// Download locator, present when `status` is `complete`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,

    /// Chunk ids the server still needs, in plan order
    pub needs: Vec<String>,
}

impl HandshakeResponse {
    pub fn complete(locator: String) -> Self {
        Self {
            status: HandshakeStatus::Complete,
            locator: Some(locator),
            needs: Vec::new(),
        }
    }

    pub fn resume(needs: Vec<String>) -> Self {
        Self {
            status: HandshakeStatus::Resume,
            locator: None,
            needs,
        }
    }

    pub fn start(needs: Vec<String>) -> Self {
        Self {
            status: HandshakeStatus::Start,
            locator: None,
            needs,
        }
    }
}

// ============================================================================
// Chunk Upload Types
// ============================================================================

/// Identifies the chunk carried by a request body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkQuery {
    pub file_id: Option<String>,
    pub chunk_id: Option<String>,
}

/// One chunk as received by the ingestion endpoint
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub file_id: Option<String>,
    pub chunk_id: Option<String>,
    pub data: Bytes,
}

/// Response after uploading a chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadResponse {
    /// Chunk ids still missing; empty once the artifact is assembled
    pub needs: Vec<String>,

    /// Download locator, present once the artifact is assembled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
}

// ============================================================================
// Identity Types
// ============================================================================

/// Primary identity of an upload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileIdentity {
    pub file_id: String,

    /// Normalized extension: empty, or a leading dot followed by the suffix
    pub extension: String,
}

impl FileIdentity {
    /// Key under which the final artifact is stored
    pub fn artifact_name(&self) -> String {
        format!("{}{}", self.file_id, self.extension)
    }
}

/// A chunk id in fingerprint form: hex SHA-256 of the chunk followed by its index
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkId {
    pub digest: String,
    pub index: usize,
}

impl ChunkId {
    pub fn new(digest: impl Into<String>, index: usize) -> Self {
        Self {
            digest: digest.into(),
            index,
        }
    }

    /// Parse an id produced by the fingerprint engine.
    ///
    /// Returns `None` for ids in any other shape; those are accepted by the
    /// server as opaque keys but cannot be verified against their bytes.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.len() <= DIGEST_HEX_LEN || !raw.is_ascii() {
            return None;
        }
        let (digest, index) = raw.split_at(DIGEST_HEX_LEN);
        if !is_sha256_hex(digest) || !index.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let index = index.parse().ok()?;
        Some(Self::new(digest, index))
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.digest, self.index)
    }
}

/// Whether `value` looks like a lowercase hex SHA-256 digest
pub fn is_sha256_hex(value: &str) -> bool {
    value.len() == DIGEST_HEX_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

// ============================================================================
// Session Types
// ============================================================================

/// Upload session state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub file_id: String,

    /// Normalized extension the artifact will be published under
    pub extension: String,

    /// Planned chunk ids, in assembly order
    pub chunk_ids: Vec<String>,

    /// Chunk ids not yet persisted, kept in plan order
    pub needs: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadSession {
    /// Create a new upload session that needs every planned chunk
    pub fn new(identity: FileIdentity, chunk_ids: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            file_id: identity.file_id,
            extension: identity.extension,
            needs: chunk_ids.clone(),
            chunk_ids,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn identity(&self) -> FileIdentity {
        FileIdentity {
            file_id: self.file_id.clone(),
            extension: self.extension.clone(),
        }
    }

    /// Whether `chunk_id` belongs to this upload's plan
    pub fn contains_chunk(&self, chunk_id: &str) -> bool {
        self.chunk_ids.iter().any(|id| id == chunk_id)
    }

    /// Whether `chunk_id` is still missing
    pub fn is_needed(&self, chunk_id: &str) -> bool {
        self.needs.iter().any(|id| id == chunk_id)
    }

    /// Check if all chunks have been received
    pub fn is_complete(&self) -> bool {
        self.needs.is_empty()
    }

    /// Remove a chunk from `needs`. Returns false if it was not needed.
    pub fn mark_chunk_received(&mut self, chunk_id: &str) -> bool {
        let before = self.needs.len();
        self.needs.retain(|id| id != chunk_id);
        if self.needs.len() == before {
            return false;
        }
        self.updated_at = Utc::now();
        true
    }

    /// Whether `chunk_ids` describes the same plan this session was created with
    pub fn same_plan(&self, chunk_ids: &[String]) -> bool {
        self.chunk_ids == chunk_ids
    }

    /// Calculate progress percentage
    pub fn progress(&self) -> f64 {
        if self.chunk_ids.is_empty() {
            return 100.0;
        }
        let received = self.chunk_ids.len() - self.needs.len();
        (received as f64 / self.chunk_ids.len() as f64) * 100.0
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Duplicate chunk id in plan: {0}")]
    DuplicateChunkId(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Chunk {chunk_id} is not part of upload {file_id}")]
    UnknownChunk { file_id: String, chunk_id: String },

    #[error("Chunk hash mismatch: expected {expected}, got {actual}")]
    ChunkHashMismatch { expected: String, actual: String },

    #[error("File hash mismatch: expected {expected}, got {actual}")]
    FileHashMismatch { expected: String, actual: String },

    #[error("Missing chunks: {0:?}")]
    MissingChunks(Vec<String>),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl UploadError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::MissingField(_) => StatusCode::BAD_REQUEST,
            Self::InvalidField { .. } => StatusCode::BAD_REQUEST,
            Self::DuplicateChunkId(_) => StatusCode::BAD_REQUEST,
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::UnknownChunk { .. } => StatusCode::BAD_REQUEST,
            Self::ChunkHashMismatch { .. } => StatusCode::CONFLICT,
            Self::FileHashMismatch { .. } => StatusCode::CONFLICT,
            Self::MissingChunks(_) => StatusCode::CONFLICT,
            Self::ArtifactNotFound(_) => StatusCode::NOT_FOUND,
            Self::StorageError(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::DatabaseError(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "MISSING_FIELD",
            Self::InvalidField { .. } => "INVALID_FIELD",
            Self::DuplicateChunkId(_) => "DUPLICATE_CHUNK_ID",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::UnknownChunk { .. } => "UNKNOWN_CHUNK",
            Self::ChunkHashMismatch { .. } => "CHUNK_HASH_MISMATCH",
            Self::FileHashMismatch { .. } => "FILE_HASH_MISMATCH",
            Self::MissingChunks(_) => "MISSING_CHUNKS",
            Self::ArtifactNotFound(_) => "ARTIFACT_NOT_FOUND",
            Self::StorageError(_) => "STORAGE_ERROR",
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Unwrap a required request field
pub fn require<T>(value: Option<T>, field: &'static str) -> Result<T, UploadError> {
    value.ok_or(UploadError::MissingField(field))
}

/// Validate a value used as a storage key (file ids and chunk ids)
pub fn validate_key(field: &'static str, value: &str) -> Result<(), UploadError> {
    if value.is_empty() {
        return Err(UploadError::MissingField(field));
    }
    if value.len() > MAX_KEY_LEN {
        return Err(UploadError::InvalidField {
            field,
            reason: format!("longer than {} characters", MAX_KEY_LEN),
        });
    }
    if !value
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err(UploadError::InvalidField {
            field,
            reason: "only ASCII letters, digits, '-' and '_' are allowed".to_string(),
        });
    }
    Ok(())
}

/// Normalize an extension to `""` or `".suffix"`
pub fn normalize_extension(raw: &str) -> Result<String, UploadError> {
    let trimmed = raw.trim();
    let suffix = trimmed.strip_prefix('.').unwrap_or(trimmed);
    if suffix.is_empty() {
        return Ok(String::new());
    }

    let invalid = |reason: &str| UploadError::InvalidField {
        field: "extension",
        reason: reason.to_string(),
    };

    if suffix.len() + 1 > MAX_EXTENSION_LEN {
        return Err(invalid("too long"));
    }
    if suffix.starts_with('.') || suffix.ends_with('.') || suffix.contains("..") {
        return Err(invalid("misplaced '.'"));
    }
    if !suffix
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_'))
    {
        return Err(invalid("only ASCII letters, digits, '.', '-' and '_' are allowed"));
    }

    Ok(format!(".{}", suffix))
}

/// Split an artifact name back into its identity
pub fn parse_artifact_name(name: &str) -> Result<FileIdentity, UploadError> {
    let (file_id, extension) = match name.find('.') {
        Some(pos) => name.split_at(pos),
        None => (name, ""),
    };
    validate_key("fileId", file_id)?;
    let normalized = normalize_extension(extension)?;
    if normalized != extension {
        return Err(UploadError::InvalidField {
            field: "extension",
            reason: format!("not normalized: {}", extension),
        });
    }
    Ok(FileIdentity {
        file_id: file_id.to_string(),
        extension: normalized,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> FileIdentity {
        FileIdentity {
            file_id: "f1".to_string(),
            extension: ".bin".to_string(),
        }
    }

    #[test]
    fn test_session_needs_shrink() {
        let ids: Vec<String> = ["c1", "c2", "c3"].iter().map(|s| s.to_string()).collect();
        let mut session = UploadSession::new(identity(), ids);

        assert_eq!(session.needs, session.chunk_ids);
        assert!(session.mark_chunk_received("c2"));
        assert!(!session.mark_chunk_received("c2"));
        assert_eq!(session.needs, vec!["c1".to_string(), "c3".to_string()]);
        assert!(session.contains_chunk("c2"));
        assert!(!session.is_needed("c2"));
        assert!(!session.contains_chunk("c9"));

        session.mark_chunk_received("c1");
        session.mark_chunk_received("c3");
        assert!(session.is_complete());
        assert!((session.progress() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_chunk_id_parse() {
        let digest = "a".repeat(64);
        let parsed = ChunkId::parse(&format!("{}12", digest)).unwrap();
        assert_eq!(parsed.digest, digest);
        assert_eq!(parsed.index, 12);
        assert_eq!(parsed.to_string(), format!("{}12", digest));

        assert!(ChunkId::parse(&digest).is_none());
        assert!(ChunkId::parse("c1").is_none());
        assert!(ChunkId::parse(&format!("{}+1", digest)).is_none());
        assert!(ChunkId::parse(&format!("{}1", "A".repeat(64))).is_none());
    }

    #[test]
    fn test_normalize_extension() {
        assert_eq!(normalize_extension("mp4").unwrap(), ".mp4");
        assert_eq!(normalize_extension(".mp4").unwrap(), ".mp4");
        assert_eq!(normalize_extension("tar.gz").unwrap(), ".tar.gz");
        assert_eq!(normalize_extension("").unwrap(), "");
        assert!(normalize_extension("../etc").is_err());
        assert!(normalize_extension("a/b").is_err());
        assert!(normalize_extension("x..y").is_err());
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("fileId", "abc-123_X").is_ok());
        assert!(matches!(
            validate_key("fileId", ""),
            Err(UploadError::MissingField("fileId"))
        ));
        assert!(validate_key("fileId", "../x").is_err());
        assert!(validate_key("fileId", &"a".repeat(MAX_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn test_parse_artifact_name() {
        let identity = parse_artifact_name("abc.tar.gz").unwrap();
        assert_eq!(identity.file_id, "abc");
        assert_eq!(identity.extension, ".tar.gz");
        assert_eq!(identity.artifact_name(), "abc.tar.gz");

        assert_eq!(parse_artifact_name("abc").unwrap().extension, "");
        assert!(parse_artifact_name("abc.").is_err());
        assert!(parse_artifact_name(".bin").is_err());
    }

    #[test]
    fn test_handshake_response_wire_format() {
        let json = serde_json::to_value(HandshakeResponse::start(vec!["c1".into()])).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "start", "needs": ["c1"] }));

        let request: HandshakeRequest =
            serde_json::from_str(r#"{"fileId":"f","ext":"png","chunkIds":["a"]}"#).unwrap();
        assert_eq!(request.extension.as_deref(), Some("png"));
    }
}
