//! Upload session database operations

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::upload::{SessionStore, UploadError, UploadSession};

/// Stored session row
#[derive(Debug, Clone, sqlx::FromRow)]
struct SessionRow {
    file_id: String,
    extension: String,
    chunk_ids: String,
    needs: String,
    created_at: String,
    updated_at: String,
}

impl SessionRow {
    fn into_session(self) -> Result<UploadSession, UploadError> {
        Ok(UploadSession {
            chunk_ids: decode_list(&self.chunk_ids)?,
            needs: decode_list(&self.needs)?,
            created_at: decode_time(&self.created_at)?,
            updated_at: decode_time(&self.updated_at)?,
            file_id: self.file_id,
            extension: self.extension,
        })
    }
}

fn decode_list(raw: &str) -> Result<Vec<String>, UploadError> {
    serde_json::from_str(raw)
        .map_err(|e| UploadError::DatabaseError(format!("corrupt chunk list: {}", e)))
}

fn decode_time(raw: &str) -> Result<DateTime<Utc>, UploadError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| UploadError::DatabaseError(format!("corrupt timestamp: {}", e)))
}

fn encode_list(ids: &[String]) -> Result<String, UploadError> {
    serde_json::to_string(ids).map_err(|e| UploadError::InternalError(e.to_string()))
}

fn db_error(e: sqlx::Error) -> UploadError {
    UploadError::DatabaseError(e.to_string())
}

/// SQLite-backed session store
///
/// Sessions survive process restarts; every `put` is committed before it
/// returns.
#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get(&self, file_id: &str) -> Result<Option<UploadSession>, UploadError> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT file_id, extension, chunk_ids, needs, created_at, updated_at
            FROM upload_sessions
            WHERE file_id = ?
            "#,
        )
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(SessionRow::into_session).transpose()
    }

    async fn put(&self, session: &UploadSession) -> Result<(), UploadError> {
        sqlx::query(
            r#"
            INSERT INTO upload_sessions (file_id, extension, chunk_ids, needs, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(file_id) DO UPDATE SET
                extension = excluded.extension,
                chunk_ids = excluded.chunk_ids,
                needs = excluded.needs,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&session.file_id)
        .bind(&session.extension)
        .bind(encode_list(&session.chunk_ids)?)
        .bind(encode_list(&session.needs)?)
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn delete(&self, file_id: &str) -> Result<bool, UploadError> {
        let result = sqlx::query("DELETE FROM upload_sessions WHERE file_id = ?")
            .bind(file_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> Result<usize, UploadError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM upload_sessions")
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(count as usize)
    }
}

// ============================================================================
// Tests
// ============================================================================
