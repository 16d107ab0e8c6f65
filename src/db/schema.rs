//! Database schema initialization

use sqlx::SqlitePool;

use crate::error::Result;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA_SQL)
        .execute(pool)
        .await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Upload sessions table (for resumable uploads)
-- chunk_ids and needs are JSON arrays in plan order
CREATE TABLE IF NOT EXISTS upload_sessions (
    file_id TEXT PRIMARY KEY,
    extension TEXT NOT NULL,
    chunk_ids TEXT NOT NULL,
    needs TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_upload_sessions_updated ON upload_sessions(updated_at);
"#;
