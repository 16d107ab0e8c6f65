//! Error types for the Chunkvault server

use thiserror::Error;

use crate::config::ConfigError;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Startup and infrastructure errors
///
/// Request-level failures are reported through [`crate::upload::UploadError`].
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
