//! Application state management

use std::sync::Arc;

use crate::config::{Config, SessionBackend};
use crate::db::{self, SqliteSessionStore};
use crate::error::Result;
use crate::upload::{ArtifactStore, ChunkStore, SessionManager, UploadService};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    upload: UploadService,
}

impl AppState {
    /// Create a new application state from prebuilt parts
    pub fn new(config: Config, upload: UploadService) -> Self {
        Self {
            inner: Arc::new(AppStateInner { config, upload }),
        }
    }

    /// Wire the upload engine described by `config`
    ///
    /// Creates the data directory, opens the session database when the
    /// SQLite backend is selected, and roots chunk and artifact storage under
    /// `storage.data_dir`.
    pub async fn build(config: Config) -> Result<Self> {
        tokio::fs::create_dir_all(&config.storage.data_dir).await?;

        let sessions = match config.database.backend {
            SessionBackend::Sqlite => {
                let pool = db::create_pool(&config.database.url).await?;
                tracing::info!("Session database initialized at {}", config.database.url);
                SessionManager::new(Arc::new(SqliteSessionStore::new(pool)))
            }
            SessionBackend::Memory => {
                tracing::warn!("Using in-memory session store, sessions will not survive restarts");
                SessionManager::in_memory()
            }
        };

        let data_dir = config.storage.data_dir.clone();
        let upload = UploadService::new(
            sessions,
            ChunkStore::with_local_storage(data_dir.clone()),
            ArtifactStore::with_local_storage(data_dir),
            config.server.public_url.clone(),
        );

        Ok(Self::new(config, upload))
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the upload engine
    pub fn upload(&self) -> &UploadService {
        &self.inner.upload
    }
}
