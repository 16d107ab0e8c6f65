//! Upload Session Manager
//!
//! Manages upload sessions with:
//! - A pluggable, durable session store (SQLite or in-memory)
//! - Per-file-id serialization of read-modify-write cycles

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::locks::{KeyGuard, KeyedLocks};
use super::types::{FileIdentity, UploadError, UploadSession};

// ============================================================================
// Session Store Trait
// ============================================================================

/// Keyed record store for upload sessions.
///
/// `put` is a full overwrite and must be durable once it returns. There are no
/// partial updates; callers read, modify and write whole records while holding
/// the session lock from [`SessionManager::lock`].
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, file_id: &str) -> Result<Option<UploadSession>, UploadError>;

    async fn put(&self, session: &UploadSession) -> Result<(), UploadError>;

    /// Returns whether a record was removed
    async fn delete(&self, file_id: &str) -> Result<bool, UploadError>;

    async fn count(&self) -> Result<usize, UploadError>;
}

/// In-memory session store for tests and ephemeral deployments
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, UploadSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, file_id: &str) -> Result<Option<UploadSession>, UploadError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(file_id).cloned())
    }

    async fn put(&self, session: &UploadSession) -> Result<(), UploadError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.file_id.clone(), session.clone());
        Ok(())
    }

    async fn delete(&self, file_id: &str) -> Result<bool, UploadError> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.remove(file_id).is_some())
    }

    async fn count(&self) -> Result<usize, UploadError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.len())
    }
}

// ============================================================================
// Session Manager
// ============================================================================

/// Manages upload sessions
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionManagerInner>,
}

struct SessionManagerInner {
    store: Arc<dyn SessionStore>,
    locks: KeyedLocks,
}

impl SessionManager {
    /// Create a session manager over the given store
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            inner: Arc::new(SessionManagerInner {
                store,
                locks: KeyedLocks::new(),
            }),
        }
    }

    /// Create a session manager backed by memory
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySessionStore::new()))
    }

    /// Serialize access to one file id's session.
    ///
    /// Every `get` → mutate → `save` cycle must run while the returned guard is
    /// alive; different file ids never contend.
    pub async fn lock(&self, file_id: &str) -> KeyGuard {
        self.inner.locks.lock(file_id).await
    }

    // ========================================================================
    // Session Lifecycle
    // ========================================================================

    /// Create and persist a new upload session
    pub async fn create_session(
        &self,
        identity: FileIdentity,
        chunk_ids: Vec<String>,
    ) -> Result<UploadSession, UploadError> {
        let session = UploadSession::new(identity, chunk_ids);
        self.inner.store.put(&session).await?;

        tracing::info!(
            file_id = %session.file_id,
            extension = %session.extension,
            chunks = session.chunk_ids.len(),
            "Created upload session"
        );

        Ok(session)
    }

    /// Get a session by file id
    pub async fn get_session(&self, file_id: &str) -> Result<Option<UploadSession>, UploadError> {
        self.inner.store.get(file_id).await
    }

    /// Persist a modified session
    pub async fn save_session(&self, session: &UploadSession) -> Result<(), UploadError> {
        self.inner.store.put(session).await
    }

    /// Remove a session (after assembly)
    pub async fn remove_session(&self, file_id: &str) -> Result<bool, UploadError> {
        let removed = self.inner.store.delete(file_id).await?;
        if removed {
            tracing::info!(file_id = %file_id, "Upload session removed");
        }
        Ok(removed)
    }

    /// Get session count
    pub async fn session_count(&self) -> Result<usize, UploadError> {
        self.inner.store.count().await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> FileIdentity {
        FileIdentity {
            file_id: "abc123".to_string(),
            extension: ".epub".to_string(),
        }
    }

    fn chunk_ids() -> Vec<String> {
        vec!["chunk0".to_string(), "chunk1".to_string()]
    }

    #[tokio::test]
    async fn test_create_session() {
        let manager = SessionManager::in_memory();

        let session = manager.create_session(identity(), chunk_ids()).await.unwrap();

        assert_eq!(session.file_id, "abc123");
        assert_eq!(session.needs, chunk_ids());
        assert_eq!(manager.session_count().await.unwrap(), 1);
        assert_eq!(manager.get_session("abc123").await.unwrap(), Some(session));
    }

    #[tokio::test]
    async fn test_save_overwrites_whole_record() {
        let manager = SessionManager::in_memory();
        let mut session = manager.create_session(identity(), chunk_ids()).await.unwrap();

        session.mark_chunk_received("chunk0");
        manager.save_session(&session).await.unwrap();

        let stored = manager.get_session("abc123").await.unwrap().unwrap();
        assert_eq!(stored.needs, vec!["chunk1".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_session() {
        let manager = SessionManager::in_memory();
        manager.create_session(identity(), chunk_ids()).await.unwrap();

        assert!(manager.remove_session("abc123").await.unwrap());
        assert!(!manager.remove_session("abc123").await.unwrap());
        assert!(manager.get_session("abc123").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_locked_updates_do_not_lose_progress() {
        let manager = SessionManager::in_memory();
        let ids: Vec<String> = (0..32).map(|i| format!("c{}", i)).collect();
        manager.create_session(identity(), ids.clone()).await.unwrap();

        let mut handles = Vec::new();
        for id in ids {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                let _guard = manager.lock("abc123").await;
                let mut session = manager.get_session("abc123").await.unwrap().unwrap();
                tokio::task::yield_now().await;
                session.mark_chunk_received(&id);
                manager.save_session(&session).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let session = manager.get_session("abc123").await.unwrap().unwrap();
        assert!(session.is_complete());
    }
}
