//! Per-key async locks
//!
//! Serializes read-modify-write cycles on one upload session while letting
//! different sessions proceed in parallel. Entries are created on demand and
//! removed once nobody holds or waits for them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Registry = Arc<Mutex<HashMap<String, Entry>>>;

struct Entry {
    mutex: Arc<AsyncMutex<()>>,
    /// Holders plus waiters, including waiters whose future is still pending
    users: usize,
}

/// Registry of async mutexes keyed by file id
#[derive(Clone, Default)]
pub struct KeyedLocks {
    registry: Registry,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting for the current holder if any.
    ///
    /// Dropping the returned future before it resolves gives up the place in
    /// line and releases the registry entry like a dropped guard would.
    pub async fn lock(&self, key: &str) -> KeyGuard {
        let (registration, mutex) = {
            let mut registry = self.registry.lock();
            let entry = registry.entry(key.to_string()).or_insert_with(|| Entry {
                mutex: Arc::default(),
                users: 0,
            });
            entry.users += 1;
            let registration = Registration {
                key: key.to_string(),
                registry: self.registry.clone(),
            };
            (registration, entry.mutex.clone())
        };

        let guard = mutex.lock_owned().await;

        KeyGuard {
            _guard: guard,
            registration,
        }
    }

    /// Number of keys currently held or waited on
    pub fn active_keys(&self) -> usize {
        self.registry.lock().len()
    }
}

/// One user's claim on a registry entry; the last one out removes it
struct Registration {
    key: String,
    registry: Registry,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut registry = self.registry.lock();
        if let Some(entry) = registry.get_mut(&self.key) {
            entry.users -= 1;
            if entry.users == 0 {
                registry.remove(&self.key);
            }
        }
    }
}

/// Held lock for one key; released on drop
pub struct KeyGuard {
    // Fields drop in order: unlock first, then leave the registry
    _guard: OwnedMutexGuard<()>,
    registration: Registration,
}

impl KeyGuard {
    pub fn key(&self) -> &str {
        &self.registration.key
    }
}

// ============================================================================
// Tests
// ============================================================================
