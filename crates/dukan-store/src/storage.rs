//! # Durable Local Storage
//!
//! The key/value blob seam the cache and the offline queue persist through.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     LocalStorage implementations                        │
//! │                                                                         │
//! │   CacheStore ─┐                                                         │
//! │               ├──► dyn LocalStorage ──┬──► SqliteStorage (pool.rs)      │
//! │   OfflineWriter┘                      └──► MemoryStorage (tests)        │
//! │                                                                         │
//! │   Every value is a whole JSON document stored under one key.           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};

/// Whole-blob key/value storage.
#[async_trait]
pub trait LocalStorage: Send + Sync {
    /// Reads the blob stored under `key`.
    async fn load(&self, key: &str) -> StoreResult<Option<String>>;

    /// Replaces the blob stored under `key`.
    async fn save(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Deletes `key`. Missing keys are not an error.
    async fn remove(&self, key: &str) -> StoreResult<()>;

    /// Lists every stored key in ascending order.
    async fn keys(&self) -> StoreResult<Vec<String>>;
}

// =============================================================================
// Memory Storage
// =============================================================================

/// In-process storage for tests and ephemeral sessions.
///
/// `fail_writes(true)` makes every save and remove fail, standing in for a
/// full disk or an exceeded quota.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    blobs: Mutex<BTreeMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggles write failure injection.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::QueryFailed("storage quota exceeded".to_string()));
        }
        Ok(())
    }

    fn blobs(&self) -> StoreResult<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.blobs
            .lock()
            .map_err(|_| StoreError::Internal("memory storage lock poisoned".to_string()))
    }
}

#[async_trait]
impl LocalStorage for MemoryStorage {
    async fn load(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.blobs()?.get(key).cloned())
    }

    async fn save(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check_writable()?;
        self.blobs()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        self.check_writable()?;
        self.blobs()?.remove(key);
        Ok(())
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        Ok(self.blobs()?.keys().cloned().collect())
    }
}
