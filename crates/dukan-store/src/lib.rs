//! # dukan-store: Local Storage Layer for Dukan
//!
//! Durable local storage, the per-kind local cache and the change notifier.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Dukan Data Flow                                  │
//! │                                                                         │
//! │  dukan-sync (readers, offline writer, stock service)                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    dukan-store (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │  CacheStore   │    │ChangeNotifier │    │ LocalStorage │  │   │
//! │  │   │  (cache.rs)   │───►│ (notify.rs)   │    │ (storage.rs) │  │   │
//! │  │   │               │    │               │    │              │  │   │
//! │  │   │ per-kind lock │    │ broadcast     │    │ SqliteStorage│  │   │
//! │  │   │ reconcile     │───────────────────────► │ MemoryStorage│  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │          SQLite: local_storage(key, value, updated_at)          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - SQLite pool configuration and [`SqliteStorage`]
//! - [`migrations`] - Embedded database migrations
//! - [`storage`] - The [`LocalStorage`] seam and [`MemoryStorage`]
//! - [`cache`] - The per-kind local cache
//! - [`notify`] - Typed change events
//! - [`error`] - Storage error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dukan_store::{CacheStore, ChangeNotifier, SqliteStorage, StorageConfig};
//!
//! let storage = SqliteStorage::new(StorageConfig::new("dukan.db")).await?;
//! let cache = CacheStore::new(Arc::new(storage), ChangeNotifier::default());
//! let products = cache.records_for_shop(EntityKind::Products, "main").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cache;
pub mod error;
pub mod migrations;
pub mod notify;
pub mod pool;
pub mod storage;

// =============================================================================
// Re-exports
// =============================================================================

pub use cache::CacheStore;
pub use error::{StoreError, StoreResult};
pub use notify::{CacheChange, ChangeEvent, ChangeKind, ChangeNotifier, DEFAULT_EVENT_CAPACITY};
pub use pool::{SqliteStorage, StorageConfig};
pub use storage::{LocalStorage, MemoryStorage};
