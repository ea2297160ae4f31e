//! # dukan-sync: Coordination Layer for Dukan
//!
//! Connects the local cache to the authoritative remote store: live readers
//! that follow connectivity, an offline write queue, and cart-driven stock
//! reservation.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Dukan Sync Architecture                          │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 SyncAgent (config + wiring)                      │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │CollectionReader│  │ OfflineWriter  │  │ StockService           │    │
//! │  │                │  │                │  │ CartSession            │    │
//! │  │ LOCAL mode:    │  │ cache first,   │  │                        │    │
//! │  │  cache+events  │  │ remote when    │  │ reserve on add,        │    │
//! │  │ CONNECTED mode:│  │ online, queue  │  │ restore on remove,     │    │
//! │  │  snapshots →   │  │ otherwise,     │  │ delete at zero stock,  │    │
//! │  │  reconcile     │  │ FIFO replay    │  │ recreate on restore    │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  ┌────────────────┐  ┌─────────────────────────────────────────────┐   │
//! │  │ Connectivity   │  │ RemoteStore (trait) / MemoryRemote          │   │
//! │  │ watch<bool>    │  │ query, get, add, update, delete, subscribe  │   │
//! │  └────────────────┘  └─────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`agent`] - `SyncAgent` facade
//! - [`config`] - Layered configuration (file, environment, defaults)
//! - [`connectivity`] - Online/offline state
//! - [`error`] - Sync and remote error types
//! - [`outbox`] - Offline write queue
//! - [`reader`] - Connectivity-gated live readers
//! - [`remote`] - Remote store contract and in-memory implementation
//! - [`stock`] - Reservation, restoration and cart sessions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dukan_core::{EntityKind, VariantSelector};
//! use dukan_sync::{DukanConfig, MemoryRemote, SyncAgent};
//!
//! let config = DukanConfig::load_or_default(None);
//! let agent = SyncAgent::open(config, Arc::new(MemoryRemote::new())).await?;
//!
//! let mut products = agent.subscribe(EntityKind::Products, "main").await?;
//! println!("{} products", products.current().records.len());
//!
//! let mut cart = agent.cart("main");
//! cart.add("srv-1", VariantSelector::from_parts(Some("red"), Some("M")), 2).await;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod outbox;
pub mod reader;
pub mod remote;
pub mod stock;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{SyncAgent, SyncStatus};
pub use config::{DeviceConfig, DukanConfig, ShopConfig, StorageSettings, SyncSettings};
pub use connectivity::Connectivity;
pub use error::{RemoteError, SyncError, SyncResult};
pub use outbox::{OfflineWriter, PendingOp, PendingWrite, ReplaySummary, WriteAck};
pub use reader::{CollectionReader, LiveQuery, LiveView, ReaderMode};
pub use remote::{MemoryRemote, QueryFilter, RemoteStore, RemoteSubscription};
pub use stock::{CartSession, ReserveOutcome, RestoreOutcome, StockService};
