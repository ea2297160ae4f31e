//! # Sync Agent
//!
//! Wires configuration, storage, the cache, connectivity and the remote
//! store into one handle the presentation layer talks to.
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncAgent Architecture                           │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                         SyncAgent                                │  │
//! │  │                                                                  │  │
//! │  │  • subscribe(kind, shop)  → LiveQuery                            │  │
//! │  │  • writer() / stock() / cart(shop)                               │  │
//! │  │  • set_online(bool)       → replays the queue on reconnect       │  │
//! │  │  • status()               → { online, pending_writes }           │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │CollectionReader│  │ OfflineWriter  │  │    StockService        │    │
//! │  │                │  │                │  │                        │    │
//! │  │ live views per │  │ cache-first    │  │ reserve / restore      │    │
//! │  │ kind and shop  │  │ writes + queue │  │ through the writer     │    │
//! │  └───────┬────────┘  └───────┬────────┘  └───────────┬────────────┘    │
//! │          └───────────────────┼───────────────────────┘                 │
//! │                              ▼                                          │
//! │        CacheStore ── ChangeNotifier ── Connectivity ── RemoteStore     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use dukan_core::EntityKind;
use dukan_store::{
    CacheStore, ChangeEvent, ChangeNotifier, LocalStorage, SqliteStorage,
};
use tokio::sync::broadcast;
use tracing::info;

use crate::config::DukanConfig;
use crate::connectivity::Connectivity;
use crate::error::SyncResult;
use crate::outbox::{OfflineWriter, ReplaySummary};
use crate::reader::{CollectionReader, LiveQuery};
use crate::remote::RemoteStore;
use crate::stock::{CartSession, StockService};

// =============================================================================
// Sync Status
// =============================================================================

/// Current status for external queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    /// Whether the remote store is considered reachable.
    pub online: bool,

    /// Number of queued writes waiting for replay.
    pub pending_writes: usize,

    pub device_id: String,

    pub shop: String,
}

// =============================================================================
// Sync Agent
// =============================================================================

/// Entry point of the data layer.
pub struct SyncAgent {
    config: Arc<DukanConfig>,
    cache: Arc<CacheStore>,
    connectivity: Arc<Connectivity>,
    writer: Arc<OfflineWriter>,
    reader: CollectionReader,
    stock: Arc<StockService>,
}

impl SyncAgent {
    /// Builds an agent over existing storage and remote store.
    pub fn new(
        config: DukanConfig,
        storage: Arc<dyn LocalStorage>,
        remote: Arc<dyn RemoteStore>,
    ) -> Self {
        let notifier = ChangeNotifier::new(config.sync.event_capacity);
        let cache = Arc::new(CacheStore::new(storage, notifier.clone()));
        let connectivity = Arc::new(Connectivity::new(config.sync.start_online, notifier));

        let writer = Arc::new(OfflineWriter::new(
            cache.clone(),
            remote.clone(),
            connectivity.clone(),
        ));
        let reader = CollectionReader::new(cache.clone(), remote.clone(), connectivity.clone());
        let stock = Arc::new(StockService::new(
            writer.clone(),
            remote,
            connectivity.clone(),
        ));

        SyncAgent {
            config: Arc::new(config),
            cache,
            connectivity,
            writer,
            reader,
            stock,
        }
    }

    /// Validates the config, opens SQLite storage and builds the agent.
    pub async fn open(config: DukanConfig, remote: Arc<dyn RemoteStore>) -> SyncResult<Self> {
        config.validate()?;

        let storage = SqliteStorage::new(config.storage.storage_config()).await?;
        info!(
            device_id = %config.device_id(),
            shop = %config.shop_id(),
            online = config.sync.start_online,
            "Sync agent opened"
        );
        Ok(Self::new(config, Arc::new(storage), remote))
    }

    pub fn config(&self) -> &DukanConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Listens to every cache and connectivity event.
    pub fn events(&self) -> broadcast::Receiver<ChangeEvent> {
        self.cache.notifier().subscribe()
    }

    // =========================================================================
    // Components
    // =========================================================================

    /// Opens a live view of `kind` in `shop`.
    pub async fn subscribe(&self, kind: EntityKind, shop: &str) -> SyncResult<LiveQuery> {
        self.reader.subscribe(kind, shop).await
    }

    pub fn reader(&self) -> &CollectionReader {
        &self.reader
    }

    pub fn writer(&self) -> &Arc<OfflineWriter> {
        &self.writer
    }

    pub fn stock(&self) -> &Arc<StockService> {
        &self.stock
    }

    /// Starts a cart session for `shop`.
    pub fn cart(&self, shop: &str) -> CartSession {
        CartSession::new(shop, self.stock.clone())
    }

    // =========================================================================
    // Connectivity
    // =========================================================================

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Records a connectivity change.
    ///
    /// Going online replays the write queue when `replay_on_reconnect` is
    /// set; the replay summary is returned in that case.
    pub async fn set_online(&self, online: bool) -> SyncResult<Option<ReplaySummary>> {
        let changed = self.connectivity.set(online);
        if changed && online && self.config.sync.replay_on_reconnect {
            return Ok(Some(self.writer.replay().await?));
        }
        Ok(None)
    }

    /// Returns the current sync status.
    pub async fn status(&self) -> SyncResult<SyncStatus> {
        Ok(SyncStatus {
            online: self.is_online(),
            pending_writes: self.writer.pending_count().await?,
            device_id: self.config.device_id().to_string(),
            shop: self.config.shop_id().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::reader::ReaderMode;
    use crate::remote::MemoryRemote;
    use dukan_core::VariantSelector;
    use dukan_store::MemoryStorage;
    use serde_json::{json, Map, Value};

    fn offline_config() -> DukanConfig {
        let mut config = DukanConfig::default();
        config.device.id = "register-1".to_string();
        config.sync.start_online = false;
        config
    }

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[tokio::test]
    async fn test_reconnect_replays_queue() {
        let remote = Arc::new(MemoryRemote::new());
        let agent = SyncAgent::new(offline_config(), Arc::new(MemoryStorage::new()), remote.clone());

        agent
            .writer()
            .add(EntityKind::Expenses, "main", fields(json!({"amount": 12, "date": "2024-05-01"})))
            .await
            .unwrap();

        let status = agent.status().await.unwrap();
        assert!(!status.online);
        assert_eq!(status.pending_writes, 1);
        assert_eq!(status.device_id, "register-1");

        let summary = agent.set_online(true).await.unwrap().unwrap();
        assert_eq!(summary.replayed, 1);
        assert_eq!(agent.status().await.unwrap().pending_writes, 0);
        assert_eq!(remote.records(EntityKind::Expenses).len(), 1);

        assert!(agent.set_online(true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replay_can_be_disabled() {
        let mut config = offline_config();
        config.sync.replay_on_reconnect = false;
        let agent = SyncAgent::new(config, Arc::new(MemoryStorage::new()), Arc::new(MemoryRemote::new()));

        agent
            .writer()
            .add(EntityKind::Employees, "main", fields(json!({"name": "a"})))
            .await
            .unwrap();
        assert!(agent.set_online(true).await.unwrap().is_none());
        assert_eq!(agent.status().await.unwrap().pending_writes, 1);
    }

    #[tokio::test]
    async fn test_connectivity_events_are_published() {
        let agent = SyncAgent::new(
            offline_config(),
            Arc::new(MemoryStorage::new()),
            Arc::new(MemoryRemote::new()),
        );
        let mut events = agent.events();

        agent.set_online(true).await.unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!(event.event_name(), "online");
    }

    #[tokio::test]
    async fn test_offline_sale_flow() {
        let agent = SyncAgent::new(
            offline_config(),
            Arc::new(MemoryStorage::new()),
            Arc::new(MemoryRemote::new()),
        );
        let ack = agent
            .writer()
            .add(
                EntityKind::Products,
                "main",
                fields(json!({"code": "A1", "type": "product", "quantity": 4})),
            )
            .await
            .unwrap();

        let mut products = agent.subscribe(EntityKind::Products, "main").await.unwrap();
        assert_eq!(products.current().mode, ReaderMode::Local);
        assert_eq!(products.current().records.len(), 1);

        let mut cart = agent.cart("main");
        assert!(cart.add(&ack.id, VariantSelector::Whole, 4).await.is_reserved());

        let view = products.wait_for(|v| v.records.is_empty()).await.unwrap();
        assert!(view.records.is_empty());
        assert_eq!(agent.status().await.unwrap().pending_writes, 0);
    }

    #[tokio::test]
    async fn test_reservations_across_failed_replay_stay_ordered() {
        let mut config = offline_config();
        config.sync.start_online = true;
        let remote = Arc::new(MemoryRemote::new());
        let agent = SyncAgent::new(config, Arc::new(MemoryStorage::new()), remote.clone());

        let ack = agent
            .writer()
            .add(
                EntityKind::Products,
                "main",
                fields(json!({"code": "A1", "type": "product", "quantity": 6})),
            )
            .await
            .unwrap();
        assert!(ack.confirmed);

        agent.set_online(false).await.unwrap();
        assert!(agent.stock().reserve("main", &ack.id, &VariantSelector::Whole, 1).await.is_reserved());

        remote.inject_error(RemoteError::Unavailable("timeout".into()));
        let summary = agent.set_online(true).await.unwrap().unwrap();
        assert_eq!(summary.remaining, 1);

        assert!(agent.stock().reserve("main", &ack.id, &VariantSelector::Whole, 1).await.is_reserved());
        let summary = agent.writer().replay().await.unwrap();
        assert_eq!(summary.remaining, 0);

        let remote_quantity = remote.records(EntityKind::Products)[0].get("quantity").cloned();
        let local = agent
            .cache()
            .find(EntityKind::Products, "main", &ack.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(remote_quantity, Some(json!(4)));
        assert_eq!(local.record.get("quantity").cloned(), Some(json!(4)));
    }

    #[tokio::test]
    async fn test_open_with_in_memory_sqlite() {
        let mut config = offline_config();
        config.storage.path = ":memory:".into();
        let agent = SyncAgent::open(config, Arc::new(MemoryRemote::new())).await.unwrap();

        agent
            .writer()
            .add(EntityKind::Invoices, "main", fields(json!({"invoiceNumber": 1})))
            .await
            .unwrap();
        let cached = agent
            .cache()
            .records_for_shop(EntityKind::Invoices, "main")
            .await
            .unwrap();
        assert_eq!(cached.len(), 1);
    }
}
