//! # Connectivity-Gated Reader
//!
//! Live, shop-scoped result sets per entity kind. The mode is chosen once,
//! when the subscription opens.
//!
//! ## Reader Modes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     CollectionReader::subscribe                         │
//! │                                                                         │
//! │   online? ──no──► LOCAL MODE                                           │
//! │      │            ┌─────────────────────────────────────────────────┐   │
//! │      │            │ read cache(kind, shop) ──► emit                 │   │
//! │      │            │ every cache change for (kind, shop) ──► re-read │   │
//! │      │            │ no remote calls                                 │   │
//! │      │            └─────────────────────────────────────────────────┘   │
//! │     yes                                                                 │
//! │      ▼                                                                  │
//! │   CONNECTED MODE                                                        │
//! │   ┌─────────────────────────────────────────────────────────────────┐   │
//! │   │ emit cache, stale ──► remote snapshot ──► reconcile + persist   │   │
//! │   │                                       ──► emit snapshot         │   │
//! │   │ Added/Updated   ──► emit snapshot overlaid with pending writes  │   │
//! │   │ Deleted         ──► hide the key until a snapshot drops it      │   │
//! │   │ remote error    ──► surface error, fall back to LOCAL MODE      │   │
//! │   └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │   Every emitted set passes through apply_entity_rules(kind, ..)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each subscription runs as one spawned task selecting over the remote
//! stream, the change notifier and its shutdown signal. Consumers read the
//! latest [`LiveView`] from a `watch` channel.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use dukan_core::identity::candidate_keys;
use dukan_core::ordering::apply_entity_rules;
use dukan_core::reconcile::overlay_pending;
use dukan_core::validation::validate_shop;
use dukan_core::{EntityKind, Record};
use dukan_store::{CacheChange, CacheStore, ChangeKind};
use tokio::sync::{broadcast, oneshot, watch};
use tracing::{debug, info, warn};

use crate::connectivity::Connectivity;
use crate::error::{RemoteError, SyncError, SyncResult};
use crate::remote::{QueryFilter, RemoteStore, RemoteSubscription, Snapshot};

// =============================================================================
// View Types
// =============================================================================

/// Where a reader's records come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderMode {
    /// Local cache only, refreshed on local change events.
    Local,
    /// Remote subscription, reconciled into the local cache.
    Connected,
}

/// The current result set of a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveView {
    pub records: Vec<Record>,
    pub mode: ReaderMode,
    /// Last remote failure, kept for display after falling back.
    pub error: Option<RemoteError>,
    /// True while a connected reader still shows cached data.
    pub stale: bool,
}

// =============================================================================
// Collection Reader
// =============================================================================

/// Opens live subscriptions.
#[derive(Clone)]
pub struct CollectionReader {
    cache: Arc<CacheStore>,
    remote: Arc<dyn RemoteStore>,
    connectivity: Arc<Connectivity>,
}

impl CollectionReader {
    pub fn new(
        cache: Arc<CacheStore>,
        remote: Arc<dyn RemoteStore>,
        connectivity: Arc<Connectivity>,
    ) -> Self {
        CollectionReader {
            cache,
            remote,
            connectivity,
        }
    }

    /// Subscribes to `kind` in `shop`.
    ///
    /// The returned query already holds a value: the local cache, marked
    /// stale when a remote snapshot is on its way.
    pub async fn subscribe(&self, kind: EntityKind, shop: &str) -> SyncResult<LiveQuery> {
        validate_shop(shop)?;

        // Listen before the first read so no change slips between the two.
        let events = self.cache.notifier().subscribe();
        let local = apply_entity_rules(kind, self.cache.records_for_shop(kind, shop).await?);

        let (remote, error) = if self.connectivity.is_online() {
            match self
                .remote
                .subscribe(kind, QueryFilter::for_kind(kind, shop))
                .await
            {
                Ok(subscription) => (Some(subscription), None),
                Err(err) => {
                    warn!(kind = %kind, shop = %shop, error = %err, "Remote subscription failed; serving local cache");
                    (None, Some(err))
                }
            }
        } else {
            (None, None)
        };

        let mode = if remote.is_some() {
            ReaderMode::Connected
        } else {
            ReaderMode::Local
        };
        let initial = LiveView {
            records: local,
            mode,
            error: error.clone(),
            stale: mode == ReaderMode::Connected,
        };

        let (view_tx, view_rx) = watch::channel(initial);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = ReaderTask {
            kind,
            shop: shop.to_string(),
            cache: self.cache.clone(),
            events,
            remote,
            view: view_tx,
            mode,
            last_snapshot: None,
            hidden: HashSet::new(),
            error,
        };
        tokio::spawn(task.run(shutdown_rx));

        info!(kind = %kind, shop = %shop, mode = ?mode, "Subscription opened");
        Ok(LiveQuery {
            kind,
            shop: shop.to_string(),
            view: view_rx,
            shutdown: Some(shutdown_tx),
        })
    }
}

// =============================================================================
// Live Query Handle
// =============================================================================

/// Handle to one subscription. Dropping it tears the subscription down.
pub struct LiveQuery {
    kind: EntityKind,
    shop: String,
    view: watch::Receiver<LiveView>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl LiveQuery {
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn shop(&self) -> &str {
        &self.shop
    }

    /// The latest view.
    pub fn current(&self) -> LiveView {
        self.view.borrow().clone()
    }

    /// Another receiver of the same view.
    pub fn watch(&self) -> watch::Receiver<LiveView> {
        self.view.clone()
    }

    /// Waits for the next view.
    ///
    /// ## Errors
    /// `ShuttingDown` once the subscription has ended.
    pub async fn changed(&mut self) -> SyncResult<LiveView> {
        self.view
            .changed()
            .await
            .map_err(|_| SyncError::ShuttingDown)?;
        Ok(self.view.borrow_and_update().clone())
    }

    /// Waits until the view satisfies `predicate`, checking the current one
    /// first.
    pub async fn wait_for<F>(&mut self, predicate: F) -> SyncResult<LiveView>
    where
        F: Fn(&LiveView) -> bool,
    {
        loop {
            {
                let view = self.view.borrow_and_update();
                if predicate(&*view) {
                    return Ok((*view).clone());
                }
            }
            self.view
                .changed()
                .await
                .map_err(|_| SyncError::ShuttingDown)?;
        }
    }

    /// Cancels the remote subscription and drops every local listener.
    /// Calling it again does nothing.
    pub fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
            debug!(kind = %self.kind, shop = %self.shop, "Subscription close requested");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_none()
    }
}

impl Drop for LiveQuery {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Reader Task
// =============================================================================

struct ReaderTask {
    kind: EntityKind,
    shop: String,
    cache: Arc<CacheStore>,
    events: broadcast::Receiver<dukan_store::ChangeEvent>,
    remote: Option<RemoteSubscription>,
    view: watch::Sender<LiveView>,
    mode: ReaderMode,
    last_snapshot: Option<Vec<Record>>,
    /// Keys deleted locally that the remote store still reports.
    hidden: HashSet<String>,
    error: Option<RemoteError>,
}

impl ReaderTask {
    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                _ = &mut shutdown => break,

                delivery = next_delivery(&mut self.remote) => {
                    self.on_remote(delivery).await;
                }

                event = self.events.recv() => match event {
                    Ok(event) => {
                        if let Some(change) = event.cache_change_for(self.kind, &self.shop) {
                            let change = change.clone();
                            self.on_local(change).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(kind = %self.kind, shop = %self.shop, missed, "Reader lagged behind change events; re-reading");
                        self.on_lag().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        info!(kind = %self.kind, shop = %self.shop, "Subscription closed");
    }

    async fn on_remote(&mut self, delivery: Option<Snapshot>) {
        let records = match delivery {
            Some(Ok(records)) => records,
            Some(Err(err)) => return self.fall_back(err).await,
            None => return self.fall_back(RemoteError::SubscriptionClosed).await,
        };

        if let Err(err) = self.cache.apply_snapshot(self.kind, &self.shop, &records).await {
            warn!(kind = %self.kind, shop = %self.shop, error = %err, "Failed to persist remote snapshot");
        }

        let kind = self.kind;
        self.hidden.retain(|key| {
            records
                .iter()
                .any(|r| candidate_keys(kind, r).iter().any(|k| &k.to_string() == key))
        });
        debug!(kind = %self.kind, shop = %self.shop, count = records.len(), "Remote snapshot received");

        let visible = self.without_hidden(records.clone());
        self.last_snapshot = Some(records);
        self.publish(visible, false);
    }

    async fn on_local(&mut self, change: CacheChange) {
        match self.mode {
            ReaderMode::Local => self.refresh_local().await,
            ReaderMode::Connected => match change.change {
                ChangeKind::Reconciled => {}
                ChangeKind::Deleted => {
                    if let Some(key) = change.key {
                        self.hidden.insert(key);
                    }
                    self.show_optimistic().await;
                }
                ChangeKind::Added | ChangeKind::Updated => self.show_optimistic().await,
            },
        }
    }

    async fn on_lag(&mut self) {
        match self.mode {
            ReaderMode::Local => self.refresh_local().await,
            ReaderMode::Connected => self.show_optimistic().await,
        }
    }

    /// Snapshot overlaid with writes the remote store hasn't confirmed.
    async fn show_optimistic(&mut self) {
        let entries = match self.cache.entries_for_shop(self.kind, &self.shop).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(kind = %self.kind, shop = %self.shop, error = %err, "Failed to read local cache");
                return;
            }
        };

        let stale = self.last_snapshot.is_none();
        let base: Vec<Record> = match &self.last_snapshot {
            Some(snapshot) => snapshot.clone(),
            None => entries.iter().map(|e| e.record.clone()).collect(),
        };
        let records = self.without_hidden(overlay_pending(self.kind, &base, &entries));
        self.publish(records, stale);
    }

    async fn refresh_local(&mut self) {
        match self.cache.records_for_shop(self.kind, &self.shop).await {
            Ok(records) => self.publish(records, false),
            Err(err) => {
                warn!(kind = %self.kind, shop = %self.shop, error = %err, "Failed to read local cache");
            }
        }
    }

    async fn fall_back(&mut self, err: RemoteError) {
        warn!(kind = %self.kind, shop = %self.shop, error = %err, "Remote subscription failed; falling back to local cache");
        self.remote = None;
        self.mode = ReaderMode::Local;
        self.last_snapshot = None;
        self.hidden.clear();
        self.error = Some(err);
        self.refresh_local().await;
    }

    fn without_hidden(&self, mut records: Vec<Record>) -> Vec<Record> {
        if !self.hidden.is_empty() {
            records.retain(|r| {
                !candidate_keys(self.kind, r)
                    .iter()
                    .any(|k| self.hidden.contains(&k.to_string()))
            });
        }
        records
    }

    fn publish(&self, records: Vec<Record>, stale: bool) {
        self.view.send_replace(LiveView {
            records: apply_entity_rules(self.kind, records),
            mode: self.mode,
            error: self.error.clone(),
            stale,
        });
    }
}

/// Next remote delivery, or never when there is no remote subscription.
fn next_delivery(
    remote: &mut Option<RemoteSubscription>,
) -> impl Future<Output = Option<Snapshot>> + '_ {
    async move {
        match remote {
            Some(subscription) => subscription.next().await,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::outbox::OfflineWriter;
    use crate::remote::MemoryRemote;
    use dukan_core::CacheEntry;
    use dukan_store::{ChangeNotifier, MemoryStorage};
    use serde_json::{json, Map, Value};

    struct Fixture {
        reader: CollectionReader,
        writer: OfflineWriter,
        cache: Arc<CacheStore>,
        remote: Arc<MemoryRemote>,
    }

    fn fixture(online: bool) -> Fixture {
        let notifier = ChangeNotifier::default();
        let cache = Arc::new(CacheStore::new(Arc::new(MemoryStorage::new()), notifier.clone()));
        let remote = Arc::new(MemoryRemote::new());
        let connectivity = Arc::new(Connectivity::new(online, notifier));
        Fixture {
            reader: CollectionReader::new(cache.clone(), remote.clone(), connectivity.clone()),
            writer: OfflineWriter::new(cache.clone(), remote.clone(), connectivity),
            cache,
            remote,
        }
    }

    fn record(shop: &str, value: Value) -> Record {
        match value {
            Value::Object(fields) => Record::new(shop, fields),
            _ => Record::new(shop, Map::new()),
        }
    }

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    async fn wait(query: &mut LiveQuery, predicate: impl Fn(&LiveView) -> bool) -> LiveView {
        tokio::time::timeout(Duration::from_secs(5), query.wait_for(predicate))
            .await
            .expect("view did not settle")
            .unwrap()
    }

    #[tokio::test]
    async fn test_local_mode_sorts_and_follows_changes() {
        let f = fixture(false);
        for (n, date) in ["2024-01-01", "2024-03-01", "2024-02-01"].iter().enumerate() {
            let r = record("main", json!({"code": format!("W{}", n), "date": date})).with_id(format!("w{}", n));
            f.cache
                .upsert(EntityKind::WarehouseReceipts, CacheEntry::confirmed(r))
                .await
                .unwrap();
        }

        let mut query = f.reader.subscribe(EntityKind::WarehouseReceipts, "main").await.unwrap();
        let view = query.current();
        assert_eq!(view.mode, ReaderMode::Local);
        assert!(!view.stale);
        let dates: Vec<&str> = view.records.iter().filter_map(|r| r.get_str("date")).collect();
        assert_eq!(dates, vec!["2024-03-01", "2024-02-01", "2024-01-01"]);

        f.writer
            .add(EntityKind::WarehouseReceipts, "main", fields(json!({"code": "W9", "date": "2024-04-01"})))
            .await
            .unwrap();
        let view = wait(&mut query, |v| v.records.len() == 4).await;
        assert_eq!(view.records[0].get_str("date"), Some("2024-04-01"));
        assert_eq!(f.remote.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_local_mode_ignores_other_shops_and_non_products() {
        let f = fixture(false);
        f.cache
            .upsert(EntityKind::Products, CacheEntry::confirmed(record("main", json!({"code": "A1", "type": "product"})).with_id("p1")))
            .await
            .unwrap();
        f.cache
            .upsert(EntityKind::Products, CacheEntry::confirmed(record("main", json!({"code": "X1", "type": "service"})).with_id("p2")))
            .await
            .unwrap();
        f.cache
            .upsert(EntityKind::Products, CacheEntry::confirmed(record("north", json!({"code": "A1", "type": "product"})).with_id("p3")))
            .await
            .unwrap();

        let query = f.reader.subscribe(EntityKind::Products, "main").await.unwrap();
        let view = query.current();
        assert_eq!(view.records.len(), 1);
        assert_eq!(view.records[0].server_id(), Some("p1"));
    }

    #[tokio::test]
    async fn test_connected_mode_reconciles_snapshot() {
        let f = fixture(true);
        f.remote.seed(
            EntityKind::Invoices,
            [
                record("main", json!({"invoiceNumber": 2})),
                record("main", json!({"invoiceNumber": 10})),
                record("north", json!({"invoiceNumber": 99})),
            ],
        );

        let mut query = f.reader.subscribe(EntityKind::Invoices, "main").await.unwrap();
        assert!(query.current().stale);
        assert_eq!(query.current().mode, ReaderMode::Connected);

        let view = wait(&mut query, |v| !v.stale).await;
        let numbers: Vec<&Value> = view.records.iter().filter_map(|r| r.get("invoiceNumber")).collect();
        assert_eq!(numbers, vec![&json!(10), &json!(2)]);

        let cached = f.cache.entries_for_shop(EntityKind::Invoices, "main").await.unwrap();
        assert_eq!(cached.len(), 2);
        assert!(cached.iter().all(|e| !e.is_offline));
    }

    #[tokio::test]
    async fn test_connected_mode_shows_pending_writes() {
        let f = fixture(true);
        f.remote.seed(EntityKind::Employees, [record("main", json!({"name": "a"}))]);

        let mut query = f.reader.subscribe(EntityKind::Employees, "main").await.unwrap();
        wait(&mut query, |v| !v.stale && v.records.len() == 1).await;

        f.remote.inject_error(RemoteError::Unavailable("blip".into()));
        let ack = f
            .writer
            .add(EntityKind::Employees, "main", fields(json!({"name": "b"})))
            .await
            .unwrap();
        assert!(!ack.confirmed);

        let view = wait(&mut query, |v| v.records.len() == 2).await;
        assert_eq!(view.mode, ReaderMode::Connected);
        assert!(view.records.iter().any(|r| r.queue_identity() == Some(ack.id.as_str())));
    }

    #[tokio::test]
    async fn test_connected_mode_hides_deleted_records() {
        let f = fixture(true);
        f.remote.seed(
            EntityKind::Expenses,
            [record("main", json!({"amount": 1})), record("main", json!({"amount": 2}))],
        );

        let mut query = f.reader.subscribe(EntityKind::Expenses, "main").await.unwrap();
        let view = wait(&mut query, |v| !v.stale && v.records.len() == 2).await;
        let target = view.records[0].server_id().unwrap().to_string();

        f.writer.delete(EntityKind::Expenses, "main", &target).await.unwrap();
        let view = wait(&mut query, |v| v.records.len() == 1).await;
        assert!(view.records.iter().all(|r| r.server_id() != Some(target.as_str())));
        assert_eq!(f.remote.records(EntityKind::Expenses).len(), 1);
    }

    #[tokio::test]
    async fn test_remote_failure_falls_back_to_local() {
        let f = fixture(true);
        f.remote.seed(EntityKind::Products, [record("main", json!({"code": "A1", "type": "product"}))]);

        let mut query = f.reader.subscribe(EntityKind::Products, "main").await.unwrap();
        wait(&mut query, |v| !v.stale && v.records.len() == 1).await;

        f.remote.set_available(false);
        let view = wait(&mut query, |v| v.mode == ReaderMode::Local).await;
        assert!(matches!(view.error, Some(RemoteError::Unavailable(_))));
        assert_eq!(view.records.len(), 1);

        f.writer
            .add(EntityKind::Products, "main", fields(json!({"code": "A2", "type": "product"})))
            .await
            .unwrap();
        let view = wait(&mut query, |v| v.records.len() == 2).await;
        assert!(view.error.is_some());
    }

    #[tokio::test]
    async fn test_failed_subscribe_starts_local_with_error() {
        let f = fixture(true);
        f.remote.set_available(false);

        let query = f.reader.subscribe(EntityKind::Products, "main").await.unwrap();
        let view = query.current();
        assert_eq!(view.mode, ReaderMode::Local);
        assert!(!view.stale);
        assert!(view.error.is_some());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_releases_listeners() {
        let f = fixture(true);
        let notifier = f.cache.notifier().clone();

        let mut query = f.reader.subscribe(EntityKind::Products, "main").await.unwrap();
        assert_eq!(f.remote.subscriber_count(), 1);
        assert_eq!(notifier.listener_count(), 1);

        query.close();
        query.close();
        assert!(query.is_closed());

        tokio::time::timeout(Duration::from_secs(5), async {
            while f.remote.subscriber_count() > 0 || notifier.listener_count() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("subscription not torn down");

        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while query.changed().await.is_ok() {}
        })
        .await;
        assert!(drained.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_shop_rejected() {
        let f = fixture(false);
        assert!(f.reader.subscribe(EntityKind::Products, "").await.is_err());
    }
}
