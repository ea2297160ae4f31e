//! # Local Cache Store
//!
//! Per-entity-kind, per-shop record cache persisted to [`LocalStorage`].
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           CacheStore                                    │
//! │                                                                         │
//! │  kind lock ──► load blob ──► decide (pure) ──► save blob ──► notify     │
//! │  (one tokio Mutex per entity kind, held across the whole sequence)      │
//! │                                                                         │
//! │  offlineProducts   [ {shop: main, ...}, {shop: north, ...}, ... ]       │
//! │  offlineWared      [ ... ]                                              │
//! │  offlineEmployees  [ ... ]        one JSON array per kind, every shop   │
//! │  offlineMasrofat   [ ... ]        in the same blob, filtered on read    │
//! │  offlineInvoices   [ ... ]                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every mutation is followed by a [`ChangeEvent::Cache`] so readers can
//! re-derive their view. A blob that can't be decoded is logged and read as
//! empty; the next write replaces it.

use std::sync::Arc;

use dukan_core::identity::{candidate_keys, resolve_key};
use dukan_core::{reconcile, same_shop, CacheEntry, EntityKind, ReconcileSummary, Record};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::notify::{CacheChange, ChangeEvent, ChangeKind, ChangeNotifier};
use crate::storage::LocalStorage;

/// The local cache shared by readers, the offline writer and the stock
/// service.
pub struct CacheStore {
    storage: Arc<dyn LocalStorage>,
    notifier: ChangeNotifier,
    locks: [Mutex<()>; EntityKind::COUNT],
}

impl CacheStore {
    pub fn new(storage: Arc<dyn LocalStorage>, notifier: ChangeNotifier) -> Self {
        CacheStore {
            storage,
            notifier,
            locks: std::array::from_fn(|_| Mutex::new(())),
        }
    }

    /// The notifier every mutation publishes to.
    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    /// The storage the cache persists to.
    pub fn storage(&self) -> &Arc<dyn LocalStorage> {
        &self.storage
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Every cached entry of `kind`, across shops.
    pub async fn load(&self, kind: EntityKind) -> StoreResult<Vec<CacheEntry>> {
        let _guard = self.locks[kind as usize].lock().await;
        self.read_blob(kind).await
    }

    /// Cached entries of `kind` belonging to `shop`.
    pub async fn entries_for_shop(&self, kind: EntityKind, shop: &str) -> StoreResult<Vec<CacheEntry>> {
        Ok(self
            .load(kind)
            .await?
            .into_iter()
            .filter(|entry| same_shop(&entry.record, shop))
            .collect())
    }

    /// Cached records of `kind` belonging to `shop`.
    pub async fn records_for_shop(&self, kind: EntityKind, shop: &str) -> StoreResult<Vec<Record>> {
        Ok(self
            .entries_for_shop(kind, shop)
            .await?
            .into_iter()
            .map(|entry| entry.record)
            .collect())
    }

    /// Finds an entry by server id or queue id.
    pub async fn find(
        &self,
        kind: EntityKind,
        shop: &str,
        reference: &str,
    ) -> StoreResult<Option<CacheEntry>> {
        self.find_by(kind, shop, |record| record.answers_to(reference))
            .await
    }

    /// Finds the first entry in `shop` matching `predicate`.
    pub async fn find_by<F>(
        &self,
        kind: EntityKind,
        shop: &str,
        predicate: F,
    ) -> StoreResult<Option<CacheEntry>>
    where
        F: Fn(&Record) -> bool,
    {
        Ok(self
            .load(kind)
            .await?
            .into_iter()
            .find(|entry| same_shop(&entry.record, shop) && predicate(&entry.record)))
    }

    /// Number of entries of `kind` in `shop` still waiting for confirmation.
    pub async fn pending_count(&self, kind: EntityKind, shop: &str) -> StoreResult<usize> {
        Ok(self
            .entries_for_shop(kind, shop)
            .await?
            .iter()
            .filter(|entry| entry.is_offline)
            .count())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Inserts or replaces an entry, matching on any of its identities.
    ///
    /// Returns whether the entry was added or updated.
    pub async fn upsert(&self, kind: EntityKind, entry: CacheEntry) -> StoreResult<ChangeKind> {
        let _guard = self.locks[kind as usize].lock().await;
        let mut entries = self.read_blob(kind).await?;

        let keys = candidate_keys(kind, &entry.record);
        let existing = entries.iter().position(|e| {
            same_shop(&e.record, &entry.record.shop)
                && candidate_keys(kind, &e.record).iter().any(|k| keys.contains(k))
        });

        let change = match existing {
            Some(position) => {
                entries[position] = entry.clone();
                ChangeKind::Updated
            }
            None => {
                entries.push(entry.clone());
                ChangeKind::Added
            }
        };

        self.write_blob(kind, &entries).await?;
        self.notify(kind, change, &entry.record.shop, Some(&entry.record));
        Ok(change)
    }

    /// Applies `mutate` to the entry answering to `reference`, atomically.
    ///
    /// ## Errors
    /// `NotFound` when no entry in `shop` answers to `reference`.
    pub async fn update_with<F>(
        &self,
        kind: EntityKind,
        shop: &str,
        reference: &str,
        mutate: F,
    ) -> StoreResult<CacheEntry>
    where
        F: FnOnce(&mut CacheEntry),
    {
        let _guard = self.locks[kind as usize].lock().await;
        let mut entries = self.read_blob(kind).await?;

        let entry = entries
            .iter_mut()
            .find(|e| same_shop(&e.record, shop) && e.record.answers_to(reference))
            .ok_or_else(|| StoreError::not_found(kind.to_string(), reference))?;
        mutate(entry);
        let updated = entry.clone();

        self.write_blob(kind, &entries).await?;
        self.notify(kind, ChangeKind::Updated, shop, Some(&updated.record));
        Ok(updated)
    }

    /// Removes the entry answering to `reference`. Returns false when absent.
    pub async fn remove(&self, kind: EntityKind, shop: &str, reference: &str) -> StoreResult<bool> {
        let _guard = self.locks[kind as usize].lock().await;
        let mut entries = self.read_blob(kind).await?;

        let position = entries
            .iter()
            .position(|e| same_shop(&e.record, shop) && e.record.answers_to(reference));
        let Some(position) = position else {
            return Ok(false);
        };
        let removed = entries.remove(position);

        self.write_blob(kind, &entries).await?;
        self.notify(kind, ChangeKind::Deleted, shop, Some(&removed.record));
        Ok(true)
    }

    /// Replaces every entry of `kind` in `shop`, leaving other shops alone.
    pub async fn replace_all(
        &self,
        kind: EntityKind,
        shop: &str,
        replacement: Vec<CacheEntry>,
    ) -> StoreResult<()> {
        let _guard = self.locks[kind as usize].lock().await;
        let mut entries: Vec<CacheEntry> = self
            .read_blob(kind)
            .await?
            .into_iter()
            .filter(|e| !same_shop(&e.record, shop))
            .collect();
        entries.extend(
            replacement
                .into_iter()
                .filter(|e| same_shop(&e.record, shop)),
        );

        self.write_blob(kind, &entries).await?;
        self.notify(kind, ChangeKind::Updated, shop, None);
        Ok(())
    }

    /// Reconciles a remote snapshot of `shop` into the cache and persists it.
    ///
    /// Load, merge and save happen under the kind lock, so no other writer
    /// sees a half-merged cache.
    pub async fn apply_snapshot(
        &self,
        kind: EntityKind,
        shop: &str,
        snapshot: &[Record],
    ) -> StoreResult<ReconcileSummary> {
        let _guard = self.locks[kind as usize].lock().await;
        let (mine, others): (Vec<CacheEntry>, Vec<CacheEntry>) = self
            .read_blob(kind)
            .await?
            .into_iter()
            .partition(|e| same_shop(&e.record, shop));

        let foreign = snapshot.iter().filter(|r| !same_shop(r, shop)).count();
        if foreign > 0 {
            warn!(kind = %kind, shop = %shop, foreign, "Snapshot held records of other shops; ignored");
        }
        let remote: Vec<Record> = snapshot
            .iter()
            .filter(|r| same_shop(r, shop))
            .cloned()
            .collect();

        let merged = reconcile(kind, mine, &remote);
        let mut entries = others;
        entries.extend(merged.entries);

        self.write_blob(kind, &entries).await?;
        info!(
            kind = %kind,
            shop = %shop,
            matched = merged.summary.matched,
            appended = merged.summary.appended,
            untouched = merged.summary.untouched,
            "Snapshot reconciled into local cache"
        );
        self.notify(kind, ChangeKind::Reconciled, shop, None);
        Ok(merged.summary)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn read_blob(&self, kind: EntityKind) -> StoreResult<Vec<CacheEntry>> {
        let key = kind.storage_key();
        let Some(blob) = self.storage.load(key).await? else {
            return Ok(Vec::new());
        };

        match decode_entries(key, &blob) {
            Ok(entries) => Ok(entries),
            Err(err) => {
                warn!(kind = %kind, error = %err, "Local cache blob unreadable; treating as empty");
                Ok(Vec::new())
            }
        }
    }

    async fn write_blob(&self, kind: EntityKind, entries: &[CacheEntry]) -> StoreResult<()> {
        let blob = serde_json::to_string(entries)?;
        self.storage.save(kind.storage_key(), &blob).await?;
        debug!(kind = %kind, count = entries.len(), "Local cache persisted");
        Ok(())
    }

    fn notify(&self, kind: EntityKind, change: ChangeKind, shop: &str, record: Option<&Record>) {
        let key = record.map(|r| resolve_key(kind, r).to_string());
        self.notifier.publish(ChangeEvent::Cache(CacheChange {
            kind,
            change,
            shop: shop.to_string(),
            key,
        }));
    }
}

/// Decodes a cache blob, skipping individual entries that don't decode.
fn decode_entries(key: &str, blob: &str) -> StoreResult<Vec<CacheEntry>> {
    let values: Vec<Value> =
        serde_json::from_str(blob).map_err(|e| StoreError::corrupted(key, e))?;

    let mut entries = Vec::with_capacity(values.len());
    for value in values {
        match serde_json::from_value::<CacheEntry>(value) {
            Ok(entry) => entries.push(entry),
            Err(err) => warn!(key = %key, error = %err, "Skipping undecodable cache entry"),
        }
    }
    Ok(entries)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{SqliteStorage, StorageConfig};
    use crate::storage::MemoryStorage;
    use serde_json::{json, Map};

    fn record(shop: &str, value: Value) -> Record {
        match value {
            Value::Object(map) => Record::new(shop, map),
            _ => Record::new(shop, Map::new()),
        }
    }

    fn memory_store() -> (CacheStore, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let store = CacheStore::new(storage.clone(), ChangeNotifier::new(64));
        (store, storage)
    }

    #[tokio::test]
    async fn test_upsert_then_find() {
        let (store, _) = memory_store();
        let entry = CacheEntry::offline(
            record("main", json!({"name": "Sara", "phone": "0100"})).with_queue_id("q-1"),
        );

        let change = store.upsert(EntityKind::Employees, entry.clone()).await.unwrap();
        assert_eq!(change, ChangeKind::Added);

        let found = store.find(EntityKind::Employees, "main", "q-1").await.unwrap();
        assert_eq!(found, Some(entry));
        assert!(store.find(EntityKind::Employees, "north", "q-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_matches_existing_identity() {
        let (store, _) = memory_store();
        let original = CacheEntry::offline(record("main", json!({"code": "A1"})).with_queue_id("q-1"));
        store.upsert(EntityKind::Products, original).await.unwrap();

        let confirmed = CacheEntry::confirmed(
            record("main", json!({"code": "A1", "quantity": 3}))
                .with_id("srv-1")
                .with_queue_id("q-1"),
        );
        let change = store.upsert(EntityKind::Products, confirmed).await.unwrap();

        assert_eq!(change, ChangeKind::Updated);
        let all = store.load(EntityKind::Products).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].record.server_id(), Some("srv-1"));
    }

    #[tokio::test]
    async fn test_mutations_publish_events() {
        let (store, _) = memory_store();
        let mut events = store.notifier().subscribe();

        store
            .upsert(
                EntityKind::Invoices,
                CacheEntry::offline(record("main", json!({"invoiceNumber": 1})).with_queue_id("q-1")),
            )
            .await
            .unwrap();
        assert!(store.remove(EntityKind::Invoices, "main", "q-1").await.unwrap());
        assert!(!store.remove(EntityKind::Invoices, "main", "q-1").await.unwrap());

        let added = events.recv().await.unwrap();
        assert_eq!(added.event_name(), "offlineInvoiceAdded");
        let deleted = events.recv().await.unwrap();
        assert_eq!(deleted.event_name(), "offlineInvoiceDeleted");
        match deleted {
            ChangeEvent::Cache(change) => assert_eq!(change.key.as_deref(), Some("queue:q-1")),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_update_with_missing_reference() {
        let (store, _) = memory_store();
        let err = store
            .update_with(EntityKind::Products, "main", "nope", |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_apply_snapshot_keeps_other_shops_and_offline_writes() {
        let (store, _) = memory_store();
        store
            .upsert(
                EntityKind::Products,
                CacheEntry::confirmed(record("north", json!({"code": "N1"})).with_id("srv-n")),
            )
            .await
            .unwrap();
        store
            .upsert(
                EntityKind::Products,
                CacheEntry::offline(record("main", json!({"code": "M9"})).with_queue_id("q-9")),
            )
            .await
            .unwrap();
        let mut events = store.notifier().subscribe();

        let snapshot = vec![record("main", json!({"code": "M1", "type": "product"})).with_id("srv-1")];
        let summary = store
            .apply_snapshot(EntityKind::Products, "main", &snapshot)
            .await
            .unwrap();

        assert_eq!(summary.appended, 1);
        assert_eq!(summary.untouched, 1);
        assert_eq!(store.entries_for_shop(EntityKind::Products, "north").await.unwrap().len(), 1);
        let main = store.entries_for_shop(EntityKind::Products, "main").await.unwrap();
        assert_eq!(main.len(), 2);
        assert_eq!(store.pending_count(EntityKind::Products, "main").await.unwrap(), 1);

        match events.recv().await.unwrap() {
            ChangeEvent::Cache(change) => assert_eq!(change.change, ChangeKind::Reconciled),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_replace_all_scoped_to_shop() {
        let (store, _) = memory_store();
        store
            .upsert(
                EntityKind::Expenses,
                CacheEntry::confirmed(record("north", json!({"amount": 5})).with_id("n1")),
            )
            .await
            .unwrap();

        store
            .replace_all(
                EntityKind::Expenses,
                "main",
                vec![CacheEntry::confirmed(record("main", json!({"amount": 7})).with_id("m1"))],
            )
            .await
            .unwrap();

        assert_eq!(store.load(EntityKind::Expenses).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_blob_reads_as_empty() {
        let (store, storage) = memory_store();
        storage.save("offlineProducts", "{not json").await.unwrap();

        assert!(store.load(EntityKind::Products).await.unwrap().is_empty());

        storage
            .save("offlineProducts", r#"[{"id": "srv-1", "shop": "main"}, {"shop": 42}]"#)
            .await
            .unwrap();
        let entries = store.load(EntityKind::Products).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].is_offline);
    }

    #[tokio::test]
    async fn test_storage_failure_propagates() {
        let (store, storage) = memory_store();
        storage.fail_writes(true);

        let result = store
            .upsert(
                EntityKind::Products,
                CacheEntry::offline(record("main", json!({"code": "A1"}))),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upserts_are_not_lost() {
        let storage = Arc::new(SqliteStorage::new(StorageConfig::in_memory()).await.unwrap());
        let store = Arc::new(CacheStore::new(storage, ChangeNotifier::new(256)));

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let entry = CacheEntry::offline(
                    record("main", json!({"code": format!("C{}", i)})).with_queue_id(format!("q-{}", i)),
                );
                store.upsert(EntityKind::Products, entry).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.load(EntityKind::Products).await.unwrap().len(), 20);
    }
}
