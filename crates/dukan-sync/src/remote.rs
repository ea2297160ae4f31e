//! # Remote Store
//!
//! The contract the data layer expects from the authoritative document
//! store, plus an in-memory implementation used by tests and demos.
//!
//! ## Subscription Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Remote Store Subscriptions                           │
//! │                                                                         │
//! │  subscribe(kind, filter)                                               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌──────────────────────┐    full result set     ┌──────────────────┐  │
//! │  │     RemoteStore      │ ─────────────────────► │RemoteSubscription│  │
//! │  │                      │    on every change     │                  │  │
//! │  │  add / update /      │                        │  next() -> Ok(   │  │
//! │  │  delete on the kind  │ ─────── Err(..) ─────► │   [Record..])    │  │
//! │  └──────────────────────┘    then stream ends    └──────────────────┘  │
//! │                                                                         │
//! │  Dropping the subscription cancels it; the store prunes closed         │
//! │  subscribers on its next broadcast.                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Filters are equality-only. Every read is scoped by `shop`; product reads
//! additionally require `type == "product"`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use dukan_core::types::{SHOP_FIELD, ID_FIELD};
use dukan_core::{EntityKind, Record, PRODUCT_TYPE};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::error::RemoteError;

/// One delivery on a subscription: a full result set or an error.
pub type Snapshot = Result<Vec<Record>, RemoteError>;

// =============================================================================
// Query Filter
// =============================================================================

/// Conjunction of equality constraints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFilter {
    equals: Vec<(String, Value)>,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard filter for reading `kind` in `shop`.
    pub fn for_kind(kind: EntityKind, shop: &str) -> Self {
        let filter = QueryFilter::new().with(SHOP_FIELD, shop);
        match kind {
            EntityKind::Products => filter.with("type", PRODUCT_TYPE),
            _ => filter,
        }
    }

    /// Adds an equality constraint.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.push((field.into(), value.into()));
        self
    }

    /// The shop constraint, if any.
    pub fn shop(&self) -> Option<&str> {
        self.equals
            .iter()
            .find(|(field, _)| field == SHOP_FIELD)
            .and_then(|(_, value)| value.as_str())
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.equals.iter().all(|(field, expected)| match field.as_str() {
            SHOP_FIELD => expected.as_str() == Some(record.shop.as_str()),
            ID_FIELD => expected.as_str().is_some() && expected.as_str() == record.server_id(),
            other => record.get(other) == Some(expected),
        })
    }
}

// =============================================================================
// Subscription Handle
// =============================================================================

/// Receiving end of a remote subscription.
#[derive(Debug)]
pub struct RemoteSubscription {
    rx: mpsc::UnboundedReceiver<Snapshot>,
}

impl RemoteSubscription {
    pub fn new(rx: mpsc::UnboundedReceiver<Snapshot>) -> Self {
        RemoteSubscription { rx }
    }

    /// Waits for the next delivery. `None` once the remote side has closed.
    pub async fn next(&mut self) -> Option<Snapshot> {
        self.rx.recv().await
    }
}

// =============================================================================
// Remote Store Trait
// =============================================================================

/// The authoritative document store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// One-shot read of every record of `kind` matching `filter`.
    async fn query(&self, kind: EntityKind, filter: &QueryFilter) -> Result<Vec<Record>, RemoteError>;

    /// Point read by server id.
    async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Record>, RemoteError>;

    /// Creates a document and returns its server id.
    async fn add(&self, kind: EntityKind, record: Record) -> Result<String, RemoteError>;

    /// Applies a partial update.
    async fn update(
        &self,
        kind: EntityKind,
        id: &str,
        patch: &Map<String, Value>,
    ) -> Result<(), RemoteError>;

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), RemoteError>;

    /// Opens a live subscription. The first delivery is the current result
    /// set; later ones follow every change.
    async fn subscribe(
        &self,
        kind: EntityKind,
        filter: QueryFilter,
    ) -> Result<RemoteSubscription, RemoteError>;
}

// =============================================================================
// In-Memory Remote
// =============================================================================

struct Subscriber {
    kind: EntityKind,
    filter: QueryFilter,
    tx: mpsc::UnboundedSender<Snapshot>,
}

struct Inner {
    collections: HashMap<EntityKind, Vec<Record>>,
    subscribers: Vec<Subscriber>,
    available: bool,
    fail_next: Option<RemoteError>,
}

/// Remote store held in process memory.
///
/// Supports an availability switch and one-shot error injection so tests can
/// drive every degraded path of the readers and the offline writer.
pub struct MemoryRemote {
    inner: Mutex<Inner>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        MemoryRemote {
            inner: Mutex::new(Inner {
                collections: HashMap::new(),
                subscribers: Vec::new(),
                available: true,
                fail_next: None,
            }),
        }
    }

    /// Inserts records as if they already existed remotely. Records without a
    /// server id get one.
    pub fn seed(&self, kind: EntityKind, records: impl IntoIterator<Item = Record>) {
        let mut inner = self.lock();
        let collection = inner.collections.entry(kind).or_default();
        for mut record in records {
            if record.server_id().is_none() {
                record.id = Some(Uuid::new_v4().to_string());
            }
            collection.push(record);
        }
        broadcast(&mut inner, kind);
    }

    /// Every stored record of `kind`, unfiltered.
    pub fn records(&self, kind: EntityKind) -> Vec<Record> {
        self.lock().collections.get(&kind).cloned().unwrap_or_default()
    }

    /// Switches availability. Going unavailable fails and closes every open
    /// subscription.
    pub fn set_available(&self, available: bool) {
        let mut inner = self.lock();
        inner.available = available;
        if !available {
            for subscriber in inner.subscribers.drain(..) {
                let _ = subscriber
                    .tx
                    .send(Err(RemoteError::Unavailable("remote store went offline".into())));
            }
        }
    }

    /// Makes the next operation fail with `error`.
    pub fn inject_error(&self, error: RemoteError) {
        self.lock().fail_next = Some(error);
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(|s| !s.tx.is_closed());
        inner.subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(inner: &mut Inner) -> Result<(), RemoteError> {
        if !inner.available {
            return Err(RemoteError::Unavailable("remote store offline".into()));
        }
        match inner.fail_next.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn matching(inner: &Inner, kind: EntityKind, filter: &QueryFilter) -> Vec<Record> {
    inner
        .collections
        .get(&kind)
        .map(|records| records.iter().filter(|r| filter.matches(r)).cloned().collect())
        .unwrap_or_default()
}

/// Pushes the current result set to every subscriber of `kind`.
fn broadcast(inner: &mut Inner, kind: EntityKind) {
    let snapshots: Vec<Option<Vec<Record>>> = {
        let view: &Inner = inner;
        view.subscribers
            .iter()
            .map(|s| (s.kind == kind).then(|| matching(view, kind, &s.filter)))
            .collect()
    };

    let mut position = 0;
    inner.subscribers.retain(|subscriber| {
        let keep = match &snapshots[position] {
            Some(records) => subscriber.tx.send(Ok(records.clone())).is_ok(),
            None => !subscriber.tx.is_closed(),
        };
        position += 1;
        keep
    });
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn query(&self, kind: EntityKind, filter: &QueryFilter) -> Result<Vec<Record>, RemoteError> {
        let mut inner = self.lock();
        Self::check(&mut inner)?;
        Ok(matching(&inner, kind, filter))
    }

    async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Record>, RemoteError> {
        let mut inner = self.lock();
        Self::check(&mut inner)?;
        Ok(inner
            .collections
            .get(&kind)
            .and_then(|records| records.iter().find(|r| r.server_id() == Some(id)))
            .cloned())
    }

    async fn add(&self, kind: EntityKind, mut record: Record) -> Result<String, RemoteError> {
        let mut inner = self.lock();
        Self::check(&mut inner)?;

        let id = Uuid::new_v4().to_string();
        record.id = Some(id.clone());
        inner.collections.entry(kind).or_default().push(record);
        debug!(kind = %kind, id = %id, "Remote document added");

        broadcast(&mut inner, kind);
        Ok(id)
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: &str,
        patch: &Map<String, Value>,
    ) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        Self::check(&mut inner)?;

        let record = inner
            .collections
            .get_mut(&kind)
            .and_then(|records| records.iter_mut().find(|r| r.server_id() == Some(id)))
            .ok_or_else(|| RemoteError::not_found(kind.collection(), id))?;
        let mut patch = patch.clone();
        patch.remove(ID_FIELD);
        record.merge_fields(&patch);

        broadcast(&mut inner, kind);
        Ok(())
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        Self::check(&mut inner)?;

        let records = inner
            .collections
            .get_mut(&kind)
            .ok_or_else(|| RemoteError::not_found(kind.collection(), id))?;
        let before = records.len();
        records.retain(|r| r.server_id() != Some(id));
        if records.len() == before {
            return Err(RemoteError::not_found(kind.collection(), id));
        }

        broadcast(&mut inner, kind);
        Ok(())
    }

    async fn subscribe(
        &self,
        kind: EntityKind,
        filter: QueryFilter,
    ) -> Result<RemoteSubscription, RemoteError> {
        let mut inner = self.lock();
        Self::check(&mut inner)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(matching(&inner, kind, &filter)));
        inner.subscribers.push(Subscriber { kind, filter, tx });
        debug!(kind = %kind, subscribers = inner.subscribers.len(), "Remote subscription opened");

        Ok(RemoteSubscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn product(shop: &str, code: &str) -> Record {
        let mut fields = Map::new();
        fields.insert("code".into(), json!(code));
        fields.insert("type".into(), json!("product"));
        Record::new(shop, fields)
    }

    #[test]
    fn test_filter_for_products() {
        let filter = QueryFilter::for_kind(EntityKind::Products, "main");
        assert_eq!(filter.shop(), Some("main"));
        assert!(filter.matches(&product("main", "A1")));
        assert!(!filter.matches(&product("north", "A1")));

        let mut untyped = product("main", "A2");
        untyped.fields.remove("type");
        assert!(!filter.matches(&untyped));

        let invoices = QueryFilter::for_kind(EntityKind::Invoices, "main");
        assert!(invoices.matches(&untyped));
    }

    #[tokio::test]
    async fn test_add_assigns_server_id() {
        let remote = MemoryRemote::new();
        let id = remote
            .add(EntityKind::Products, product("main", "A1").with_queue_id("q-1"))
            .await
            .unwrap();

        let stored = remote.get(EntityKind::Products, &id).await.unwrap().unwrap();
        assert_eq!(stored.server_id(), Some(id.as_str()));
        assert_eq!(stored.queue_identity(), Some("q-1"));
    }

    #[tokio::test]
    async fn test_subscription_receives_initial_and_changes() {
        let remote = MemoryRemote::new();
        remote.seed(EntityKind::Products, [product("main", "A1"), product("north", "B1")]);

        let mut sub = remote
            .subscribe(EntityKind::Products, QueryFilter::for_kind(EntityKind::Products, "main"))
            .await
            .unwrap();
        assert_eq!(sub.next().await.unwrap().unwrap().len(), 1);

        remote.add(EntityKind::Products, product("main", "A2")).await.unwrap();
        assert_eq!(sub.next().await.unwrap().unwrap().len(), 2);

        remote.add(EntityKind::Invoices, Record::new("main", Map::new())).await.unwrap();
        remote.add(EntityKind::Products, product("north", "B2")).await.unwrap();
        // the north product still triggers a delivery with the unchanged main result set
        assert_eq!(sub.next().await.unwrap().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let remote = MemoryRemote::new();
        let id = remote.add(EntityKind::Products, product("main", "A1")).await.unwrap();

        let mut patch = Map::new();
        patch.insert("quantity".into(), json!(4));
        remote.update(EntityKind::Products, &id, &patch).await.unwrap();
        let stored = remote.get(EntityKind::Products, &id).await.unwrap().unwrap();
        assert_eq!(stored.get("quantity"), Some(&json!(4)));

        remote.delete(EntityKind::Products, &id).await.unwrap();
        assert!(remote.get(EntityKind::Products, &id).await.unwrap().is_none());
        assert!(matches!(
            remote.delete(EntityKind::Products, &id).await,
            Err(RemoteError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_unavailable_fails_and_closes_subscriptions() {
        let remote = MemoryRemote::new();
        let mut sub = remote
            .subscribe(EntityKind::Expenses, QueryFilter::for_kind(EntityKind::Expenses, "main"))
            .await
            .unwrap();
        assert!(sub.next().await.unwrap().is_ok());

        remote.set_available(false);
        assert!(matches!(sub.next().await, Some(Err(RemoteError::Unavailable(_)))));
        assert!(sub.next().await.is_none());
        assert_eq!(remote.subscriber_count(), 0);

        assert!(remote
            .query(EntityKind::Expenses, &QueryFilter::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_injected_error_is_one_shot() {
        let remote = MemoryRemote::new();
        remote.inject_error(RemoteError::Rejected("quota".into()));

        assert_eq!(
            remote.add(EntityKind::Products, product("main", "A1")).await,
            Err(RemoteError::Rejected("quota".into()))
        );
        assert!(remote.add(EntityKind::Products, product("main", "A1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let remote = MemoryRemote::new();
        let sub = remote
            .subscribe(EntityKind::Products, QueryFilter::new())
            .await
            .unwrap();
        assert_eq!(remote.subscriber_count(), 1);

        drop(sub);
        assert_eq!(remote.subscriber_count(), 0);
    }
}
