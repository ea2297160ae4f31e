//! # Change Notifier
//!
//! Process-wide typed publish/subscribe for local cache changes and
//! connectivity transitions.
//!
//! ## Event Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Change Notifier                                 │
//! │                                                                         │
//! │  PRODUCERS                         broadcast            CONSUMERS       │
//! │  ─────────                        ───────────           ─────────       │
//! │  CacheStore::upsert  ─┐                                                 │
//! │  CacheStore::remove  ─┤   ChangeEvent::Cache(..)     ┌─► reader (local) │
//! │  CacheStore::apply_  ─┼──────────────────────────────┼─► reader (remote)│
//! │        snapshot       │                              └─► agent status   │
//! │  Connectivity        ─┘   ChangeEvent::Connectivity                     │
//! │                                                                         │
//! │  Slow consumers lag instead of blocking producers; a lagged reader     │
//! │  re-reads its whole view.                                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use dukan_core::EntityKind;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Default broadcast capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

// =============================================================================
// Events
// =============================================================================

/// What happened to a cached record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Updated,
    Deleted,
    /// A remote snapshot was merged into the cache.
    Reconciled,
}

impl ChangeKind {
    /// Suffix used in legacy event names. Legacy listeners treat a
    /// reconciliation as an update.
    pub const fn legacy_suffix(self) -> &'static str {
        match self {
            ChangeKind::Added => "Added",
            ChangeKind::Updated | ChangeKind::Reconciled => "Updated",
            ChangeKind::Deleted => "Deleted",
        }
    }
}

/// A change to the local cache of one entity kind in one shop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheChange {
    pub kind: EntityKind,
    pub change: ChangeKind,
    pub shop: String,
    /// Rendered record key, absent for whole-collection changes.
    pub key: Option<String>,
}

impl CacheChange {
    /// Legacy event name, e.g. `offlineProductAdded`.
    pub fn event_name(&self) -> String {
        format!(
            "offline{}{}",
            self.kind.event_stem(),
            self.change.legacy_suffix()
        )
    }
}

/// Everything the notifier carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeEvent {
    Cache(CacheChange),
    /// `true` when the device went online.
    Connectivity(bool),
}

impl ChangeEvent {
    /// Legacy event name (`offlineInvoiceDeleted`, `online`, `offline`).
    pub fn event_name(&self) -> String {
        match self {
            ChangeEvent::Cache(change) => change.event_name(),
            ChangeEvent::Connectivity(true) => "online".to_string(),
            ChangeEvent::Connectivity(false) => "offline".to_string(),
        }
    }

    /// Returns the cache change when it concerns `kind` in `shop`.
    pub fn cache_change_for(&self, kind: EntityKind, shop: &str) -> Option<&CacheChange> {
        match self {
            ChangeEvent::Cache(change) if change.kind == kind && change.shop == shop => Some(change),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.event_name())
    }
}

// =============================================================================
// Notifier
// =============================================================================

/// Cloneable handle to the process-wide event bus.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeNotifier {
    /// Creates a notifier buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        ChangeNotifier { sender }
    }

    /// Registers a new listener. Dropping the receiver unregisters it.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event, returning how many listeners received it.
    ///
    /// Publishing with no listeners is not an error.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        trace!(event = %event, "Publishing change event");
        self.sender.send(event).unwrap_or(0)
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        ChangeNotifier::new(DEFAULT_EVENT_CAPACITY)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn change(kind: EntityKind, change: ChangeKind) -> ChangeEvent {
        ChangeEvent::Cache(CacheChange {
            kind,
            change,
            shop: "main".to_string(),
            key: None,
        })
    }

    #[test]
    fn test_legacy_event_names() {
        assert_eq!(
            change(EntityKind::Products, ChangeKind::Added).event_name(),
            "offlineProductAdded"
        );
        assert_eq!(
            change(EntityKind::WarehouseReceipts, ChangeKind::Deleted).event_name(),
            "offlineWaredDeleted"
        );
        assert_eq!(
            change(EntityKind::Expenses, ChangeKind::Reconciled).event_name(),
            "offlineMasrofUpdated"
        );
        assert_eq!(ChangeEvent::Connectivity(true).event_name(), "online");
        assert_eq!(ChangeEvent::Connectivity(false).event_name(), "offline");
    }

    #[test]
    fn test_cache_change_filter() {
        let event = change(EntityKind::Invoices, ChangeKind::Updated);
        assert!(event.cache_change_for(EntityKind::Invoices, "main").is_some());
        assert!(event.cache_change_for(EntityKind::Invoices, "north").is_none());
        assert!(event.cache_change_for(EntityKind::Products, "main").is_none());
        assert!(ChangeEvent::Connectivity(true)
            .cache_change_for(EntityKind::Products, "main")
            .is_none());
    }

    #[tokio::test]
    async fn test_publish_reaches_every_listener() {
        let notifier = ChangeNotifier::new(8);
        assert_eq!(notifier.publish(ChangeEvent::Connectivity(true)), 0);

        let mut first = notifier.subscribe();
        let mut second = notifier.subscribe();
        assert_eq!(notifier.publish(ChangeEvent::Connectivity(false)), 2);

        assert_eq!(first.recv().await.unwrap(), ChangeEvent::Connectivity(false));
        assert_eq!(second.recv().await.unwrap(), ChangeEvent::Connectivity(false));

        drop(first);
        assert_eq!(notifier.listener_count(), 1);
    }
}
