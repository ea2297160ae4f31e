//! # Identity Resolver
//!
//! Computes the deduplication key of a record and the shop partition test.
//!
//! ## Key Fallback Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    resolve_key(kind, record)                            │
//! │                                                                         │
//! │  server id present? ──yes──► RecordKey::Server("srv-1")   "id:srv-1"   │
//! │       │ no                                                              │
//! │       ▼                                                                 │
//! │  queue id present?  ──yes──► RecordKey::Queue("q-1")      "queue:q-1"  │
//! │       │ no                                                              │
//! │       ▼                                                                 │
//! │  composite of the kind's business fields + shop                         │
//! │                       ──────► RecordKey::Composite("invoices:1042|main")│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The same order is applied everywhere records are merged, so the reconciler,
//! the reader overlay and the offline write queue agree on identity.

use std::fmt;

use serde_json::Value;

use crate::types::{EntityKind, Record};

/// A namespaced deduplication key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKey {
    /// Identity assigned by the remote store.
    Server(String),
    /// Identity minted locally by the offline write queue.
    Queue(String),
    /// Deterministic composite of business fields (already kind-prefixed).
    Composite(String),
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Server(id) => write!(f, "id:{}", id),
            RecordKey::Queue(id) => write!(f, "queue:{}", id),
            RecordKey::Composite(key) => f.write_str(key),
        }
    }
}

/// Resolves the deduplication key of a record.
pub fn resolve_key(kind: EntityKind, record: &Record) -> RecordKey {
    if let Some(id) = record.server_id() {
        return RecordKey::Server(id.to_string());
    }
    if let Some(queue_id) = record.queue_identity() {
        return RecordKey::Queue(queue_id.to_string());
    }
    RecordKey::Composite(composite_key(kind, record))
}

/// Every key a record can be matched under, most authoritative first.
///
/// A record with a server id and a queue id is reachable through both; a
/// record with neither is reachable only through its composite.
pub fn candidate_keys(kind: EntityKind, record: &Record) -> Vec<RecordKey> {
    let mut keys = Vec::with_capacity(2);
    if let Some(id) = record.server_id() {
        keys.push(RecordKey::Server(id.to_string()));
    }
    if let Some(queue_id) = record.queue_identity() {
        keys.push(RecordKey::Queue(queue_id.to_string()));
    }
    if keys.is_empty() {
        keys.push(RecordKey::Composite(composite_key(kind, record)));
    }
    keys
}

/// Builds the composite key from the kind's ordered business fields.
///
/// Never empty: the collection prefix is always present.
pub fn composite_key(kind: EntityKind, record: &Record) -> String {
    let mut parts: Vec<String> = kind
        .composite_fields()
        .iter()
        .map(|field| field_text(record.get(field)))
        .collect();
    parts.push(record.shop.clone());
    format!("{}:{}", kind.collection(), parts.join("|"))
}

/// Returns true when the record belongs to `shop`.
pub fn same_shop(record: &Record, shop: &str) -> bool {
    record.shop == shop
}

fn field_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn record(shop: &str, value: Value) -> Record {
        match value {
            Value::Object(map) => Record::new(shop, map),
            _ => Record::new(shop, Map::new()),
        }
    }

    #[test]
    fn test_server_id_wins() {
        let r = record("main", json!({"id": "srv-1", "queueId": "q-1"}));
        assert_eq!(
            resolve_key(EntityKind::Invoices, &r),
            RecordKey::Server("srv-1".into())
        );
        assert_eq!(
            candidate_keys(EntityKind::Invoices, &r),
            vec![RecordKey::Server("srv-1".into()), RecordKey::Queue("q-1".into())]
        );
    }

    #[test]
    fn test_queue_id_fallback() {
        let r = record("main", json!({"queueId": "q-1", "invoiceNumber": 7}));
        assert_eq!(
            resolve_key(EntityKind::Invoices, &r),
            RecordKey::Queue("q-1".into())
        );
    }

    #[test]
    fn test_composite_per_kind() {
        let invoice = record("main", json!({"invoiceNumber": 1042}));
        assert_eq!(
            resolve_key(EntityKind::Invoices, &invoice).to_string(),
            "invoices:1042|main"
        );

        let expense = record("main", json!({"date": "2024-01-01", "amount": 50}));
        assert_eq!(
            composite_key(EntityKind::Expenses, &expense),
            "masrofat:2024-01-01|50|main"
        );

        let line = record("north", json!({"code": "A1", "date": "2024-02-01"}));
        assert_eq!(
            composite_key(EntityKind::WarehouseReceipts, &line),
            "wared:A1|2024-02-01|north"
        );
    }

    #[test]
    fn test_composite_never_empty() {
        let empty = record("", json!({}));
        let key = resolve_key(EntityKind::Employees, &empty).to_string();
        assert!(!key.is_empty());
        assert!(key.starts_with("employees:"));
    }

    #[test]
    fn test_namespaces_do_not_collide() {
        assert_ne!(
            RecordKey::Server("x".into()).to_string(),
            RecordKey::Queue("x".into()).to_string()
        );
    }

    #[test]
    fn test_same_shop() {
        let r = record("main", json!({}));
        assert!(same_shop(&r, "main"));
        assert!(!same_shop(&r, "north"));
    }
}
