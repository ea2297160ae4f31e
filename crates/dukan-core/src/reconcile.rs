//! # Cache Reconciler
//!
//! Merges an authoritative remote snapshot into the local cache of one
//! entity kind without losing writes the remote store hasn't seen yet.
//!
//! ## Merge Walkthrough
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  reconcile(kind, local, remote)                         │
//! │                                                                         │
//! │  LOCAL CACHE                          INDEX                             │
//! │  ┌───────────────────────────┐        id:srv-1   ──► 0                  │
//! │  │ 0 {id: srv-1, qty: 4}     │        queue:q-7  ──► 1                  │
//! │  │ 1 {queueId: q-7, offline} │        queue:q-9  ──► 2                  │
//! │  │ 2 {queueId: q-9, offline} │                                          │
//! │  └───────────────────────────┘                                          │
//! │                                                                         │
//! │  REMOTE SNAPSHOT                                                        │
//! │  {id: srv-1, qty: 3}                ──► matched: entry 0 overwritten    │
//! │  {id: srv-2, queueId: q-7, qty: 1}  ──► matched via queue:q-7,          │
//! │                                         entry 1 confirmed               │
//! │  {id: srv-3, qty: 8}                ──► appended                        │
//! │                                                                         │
//! │  entry 2 (q-9) has no remote counterpart ──► untouched, stays offline   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Remote values win on conflict and fields missing remotely are dropped.
//! A local entry absent from the snapshot is never deleted here: it is either
//! an unconfirmed offline write or a deletion that hasn't round-tripped yet.

use std::collections::{HashMap, HashSet};

use crate::identity::{candidate_keys, RecordKey};
use crate::types::{CacheEntry, EntityKind, Record};

// =============================================================================
// Result Types
// =============================================================================

/// Counters describing one reconciliation, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Remote records that overwrote an existing local entry.
    pub matched: usize,
    /// Remote records appended as new entries.
    pub appended: usize,
    /// Local entries the snapshot did not mention.
    pub untouched: usize,
}

/// The updated local cache plus its summary.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub entries: Vec<CacheEntry>,
    pub summary: ReconcileSummary,
}

// =============================================================================
// Reconcile
// =============================================================================

/// Merges `remote` into `local`.
///
/// Never fails: a record that cannot be matched is appended.
pub fn reconcile(kind: EntityKind, local: Vec<CacheEntry>, remote: &[Record]) -> Reconciled {
    let original_len = local.len();
    let mut entries = local;
    let mut index: HashMap<RecordKey, usize> = HashMap::with_capacity(entries.len() * 2);
    for (position, entry) in entries.iter().enumerate() {
        for key in candidate_keys(kind, &entry.record) {
            index.entry(key).or_insert(position);
        }
    }

    let mut summary = ReconcileSummary::default();
    let mut touched: HashSet<usize> = HashSet::new();

    for record in remote {
        let hit = candidate_keys(kind, record)
            .iter()
            .find_map(|key| index.get(key).copied());

        let position = match hit {
            Some(position) => {
                let previous_queue_id = entries[position].record.queue_identity().map(str::to_string);
                let mut confirmed = record.clone();
                confirmed.queue_id = previous_queue_id.or_else(|| record.queue_id.clone());
                entries[position] = CacheEntry::confirmed(confirmed);
                summary.matched += 1;
                position
            }
            None => {
                entries.push(CacheEntry::confirmed(record.clone()));
                summary.appended += 1;
                entries.len() - 1
            }
        };

        if position < original_len {
            touched.insert(position);
        }
        for key in candidate_keys(kind, &entries[position].record) {
            index.insert(key, position);
        }
    }

    summary.untouched = original_len - touched.len();
    Reconciled { entries, summary }
}

// =============================================================================
// Optimistic Overlay
// =============================================================================

/// Lays still-offline local entries over a remote snapshot.
///
/// Used by connected readers between snapshots: a pending local write
/// replaces its snapshot counterpart, or is appended when the remote store
/// hasn't seen it at all.
pub fn overlay_pending(kind: EntityKind, snapshot: &[Record], local: &[CacheEntry]) -> Vec<Record> {
    let mut records = snapshot.to_vec();
    let mut index: HashMap<RecordKey, usize> = HashMap::with_capacity(records.len());
    for (position, record) in records.iter().enumerate() {
        for key in candidate_keys(kind, record) {
            index.entry(key).or_insert(position);
        }
    }

    for entry in local.iter().filter(|e| e.is_offline) {
        let hit = candidate_keys(kind, &entry.record)
            .iter()
            .find_map(|key| index.get(key).copied());
        match hit {
            Some(position) => records[position] = entry.record.clone(),
            None => {
                records.push(entry.record.clone());
                for key in candidate_keys(kind, &entry.record) {
                    index.insert(key, records.len() - 1);
                }
            }
        }
    }
    records
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => Record::new("main", map),
            _ => Record::new("main", Map::new()),
        }
    }

    #[test]
    fn test_empty_cache_takes_whole_snapshot() {
        let remote: Vec<Record> = (0..5)
            .map(|i| record(json!({"id": format!("srv-{}", i), "code": i})))
            .collect();

        let result = reconcile(EntityKind::Products, Vec::new(), &remote);

        assert_eq!(result.entries.len(), 5);
        assert!(result.entries.iter().all(|e| !e.is_offline));
        assert_eq!(
            result.summary,
            ReconcileSummary {
                matched: 0,
                appended: 5,
                untouched: 0
            }
        );
    }

    #[test]
    fn test_offline_record_not_collapsed_into_unrelated_remote() {
        let local = vec![CacheEntry::offline(record(json!({"queueId": "q1", "invoiceNumber": 7})))];
        let remote = vec![record(json!({"id": "srv-new", "invoiceNumber": 8}))];

        let result = reconcile(EntityKind::Invoices, local, &remote);

        assert_eq!(result.entries.len(), 2);
        assert!(result.entries[0].is_offline);
        assert_eq!(result.entries[0].record.queue_identity(), Some("q1"));
        assert!(!result.entries[1].is_offline);
        assert_eq!(result.summary.untouched, 1);
    }

    #[test]
    fn test_round_tripped_write_matches_by_queue_id() {
        let local = vec![CacheEntry::offline(record(
            json!({"queueId": "q1", "name": "Sara", "note": "local only"}),
        ))];
        let remote = vec![record(json!({"id": "srv-1", "queueId": "q1", "name": "Sara A."}))];

        let result = reconcile(EntityKind::Employees, local, &remote);

        assert_eq!(result.entries.len(), 1);
        let entry = &result.entries[0];
        assert!(!entry.is_offline);
        assert_eq!(entry.record.server_id(), Some("srv-1"));
        assert_eq!(entry.record.queue_identity(), Some("q1"));
        assert_eq!(entry.record.get_str("name"), Some("Sara A."));
        // Remote truth wins: fields missing remotely are dropped.
        assert!(entry.record.get("note").is_none());
        assert_eq!(result.summary.matched, 1);
    }

    #[test]
    fn test_match_by_server_id_keeps_local_queue_id() {
        let local = vec![CacheEntry::offline(
            record(json!({"code": "A1", "quantity": 4}))
                .with_id("srv-1")
                .with_queue_id("q1"),
        )];
        let remote = vec![record(json!({"id": "srv-1", "code": "A1", "quantity": 3}))];

        let result = reconcile(EntityKind::Products, local, &remote);

        let entry = &result.entries[0];
        assert_eq!(entry.record.queue_identity(), Some("q1"));
        assert_eq!(entry.record.get("quantity"), Some(&json!(3)));
        assert!(!entry.is_offline);
    }

    #[test]
    fn test_identityless_records_match_by_composite() {
        let local = vec![CacheEntry::offline(record(json!({"date": "2024-01-01", "amount": 50})))];
        let remote = vec![record(json!({"date": "2024-01-01", "amount": 50, "note": "rent"}))];

        let result = reconcile(EntityKind::Expenses, local, &remote);

        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].record.get_str("note"), Some("rent"));
        assert!(!result.entries[0].is_offline);
    }

    #[test]
    fn test_duplicates_within_snapshot_collapse() {
        let remote = vec![
            record(json!({"id": "srv-1", "quantity": 1})),
            record(json!({"id": "srv-1", "quantity": 2})),
        ];

        let result = reconcile(EntityKind::Products, Vec::new(), &remote);

        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].record.get("quantity"), Some(&json!(2)));
    }

    #[test]
    fn test_local_only_records_survive() {
        let local = vec![
            CacheEntry::confirmed(record(json!({"id": "srv-1"}))),
            CacheEntry::confirmed(record(json!({"id": "srv-2"}))),
        ];
        let remote = vec![record(json!({"id": "srv-1"}))];

        let result = reconcile(EntityKind::Products, local, &remote);

        assert_eq!(result.entries.len(), 2);
        assert_eq!(result.summary.untouched, 1);
    }

    #[test]
    fn test_overlay_pending() {
        let snapshot = vec![
            record(json!({"id": "srv-1", "quantity": 5})),
            record(json!({"id": "srv-2", "quantity": 1})),
        ];
        let local = vec![
            CacheEntry::offline(record(json!({"id": "srv-1", "quantity": 4}))),
            CacheEntry::confirmed(record(json!({"id": "srv-2", "quantity": 9}))),
            CacheEntry::offline(record(json!({"queueId": "q-3", "quantity": 2}))),
        ];

        let view = overlay_pending(EntityKind::Products, &snapshot, &local);

        assert_eq!(view.len(), 3);
        assert_eq!(view[0].get("quantity"), Some(&json!(4)));
        // Confirmed local entries never override the snapshot.
        assert_eq!(view[1].get("quantity"), Some(&json!(1)));
        assert_eq!(view[2].queue_identity(), Some("q-3"));
    }
}
