//! # Offline Writer
//!
//! The offline write queue. Every write lands in the local cache first, then
//! goes to the remote store when connected, or waits in a durable queue
//! until connectivity returns.
//!
//! ## Write Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       OfflineWriter Flow                                │
//! │                                                                         │
//! │  add(kind, shop, fields)                                               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  1. mint queueId, write CacheEntry { isOffline: true }                 │
//! │     ──► offline<Stem>Added                                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  2. online? ──yes──► remote.add({..fields, queueId, shop})             │
//! │       │                   │ ok                   │ err                  │
//! │       │ no                ▼                      │                      │
//! │       │          entry gets server id,           │                      │
//! │       │          isOffline: false                │                      │
//! │       │          offlineQueueIds[q] = id         │                      │
//! │       ▼                                          ▼                      │
//! │  3. append PendingWrite to offlinePendingWrites ◄┘                      │
//! │                                                                         │
//! │  replay():  FIFO over offlinePendingWrites, stop at first failure      │
//! │  ┌────┬──────────────────┬──────────┬────────────────────────────────┐ │
//! │  │ #  │ op               │ attempts │                                │ │
//! │  ├────┼──────────────────┼──────────┼────────────────────────────────┤ │
//! │  │ 0  │ add q-1          │ 0        │ ──► remote.add, map q-1 → id   │ │
//! │  │ 1  │ update q-1 {..}  │ 0        │ ──► resolve q-1 → id, update   │ │
//! │  │ 2  │ delete srv-9     │ 3        │ ──► remote.delete              │ │
//! │  └────┴──────────────────┴──────────┴────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Deleting a record whose add never reached the remote store cancels the
//! queued add and its queued updates instead of queueing a delete.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dukan_core::types::{ID_FIELD, OFFLINE_FIELD, QUEUE_ID_FIELD, SHOP_FIELD};
use dukan_core::validation::{validate_reference, validate_shop};
use dukan_core::{CacheEntry, EntityKind, Record};
use dukan_store::{CacheStore, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connectivity::Connectivity;
use crate::error::{RemoteError, SyncError, SyncResult};
use crate::remote::RemoteStore;

// =============================================================================
// Constants
// =============================================================================

/// Storage key of the pending write queue.
pub const PENDING_WRITES_KEY: &str = "offlinePendingWrites";

/// Storage key of the queue id → server id map.
pub const QUEUE_IDS_KEY: &str = "offlineQueueIds";

/// Replay attempts before a pending write is dropped.
const MAX_REPLAY_ATTEMPTS: u32 = 10;

// =============================================================================
// Queue Types
// =============================================================================

/// One queued remote operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PendingOp {
    Add {
        kind: EntityKind,
        record: Record,
    },
    Update {
        kind: EntityKind,
        shop: String,
        reference: String,
        patch: Map<String, Value>,
    },
    Delete {
        kind: EntityKind,
        shop: String,
        reference: String,
    },
}

impl PendingOp {
    pub fn kind(&self) -> EntityKind {
        match self {
            PendingOp::Add { kind, .. }
            | PendingOp::Update { kind, .. }
            | PendingOp::Delete { kind, .. } => *kind,
        }
    }

    /// Queue id or server id the operation targets.
    pub fn target(&self) -> Option<&str> {
        match self {
            PendingOp::Add { record, .. } => record.queue_identity(),
            PendingOp::Update { reference, .. } | PendingOp::Delete { reference, .. } => {
                Some(reference)
            }
        }
    }

    fn label(&self) -> &'static str {
        match self {
            PendingOp::Add { .. } => "add",
            PendingOp::Update { .. } => "update",
            PendingOp::Delete { .. } => "delete",
        }
    }
}

/// A queued operation with its bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingWrite {
    pub id: String,
    pub op: PendingOp,
    pub queued_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl PendingWrite {
    fn new(op: PendingOp) -> Self {
        PendingWrite {
            id: Uuid::new_v4().to_string(),
            op,
            queued_at: Utc::now(),
            attempts: 0,
            last_error: None,
        }
    }
}

/// Result of a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAck {
    /// Server id once confirmed, else the queue id (or the reference written to).
    pub id: String,
    pub queue_id: Option<String>,
    /// True when the remote store accepted the write before returning.
    pub confirmed: bool,
}

/// Counters of one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub replayed: usize,
    pub dropped: usize,
    pub remaining: usize,
}

// =============================================================================
// Offline Writer
// =============================================================================

/// Writes through the local cache to the remote store.
pub struct OfflineWriter {
    cache: Arc<CacheStore>,
    remote: Arc<dyn RemoteStore>,
    connectivity: Arc<Connectivity>,
    /// Serialises queue mutations and replay.
    queue: Mutex<()>,
}

impl OfflineWriter {
    pub fn new(
        cache: Arc<CacheStore>,
        remote: Arc<dyn RemoteStore>,
        connectivity: Arc<Connectivity>,
    ) -> Self {
        OfflineWriter {
            cache,
            remote,
            connectivity,
            queue: Mutex::new(()),
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Creates a record.
    pub async fn add(
        &self,
        kind: EntityKind,
        shop: &str,
        fields: Map<String, Value>,
    ) -> SyncResult<WriteAck> {
        validate_shop(shop)?;

        let queue_id = Uuid::new_v4().to_string();
        let mut record = Record::new(shop, strip_reserved(fields));
        record.id = None;
        record.queue_id = Some(queue_id.clone());

        self.cache.upsert(kind, CacheEntry::offline(record.clone())).await?;
        debug!(kind = %kind, shop = %shop, queue_id = %queue_id, "Record written to local cache");

        if self.is_online() {
            match self.remote.add(kind, record.clone()).await {
                Ok(id) => {
                    self.confirm_add(kind, shop, &queue_id, &id).await?;
                    return Ok(WriteAck {
                        id,
                        queue_id: Some(queue_id),
                        confirmed: true,
                    });
                }
                Err(err) => {
                    warn!(kind = %kind, queue_id = %queue_id, error = %err, "Remote add failed; queued for replay");
                }
            }
        }

        self.enqueue(PendingOp::Add { kind, record }).await?;
        Ok(WriteAck {
            id: queue_id.clone(),
            queue_id: Some(queue_id),
            confirmed: false,
        })
    }

    /// Applies a partial update to the record answering to `reference`.
    ///
    /// ## Errors
    /// `Storage(NotFound)` when the record is not cached and the device is
    /// offline.
    pub async fn update(
        &self,
        kind: EntityKind,
        shop: &str,
        reference: &str,
        patch: Map<String, Value>,
    ) -> SyncResult<WriteAck> {
        validate_reference(reference)?;
        let patch = strip_reserved(patch);

        let cached = match self
            .cache
            .update_with(kind, shop, reference, |entry| {
                entry.record.merge_fields(&patch);
                entry.is_offline = true;
            })
            .await
        {
            Ok(entry) => Some(entry),
            Err(StoreError::NotFound { .. }) => None,
            Err(err) => return Err(err.into()),
        };

        let Some(entry) = cached else {
            if !self.is_online() {
                return Err(StoreError::not_found(kind.to_string(), reference).into());
            }
            let _guard = self.queue.lock().await;
            if self.has_pending_for(&[reference]).await? {
                debug!(kind = %kind, reference = %reference, "Earlier writes still queued; update queued behind them");
            } else {
                self.remote.update(kind, reference, &patch).await?;
                return Ok(WriteAck {
                    id: reference.to_string(),
                    queue_id: None,
                    confirmed: true,
                });
            }
            self.push_pending(PendingOp::Update {
                kind,
                shop: shop.to_string(),
                reference: reference.to_string(),
                patch,
            })
            .await?;
            return Ok(WriteAck {
                id: reference.to_string(),
                queue_id: None,
                confirmed: false,
            });
        };

        let queue_id = entry.record.queue_identity().map(str::to_string);

        // Held until the write is either sent or queued, so a direct write
        // never overtakes a queued one for the same record.
        let _guard = self.queue.lock().await;
        if self.is_online() {
            if let Some(server_id) = self.server_id_for(&entry.record).await? {
                let identities = record_identities(reference, Some(server_id.as_str()), queue_id.as_deref());
                if self.has_pending_for(&identities).await? {
                    debug!(kind = %kind, reference = %reference, "Earlier writes still queued; update queued behind them");
                } else {
                    match self.remote.update(kind, &server_id, &patch).await {
                        Ok(()) => {
                            self.mark_confirmed(kind, shop, &server_id).await?;
                            return Ok(WriteAck {
                                id: server_id,
                                queue_id,
                                confirmed: true,
                            });
                        }
                        Err(err) => {
                            warn!(kind = %kind, reference = %reference, error = %err, "Remote update failed; queued for replay");
                        }
                    }
                }
            }
        }

        self.push_pending(PendingOp::Update {
            kind,
            shop: shop.to_string(),
            reference: reference.to_string(),
            patch,
        })
        .await?;
        Ok(WriteAck {
            id: reference.to_string(),
            queue_id,
            confirmed: false,
        })
    }

    /// Deletes the record answering to `reference`.
    pub async fn delete(&self, kind: EntityKind, shop: &str, reference: &str) -> SyncResult<WriteAck> {
        validate_reference(reference)?;

        let cached = self.cache.find(kind, shop, reference).await?;
        self.cache.remove(kind, shop, reference).await?;

        let queue_id = cached
            .as_ref()
            .and_then(|e| e.record.queue_identity())
            .map(str::to_string);
        let server_id = match &cached {
            Some(entry) => self.server_id_for(&entry.record).await?,
            None => Some(reference.to_string()),
        };

        let Some(server_id) = server_id else {
            // never reached the remote store
            if let Some(queue_id) = &queue_id {
                self.cancel_pending(queue_id).await?;
            }
            return Ok(WriteAck {
                id: reference.to_string(),
                queue_id,
                confirmed: true,
            });
        };

        let _guard = self.queue.lock().await;
        if self.is_online() {
            let identities = record_identities(reference, Some(server_id.as_str()), queue_id.as_deref());
            if self.has_pending_for(&identities).await? {
                debug!(kind = %kind, reference = %reference, "Earlier writes still queued; delete queued behind them");
            } else {
                match self.remote.delete(kind, &server_id).await {
                    Ok(()) | Err(RemoteError::NotFound { .. }) => {
                        return Ok(WriteAck {
                            id: server_id,
                            queue_id,
                            confirmed: true,
                        });
                    }
                    Err(err) => {
                        warn!(kind = %kind, reference = %reference, error = %err, "Remote delete failed; queued for replay");
                    }
                }
            }
        }

        self.push_pending(PendingOp::Delete {
            kind,
            shop: shop.to_string(),
            reference: server_id.clone(),
        })
        .await?;
        Ok(WriteAck {
            id: server_id,
            queue_id,
            confirmed: false,
        })
    }

    // =========================================================================
    // Queue
    // =========================================================================

    /// Pending writes in FIFO order.
    pub async fn pending(&self) -> SyncResult<Vec<PendingWrite>> {
        let _guard = self.queue.lock().await;
        self.load_pending().await
    }

    pub async fn pending_count(&self) -> SyncResult<usize> {
        Ok(self.pending().await?.len())
    }

    /// Replays pending writes in order, stopping at the first failure.
    ///
    /// Does nothing while offline.
    pub async fn replay(&self) -> SyncResult<ReplaySummary> {
        let _guard = self.queue.lock().await;
        let mut pending = self.load_pending().await?;
        let mut summary = ReplaySummary::default();

        if pending.is_empty() || !self.is_online() {
            summary.remaining = pending.len();
            return Ok(summary);
        }

        info!(count = pending.len(), "Replaying offline writes");

        while let Some(write) = pending.first() {
            if write.attempts >= MAX_REPLAY_ATTEMPTS {
                warn!(
                    id = %write.id,
                    op = write.op.label(),
                    kind = %write.op.kind(),
                    attempts = write.attempts,
                    last_error = ?write.last_error,
                    "Dropping write that exceeded max replay attempts"
                );
                pending.remove(0);
                summary.dropped += 1;
                self.save_pending(&pending).await?;
                continue;
            }

            match self.apply(&write.op).await {
                Ok(()) => {
                    debug!(id = %write.id, op = write.op.label(), kind = %write.op.kind(), "Replayed write");
                    pending.remove(0);
                    summary.replayed += 1;
                    self.save_pending(&pending).await?;
                }
                Err(err) => {
                    warn!(id = %write.id, op = write.op.label(), error = %err, "Replay stopped");
                    let head = &mut pending[0];
                    head.attempts += 1;
                    head.last_error = Some(err.to_string());
                    self.save_pending(&pending).await?;
                    break;
                }
            }
        }

        summary.remaining = pending.len();
        info!(
            replayed = summary.replayed,
            dropped = summary.dropped,
            remaining = summary.remaining,
            "Replay finished"
        );
        Ok(summary)
    }

    /// Server id recorded for a queue id.
    pub async fn server_id_for_queue(&self, queue_id: &str) -> SyncResult<Option<String>> {
        Ok(self.load_queue_ids().await?.get(queue_id).cloned())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn apply(&self, op: &PendingOp) -> SyncResult<()> {
        match op {
            PendingOp::Add { kind, record } => {
                let id = self.remote.add(*kind, record.clone()).await?;
                if let Some(queue_id) = record.queue_identity() {
                    self.confirm_add(*kind, &record.shop, queue_id, &id).await?;
                }
                Ok(())
            }
            PendingOp::Update {
                kind,
                shop,
                reference,
                patch,
            } => {
                let server_id = self.resolve_reference(*kind, shop, reference).await?;
                self.remote.update(*kind, &server_id, patch).await?;
                self.mark_confirmed(*kind, shop, &server_id).await
            }
            PendingOp::Delete {
                kind,
                shop,
                reference,
            } => {
                let server_id = self.resolve_reference(*kind, shop, reference).await?;
                match self.remote.delete(*kind, &server_id).await {
                    Ok(()) | Err(RemoteError::NotFound { .. }) => Ok(()),
                    Err(err) => Err(err.into()),
                }
            }
        }
    }

    /// Records the server id of a confirmed add.
    async fn confirm_add(
        &self,
        kind: EntityKind,
        shop: &str,
        queue_id: &str,
        server_id: &str,
    ) -> SyncResult<()> {
        let mut ids = self.load_queue_ids().await?;
        ids.insert(queue_id.to_string(), server_id.to_string());
        self.save_json(QUEUE_IDS_KEY, &ids).await?;

        let confirmed = server_id.to_string();
        match self
            .cache
            .update_with(kind, shop, queue_id, move |entry| {
                entry.record.id = Some(confirmed);
                entry.is_offline = false;
            })
            .await
        {
            Ok(_) | Err(StoreError::NotFound { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn mark_confirmed(&self, kind: EntityKind, shop: &str, reference: &str) -> SyncResult<()> {
        match self
            .cache
            .update_with(kind, shop, reference, |entry| entry.is_offline = false)
            .await
        {
            Ok(_) | Err(StoreError::NotFound { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn server_id_for(&self, record: &Record) -> SyncResult<Option<String>> {
        if let Some(id) = record.server_id() {
            return Ok(Some(id.to_string()));
        }
        match record.queue_identity() {
            Some(queue_id) => self.server_id_for_queue(queue_id).await,
            None => Ok(None),
        }
    }

    /// Maps a queued reference to a server id at replay time.
    async fn resolve_reference(&self, kind: EntityKind, shop: &str, reference: &str) -> SyncResult<String> {
        if let Some(id) = self.server_id_for_queue(reference).await? {
            return Ok(id);
        }
        if let Some(entry) = self.cache.find(kind, shop, reference).await? {
            if let Some(id) = entry.record.server_id() {
                return Ok(id.to_string());
            }
            return Err(SyncError::Internal(format!(
                "{} {} has no server id yet",
                kind, reference
            )));
        }
        Ok(reference.to_string())
    }

    async fn enqueue(&self, op: PendingOp) -> SyncResult<()> {
        let _guard = self.queue.lock().await;
        self.push_pending(op).await
    }

    /// Appends to the queue. The caller holds the queue lock.
    async fn push_pending(&self, op: PendingOp) -> SyncResult<()> {
        let mut pending = self.load_pending().await?;
        let write = PendingWrite::new(op);
        debug!(id = %write.id, op = write.op.label(), kind = %write.op.kind(), "Write queued");
        pending.push(write);
        self.save_pending(&pending).await
    }

    /// True when a queued write targets any of `identities`. The caller
    /// holds the queue lock.
    async fn has_pending_for(&self, identities: &[&str]) -> SyncResult<bool> {
        Ok(self
            .load_pending()
            .await?
            .iter()
            .any(|write| write.op.target().is_some_and(|t| identities.contains(&t))))
    }

    /// Drops every queued operation targeting `queue_id`.
    async fn cancel_pending(&self, queue_id: &str) -> SyncResult<()> {
        let _guard = self.queue.lock().await;
        let mut pending = self.load_pending().await?;
        let before = pending.len();
        pending.retain(|write| write.op.target() != Some(queue_id));
        if pending.len() != before {
            debug!(queue_id = %queue_id, cancelled = before - pending.len(), "Cancelled queued writes");
            self.save_pending(&pending).await?;
        }
        Ok(())
    }

    async fn load_pending(&self) -> SyncResult<Vec<PendingWrite>> {
        self.load_json(PENDING_WRITES_KEY).await
    }

    async fn save_pending(&self, pending: &[PendingWrite]) -> SyncResult<()> {
        self.save_json(PENDING_WRITES_KEY, &pending).await
    }

    async fn load_queue_ids(&self) -> SyncResult<BTreeMap<String, String>> {
        self.load_json(QUEUE_IDS_KEY).await
    }

    async fn load_json<T>(&self, key: &str) -> SyncResult<T>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        let Some(blob) = self.cache.storage().load(key).await? else {
            return Ok(T::default());
        };
        match serde_json::from_str(&blob) {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(key = %key, error = %err, "Stored queue unreadable; treating as empty");
                Ok(T::default())
            }
        }
    }

    async fn save_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> SyncResult<()> {
        let blob = serde_json::to_string(value)?;
        self.cache.storage().save(key, &blob).await?;
        Ok(())
    }
}

/// Every identity a queued write may have used for one record.
fn record_identities<'a>(
    reference: &'a str,
    server_id: Option<&'a str>,
    queue_id: Option<&'a str>,
) -> Vec<&'a str> {
    let mut identities = vec![reference];
    identities.extend(server_id);
    identities.extend(queue_id);
    identities
}

/// Removes identity and partition keys a caller may not write directly.
fn strip_reserved(mut fields: Map<String, Value>) -> Map<String, Value> {
    for key in [ID_FIELD, QUEUE_ID_FIELD, SHOP_FIELD, OFFLINE_FIELD] {
        fields.remove(key);
    }
    fields
}
