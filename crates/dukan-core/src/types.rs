//! # Domain Types
//!
//! Entity kinds, generic records and local cache entries.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   EntityKind    │   │     Record      │   │   CacheEntry    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  Products       │   │  id?  (server)  │   │  record         │       │
//! │  │  Warehouse...   │   │  queueId? (local│   │  isOffline      │       │
//! │  │  Employees      │   │  shop           │   │                 │       │
//! │  │  Expenses       │   │  fields {...}   │   │                 │       │
//! │  │  Invoices       │   └─────────────────┘   └─────────────────┘       │
//! │  └─────────────────┘                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual Identity Pattern
//! Every record may carry:
//! - `id`: server identity, assigned once the remote store confirms the write
//! - `queueId`: queue identity, minted locally at creation and kept afterward

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;

use crate::error::ValidationError;

/// Reserved field holding the server identity.
pub const ID_FIELD: &str = "id";

/// Reserved field holding the queue identity.
pub const QUEUE_ID_FIELD: &str = "queueId";

/// Reserved field holding the shop partition.
pub const SHOP_FIELD: &str = "shop";

/// Reserved field marking a cache entry as not yet confirmed.
pub const OFFLINE_FIELD: &str = "isOffline";

// =============================================================================
// Entity Kind
// =============================================================================

/// The kinds of records kept in the local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Products,
    /// Warehouse receipt lines ("wared").
    WarehouseReceipts,
    Employees,
    /// Expenses ("masrofat").
    Expenses,
    Invoices,
}

impl EntityKind {
    /// Number of entity kinds.
    pub const COUNT: usize = 5;

    /// Every entity kind, in storage order.
    pub const ALL: [EntityKind; Self::COUNT] = [
        EntityKind::Products,
        EntityKind::WarehouseReceipts,
        EntityKind::Employees,
        EntityKind::Expenses,
        EntityKind::Invoices,
    ];

    /// Durable local storage key holding this kind's cache blob.
    pub const fn storage_key(self) -> &'static str {
        match self {
            EntityKind::Products => "offlineProducts",
            EntityKind::WarehouseReceipts => "offlineWared",
            EntityKind::Employees => "offlineEmployees",
            EntityKind::Expenses => "offlineMasrofat",
            EntityKind::Invoices => "offlineInvoices",
        }
    }

    /// Remote collection name.
    pub const fn collection(self) -> &'static str {
        match self {
            EntityKind::Products => "products",
            EntityKind::WarehouseReceipts => "wared",
            EntityKind::Employees => "employees",
            EntityKind::Expenses => "masrofat",
            EntityKind::Invoices => "invoices",
        }
    }

    /// Stem used in legacy event names (`offline<Stem>Added`).
    pub const fn event_stem(self) -> &'static str {
        match self {
            EntityKind::Products => "Product",
            EntityKind::WarehouseReceipts => "Wared",
            EntityKind::Employees => "Employee",
            EntityKind::Expenses => "Masrof",
            EntityKind::Invoices => "Invoice",
        }
    }

    /// Ordered business fields forming the composite identity (shop is
    /// always appended).
    pub const fn composite_fields(self) -> &'static [&'static str] {
        match self {
            EntityKind::Products => &["code"],
            EntityKind::WarehouseReceipts => &["code", "date"],
            EntityKind::Employees => &["name", "phone"],
            EntityKind::Expenses => &["date", "amount"],
            EntityKind::Invoices => &["invoiceNumber"],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

impl FromStr for EntityKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "products" | "product" => Ok(EntityKind::Products),
            "wared" | "warehouse_receipts" | "warehouse" => Ok(EntityKind::WarehouseReceipts),
            "employees" | "employee" => Ok(EntityKind::Employees),
            "masrofat" | "expenses" | "expense" | "masrof" => Ok(EntityKind::Expenses),
            "invoices" | "invoice" => Ok(EntityKind::Invoices),
            other => Err(ValidationError::InvalidFormat {
                field: "entity kind".to_string(),
                reason: format!("unknown kind '{}'", other),
            }),
        }
    }
}

// =============================================================================
// Record
// =============================================================================

/// A generic business record: a bag of named fields in exactly one shop.
///
/// Serialized flat, e.g.
/// `{"id": "srv-1", "queueId": "q-1", "shop": "main", "code": "A1", ...}`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Server identity (absent until the remote store confirms the record).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Queue identity minted by the offline write queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_id: Option<String>,

    /// Tenant partition.
    #[serde(default)]
    pub shop: String,

    /// All remaining business fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Builds a record from raw fields, lifting reserved keys out of the map.
    ///
    /// A `shop` field inside `fields` is ignored in favour of the explicit
    /// partition; `isOffline` never belongs to a record and is dropped.
    pub fn new(shop: impl Into<String>, fields: Map<String, Value>) -> Self {
        let mut record = Record {
            shop: shop.into(),
            ..Default::default()
        };
        for (name, value) in fields {
            if name == SHOP_FIELD {
                continue;
            }
            record.set(name, value);
        }
        record
    }

    /// Sets the server identity.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the queue identity.
    pub fn with_queue_id(mut self, queue_id: impl Into<String>) -> Self {
        self.queue_id = Some(queue_id.into());
        self
    }

    /// Returns the server identity, treating blank ids as absent.
    pub fn server_id(&self) -> Option<&str> {
        non_blank(self.id.as_deref())
    }

    /// Returns the queue identity, treating blank ids as absent.
    pub fn queue_identity(&self) -> Option<&str> {
        non_blank(self.queue_id.as_deref())
    }

    /// Server id if present, else queue id.
    pub fn reference(&self) -> Option<&str> {
        self.server_id().or_else(|| self.queue_identity())
    }

    /// Returns true when `reference` names this record under either identity.
    pub fn answers_to(&self, reference: &str) -> bool {
        self.server_id() == Some(reference) || self.queue_identity() == Some(reference)
    }

    /// Returns a business field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Returns a business field as a string slice.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    /// Sets a field, routing reserved keys to their typed slots.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        let field = field.into();
        match field.as_str() {
            ID_FIELD => self.id = value_as_identity(&value),
            QUEUE_ID_FIELD => self.queue_id = value_as_identity(&value),
            SHOP_FIELD => {
                if let Some(shop) = value.as_str() {
                    self.shop = shop.to_string();
                }
            }
            OFFLINE_FIELD => {}
            _ => {
                self.fields.insert(field, value);
            }
        }
    }

    /// Applies a partial update on top of the current fields.
    pub fn merge_fields(&mut self, patch: &Map<String, Value>) {
        for (name, value) in patch {
            self.set(name.clone(), value.clone());
        }
    }

    /// Serializes the record into one flat JSON object.
    pub fn to_value(&self) -> Value {
        let mut object = self.fields.clone();
        if let Some(id) = &self.id {
            object.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        }
        if let Some(queue_id) = &self.queue_id {
            object.insert(QUEUE_ID_FIELD.to_string(), Value::String(queue_id.clone()));
        }
        object.insert(SHOP_FIELD.to_string(), Value::String(self.shop.clone()));
        Value::Object(object)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn value_as_identity(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// =============================================================================
// Local Cache Entry
// =============================================================================

/// A record as stored in the local cache blob.
///
/// `isOffline` stays true until a remote snapshot confirms the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    #[serde(flatten)]
    pub record: Record,

    #[serde(default)]
    pub is_offline: bool,
}

impl CacheEntry {
    /// Wraps a record written locally and not yet confirmed.
    pub fn offline(record: Record) -> Self {
        CacheEntry {
            record,
            is_offline: true,
        }
    }

    /// Wraps a record confirmed by the remote store.
    pub fn confirmed(record: Record) -> Self {
        CacheEntry {
            record,
            is_offline: false,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_storage_keys() {
        assert_eq!(EntityKind::Products.storage_key(), "offlineProducts");
        assert_eq!(EntityKind::WarehouseReceipts.storage_key(), "offlineWared");
        assert_eq!(EntityKind::Employees.storage_key(), "offlineEmployees");
        assert_eq!(EntityKind::Expenses.storage_key(), "offlineMasrofat");
        assert_eq!(EntityKind::Invoices.storage_key(), "offlineInvoices");
    }

    #[test]
    fn test_entity_kind_parsing() {
        assert_eq!("wared".parse::<EntityKind>().unwrap(), EntityKind::WarehouseReceipts);
        assert_eq!("masrofat".parse::<EntityKind>().unwrap(), EntityKind::Expenses);
        assert_eq!("Products".parse::<EntityKind>().unwrap(), EntityKind::Products);
        assert!("customers".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_record_lifts_reserved_fields() {
        let record = Record::new(
            "main",
            fields(json!({
                "id": "srv-1",
                "queueId": "q-1",
                "shop": "other",
                "isOffline": true,
                "code": "A1"
            })),
        );

        assert_eq!(record.server_id(), Some("srv-1"));
        assert_eq!(record.queue_identity(), Some("q-1"));
        assert_eq!(record.shop, "main");
        assert_eq!(record.fields.len(), 1);
        assert_eq!(record.get_str("code"), Some("A1"));
    }

    #[test]
    fn test_blank_identities_are_absent() {
        let record = Record::new("main", Map::new()).with_id("  ");
        assert_eq!(record.server_id(), None);
        assert_eq!(record.reference(), None);
    }

    #[test]
    fn test_cache_entry_json_shape() {
        let entry = CacheEntry::offline(
            Record::new("main", fields(json!({"code": "A1"}))).with_queue_id("q-1"),
        );

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["queueId"], "q-1");
        assert_eq!(value["shop"], "main");
        assert_eq!(value["isOffline"], true);
        assert_eq!(value["code"], "A1");

        let back: CacheEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back, entry);
        assert!(!back.record.fields.contains_key("isOffline"));
    }

    #[test]
    fn test_merge_fields_routes_reserved_keys() {
        let mut record = Record::new("main", fields(json!({"name": "old"})));
        record.merge_fields(&fields(json!({"name": "new", "id": "srv-9"})));

        assert_eq!(record.get_str("name"), Some("new"));
        assert_eq!(record.server_id(), Some("srv-9"));
        assert!(record.answers_to("srv-9"));
    }
}
