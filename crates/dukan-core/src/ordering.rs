//! # Entity Ordering Rules
//!
//! Filtering and sorting applied to every result set a reader emits.
//!
//! | Kind               | Rule                                          |
//! |--------------------|-----------------------------------------------|
//! | Products           | keep `type == "product"`                      |
//! | Invoices           | `invoiceNumber` descending (numeric)          |
//! | Expenses           | `date` descending                             |
//! | Warehouse receipts | `date` descending                             |
//! | Employees          | unchanged                                     |
//!
//! Values that can't be read as a number or a date sort last. Sorts are
//! stable, so records with equal keys keep their arrival order.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

use crate::types::{EntityKind, Record};
use crate::PRODUCT_TYPE;

/// Applies the kind's filter and sort to a raw result set.
pub fn apply_entity_rules(kind: EntityKind, mut records: Vec<Record>) -> Vec<Record> {
    match kind {
        EntityKind::Products => {
            records.retain(|r| r.get_str("type") == Some(PRODUCT_TYPE));
        }
        EntityKind::Invoices => {
            records.sort_by(|a, b| {
                descending_nulls_last(
                    invoice_number(a.get("invoiceNumber")),
                    invoice_number(b.get("invoiceNumber")),
                    |x, y| x.total_cmp(y),
                )
            });
        }
        EntityKind::Expenses | EntityKind::WarehouseReceipts => {
            records.sort_by(|a, b| {
                descending_nulls_last(date_key(a.get("date")), date_key(b.get("date")), Ord::cmp)
            });
        }
        EntityKind::Employees => {}
    }
    records
}

fn descending_nulls_last<T>(
    a: Option<T>,
    b: Option<T>,
    cmp: impl Fn(&T, &T) -> Ordering,
) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => cmp(&b, &a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Reads an invoice number stored as a number or a numeric string.
fn invoice_number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Reads a date as a UTC timestamp.
///
/// Accepts RFC 3339 timestamps, `YYYY-MM-DD` dates, `YYYY-MM-DDTHH:MM:SS`
/// without an offset, and `{seconds, nanoseconds}` timestamp objects.
pub fn date_key(value: Option<&Value>) -> Option<NaiveDateTime> {
    match value? {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(parsed) = DateTime::parse_from_rfc3339(s) {
                return Some(parsed.naive_utc());
            }
            if let Ok(parsed) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
                return Some(parsed);
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        }
        Value::Object(map) => {
            let seconds = map.get("seconds").or_else(|| map.get("_seconds"))?.as_i64()?;
            let nanos = map
                .get("nanoseconds")
                .or_else(|| map.get("_nanoseconds"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            DateTime::from_timestamp(seconds, nanos as u32).map(|dt| dt.naive_utc())
        }
        _ => None,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
