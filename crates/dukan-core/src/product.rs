//! # Product Model
//!
//! Typed view of product records and their variant structure.
//!
//! ## Variant Shapes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Product Variant Shapes                            │
//! │                                                                         │
//! │  FLAT            { quantity: 10 }                                       │
//! │                                                                         │
//! │  BY SIZE         { sizes: [ {size: "M", qty: 4}, {size: "L", qty: 6} ] }│
//! │                                                                         │
//! │  BY COLOR        { colors: [ {color: "red", quantity: 3} ] }            │
//! │   (flat color)                                                          │
//! │                                                                         │
//! │  BY COLOR+SIZE   { colors: [ {color: "red",                             │
//! │   (sized color)              sizes: [ {size: "M", qty: 3} ]} ] }        │
//! │                                                                         │
//! │  `quantity` always mirrors the aggregate of whichever shape is present. │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Stock numbers arrive from JavaScript clients and are read leniently:
//! numbers, numeric strings and fractions are accepted, garbage reads as 0.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::types::{EntityKind, Record};
use crate::PRODUCT_TYPE;

// =============================================================================
// Size
// =============================================================================

/// One size bucket, either at the top level or inside a color.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    #[serde(default)]
    pub size: String,

    #[serde(default, deserialize_with = "lenient::quantity")]
    pub qty: i64,
}

impl Size {
    pub fn new(size: impl Into<String>, qty: i64) -> Self {
        Size {
            size: size.into(),
            qty,
        }
    }
}

// =============================================================================
// Color
// =============================================================================

/// Stock held by one color: either a flat count or per-size buckets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColorStock {
    Flat(i64),
    Sized(Vec<Size>),
}

impl ColorStock {
    /// Total units held by this color.
    pub fn total(&self) -> i64 {
        match self {
            ColorStock::Flat(quantity) => *quantity,
            ColorStock::Sized(sizes) => sizes.iter().map(|s| s.qty).sum(),
        }
    }
}

/// One color entry of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawColor", into = "RawColor")]
pub struct Color {
    pub color: String,
    pub stock: ColorStock,
}

impl Color {
    /// A color tracking a flat count.
    pub fn flat(color: impl Into<String>, quantity: i64) -> Self {
        Color {
            color: color.into(),
            stock: ColorStock::Flat(quantity),
        }
    }

    /// A color tracking per-size buckets.
    pub fn sized(color: impl Into<String>, sizes: Vec<Size>) -> Self {
        Color {
            color: color.into(),
            stock: ColorStock::Sized(sizes),
        }
    }

    /// Total units held by this color.
    pub fn total(&self) -> i64 {
        self.stock.total()
    }
}

/// Wire shape of a color: `{color, quantity}` or `{color, sizes}`.
#[derive(Serialize, Deserialize)]
struct RawColor {
    #[serde(default)]
    color: String,

    #[serde(
        default,
        deserialize_with = "lenient::optional_quantity",
        skip_serializing_if = "Option::is_none"
    )]
    quantity: Option<i64>,

    #[serde(
        default,
        deserialize_with = "lenient::list",
        skip_serializing_if = "Vec::is_empty"
    )]
    sizes: Vec<Size>,
}

impl From<RawColor> for Color {
    fn from(raw: RawColor) -> Self {
        let stock = if raw.sizes.is_empty() {
            ColorStock::Flat(raw.quantity.unwrap_or(0))
        } else {
            ColorStock::Sized(raw.sizes)
        };
        Color {
            color: raw.color,
            stock,
        }
    }
}

impl From<Color> for RawColor {
    fn from(color: Color) -> Self {
        match color.stock {
            ColorStock::Flat(quantity) => RawColor {
                color: color.color,
                quantity: Some(quantity),
                sizes: Vec::new(),
            },
            ColorStock::Sized(sizes) => RawColor {
                color: color.color,
                quantity: None,
                sizes,
            },
        }
    }
}

// =============================================================================
// Product
// =============================================================================

/// A product record with typed stock fields.
///
/// Fields the data layer doesn't interpret travel in `extra` untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_id: Option<String>,

    #[serde(default)]
    pub shop: String,

    #[serde(default)]
    pub code: String,

    #[serde(default)]
    pub name: String,

    /// `"product"` for saleable products.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub product_type: Option<String>,

    /// Aggregate stock, mirrors the variant structure.
    #[serde(default, deserialize_with = "lenient::quantity")]
    pub quantity: i64,

    #[serde(default, deserialize_with = "lenient::list", skip_serializing_if = "Vec::is_empty")]
    pub colors: Vec<Color>,

    #[serde(default, deserialize_with = "lenient::list", skip_serializing_if = "Vec::is_empty")]
    pub sizes: Vec<Size>,

    #[serde(default, deserialize_with = "lenient::price", skip_serializing_if = "Option::is_none")]
    pub buy_price: Option<f64>,

    #[serde(default, deserialize_with = "lenient::price", skip_serializing_if = "Option::is_none")]
    pub sell_price: Option<f64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Product {
    /// Decodes a product from a generic record.
    pub fn from_record(record: &Record) -> CoreResult<Self> {
        serde_json::from_value(record.to_value()).map_err(|e| CoreError::MalformedRecord {
            entity: EntityKind::Products.to_string(),
            id: record.reference().unwrap_or("unsaved").to_string(),
            reason: e.to_string(),
        })
    }

    /// Encodes the product back into a generic record.
    pub fn to_record(&self) -> CoreResult<Record> {
        match serde_json::to_value(self) {
            Ok(Value::Object(fields)) => Ok(Record::new(self.shop.clone(), fields)),
            Ok(_) => Err(self.malformed("product did not serialize to an object")),
            Err(e) => Err(self.malformed(&e.to_string())),
        }
    }

    /// Server id if present, else queue id.
    pub fn reference(&self) -> Option<&str> {
        self.id
            .as_deref()
            .filter(|id| !id.is_empty())
            .or_else(|| self.queue_id.as_deref().filter(|id| !id.is_empty()))
    }

    /// Returns true for records shown in the product catalogue.
    pub fn is_saleable(&self) -> bool {
        self.product_type.as_deref() == Some(PRODUCT_TYPE)
    }

    /// Finds a color entry by name.
    pub fn color(&self, name: &str) -> Option<&Color> {
        self.colors.iter().find(|c| c.color == name)
    }

    /// Finds a top-level size entry by name.
    pub fn size(&self, name: &str) -> Option<&Size> {
        self.sizes.iter().find(|s| s.size == name)
    }

    fn malformed(&self, reason: &str) -> CoreError {
        CoreError::MalformedRecord {
            entity: EntityKind::Products.to_string(),
            id: self.reference().unwrap_or(&self.code).to_string(),
            reason: reason.to_string(),
        }
    }
}

// =============================================================================
// Variant Selector
// =============================================================================

/// Which branch of a product's variant structure an operation targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VariantSelector {
    /// No color, no size: the top-level quantity.
    Whole,
    /// A bare size.
    Size(String),
    /// A color, regardless of its sizes.
    Color(String),
    /// A size within a color.
    ColorSize { color: String, size: String },
}

impl VariantSelector {
    /// Builds a selector from optional parts; blank strings count as absent.
    pub fn from_parts(color: Option<&str>, size: Option<&str>) -> Self {
        let color = color.map(str::trim).filter(|c| !c.is_empty());
        let size = size.map(str::trim).filter(|s| !s.is_empty());
        match (color, size) {
            (Some(color), Some(size)) => VariantSelector::ColorSize {
                color: color.to_string(),
                size: size.to_string(),
            },
            (Some(color), None) => VariantSelector::Color(color.to_string()),
            (None, Some(size)) => VariantSelector::Size(size.to_string()),
            (None, None) => VariantSelector::Whole,
        }
    }

    pub fn color(&self) -> Option<&str> {
        match self {
            VariantSelector::Color(color) | VariantSelector::ColorSize { color, .. } => {
                Some(color)
            }
            _ => None,
        }
    }

    pub fn size(&self) -> Option<&str> {
        match self {
            VariantSelector::Size(size) | VariantSelector::ColorSize { size, .. } => Some(size),
            _ => None,
        }
    }
}

impl fmt::Display for VariantSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariantSelector::Whole => f.write_str("*"),
            VariantSelector::Size(size) => write!(f, "size={}", size),
            VariantSelector::Color(color) => write!(f, "color={}", color),
            VariantSelector::ColorSize { color, size } => {
                write!(f, "color={} size={}", color, size)
            }
        }
    }
}

// =============================================================================
// Cart Line
// =============================================================================

/// A session-scoped cart line. Never persisted.
///
/// Uses the snapshot pattern: code, name and prices are frozen when the line
/// is created so a product deleted at zero stock can be recreated on restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    /// Identity of the line inside the session.
    pub line_id: String,
    /// Originating product (server id or queue id).
    pub product_id: Option<String>,
    pub code: String,
    pub name: String,
    pub color: Option<String>,
    pub size: Option<String>,
    pub quantity: i64,
    pub buy_price: Option<f64>,
    pub sell_price: Option<f64>,
}

impl CartLine {
    /// Captures a cart line for `quantity` units of `selector` from `product`.
    pub fn from_product(product: &Product, selector: &VariantSelector, quantity: i64) -> Self {
        CartLine {
            line_id: Uuid::new_v4().to_string(),
            product_id: product.reference().map(str::to_string),
            code: product.code.clone(),
            name: product.name.clone(),
            color: selector.color().map(str::to_string),
            size: selector.size().map(str::to_string),
            quantity,
            buy_price: product.buy_price,
            sell_price: product.sell_price,
        }
    }

    /// The variant this line reserved.
    pub fn selector(&self) -> VariantSelector {
        VariantSelector::from_parts(self.color.as_deref(), self.size.as_deref())
    }
}

// =============================================================================
// Lenient Number Decoding
// =============================================================================

mod lenient {
    use super::*;

    fn to_i64(value: &Value) -> Option<i64> {
        match value {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(|f| f.trunc() as i64))
            }
            _ => None,
        }
    }

    fn to_f64(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn quantity<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(to_i64(&value).unwrap_or(0))
    }

    pub fn optional_quantity<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(to_i64(&value))
    }

    pub fn price<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(to_f64(&value))
    }

    /// `null` and missing arrays read as empty.
    pub fn list<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Ok(Option::<Vec<T>>::deserialize(d)?.unwrap_or_default())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
