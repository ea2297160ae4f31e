//! # dukan-core: Pure Logic for the Dukan Data Layer
//!
//! This crate holds every piece of the offline data layer that can be
//! expressed as a pure function: record identity, snapshot reconciliation,
//! variant-aware stock math and entity ordering rules.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Dukan Architecture                               │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                dukan-sync (readers, stock service)              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                dukan-store (local cache, notifier)              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ dukan-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ identity  │  │ reconcile │  │ inventory │  │   │
//! │  │   │  Record   │  │ RecordKey │  │  merge    │  │ available │  │   │
//! │  │   │ CacheEntry│  │ same_shop │  │  overlay  │  │ reserve   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO STORAGE • NO NETWORK • PURE FUNCTIONS            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Entity kinds, generic records, local cache entries
//! - [`product`] - Product / color / size model, cart lines, variant selectors
//! - [`identity`] - Deduplication keys and the shop partition predicate
//! - [`reconcile`] - Merging remote snapshots into the local cache
//! - [`inventory`] - Availability, aggregate recomputation, reserve/restore plans
//! - [`ordering`] - Per-entity filtering and sorting of result sets
//! - [`validation`] - Input validation
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use dukan_core::inventory::available_quantity;
//! use dukan_core::{Product, VariantSelector};
//!
//! let product: Product = serde_json::from_value(serde_json::json!({
//!     "code": "A1",
//!     "quantity": 5,
//!     "colors": [{ "color": "red", "sizes": [{ "size": "M", "qty": 5 }] }]
//! }))
//! .unwrap();
//!
//! let selector = VariantSelector::from_parts(Some("red"), Some("M"));
//! assert_eq!(available_quantity(&product, &selector), 5);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod identity;
pub mod inventory;
pub mod ordering;
pub mod product;
pub mod reconcile;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use identity::{resolve_key, same_shop, RecordKey};
pub use product::{CartLine, Color, ColorStock, Product, Size, VariantSelector};
pub use reconcile::{reconcile, ReconcileSummary, Reconciled};
pub use types::{CacheEntry, EntityKind, Record};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Value of the `type` field that marks a record as a saleable product.
///
/// The products collection also holds non-saleable documents; readers only
/// surface records carrying this type.
pub const PRODUCT_TYPE: &str = "product";

/// Size label used when stock for a color has to be stored per-size but no
/// explicit size was captured ("الكمية", literally "quantity").
///
/// ## Where It Appears
/// - Recreating a deleted product from a cart line that had a color only
/// - Restoring color-only stock into a color that tracks sizes
/// - Carrying a flat color quantity over when the color gains sizes
pub const DEFAULT_SIZE_LABEL: &str = "الكمية";
