//! # Error Types
//!
//! Domain-specific error types for dukan-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  dukan-core errors (this file)                                         │
//! │  ├── CoreError        - Stock and record-shape failures                │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  dukan-store errors (separate crate)                                   │
//! │  └── StoreError       - Durable local storage failures                 │
//! │                                                                         │
//! │  dukan-sync errors (separate crate)                                    │
//! │  ├── RemoteError      - Remote store / subscription failures           │
//! │  └── SyncError        - Everything the coordination layer can hit      │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → outcome values        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Identity resolution, reconciliation and the quantity engine are total and
//! never produce these errors; only planning a reservation and decoding a
//! record into a [`Product`](crate::Product) can fail.

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// Product cannot be found.
    ///
    /// ## When This Occurs
    /// - Product id is in neither the local cache nor the remote store
    /// - Product was auto-deleted after its stock reached zero
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// Requested reservation exceeds the stock of the selected variant.
    ///
    /// ## User Workflow
    /// ```text
    /// Add to Cart (red / M, qty: 7)
    ///      │
    ///      ▼
    /// available_quantity(red, M) = 5
    ///      │
    ///      ▼
    /// InsufficientStock { code: "A1", available: 5, requested: 7 }
    ///      │
    ///      ▼
    /// UI shows: "Only 5 left"
    /// ```
    #[error("Insufficient stock for {code}: available {available}, requested {requested}")]
    InsufficientStock {
        code: String,
        available: i64,
        requested: i64,
    },

    /// A record could not be decoded into the expected shape.
    #[error("Malformed {entity} record {id}: {reason}")]
    MalformedRecord {
        entity: String,
        id: String,
        reason: String,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Returns the available amount carried by an insufficient-stock error.
    pub fn available(&self) -> Option<i64> {
        match self {
            CoreError::InsufficientStock { available, .. } => Some(*available),
            _ => None,
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when caller input doesn't meet requirements.
/// Used for early validation before any stock math runs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., unknown entity kind).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
