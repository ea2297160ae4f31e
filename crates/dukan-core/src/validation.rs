//! # Validation Module
//!
//! Input validation for the data layer's entry points.
//!
//! ## Where Validation Runs
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Points                                  │
//! │                                                                         │
//! │  Cart add / remove ──► validate_quantity                               │
//! │                                                                         │
//! │  Reader subscribe  ──► validate_shop                                   │
//! │  Offline writes    ──► validate_shop, validate_reference               │
//! │                                                                         │
//! │  Product seed      ──► validate_code                                   │
//! │                                                                         │
//! │  Everything past these checks (identity, reconcile, stock math) is     │
//! │  total and does not re-validate.                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use dukan_core::validation::{validate_quantity, validate_shop};
//!
//! validate_shop("main").unwrap();
//! validate_quantity(5).unwrap();
//! ```

use crate::error::ValidationError;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Separator used inside composite keys.
const KEY_SEPARATOR: char = '|';

// =============================================================================
// String Validators
// =============================================================================

/// Validates a shop identifier.
///
/// ## Rules
/// - Must not be empty
/// - At most 100 characters
/// - Must not contain `|` (it separates the parts of a composite key)
///
/// ## Example
/// ```rust
/// use dukan_core::validation::validate_shop;
///
/// assert!(validate_shop("main").is_ok());
/// assert!(validate_shop("  ").is_err());
/// assert!(validate_shop("a|b").is_err());
/// ```
pub fn validate_shop(shop: &str) -> ValidationResult<()> {
    let shop = shop.trim();

    if shop.is_empty() {
        return Err(ValidationError::Required {
            field: "shop".to_string(),
        });
    }

    if shop.chars().count() > 100 {
        return Err(ValidationError::TooLong {
            field: "shop".to_string(),
            max: 100,
        });
    }

    if shop.contains(KEY_SEPARATOR) {
        return Err(ValidationError::InvalidFormat {
            field: "shop".to_string(),
            reason: format!("must not contain '{}'", KEY_SEPARATOR),
        });
    }

    Ok(())
}

/// Validates a product code.
///
/// Codes are free text (Arabic and Latin barcodes both occur), so only
/// presence and length are checked.
pub fn validate_code(code: &str) -> ValidationResult<()> {
    let code = code.trim();

    if code.is_empty() {
        return Err(ValidationError::Required {
            field: "code".to_string(),
        });
    }

    if code.chars().count() > 64 {
        return Err(ValidationError::TooLong {
            field: "code".to_string(),
            max: 64,
        });
    }

    Ok(())
}

/// Validates a record reference (server id or queue id) passed by a caller.
pub fn validate_reference(reference: &str) -> ValidationResult<()> {
    if reference.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "id".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates the quantity of a reservation or restoration.
///
/// Must be positive. There is no upper bound: available stock is the only
/// limit on a reservation.
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_shop() {
        assert!(validate_shop("main").is_ok());
        assert!(validate_shop("فرع المعادي").is_ok());
        assert!(validate_shop("").is_err());
        assert!(validate_shop(&"s".repeat(101)).is_err());
        assert!(matches!(
            validate_shop("a|b"),
            Err(ValidationError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_validate_code() {
        assert!(validate_code("A1").is_ok());
        assert!(validate_code("قميص-12").is_ok());
        assert!(validate_code("   ").is_err());
        assert!(validate_code(&"9".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_reference() {
        assert!(validate_reference("srv-1").is_ok());
        assert!(validate_reference(" ").is_err());
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(250_000).is_ok());
        assert!(validate_quantity(0).is_err());
        assert!(matches!(
            validate_quantity(-1),
            Err(ValidationError::MustBePositive { .. })
        ));
    }
}
