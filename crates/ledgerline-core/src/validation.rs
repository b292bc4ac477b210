//! # Validation Module
//!
//! Input validation for everything a caller hands to checkout.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Deserialization (serde)                                      │
//! │  └── Shape and enum values (shipping method, payment method)           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  ├── Address, email, coupon code, notes                                │
//! │  └── Quantities, rates, percentages                                    │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK (available_quantity >= 0)                                   │
//! │  ├── UNIQUE (order_number), UNIQUE (payments.order_id)                 │
//! │  └── Foreign key constraints                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use ledgerline_core::validation::{validate_coupon_code, validate_quantity};
//!
//! assert_eq!(validate_coupon_code(" save10 ").unwrap(), "SAVE10");
//! validate_quantity(5).unwrap();
//! ```

use rust_decimal::Decimal;

use crate::error::ValidationError;
use crate::money::Money;
use crate::types::Address;
use crate::{DEFAULT_COUNTRY, MAX_ITEM_QUANTITY};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Helpers
// =============================================================================

/// Checks a trimmed, required string against inclusive length bounds.
fn require_length(field: &str, value: &str, min: usize, max: usize) -> ValidationResult<String> {
    let value = value.trim();
    let len = value.chars().count();

    if len == 0 {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    if len < min {
        return Err(ValidationError::TooShort {
            field: field.to_string(),
            min,
        });
    }
    if len > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }

    Ok(value.to_string())
}

// =============================================================================
// Address
// =============================================================================

/// Validates a shipping address and returns its normalized form.
///
/// ## Rules
/// - street: 5-200 characters
/// - city: 2-50 characters
/// - state: 2-50 characters
/// - zip_code: a postal code (3-10 letters, digits, spaces or hyphens,
///   with at least one digit)
/// - country: 2-50 characters, `USA` when left empty
///
/// All fields are trimmed.
pub fn validate_address(address: &Address) -> ValidationResult<Address> {
    let street = require_length("street", &address.street, 5, 200)?;
    let city = require_length("city", &address.city, 2, 50)?;
    let state = require_length("state", &address.state, 2, 50)?;
    let zip_code = validate_zip_code(&address.zip_code)?;

    let country = if address.country.trim().is_empty() {
        DEFAULT_COUNTRY.to_string()
    } else {
        require_length("country", &address.country, 2, 50)?
    };

    Ok(Address {
        street,
        city,
        state,
        zip_code,
        country,
    })
}

/// Validates a postal code.
///
/// ## Example
/// ```rust
/// use ledgerline_core::validation::validate_zip_code;
///
/// assert!(validate_zip_code("94105").is_ok());
/// assert!(validate_zip_code("94105-1234").is_ok());
/// assert!(validate_zip_code("SW1A 1AA").is_ok());
/// assert!(validate_zip_code("ABCDE").is_err());
/// ```
pub fn validate_zip_code(zip: &str) -> ValidationResult<String> {
    let zip = zip.trim();

    if zip.is_empty() {
        return Err(ValidationError::Required {
            field: "zip_code".to_string(),
        });
    }

    let len = zip.chars().count();
    let charset_ok = zip
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '-');
    let has_digit = zip.chars().any(|c| c.is_ascii_digit());

    if !(3..=10).contains(&len) || !charset_ok || !has_digit {
        return Err(ValidationError::InvalidFormat {
            field: "zip_code".to_string(),
            reason: "must be a valid postal code".to_string(),
        });
    }

    Ok(zip.to_string())
}

/// Validates optional order notes (at most 500 characters).
pub fn validate_notes(notes: Option<&str>) -> ValidationResult<Option<String>> {
    match notes.map(str::trim) {
        None | Some("") => Ok(None),
        Some(n) if n.chars().count() > 500 => Err(ValidationError::TooLong {
            field: "notes".to_string(),
            max: 500,
        }),
        Some(n) => Ok(Some(n.to_string())),
    }
}

// =============================================================================
// Identity
// =============================================================================

/// Validates an email address and returns it trimmed and lower-cased.
///
/// The check is syntactic only: one `@`, a non-empty local part and a
/// dotted domain without spaces.
pub fn validate_email(email: &str) -> ValidationResult<String> {
    let email = email.trim();

    if email.is_empty() {
        return Err(ValidationError::Required {
            field: "email".to_string(),
        });
    }

    let invalid = || ValidationError::InvalidFormat {
        field: "email".to_string(),
        reason: "must be a valid email address".to_string(),
    };

    if email.len() > 254 || email.contains(char::is_whitespace) {
        return Err(invalid());
    }

    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    let domain_ok = !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.');

    if local.is_empty() || !domain_ok {
        return Err(invalid());
    }

    Ok(email.to_lowercase())
}

/// Validates a UUID string format.
///
/// ## Example
/// ```rust
/// use ledgerline_core::validation::validate_uuid;
///
/// assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_uuid("not-a-uuid").is_err());
/// ```
pub fn validate_uuid(id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "id".to_string(),
        });
    }

    uuid::Uuid::parse_str(id.trim()).map_err(|_| ValidationError::InvalidFormat {
        field: "id".to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Coupons
// =============================================================================

/// Validates a coupon code and returns its canonical upper-case form.
///
/// ## Rules
/// - 3-20 characters after trimming
/// - Letters, digits, `_` and `-` only
/// - Case-insensitive: `save10` and `SAVE10` are the same coupon
pub fn validate_coupon_code(code: &str) -> ValidationResult<String> {
    let code = require_length("coupon_code", code, 3, 20)?.to_uppercase();

    if !code
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        return Err(ValidationError::InvalidFormat {
            field: "coupon_code".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(code)
}

/// Validates a percentage discount: must be in (0, 100].
pub fn validate_percentage(percent: Decimal) -> ValidationResult<()> {
    if percent <= Decimal::ZERO || percent > Decimal::ONE_HUNDRED {
        return Err(ValidationError::OutOfRange {
            field: "percent".to_string(),
            min: 0,
            max: 100,
        });
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a line quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_ITEM_QUANTITY (10)
pub fn validate_quantity(qty: u32) -> ValidationResult<()> {
    if qty == 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: i64::from(MAX_ITEM_QUANTITY),
        });
    }

    Ok(())
}

/// Validates a price. Zero is allowed (free items).
pub fn validate_price(field: &str, amount: Money) -> ValidationResult<()> {
    if amount.is_negative() {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: i64::MAX,
        });
    }

    Ok(())
}

/// Validates a tax rate expressed as a fraction in [0, 1].
pub fn validate_tax_rate(rate: Decimal) -> ValidationResult<()> {
    if rate < Decimal::ZERO || rate > Decimal::ONE {
        return Err(ValidationError::OutOfRange {
            field: "tax_rate".to_string(),
            min: 0,
            max: 1,
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

    fn address() -> Address {
        Address {
            street: " 100 Market Street ".to_string(),
            city: "San Francisco".to_string(),
            state: "CA".to_string(),
            zip_code: "94105".to_string(),
            country: String::new(),
        }
    }

    #[test]
    fn test_validate_address_normalizes() {
        let normalized = validate_address(&address()).unwrap();
        assert_eq!(normalized.street, "100 Market Street");
        assert_eq!(normalized.country, "USA");
    }

    #[test]
    fn test_validate_address_rejects_short_fields() {
        let mut bad = address();
        bad.street = "1 A".to_string();
        assert_eq!(validate_address(&bad).unwrap_err().field(), "street");

        let mut bad = address();
        bad.city = "X".to_string();
        assert_eq!(validate_address(&bad).unwrap_err().field(), "city");

        let mut bad = address();
        bad.zip_code = "no-digits".to_string();
        assert_eq!(validate_address(&bad).unwrap_err().field(), "zip_code");
    }

    #[test]
    fn test_validate_email() {
        assert_eq!(validate_email(" Ann@Example.COM ").unwrap(), "ann@example.com");
        assert!(validate_email("").is_err());
        assert!(validate_email("ann.example.com").is_err());
        assert!(validate_email("ann@localhost").is_err());
        assert!(validate_email("a b@example.com").is_err());
    }

    #[test]
    fn test_validate_coupon_code() {
        assert_eq!(validate_coupon_code("save_10").unwrap(), "SAVE_10");
        assert!(validate_coupon_code("AB").is_err());
        assert!(validate_coupon_code(&"A".repeat(21)).is_err());
        assert!(validate_coupon_code("SAVE 10").is_err());
    }

    #[test]
    fn test_validate_notes() {
        assert_eq!(validate_notes(None).unwrap(), None);
        assert_eq!(validate_notes(Some("  ")).unwrap(), None);
        assert_eq!(validate_notes(Some(" leave at door ")).unwrap().as_deref(), Some("leave at door"));
        assert!(validate_notes(Some(&"x".repeat(501))).is_err());
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(10).is_ok());
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(11).is_err());
    }

    #[test]
    fn test_validate_rates() {
        assert!(validate_tax_rate(Decimal::new(825, 4)).is_ok());
        assert!(validate_tax_rate(Decimal::new(-1, 2)).is_err());
        assert!(validate_tax_rate(Decimal::new(101, 2)).is_err());

        assert!(validate_percentage(Decimal::new(100, 0)).is_ok());
        assert!(validate_percentage(Decimal::ZERO).is_err());
        assert!(validate_percentage(Decimal::new(1001, 1)).is_err());
    }

    #[test]
    fn test_validate_uuid() {
        assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(validate_uuid("").is_err());
        assert!(validate_uuid("123").is_err());
    }

    #[test]
    fn test_validate_price() {
        assert!(validate_price("price", Money::zero()).is_ok());
        assert!(validate_price("price", Money::from_cents(-1)).is_err());
    }
}
