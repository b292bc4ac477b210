//! # Error Types
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ValidationError ─┐                                                     │
//! │                   ├──► CoreError ──┐                                    │
//! │  cart / lifecycle ┘                ├──► CheckoutError (apps/checkout)   │
//! │  DbError (ledgerline-db) ──────────┘      code + retryable flag         │
//! │                                                                         │
//! │  Rejections with their own enums live next to the rule they explain:   │
//! │    CouponRejection (coupon.rs), ShippingUnavailable (shipping.rs)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Failures raised by cart edits and lifecycle transitions.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Status is anything but `active`.
    #[error("Product {product_id} is not available for purchase ({status})")]
    ProductUnavailable { product_id: String, status: String },

    /// Advisory check at add-to-cart time. The stock ledger makes the
    /// binding decision when the order is placed.
    #[error("Insufficient stock for {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: String,
        available: i64,
        requested: u32,
    },

    #[error("Product {0} is not in the cart")]
    NotInCart(String),

    #[error("Cart cannot have more than {max} items")]
    CartTooLarge { max: usize },

    #[error("Quantity {requested} exceeds maximum allowed ({max})")]
    QuantityTooLarge { requested: u32, max: u32 },

    /// `machine` is `"order"` or `"payment"`.
    #[error("Cannot move {machine} from {from} to {to}")]
    InvalidTransition {
        machine: &'static str,
        from: String,
        to: String,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Caller input that fails a shape check. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: String },

    #[error("{field} must be at least {min} characters")]
    TooShort { field: String, min: usize },

    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Malformed UUID, zip code, state code.
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

impl ValidationError {
    pub fn field(&self) -> &str {
        use ValidationError::*;
        match self {
            Required { field }
            | TooShort { field, .. }
            | TooLong { field, .. }
            | OutOfRange { field, .. }
            | MustBePositive { field }
            | InvalidFormat { field, .. }
            | NotAllowed { field, .. } => field,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_message_names_product() {
        let err = CoreError::InsufficientStock {
            product_id: "p-1".to_string(),
            available: 3,
            requested: 5,
        };
        assert_eq!(err.to_string(), "Insufficient stock for p-1: available 3, requested 5");
    }

    #[test]
    fn test_validation_field_and_wrapping() {
        let err = ValidationError::TooShort {
            field: "street".to_string(),
            min: 5,
        };
        assert_eq!(err.field(), "street");
        assert_eq!(err.to_string(), "street must be at least 5 characters");

        let wrapped = CoreError::from(err.clone());
        assert!(matches!(&wrapped, CoreError::Validation(inner) if *inner == err));
        assert_eq!(wrapped.to_string(), "Validation error: street must be at least 5 characters");
    }
}
