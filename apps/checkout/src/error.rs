//! # Checkout Error Type
//!
//! The caller-facing error taxonomy of the order lifecycle manager.
//!
//! ## Error Handling Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Flow in Ledgerline                             │
//! │                                                                         │
//! │  ValidationError (core) ──────────────┐                                 │
//! │  CoreError (cart ops) ────────────────┤                                 │
//! │  CouponRejection / ShippingUnavailable┤                                 │
//! │  DbError (repositories) ──────────────┼──► CheckoutError                │
//! │  tokio timeout elapsed ───────────────┘        │                        │
//! │                                                ▼                        │
//! │                                   ErrorResponse { code, message,        │
//! │                                                   retryable }           │
//! │                                                                         │
//! │  Only StorageFailure is retryable. Everything else is a business        │
//! │  outcome the caller must act on (adjust cart, pick another method).     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use ledgerline_core::{
    CoreError, CouponRejection, Money, ShippingUnavailable, StockShortfall, ValidationError,
};
use ledgerline_db::DbError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result alias for manager operations.
pub type CheckoutResult<T> = Result<T, CheckoutError>;

// =============================================================================
// Item Issues
// =============================================================================

/// Why a cart line can no longer be bought as it stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum ItemIssue {
    /// The product was removed from the catalog.
    Missing { product_id: String },
    /// The product exists but is not active.
    Inactive { product_id: String, status: String },
    /// The cart holds a stale price.
    PriceChanged {
        product_id: String,
        cart_price: Money,
        current_price: Money,
    },
}

impl fmt::Display for ItemIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemIssue::Missing { product_id } => write!(f, "{product_id} no longer exists"),
            ItemIssue::Inactive { product_id, status } => {
                write!(f, "{product_id} is {status}")
            }
            ItemIssue::PriceChanged {
                product_id,
                cart_price,
                current_price,
            } => write!(f, "{product_id} changed price from {cart_price} to {current_price}"),
        }
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// =============================================================================
// Checkout Error
// =============================================================================

/// Errors surfaced by [`OrderLifecycleManager`](crate::OrderLifecycleManager).
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Malformed input: bad address, unsupported shipping method, bad
    /// amount. Never retried.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Cart lines failed the re-check against the catalog.
    #[error("Some items can no longer be purchased: {}", join(issues))]
    ItemsUnavailable { issues: Vec<ItemIssue> },

    /// The stock ledger refused the reservation. Carries every shortfall.
    #[error("Insufficient stock: {}", join(shortfalls))]
    InsufficientStock { shortfalls: Vec<StockShortfall> },

    /// A coupon check failed, at validation or at redemption time.
    #[error("Coupon {code} cannot be used: {reason}")]
    CouponInvalid { code: String, reason: CouponRejection },

    /// No shipping rule admits the order and there is no active default.
    #[error(transparent)]
    ShippingUnavailable(#[from] ShippingUnavailable),

    /// The requested transition is not allowed from the current state.
    /// The order is left unchanged.
    #[error("Cannot {action} order {order_id} while it is {current}")]
    StateConflict {
        order_id: String,
        action: String,
        current: String,
    },

    /// Transient infrastructure failure or timeout. Compensations have run;
    /// the caller may retry.
    #[error("Storage failure: {0}")]
    StorageFailure(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },
}

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    ItemsUnavailable,
    InsufficientStock,
    CouponInvalid,
    ShippingUnavailable,
    StateConflict,
    StorageFailure,
    NotFound,
}

impl CheckoutError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        CheckoutError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn state_conflict(
        order_id: impl Into<String>,
        action: impl Into<String>,
        current: impl fmt::Display,
    ) -> Self {
        CheckoutError::StateConflict {
            order_id: order_id.into(),
            action: action.into(),
            current: current.to_string(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            CheckoutError::Validation(_) => ErrorCode::ValidationError,
            CheckoutError::ItemsUnavailable { .. } => ErrorCode::ItemsUnavailable,
            CheckoutError::InsufficientStock { .. } => ErrorCode::InsufficientStock,
            CheckoutError::CouponInvalid { .. } => ErrorCode::CouponInvalid,
            CheckoutError::ShippingUnavailable(_) => ErrorCode::ShippingUnavailable,
            CheckoutError::StateConflict { .. } => ErrorCode::StateConflict,
            CheckoutError::StorageFailure(_) => ErrorCode::StorageFailure,
            CheckoutError::NotFound { .. } => ErrorCode::NotFound,
        }
    }

    /// True only for transient storage failures.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CheckoutError::StorageFailure(_))
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.code(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        }
    }
}

/// Serialisable form of a [`CheckoutError`] for any transport.
///
/// ```json
/// {
///   "code": "INSUFFICIENT_STOCK",
///   "message": "Insufficient stock: p-1: requested 2, available 1",
///   "retryable": false
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
}

impl From<&CheckoutError> for ErrorResponse {
    fn from(err: &CheckoutError) -> Self {
        err.to_response()
    }
}

// =============================================================================
// Conversions
// =============================================================================

/// Converts database errors to checkout errors.
///
/// Storage-level failures keep their detail in the log and surface as a
/// retryable `StorageFailure`.
impl From<DbError> for CheckoutError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => CheckoutError::NotFound { entity, id },
            DbError::InsufficientStock { shortfalls } => {
                CheckoutError::InsufficientStock { shortfalls }
            }
            DbError::CouponRejected { code, reason } => CheckoutError::CouponInvalid { code, reason },
            DbError::UniqueViolation { field, value } => {
                CheckoutError::Validation(ValidationError::InvalidFormat {
                    field,
                    reason: format!("'{value}' already exists"),
                })
            }
            DbError::ForeignKeyViolation { message } => {
                tracing::warn!(%message, "Foreign key violation");
                CheckoutError::Validation(ValidationError::InvalidFormat {
                    field: "reference".to_string(),
                    reason: "refers to a missing record".to_string(),
                })
            }
            DbError::InvalidInput(reason) => {
                CheckoutError::Validation(ValidationError::InvalidFormat {
                    field: "input".to_string(),
                    reason,
                })
            }
            DbError::Conflict { entity, id, reason } => CheckoutError::StateConflict {
                order_id: id,
                action: format!("update {}", entity.to_lowercase()),
                current: reason,
            },
            other => {
                tracing::error!(error = %other, "Storage failure");
                CheckoutError::StorageFailure(other.to_string())
            }
        }
    }
}

/// Converts cart/state-machine errors to checkout errors.
impl From<CoreError> for CheckoutError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ProductUnavailable { product_id, status } => CheckoutError::ItemsUnavailable {
                issues: vec![ItemIssue::Inactive { product_id, status }],
            },
            CoreError::InsufficientStock {
                product_id,
                available,
                requested,
            } => CheckoutError::InsufficientStock {
                shortfalls: vec![StockShortfall {
                    product_id,
                    requested,
                    available,
                }],
            },
            CoreError::NotInCart(product_id) => CheckoutError::not_found("Cart item", product_id),
            CoreError::CartTooLarge { max } => {
                CheckoutError::Validation(ValidationError::OutOfRange {
                    field: "items".to_string(),
                    min: 1,
                    max: max as i64,
                })
            }
            CoreError::QuantityTooLarge { max, .. } => {
                CheckoutError::Validation(ValidationError::OutOfRange {
                    field: "quantity".to_string(),
                    min: 1,
                    max: i64::from(max),
                })
            }
            CoreError::InvalidTransition { machine, from, to } => CheckoutError::StateConflict {
                order_id: String::new(),
                action: format!("move {machine} to {to}"),
                current: from,
            },
            CoreError::Validation(e) => CheckoutError::Validation(e),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_storage_failures_are_retryable() {
        let storage: CheckoutError = DbError::PoolExhausted.into();
        assert_eq!(storage.code(), ErrorCode::StorageFailure);
        assert!(storage.is_retryable());

        let conflict = CheckoutError::state_conflict("o-1", "cancel", "shipped");
        assert!(!conflict.is_retryable());
        assert_eq!(conflict.to_string(), "Cannot cancel order o-1 while it is shipped");
    }

    #[test]
    fn test_shortfalls_survive_conversion() {
        let err: CheckoutError = DbError::InsufficientStock {
            shortfalls: vec![StockShortfall {
                product_id: "p-1".to_string(),
                requested: 2,
                available: 1,
            }],
        }
        .into();

        match &err {
            CheckoutError::InsufficientStock { shortfalls } => assert_eq!(shortfalls.len(), 1),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("p-1"));
    }

    #[test]
    fn test_redemption_rejection_keeps_code() {
        let err: CheckoutError = DbError::CouponRejected {
            code: "SPRING25".to_string(),
            reason: CouponRejection::UsageLimitReached,
        }
        .into();

        match &err {
            CheckoutError::CouponInvalid { code, reason } => {
                assert_eq!(code, "SPRING25");
                assert_eq!(*reason, CouponRejection::UsageLimitReached);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.code(), ErrorCode::CouponInvalid);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_response_serialisation() {
        let err = CheckoutError::not_found("Order", "o-9");
        let json = serde_json::to_value(err.to_response()).unwrap();
        assert_eq!(json["code"], "NOT_FOUND");
        assert_eq!(json["retryable"], false);
        assert_eq!(json["message"], "Order not found: o-9");
    }

    #[test]
    fn test_item_issue_tagging() {
        let issue = ItemIssue::PriceChanged {
            product_id: "p-1".to_string(),
            cart_price: Money::from_cents(1000),
            current_price: Money::from_cents(1200),
        };
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["issue"], "price_changed");
    }
}
