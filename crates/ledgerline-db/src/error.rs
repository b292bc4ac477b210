//! # Database Error Types
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  sqlx::Error ──► DbError ──► CheckoutError (apps/checkout)              │
//! │                     ▲                                                   │
//! │                     └── business outcomes decided inside a transaction  │
//! │                         (InsufficientStock, CouponRejected, Conflict)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Infrastructure variants all become a retryable `StorageFailure` upstream;
//! the business variants keep their detail.

use ledgerline_core::{CouponRejection, StockShortfall};
use sqlx::error::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    /// Lookup by id or code found nothing, or a reservation token was never
    /// issued.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Duplicate SKU, coupon code or second payment for one order.
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// The pool could not be opened or has been closed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// No connection freed up within the acquire timeout.
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// A stored column did not decode (bad decimal text, malformed JSON,
    /// unknown enum string).
    #[error("Could not decode {0}")]
    Decode(String),

    /// Rejected before touching the database.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The row exists but its state forbids the write: deleting the default
    /// shipping rule, committing a reservation that is no longer held.
    #[error("{entity} {id}: {reason}")]
    Conflict {
        entity: String,
        id: String,
        reason: String,
    },

    /// Reservation refused; nothing was decremented.
    #[error("Insufficient stock for {} product(s)", shortfalls.len())]
    InsufficientStock { shortfalls: Vec<StockShortfall> },

    /// Redemption lost a race against the coupon's usage caps.
    #[error("Coupon {code} rejected: {reason}")]
    CouponRejected { code: String, reason: CouponRejection },

    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn conflict(entity: impl Into<String>, id: impl Into<String>, reason: impl Into<String>) -> Self {
        DbError::Conflict {
            entity: entity.into(),
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// Constraint failures are classified by `ErrorKind`. SQLite names the
/// offending column in the message: `UNIQUE constraint failed: coupons.code`.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("Record", "unknown"),
            sqlx::Error::Database(db_err) => {
                let message = db_err.message().to_string();
                match db_err.kind() {
                    ErrorKind::UniqueViolation => DbError::UniqueViolation {
                        field: message
                            .rsplit(": ")
                            .next()
                            .unwrap_or("unknown")
                            .to_string(),
                        value: "unknown".to_string(),
                    },
                    ErrorKind::ForeignKeyViolation => DbError::ForeignKeyViolation { message },
                    _ => DbError::QueryFailed(message),
                }
            }
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::ConnectionFailed("pool is closed".to_string()),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::Decode(format!("column {index}: {source}"))
            }
            sqlx::Error::Io(e) => DbError::ConnectionFailed(e.to_string()),
            other => DbError::Internal(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Decode(format!("JSON column: {err}"))
    }
}

pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_message() {
        let err = DbError::conflict("ShippingRule", "r-1", "cannot delete the default rule");
        assert_eq!(err.to_string(), "ShippingRule r-1: cannot delete the default rule");
    }

    #[test]
    fn test_shortfall_message_counts_products() {
        let err = DbError::InsufficientStock {
            shortfalls: vec![
                StockShortfall {
                    product_id: "p1".into(),
                    requested: 3,
                    available: 1,
                },
                StockShortfall {
                    product_id: "p2".into(),
                    requested: 1,
                    available: 0,
                },
            ],
        };
        assert_eq!(err.to_string(), "Insufficient stock for 2 product(s)");
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        assert!(matches!(
            DbError::from(sqlx::Error::RowNotFound),
            DbError::NotFound { .. }
        ));
        assert!(matches!(
            DbError::from(sqlx::Error::PoolTimedOut),
            DbError::PoolExhausted
        ));
    }
}
