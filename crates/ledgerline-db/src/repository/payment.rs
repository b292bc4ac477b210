//! # Payment Repository
//!
//! One payment row per order (UNIQUE `order_id`). The amount is copied
//! from the order total at creation and never edited afterwards; status
//! changes arrive through `OrderRepository::record_payment` and
//! `OrderRepository::refund`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use ledgerline_core::{Money, Order, Payment, PaymentMethod, TransactionStatus};

/// Outcome pushed by the external payment processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PaymentOutcome {
    Paid { transaction_id: String },
    Failed { reason: String },
}

impl PaymentOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PaymentOutcome::Paid { .. } => "paid",
            PaymentOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, FromRow)]
struct PaymentRow {
    id: String,
    order_id: String,
    method: PaymentMethod,
    amount_cents: i64,
    currency: String,
    status: TransactionStatus,
    transaction_id: Option<String>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PaymentRow> for Payment {
    fn from(row: PaymentRow) -> Self {
        Payment {
            id: row.id,
            order_id: row.order_id,
            method: row.method,
            amount: Money::from_cents(row.amount_cents),
            currency: row.currency,
            status: row.status,
            transaction_id: row.transaction_id,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: SqlitePool,
}

impl PaymentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PaymentRepository { pool }
    }

    /// Creates the order's payment for its frozen total.
    ///
    /// Asking twice returns the existing payment, so a retried payment
    /// request never creates a second row.
    pub async fn create(&self, order: &Order, method: PaymentMethod, currency: &str) -> DbResult<Payment> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        debug!(order_id = %order.id, amount = %order.totals.total, "Creating payment");

        let inserted = sqlx::query(
            r#"
            INSERT INTO payments (id, order_id, method, amount_cents, currency, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?6)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(&order.id)
        .bind(method)
        .bind(order.totals.total.cents())
        .bind(currency)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            info!(order_id = %order.id, payment_id = %id, "Payment created");
        }

        self.get_by_order(&order.id)
            .await?
            .ok_or_else(|| DbError::Internal(format!("payment for order {} vanished", order.id)))
    }

    pub async fn get_by_order(&self, order_id: &str) -> DbResult<Option<Payment>> {
        let row: Option<PaymentRow> = sqlx::query_as(
            "SELECT id, order_id, method, amount_cents, currency, status, transaction_id, \
             failure_reason, created_at, updated_at FROM payments WHERE order_id = ?1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Payment::from))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
