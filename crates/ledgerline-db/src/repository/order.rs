//! # Order Repository
//!
//! Order persistence and every order/payment status write.
//!
//! ## Placement Transaction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BEGIN                                                                  │
//! │   1. order_sequences[day] += 1 ──► ORD-YYYYMMDD-NNNN  (write lock)      │
//! │   2. INSERT orders + order_items (frozen prices and totals)             │
//! │   3. stock_reservations: held → committed (order_id)                    │
//! │   4. cart_items for the owner deleted                                   │
//! │   5. coupon usage counters (guarded)                                    │
//! │  COMMIT                                                                 │
//! │                                                                         │
//! │  Any failure rolls back all five. The reservation is still held, and    │
//! │  the caller releases it (compensation).                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Status Writes
//! Every transition is a compare-and-set: the UPDATE names the statuses it
//! may leave, and `false` means the order was not in one of them. Callers
//! re-read the order to report the conflict.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::repository::payment::PaymentOutcome;
use crate::repository::{cart, coupon, parse_decimal, placeholders, stock, to_u32};
use ledgerline_core::order::format_order_number;
use ledgerline_core::{
    Address, Coupon, Money, Order, OrderDraft, OrderItem, OrderStatus, PaymentStatus, Refund,
    ShippingMethod, TaxRate, Totals,
};

const ORDER_COLUMNS: &str = "id, order_number, owner_key, customer_id, customer_email, \
     subtotal_cents, discount_cents, shipping_cents, tax_cents, total_cents, tax_rate, \
     ship_street, ship_city, ship_state, ship_zip_code, ship_country, shipping_method, \
     shipping_rule_id, coupon_code, status, payment_status, tracking_number, notes, \
     cancel_reason, refund_cents, refund_reason, refunded_at, reservation_id, \
     created_at, updated_at, confirmed_at, shipped_at, delivered_at, cancelled_at";

#[derive(Debug, FromRow)]
struct OrderRow {
    id: String,
    order_number: String,
    owner_key: String,
    customer_id: Option<String>,
    customer_email: Option<String>,
    subtotal_cents: i64,
    discount_cents: i64,
    shipping_cents: i64,
    tax_cents: i64,
    total_cents: i64,
    tax_rate: String,
    ship_street: String,
    ship_city: String,
    ship_state: String,
    ship_zip_code: String,
    ship_country: String,
    shipping_method: ShippingMethod,
    shipping_rule_id: String,
    coupon_code: Option<String>,
    status: OrderStatus,
    payment_status: PaymentStatus,
    tracking_number: Option<String>,
    notes: Option<String>,
    cancel_reason: Option<String>,
    refund_cents: Option<i64>,
    refund_reason: Option<String>,
    refunded_at: Option<DateTime<Utc>>,
    reservation_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
    shipped_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct OrderItemRow {
    product_id: String,
    name: String,
    category: String,
    unit_price_cents: i64,
    quantity: i64,
    line_subtotal_cents: i64,
}

impl TryFrom<OrderItemRow> for OrderItem {
    type Error = DbError;

    fn try_from(row: OrderItemRow) -> DbResult<Self> {
        Ok(OrderItem {
            quantity: to_u32("order_items.quantity", row.quantity)?,
            unit_price: Money::from_cents(row.unit_price_cents),
            line_subtotal: Money::from_cents(row.line_subtotal_cents),
            product_id: row.product_id,
            name: row.name,
            category: row.category,
        })
    }
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> DbResult<Order> {
        let refund = match (self.refund_cents, self.refund_reason, self.refunded_at) {
            (Some(cents), Some(reason), Some(at)) => Some(Refund {
                amount: Money::from_cents(cents),
                reason,
                refunded_at: at,
            }),
            _ => None,
        };

        Ok(Order {
            tax_rate: TaxRate::from_decimal(parse_decimal("orders.tax_rate", &self.tax_rate)?),
            totals: Totals {
                subtotal: Money::from_cents(self.subtotal_cents),
                discount: Money::from_cents(self.discount_cents),
                shipping: Money::from_cents(self.shipping_cents),
                tax: Money::from_cents(self.tax_cents),
                total: Money::from_cents(self.total_cents),
            },
            shipping_address: Address {
                street: self.ship_street,
                city: self.ship_city,
                state: self.ship_state,
                zip_code: self.ship_zip_code,
                country: self.ship_country,
            },
            id: self.id,
            order_number: self.order_number,
            owner_key: self.owner_key,
            customer_id: self.customer_id,
            customer_email: self.customer_email,
            items,
            shipping_method: self.shipping_method,
            shipping_rule_id: self.shipping_rule_id,
            coupon_code: self.coupon_code,
            status: self.status,
            payment_status: self.payment_status,
            tracking_number: self.tracking_number,
            notes: self.notes,
            cancel_reason: self.cancel_reason,
            refund,
            reservation_id: self.reservation_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            confirmed_at: self.confirmed_at,
            shipped_at: self.shipped_at,
            delivered_at: self.delivered_at,
            cancelled_at: self.cancelled_at,
        })
    }
}

/// Timestamp column stamped when an order enters `status`.
fn stamp_column(status: OrderStatus) -> Option<&'static str> {
    match status {
        OrderStatus::Pending => None,
        OrderStatus::Confirmed => Some("confirmed_at"),
        OrderStatus::Shipped => Some("shipped_at"),
        OrderStatus::Delivered => Some("delivered_at"),
        OrderStatus::Cancelled => Some("cancelled_at"),
    }
}

async fn reservation_of(conn: &mut SqliteConnection, order_id: &str) -> DbResult<String> {
    let reservation: Option<String> =
        sqlx::query_scalar("SELECT reservation_id FROM orders WHERE id = ?1")
            .bind(order_id)
            .fetch_optional(&mut *conn)
            .await?;
    reservation.ok_or_else(|| DbError::not_found("Order", order_id))
}

// =============================================================================
// Repository
// =============================================================================

#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    /// Persists a draft against its held reservation, clears the owner's
    /// cart and redeems `coupon`, all in one transaction.
    ///
    /// ## Returns
    /// * `Ok(order)` - pending order with its assigned number
    /// * `Err(Conflict)` - the reservation is no longer held
    /// * `Err(CouponRejected)` - a coupon limit was reached meanwhile
    /// * any other error - storage failure, nothing written
    pub async fn place(
        &self,
        draft: OrderDraft,
        coupon: Option<&Coupon>,
        now: DateTime<Utc>,
    ) -> DbResult<Order> {
        if draft.items.is_empty() {
            return Err(DbError::InvalidInput("order has no items".to_string()));
        }

        let day = now.date_naive();
        let mut tx = self.pool.begin().await?;

        let sequence: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO order_sequences (day, last_value) VALUES (?1, 1)
            ON CONFLICT (day) DO UPDATE SET last_value = last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(day.format("%Y-%m-%d").to_string())
        .fetch_one(&mut *tx)
        .await?;

        let order = draft.into_order(format_order_number(day, sequence), now);
        debug!(order_id = %order.id, order_number = %order.order_number, "Persisting order");

        let address = &order.shipping_address;
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, order_number, owner_key, customer_id, customer_email,
                subtotal_cents, discount_cents, shipping_cents, tax_cents, total_cents, tax_rate,
                ship_street, ship_city, ship_state, ship_zip_code, ship_country,
                shipping_method, shipping_rule_id, coupon_code, status, payment_status,
                notes, reservation_id, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?24
            )
            "#,
        )
        .bind(&order.id)
        .bind(&order.order_number)
        .bind(&order.owner_key)
        .bind(&order.customer_id)
        .bind(&order.customer_email)
        .bind(order.totals.subtotal.cents())
        .bind(order.totals.discount.cents())
        .bind(order.totals.shipping.cents())
        .bind(order.totals.tax.cents())
        .bind(order.totals.total.cents())
        .bind(order.tax_rate.rate().to_string())
        .bind(&address.street)
        .bind(&address.city)
        .bind(&address.state)
        .bind(&address.zip_code)
        .bind(&address.country)
        .bind(order.shipping_method)
        .bind(&order.shipping_rule_id)
        .bind(&order.coupon_code)
        .bind(order.status)
        .bind(order.payment_status)
        .bind(&order.notes)
        .bind(&order.reservation_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (
                    order_id, position, product_id, name, category,
                    unit_price_cents, quantity, line_subtotal_cents
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(&order.id)
            .bind(position as i64)
            .bind(&item.product_id)
            .bind(&item.name)
            .bind(&item.category)
            .bind(item.unit_price.cents())
            .bind(i64::from(item.quantity))
            .bind(item.line_subtotal.cents())
            .execute(&mut *tx)
            .await?;
        }

        stock::commit_in(&mut tx, &order.reservation_id, &order.id, now).await?;
        cart::clear_in(&mut tx, &order.owner_key, now).await?;
        if let Some(coupon) = coupon {
            coupon::redeem_in(&mut tx, coupon, &order.owner_key, now).await?;
        }

        tx.commit().await?;

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = %order.totals.total,
            "Order placed"
        );
        Ok(order)
    }

    async fn load_items(&self, order_id: &str) -> DbResult<Vec<OrderItem>> {
        let rows: Vec<OrderItemRow> = sqlx::query_as(
            "SELECT product_id, name, category, unit_price_cents, quantity, line_subtotal_cents \
             FROM order_items WHERE order_id = ?1 ORDER BY position",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(OrderItem::try_from).collect()
    }

    async fn hydrate(&self, row: OrderRow) -> DbResult<Order> {
        let items = self.load_items(&row.id).await?;
        row.into_order(items)
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1");
        let row: Option<OrderRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    pub async fn get_by_number(&self, order_number: &str) -> DbResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_number = ?1");
        let row: Option<OrderRow> = sqlx::query_as(&sql)
            .bind(order_number)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    /// An owner's orders, newest first.
    pub async fn list_for_owner(&self, owner_key: &str, limit: u32) -> DbResult<Vec<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE owner_key = ?1 \
             ORDER BY created_at DESC, order_number DESC LIMIT ?2"
        );
        let rows: Vec<OrderRow> = sqlx::query_as(&sql)
            .bind(owner_key)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            orders.push(self.hydrate(row).await?);
        }
        Ok(orders)
    }

    /// Moves an order to `to` if its status is one of `from`.
    ///
    /// Cancellation has its own path ([`cancel`](Self::cancel)) because it
    /// releases stock.
    pub async fn transition(
        &self,
        id: &str,
        from: &[OrderStatus],
        to: OrderStatus,
        tracking_number: Option<&str>,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        if to == OrderStatus::Cancelled {
            return Err(DbError::InvalidInput("use cancel() to cancel an order".to_string()));
        }
        if from.is_empty() {
            return Ok(false);
        }

        let stamp = stamp_column(to)
            .map(|column| format!(", {column} = ?3"))
            .unwrap_or_default();
        let sql = format!(
            "UPDATE orders SET status = ?2, updated_at = ?3, \
             tracking_number = COALESCE(?4, tracking_number){stamp} \
             WHERE id = ?1 AND status IN ({})",
            placeholders(5, from.len())
        );

        let mut query = sqlx::query(&sql)
            .bind(id)
            .bind(to)
            .bind(now)
            .bind(tracking_number);
        for status in from {
            query = query.bind(*status);
        }

        let moved = query.execute(&self.pool).await?.rows_affected() == 1;
        if moved {
            info!(order_id = %id, status = %to, "Order status changed");
        }
        Ok(moved)
    }

    /// Cancels a pending or confirmed order and releases its reservation
    /// in the same transaction. `false` when the order was not cancellable.
    pub async fn cancel(&self, id: &str, reason: Option<&str>, now: DateTime<Utc>) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;

        let moved = sqlx::query(
            r#"
            UPDATE orders
               SET status = 'cancelled', cancel_reason = ?2, cancelled_at = ?3, updated_at = ?3
             WHERE id = ?1 AND status IN ('pending', 'confirmed')
            "#,
        )
        .bind(id)
        .bind(reason)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if moved.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let reservation = reservation_of(&mut tx, id).await?;
        stock::release_in(&mut tx, &reservation, now).await?;
        tx.commit().await?;

        info!(order_id = %id, "Order cancelled");
        Ok(true)
    }

    /// Refunds a paid order and releases its reservation unless a
    /// cancellation already did. `false` when the order was not paid.
    pub async fn refund(&self, id: &str, amount: Money, reason: &str, now: DateTime<Utc>) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;

        let moved = sqlx::query(
            r#"
            UPDATE orders
               SET payment_status = 'refunded', refund_cents = ?2, refund_reason = ?3,
                   refunded_at = ?4, updated_at = ?4
             WHERE id = ?1 AND payment_status = 'paid'
            "#,
        )
        .bind(id)
        .bind(amount.cents())
        .bind(reason)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if moved.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("UPDATE payments SET status = 'refunded', updated_at = ?2 WHERE order_id = ?1")
            .bind(id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let reservation = reservation_of(&mut tx, id).await?;
        stock::release_in(&mut tx, &reservation, now).await?;
        tx.commit().await?;

        info!(order_id = %id, amount = %amount, "Order refunded");
        Ok(true)
    }

    /// Applies a processor outcome to a pending payment.
    ///
    /// A successful payment also confirms a pending order. A cancelled
    /// order cannot become paid. `false` when the payment was not pending.
    /// An order whose payment was never requested is a `Conflict` and is
    /// left untouched.
    pub async fn record_payment(&self, id: &str, outcome: &PaymentOutcome, now: DateTime<Utc>) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;

        let moved = match outcome {
            PaymentOutcome::Paid { .. } => sqlx::query(
                r#"
                UPDATE orders
                   SET payment_status = 'paid',
                       status = CASE WHEN status = 'pending' THEN 'confirmed' ELSE status END,
                       confirmed_at = CASE WHEN status = 'pending' THEN ?2 ELSE confirmed_at END,
                       updated_at = ?2
                 WHERE id = ?1 AND payment_status = 'pending' AND status != 'cancelled'
                "#,
            ),
            PaymentOutcome::Failed { .. } => sqlx::query(
                "UPDATE orders SET payment_status = 'failed', updated_at = ?2 \
                 WHERE id = ?1 AND payment_status = 'pending'",
            ),
        }
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if moved.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let payment = match outcome {
            PaymentOutcome::Paid { transaction_id } => sqlx::query(
                "UPDATE payments SET status = 'completed', transaction_id = ?2, updated_at = ?3 \
                 WHERE order_id = ?1",
            )
            .bind(id)
            .bind(transaction_id),
            PaymentOutcome::Failed { reason } => sqlx::query(
                "UPDATE payments SET status = 'failed', failure_reason = ?2, updated_at = ?3 \
                 WHERE order_id = ?1",
            )
            .bind(id)
            .bind(reason),
        }
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if payment.rows_affected() != 1 {
            tx.rollback().await?;
            warn!(order_id = %id, outcome = outcome.label(), "Payment result for an order without a payment");
            return Err(DbError::conflict("Payment", id, "no payment has been requested"));
        }

        tx.commit().await?;
        info!(order_id = %id, outcome = outcome.label(), "Payment result recorded");
        Ok(true)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
