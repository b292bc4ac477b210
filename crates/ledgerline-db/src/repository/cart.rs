//! # Cart Repository
//!
//! Persists the cart aggregate. One cart per owner key.
//!
//! Carts untouched for the inactivity window are soft-deleted by
//! [`CartRepository::expire_inactive`]; an expired cart is invisible to
//! [`CartRepository::load`] and comes back fresh on the next save.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::{parse_decimal, to_u32};
use ledgerline_core::{Cart, LineItem, Money};

#[derive(Debug, FromRow)]
struct CartRow {
    owner_key: String,
    applied_coupon: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct CartItemRow {
    product_id: String,
    name: String,
    category: String,
    unit_price_cents: i64,
    quantity: i64,
    weight_kg: String,
    added_at: DateTime<Utc>,
}

impl TryFrom<CartItemRow> for LineItem {
    type Error = DbError;

    fn try_from(row: CartItemRow) -> DbResult<Self> {
        Ok(LineItem {
            quantity: to_u32("cart_items.quantity", row.quantity)?,
            weight_kg: parse_decimal("cart_items.weight_kg", &row.weight_kg)?,
            unit_price: Money::from_cents(row.unit_price_cents),
            product_id: row.product_id,
            name: row.name,
            category: row.category,
            added_at: row.added_at,
        })
    }
}

/// Empties an owner's cart inside an open transaction.
///
/// Used by order placement so the cart is cleared in the same commit that
/// persists the order.
pub async fn clear_in(conn: &mut SqliteConnection, owner_key: &str, now: DateTime<Utc>) -> DbResult<()> {
    sqlx::query("UPDATE carts SET applied_coupon = NULL, updated_at = ?2 WHERE owner_key = ?1")
        .bind(owner_key)
        .bind(now)
        .execute(&mut *conn)
        .await?;

    sqlx::query("DELETE FROM cart_items WHERE owner_key = ?1")
        .bind(owner_key)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

#[derive(Debug, Clone)]
pub struct CartRepository {
    pool: SqlitePool,
}

impl CartRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CartRepository { pool }
    }

    /// Writes the whole cart, replacing any stored lines.
    pub async fn save(&self, cart: &Cart) -> DbResult<()> {
        debug!(owner = %cart.owner, lines = cart.items.len(), "Saving cart");

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO carts (owner_key, applied_coupon, created_at, updated_at, expires_at, expired_at)
            VALUES (?1, ?2, ?3, ?4, ?5, NULL)
            ON CONFLICT (owner_key) DO UPDATE
               SET applied_coupon = excluded.applied_coupon,
                   created_at = excluded.created_at,
                   updated_at = excluded.updated_at,
                   expires_at = excluded.expires_at,
                   expired_at = NULL
            "#,
        )
        .bind(&cart.owner)
        .bind(&cart.applied_coupon)
        .bind(cart.created_at)
        .bind(cart.updated_at)
        .bind(cart.expires_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM cart_items WHERE owner_key = ?1")
            .bind(&cart.owner)
            .execute(&mut *tx)
            .await?;

        for (position, item) in cart.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO cart_items (
                    owner_key, position, product_id, name, category,
                    unit_price_cents, quantity, weight_kg, added_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(&cart.owner)
            .bind(position as i64)
            .bind(&item.product_id)
            .bind(&item.name)
            .bind(&item.category)
            .bind(item.unit_price.cents())
            .bind(i64::from(item.quantity))
            .bind(item.weight_kg.to_string())
            .bind(item.added_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Loads a live cart. Expired or soft-deleted carts read as absent.
    pub async fn load(&self, owner_key: &str, now: DateTime<Utc>) -> DbResult<Option<Cart>> {
        let row: Option<CartRow> = sqlx::query_as(
            "SELECT owner_key, applied_coupon, created_at, updated_at, expires_at FROM carts \
             WHERE owner_key = ?1 AND expired_at IS NULL AND expires_at > ?2",
        )
        .bind(owner_key)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let items: Vec<CartItemRow> = sqlx::query_as(
            "SELECT product_id, name, category, unit_price_cents, quantity, weight_kg, added_at \
             FROM cart_items WHERE owner_key = ?1 ORDER BY position",
        )
        .bind(owner_key)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(Cart {
            items: items.into_iter().map(LineItem::try_from).collect::<DbResult<_>>()?,
            owner: row.owner_key,
            applied_coupon: row.applied_coupon,
            created_at: row.created_at,
            updated_at: row.updated_at,
            expires_at: row.expires_at,
        }))
    }

    /// Soft-deletes carts past their expiry. Returns how many were expired.
    pub async fn expire_inactive(&self, now: DateTime<Utc>) -> DbResult<u64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE carts SET expired_at = ?1 WHERE expired_at IS NULL AND expires_at <= ?1",
        )
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "DELETE FROM cart_items WHERE owner_key IN \
             (SELECT owner_key FROM carts WHERE expired_at IS NOT NULL)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let expired = result.rows_affected();
        if expired > 0 {
            info!(count = expired, "Expired inactive carts");
        }
        Ok(expired)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
