//! # Catalog Stock Ledger
//!
//! The only writer of `products.available_quantity`.
//!
//! ## Reserve
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BEGIN                                                                  │
//! │   INSERT stock_reservations (status = 'held')      ← write lock first  │
//! │   for each (product, n):                                                │
//! │     UPDATE products                                                     │
//! │        SET available_quantity = available_quantity - n                 │
//! │      WHERE id = product AND available_quantity >= n   ← floor guard    │
//! │     0 rows? → record shortfall (keep going, report them all)           │
//! │  any shortfall → ROLLBACK (nothing changed)                             │
//! │  else          → COMMIT, return ReservationToken                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The decrement and its guard are one statement, so two checkouts racing
//! for the last unit serialize on SQLite's write lock and exactly one of
//! them sees `available_quantity >= n`.
//!
//! ## Release
//! Releases go through the token, never through a raw item list. The
//! reservation row moves `held|committed → released` with a compare-and-set
//! before any stock is added back, so a token restores stock at most once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::to_u32;
use ledgerline_core::{StockRequest, StockShortfall};

// =============================================================================
// Types
// =============================================================================

/// Lifecycle of a reservation row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Stock is decremented, no order owns it yet.
    Held,
    /// An order was persisted against it.
    Committed,
    /// Stock was given back.
    Released,
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReservationStatus::Held => "held",
            ReservationStatus::Committed => "committed",
            ReservationStatus::Released => "released",
        };
        f.write_str(s)
    }
}

/// A product that dropped to or below its alert level during a reserve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LowStock {
    pub product_id: String,
    pub remaining: i64,
    pub threshold: i64,
}

/// Proof of a successful reservation. Hand it back to release the stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationToken {
    pub id: String,
    /// Merged per product.
    pub items: Vec<StockRequest>,
    pub low_stock: Vec<LowStock>,
    pub created_at: DateTime<Utc>,
}

/// Result of releasing a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Stock was restored for these items.
    Released(Vec<StockRequest>),
    /// The token had been released before; nothing changed.
    AlreadyReleased,
    /// An order owns the reservation, so an abandon left it alone.
    Committed,
}

#[derive(Debug, FromRow)]
struct ReservedItemRow {
    product_id: String,
    quantity: i64,
}

/// Sums quantities of repeated products, keeping first-seen order.
fn merge_requests(items: &[StockRequest]) -> Vec<StockRequest> {
    let mut merged: Vec<StockRequest> = Vec::with_capacity(items.len());
    for item in items {
        match merged.iter_mut().find(|m| m.product_id == item.product_id) {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(item.quantity),
            None => merged.push(item.clone()),
        }
    }
    merged
}

// =============================================================================
// Transaction-scoped Operations
// =============================================================================

/// Releases a reservation on an open connection or transaction.
///
/// ## Returns
/// * `Released(items)` - stock restored
/// * `AlreadyReleased` - a previous call released it
/// * `Err(NotFound)` - the token was never issued
pub async fn release_in(
    conn: &mut SqliteConnection,
    reservation_id: &str,
    now: DateTime<Utc>,
) -> DbResult<ReleaseOutcome> {
    release_from(conn, reservation_id, now, false).await
}

/// Releases a reservation only while it is still `held`.
///
/// Used when a checkout gives up on its own reservation: if the order
/// insert managed to commit anyway, the stock stays with that order.
pub async fn abandon_in(
    conn: &mut SqliteConnection,
    reservation_id: &str,
    now: DateTime<Utc>,
) -> DbResult<ReleaseOutcome> {
    release_from(conn, reservation_id, now, true).await
}

async fn release_from(
    conn: &mut SqliteConnection,
    reservation_id: &str,
    now: DateTime<Utc>,
    held_only: bool,
) -> DbResult<ReleaseOutcome> {
    let claim = if held_only {
        "UPDATE stock_reservations SET status = 'released', released_at = ?2, updated_at = ?2 \
         WHERE id = ?1 AND status = 'held'"
    } else {
        "UPDATE stock_reservations SET status = 'released', released_at = ?2, updated_at = ?2 \
         WHERE id = ?1 AND status IN ('held', 'committed')"
    };

    let claimed = sqlx::query(claim)
        .bind(reservation_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;

    if claimed.rows_affected() == 0 {
        let status: Option<ReservationStatus> =
            sqlx::query_scalar("SELECT status FROM stock_reservations WHERE id = ?1")
                .bind(reservation_id)
                .fetch_optional(&mut *conn)
                .await?;

        return match status {
            Some(ReservationStatus::Released) => {
                debug!(reservation_id = %reservation_id, "Reservation already released");
                Ok(ReleaseOutcome::AlreadyReleased)
            }
            Some(_) => Ok(ReleaseOutcome::Committed),
            None => Err(DbError::not_found("Reservation", reservation_id)),
        };
    }

    let rows: Vec<ReservedItemRow> = sqlx::query_as(
        "SELECT product_id, quantity FROM stock_reservation_items \
         WHERE reservation_id = ?1 ORDER BY product_id",
    )
    .bind(reservation_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        sqlx::query(
            "UPDATE products SET available_quantity = available_quantity + ?2, updated_at = ?3 \
             WHERE id = ?1",
        )
        .bind(&row.product_id)
        .bind(row.quantity)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        items.push(StockRequest::new(
            row.product_id,
            to_u32("stock_reservation_items.quantity", row.quantity)?,
        ));
    }

    info!(reservation_id = %reservation_id, lines = items.len(), "Reservation released");
    Ok(ReleaseOutcome::Released(items))
}

/// Binds a held reservation to the order that now owns it.
///
/// Fails with `Conflict` if the reservation is no longer held (for
/// instance the stale sweep already released it), which aborts the
/// surrounding order transaction.
pub async fn commit_in(
    conn: &mut SqliteConnection,
    reservation_id: &str,
    order_id: &str,
    now: DateTime<Utc>,
) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE stock_reservations
           SET status = 'committed', order_id = ?2, updated_at = ?3
         WHERE id = ?1 AND status = 'held'
        "#,
    )
    .bind(reservation_id)
    .bind(order_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::conflict(
            "Reservation",
            reservation_id,
            "is no longer held",
        ));
    }
    Ok(())
}

// =============================================================================
// Stock Ledger
// =============================================================================

/// Atomic reserve/release over product stock.
#[derive(Debug, Clone)]
pub struct StockLedger {
    pool: SqlitePool,
}

impl StockLedger {
    pub fn new(pool: SqlitePool) -> Self {
        StockLedger { pool }
    }

    /// Reserves every item or none.
    ///
    /// ## Returns
    /// * `Ok(token)` - all quantities decremented
    /// * `Err(DbError::InsufficientStock)` - the full shortfall list;
    ///   no quantity changed
    /// * `Err(DbError::InvalidInput)` - empty list or zero quantity
    pub async fn reserve(&self, items: &[StockRequest]) -> DbResult<ReservationToken> {
        let items = merge_requests(items);
        if items.is_empty() {
            return Err(DbError::InvalidInput("nothing to reserve".to_string()));
        }
        if let Some(zero) = items.iter().find(|i| i.quantity == 0) {
            return Err(DbError::InvalidInput(format!(
                "zero quantity for {}",
                zero.product_id
            )));
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        debug!(reservation_id = %id, lines = items.len(), "Reserving stock");

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO stock_reservations (id, status, created_at, updated_at) \
             VALUES (?1, 'held', ?2, ?2)",
        )
        .bind(&id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let mut shortfalls = Vec::new();
        let mut low_stock = Vec::new();

        for item in &items {
            let quantity = i64::from(item.quantity);
            let remaining: Option<(i64, i64)> = sqlx::query_as(
                r#"
                UPDATE products
                   SET available_quantity = available_quantity - ?2, updated_at = ?3
                 WHERE id = ?1 AND available_quantity >= ?2
                RETURNING available_quantity, low_stock_alert
                "#,
            )
            .bind(&item.product_id)
            .bind(quantity)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await?;

            match remaining {
                Some((left, threshold)) => {
                    sqlx::query(
                        "INSERT INTO stock_reservation_items (reservation_id, product_id, quantity) \
                         VALUES (?1, ?2, ?3)",
                    )
                    .bind(&id)
                    .bind(&item.product_id)
                    .bind(quantity)
                    .execute(&mut *tx)
                    .await?;

                    if left <= threshold {
                        low_stock.push(LowStock {
                            product_id: item.product_id.clone(),
                            remaining: left,
                            threshold,
                        });
                    }
                }
                None => {
                    let available: Option<i64> =
                        sqlx::query_scalar("SELECT available_quantity FROM products WHERE id = ?1")
                            .bind(&item.product_id)
                            .fetch_optional(&mut *tx)
                            .await?;

                    shortfalls.push(StockShortfall {
                        product_id: item.product_id.clone(),
                        requested: item.quantity,
                        available: available.unwrap_or(0),
                    });
                }
            }
        }

        if !shortfalls.is_empty() {
            tx.rollback().await?;
            for s in &shortfalls {
                warn!(
                    product_id = %s.product_id,
                    requested = s.requested,
                    available = s.available,
                    "Insufficient stock"
                );
            }
            return Err(DbError::InsufficientStock { shortfalls });
        }

        tx.commit().await?;

        for low in &low_stock {
            warn!(
                product_id = %low.product_id,
                remaining = low.remaining,
                threshold = low.threshold,
                "Product at or below low-stock alert"
            );
        }
        info!(reservation_id = %id, lines = items.len(), "Stock reserved");

        Ok(ReservationToken {
            id,
            items,
            low_stock,
            created_at: now,
        })
    }

    /// Releases a reservation in its own transaction.
    pub async fn release(&self, reservation_id: &str) -> DbResult<ReleaseOutcome> {
        let mut tx = self.pool.begin().await?;
        let outcome = release_in(&mut tx, reservation_id, Utc::now()).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    /// Gives back a reservation that no order took ownership of.
    pub async fn abandon(&self, reservation_id: &str) -> DbResult<ReleaseOutcome> {
        let mut tx = self.pool.begin().await?;
        let outcome = abandon_in(&mut tx, reservation_id, Utc::now()).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    /// Releases every reservation still `held` that was created before
    /// `cutoff`. Returns the released reservation ids.
    ///
    /// Held reservations older than the TTL belong to requests that died
    /// between reserve and persist.
    pub async fn sweep_stale(&self, cutoff: DateTime<Utc>) -> DbResult<Vec<String>> {
        let stale: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM stock_reservations WHERE status = 'held' AND created_at < ?1 \
             ORDER BY created_at",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut released = Vec::with_capacity(stale.len());
        for id in stale {
            // A concurrent commit may win between the select and the claim.
            let mut tx = self.pool.begin().await?;
            let outcome = abandon_in(&mut tx, &id, Utc::now()).await?;
            tx.commit().await?;
            if let ReleaseOutcome::Released(_) = outcome {
                released.push(id);
            }
        }

        if !released.is_empty() {
            info!(count = released.len(), "Released stale reservations");
        }
        Ok(released)
    }

    /// Adds received stock. Returns the new level.
    pub async fn restock(&self, product_id: &str, quantity: u32) -> DbResult<i64> {
        if quantity == 0 {
            return Err(DbError::InvalidInput("restock quantity must be positive".to_string()));
        }

        let level: Option<i64> = sqlx::query_scalar(
            "UPDATE products SET available_quantity = available_quantity + ?2, updated_at = ?3 \
             WHERE id = ?1 RETURNING available_quantity",
        )
        .bind(product_id)
        .bind(i64::from(quantity))
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        let level = level.ok_or_else(|| DbError::not_found("Product", product_id))?;
        info!(product_id = %product_id, quantity, level, "Restocked");
        Ok(level)
    }

    /// Current available quantity, or `None` for an unknown product.
    pub async fn available(&self, product_id: &str) -> DbResult<Option<i64>> {
        let level: Option<i64> =
            sqlx::query_scalar("SELECT available_quantity FROM products WHERE id = ?1")
                .bind(product_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(level)
    }

    pub async fn reservation_status(&self, reservation_id: &str) -> DbResult<Option<ReservationStatus>> {
        let status: Option<ReservationStatus> =
            sqlx::query_scalar("SELECT status FROM stock_reservations WHERE id = ?1")
                .bind(reservation_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(status)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::test_support::{memory_db, seed_product};
    use chrono::Duration;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_reserve_decrements_and_merges() {
        let db = memory_db().await;
        seed_product(&db, "p1", 100, 10).await;

        let token = db
            .stock()
            .reserve(&[StockRequest::new("p1", 2), StockRequest::new("p1", 3)])
            .await
            .unwrap();

        assert_eq!(token.items, vec![StockRequest::new("p1", 5)]);
        assert_eq!(db.stock().available("p1").await.unwrap(), Some(5));
        assert_eq!(
            db.stock().reservation_status(&token.id).await.unwrap(),
            Some(ReservationStatus::Held)
        );
    }

    #[tokio::test]
    async fn test_reserve_is_all_or_nothing() {
        let db = memory_db().await;
        seed_product(&db, "p1", 100, 10).await;
        seed_product(&db, "p2", 100, 1).await;
        seed_product(&db, "p3", 100, 0).await;

        let err = db
            .stock()
            .reserve(&[
                StockRequest::new("p1", 4),
                StockRequest::new("p2", 2),
                StockRequest::new("p3", 1),
            ])
            .await
            .unwrap_err();

        match err {
            DbError::InsufficientStock { shortfalls } => {
                let ids: Vec<&str> = shortfalls.iter().map(|s| s.product_id.as_str()).collect();
                assert_eq!(ids, vec!["p2", "p3"]);
                assert_eq!(shortfalls[0].available, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // p1 would have succeeded alone but was not touched.
        assert_eq!(db.stock().available("p1").await.unwrap(), Some(10));
        assert_eq!(db.stock().available("p2").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_unknown_product_is_a_shortfall() {
        let db = memory_db().await;
        let err = db.stock().reserve(&[StockRequest::new("ghost", 1)]).await.unwrap_err();
        assert!(matches!(err, DbError::InsufficientStock { .. }));
    }

    #[tokio::test]
    async fn test_release_once_per_token() {
        let db = memory_db().await;
        seed_product(&db, "p1", 100, 3).await;

        let token = db.stock().reserve(&[StockRequest::new("p1", 3)]).await.unwrap();
        assert_eq!(db.stock().available("p1").await.unwrap(), Some(0));

        let first = db.stock().release(&token.id).await.unwrap();
        assert_eq!(first, ReleaseOutcome::Released(vec![StockRequest::new("p1", 3)]));
        let second = db.stock().release(&token.id).await.unwrap();
        assert_eq!(second, ReleaseOutcome::AlreadyReleased);

        assert_eq!(db.stock().available("p1").await.unwrap(), Some(3));
        assert!(matches!(
            db.stock().release("never-issued").await,
            Err(DbError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_low_stock_reported() {
        let db = memory_db().await;
        seed_product(&db, "p1", 100, 4).await; // alert level 2

        let token = db.stock().reserve(&[StockRequest::new("p1", 2)]).await.unwrap();
        assert_eq!(token.low_stock.len(), 1);
        assert_eq!(token.low_stock[0].remaining, 2);
    }

    #[tokio::test]
    async fn test_sweep_releases_only_held() {
        let db = memory_db().await;
        seed_product(&db, "p1", 100, 10).await;

        let stale = db.stock().reserve(&[StockRequest::new("p1", 2)]).await.unwrap();
        let owned = db.stock().reserve(&[StockRequest::new("p1", 3)]).await.unwrap();
        {
            let mut conn = db.pool().acquire().await.unwrap();
            commit_in(&mut conn, &owned.id, "order-1", Utc::now()).await.unwrap();
        }

        let released = db
            .stock()
            .sweep_stale(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();

        assert_eq!(released, vec![stale.id.clone()]);
        assert_eq!(db.stock().available("p1").await.unwrap(), Some(7));
        assert_eq!(
            db.stock().reservation_status(&owned.id).await.unwrap(),
            Some(ReservationStatus::Committed)
        );
    }

    #[tokio::test]
    async fn test_commit_requires_held() {
        let db = memory_db().await;
        seed_product(&db, "p1", 100, 10).await;
        let token = db.stock().reserve(&[StockRequest::new("p1", 1)]).await.unwrap();
        db.stock().release(&token.id).await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        let err = commit_in(&mut conn, &token.id, "order-1", Utc::now()).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_abandon_leaves_committed_stock() {
        let db = memory_db().await;
        seed_product(&db, "p1", 100, 10).await;
        let token = db.stock().reserve(&[StockRequest::new("p1", 4)]).await.unwrap();
        {
            let mut conn = db.pool().acquire().await.unwrap();
            commit_in(&mut conn, &token.id, "order-1", Utc::now()).await.unwrap();
        }

        assert_eq!(db.stock().abandon(&token.id).await.unwrap(), ReleaseOutcome::Committed);
        assert_eq!(db.stock().available("p1").await.unwrap(), Some(6));

        let loose = db.stock().reserve(&[StockRequest::new("p1", 1)]).await.unwrap();
        assert!(matches!(
            db.stock().abandon(&loose.id).await.unwrap(),
            ReleaseOutcome::Released(_)
        ));
        assert_eq!(db.stock().available("p1").await.unwrap(), Some(6));
    }

    #[tokio::test]
    async fn test_restock() {
        let db = memory_db().await;
        seed_product(&db, "p1", 100, 1).await;
        assert_eq!(db.stock().restock("p1", 4).await.unwrap(), 5);
        assert!(db.stock().restock("p1", 0).await.is_err());
        assert!(matches!(
            db.stock().restock("ghost", 1).await,
            Err(DbError::NotFound { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reserves_never_oversell() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(DbConfig::new(dir.path().join("stock.db")).max_connections(8))
            .await
            .unwrap();
        seed_product(&db, "last", 100, 5).await;

        let db = Arc::new(db);
        let mut handles = Vec::new();
        for _ in 0..12 {
            let db = Arc::clone(&db);
            handles.push(tokio::spawn(async move {
                db.stock().reserve(&[StockRequest::new("last", 1)]).await
            }));
        }

        let mut won = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => won += 1,
                Err(DbError::InsufficientStock { .. }) => {}
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert_eq!(won, 5);
        assert_eq!(db.stock().available("last").await.unwrap(), Some(0));
    }
}
