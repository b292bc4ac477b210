//! # Migrations
//!
//! The schema ships inside the binary; `Database::new` applies whatever
//! is pending.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  products ◄──── stock_reservation_items ────► stock_reservations       │
//! │                                                      ▲                  │
//! │                                                      │ reservation_id   │
//! │  order_sequences        order_items ────► orders ────┘                  │
//! │                                            ▲                            │
//! │                                  payments ─┘ (UNIQUE order_id)          │
//! │                                                                         │
//! │  coupons ◄──── coupon_usages (coupon_id, owner_key)                     │
//! │  shipping_rules                                                         │
//! │  carts ◄──── cart_items                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Applied files are checksummed in `_sqlx_migrations`, so schema changes
//! go in a new `NNN_description.sql` rather than an edit to `001`.

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Safe to call on every start.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    MIGRATOR.run(pool).await?;
    info!(embedded = MIGRATOR.migrations.len(), "Migrations applied");
    Ok(())
}

/// `(embedded, applied)`. A database that was never migrated reports zero
/// applied.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let applied = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
        .fetch_one(pool)
        .await
        .map(|n| usize::try_from(n).unwrap_or_default())
        .unwrap_or_default();
    Ok((MIGRATOR.migrations.len(), applied))
}
