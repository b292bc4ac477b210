//! # Coupon Repository
//!
//! Coupon storage and redemption.
//!
//! Validation is pure (`ledgerline_core::coupon::validate`) and never writes.
//! Only [`redeem_in`] moves the counters, and it re-checks both limits in
//! the UPDATE itself:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  coupons.usage_count += 1                                               │
//! │     WHERE usage_limit_total IS NULL OR usage_count < usage_limit_total  │
//! │     0 rows → UsageLimitReached                                          │
//! │                                                                         │
//! │  coupon_usages(coupon, owner).uses += 1   (upsert)                      │
//! │     WHERE per_customer IS NULL OR uses < per_customer                   │
//! │     0 rows → CustomerLimitReached                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both run inside the order transaction, so a rejected redemption rolls
//! the whole order back.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::to_u32;
use ledgerline_core::coupon::{Coupon, CouponRejection, UsageLimit};
use ledgerline_core::validation::validate_coupon_code;
use ledgerline_core::Money;

const COUPON_COLUMNS: &str = "id, code, description, discount, starts_at, ends_at, \
     usage_limit_total, usage_limit_per_customer, usage_count, minimum_purchase_cents, \
     minimum_items, applicable_categories, is_active";

#[derive(Debug, FromRow)]
struct CouponRow {
    id: String,
    code: String,
    description: Option<String>,
    discount: String,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    usage_limit_total: Option<i64>,
    usage_limit_per_customer: Option<i64>,
    usage_count: i64,
    minimum_purchase_cents: i64,
    minimum_items: i64,
    applicable_categories: String,
    is_active: bool,
}

impl TryFrom<CouponRow> for Coupon {
    type Error = DbError;

    fn try_from(row: CouponRow) -> DbResult<Self> {
        let total = row
            .usage_limit_total
            .map(|v| to_u32("coupons.usage_limit_total", v))
            .transpose()?;
        let per_customer = row
            .usage_limit_per_customer
            .map(|v| to_u32("coupons.usage_limit_per_customer", v))
            .transpose()?;

        Ok(Coupon {
            discount: serde_json::from_str(&row.discount)?,
            applicable_categories: serde_json::from_str(&row.applicable_categories)?,
            usage_limit: UsageLimit { total, per_customer },
            usage_count: to_u32("coupons.usage_count", row.usage_count)?,
            minimum_items: to_u32("coupons.minimum_items", row.minimum_items)?,
            minimum_purchase: Money::from_cents(row.minimum_purchase_cents),
            id: row.id,
            code: row.code,
            description: row.description,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            is_active: row.is_active,
        })
    }
}

// =============================================================================
// Transaction-scoped Operations
// =============================================================================

/// Consumes one use of `coupon` for `owner_key`.
///
/// Fails with `DbError::CouponRejected` when either limit is already
/// reached at commit time, even if validation passed earlier.
pub async fn redeem_in(
    conn: &mut SqliteConnection,
    coupon: &Coupon,
    owner_key: &str,
    now: DateTime<Utc>,
) -> DbResult<()> {
    let claimed = sqlx::query(
        r#"
        UPDATE coupons
           SET usage_count = usage_count + 1, updated_at = ?2
         WHERE id = ?1
           AND (usage_limit_total IS NULL OR usage_count < usage_limit_total)
        "#,
    )
    .bind(&coupon.id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    if claimed.rows_affected() == 0 {
        return Err(DbError::CouponRejected {
            code: coupon.code.clone(),
            reason: CouponRejection::UsageLimitReached,
        });
    }

    let per_customer = coupon.usage_limit.per_customer.map(i64::from);
    let counted = sqlx::query(
        r#"
        INSERT INTO coupon_usages (coupon_id, owner_key, uses, updated_at)
        VALUES (?1, ?2, 1, ?3)
        ON CONFLICT (coupon_id, owner_key) DO UPDATE
           SET uses = uses + 1, updated_at = excluded.updated_at
         WHERE ?4 IS NULL OR uses < ?4
        "#,
    )
    .bind(&coupon.id)
    .bind(owner_key)
    .bind(now)
    .bind(per_customer)
    .execute(&mut *conn)
    .await?;

    if counted.rows_affected() == 0 {
        return Err(DbError::CouponRejected {
            code: coupon.code.clone(),
            reason: CouponRejection::CustomerLimitReached {
                limit: coupon.usage_limit.per_customer.unwrap_or(0),
            },
        });
    }

    debug!(code = %coupon.code, owner = %owner_key, "Coupon redeemed");
    Ok(())
}

// =============================================================================
// Repository
// =============================================================================

#[derive(Debug, Clone)]
pub struct CouponRepository {
    pool: SqlitePool,
}

impl CouponRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CouponRepository { pool }
    }

    /// Inserts a coupon. The code is normalized to upper case.
    pub async fn insert(&self, coupon: &Coupon) -> DbResult<()> {
        let code = validate_coupon_code(&coupon.code)
            .map_err(|e| DbError::InvalidInput(e.to_string()))?;
        if coupon.ends_at <= coupon.starts_at {
            return Err(DbError::InvalidInput(format!("coupon {code} ends before it starts")));
        }

        info!(code = %code, "Inserting coupon");
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO coupons (
                id, code, description, discount, starts_at, ends_at,
                usage_limit_total, usage_limit_per_customer, usage_count,
                minimum_purchase_cents, minimum_items, applicable_categories,
                is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
            "#,
        )
        .bind(&coupon.id)
        .bind(&code)
        .bind(&coupon.description)
        .bind(serde_json::to_string(&coupon.discount)?)
        .bind(coupon.starts_at)
        .bind(coupon.ends_at)
        .bind(coupon.usage_limit.total.map(i64::from))
        .bind(coupon.usage_limit.per_customer.map(i64::from))
        .bind(i64::from(coupon.usage_count))
        .bind(coupon.minimum_purchase.cents())
        .bind(i64::from(coupon.minimum_items))
        .bind(serde_json::to_string(&coupon.applicable_categories)?)
        .bind(coupon.is_active)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Looks a coupon up by code, ignoring case.
    pub async fn get_by_code(&self, code: &str) -> DbResult<Option<Coupon>> {
        let sql = format!("SELECT {COUPON_COLUMNS} FROM coupons WHERE code = ?1");
        let row: Option<CouponRow> = sqlx::query_as(&sql)
            .bind(code.trim())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Coupon::try_from).transpose()
    }

    /// How many times `owner_key` has redeemed the coupon.
    pub async fn usage_for(&self, coupon_id: &str, owner_key: &str) -> DbResult<u32> {
        let uses: Option<i64> = sqlx::query_scalar(
            "SELECT uses FROM coupon_usages WHERE coupon_id = ?1 AND owner_key = ?2",
        )
        .bind(coupon_id)
        .bind(owner_key)
        .fetch_optional(&self.pool)
        .await?;

        to_u32("coupon_usages.uses", uses.unwrap_or(0))
    }

    pub async fn set_active(&self, code: &str, active: bool) -> DbResult<()> {
        let result = sqlx::query("UPDATE coupons SET is_active = ?2, updated_at = ?3 WHERE code = ?1")
            .bind(code.trim())
            .bind(active)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Coupon", code));
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::repository::test_support::memory_db;
    use chrono::Duration;
    use ledgerline_core::CouponDiscount;
    use rust_decimal::Decimal;

    pub(crate) fn coupon(code: &str, total: Option<u32>, per_customer: Option<u32>) -> Coupon {
        let now = Utc::now();
        Coupon {
            id: format!("c-{code}"),
            code: code.to_string(),
            description: None,
            discount: CouponDiscount::Percentage {
                percent: Decimal::new(10, 0),
            },
            starts_at: now - Duration::days(1),
            ends_at: now + Duration::days(30),
            usage_limit: UsageLimit { total, per_customer },
            usage_count: 0,
            minimum_purchase: Money::zero(),
            minimum_items: 0,
            applicable_categories: Vec::new(),
            is_active: true,
        }
    }

    async fn redeem(db: &crate::pool::Database, c: &Coupon, owner: &str) -> DbResult<()> {
        let mut tx = db.pool().begin().await.unwrap();
        let result = redeem_in(&mut tx, c, owner, Utc::now()).await;
        if result.is_ok() {
            tx.commit().await.unwrap();
        }
        result
    }

    #[tokio::test]
    async fn test_insert_normalizes_code_and_lookup_ignores_case() {
        let db = memory_db().await;
        db.coupons().insert(&coupon("save10", None, None)).await.unwrap();

        let loaded = db.coupons().get_by_code("Save10").await.unwrap().unwrap();
        assert_eq!(loaded.code, "SAVE10");
        assert_eq!(loaded.discount, CouponDiscount::Percentage { percent: Decimal::new(10, 0) });
        assert!(db.coupons().get_by_code("NOPE").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_active_toggles_coupon() {
        let db = memory_db().await;
        db.coupons().insert(&coupon("PAUSE", None, None)).await.unwrap();

        db.coupons().set_active(" pause ", false).await.unwrap();
        let paused = db.coupons().get_by_code("PAUSE").await.unwrap().unwrap();
        assert!(!paused.is_active);

        db.coupons().set_active("PAUSE", true).await.unwrap();
        assert!(db.coupons().get_by_code("PAUSE").await.unwrap().unwrap().is_active);

        assert!(matches!(
            db.coupons().set_active("GHOST", false).await,
            Err(DbError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_code_rejected() {
        let db = memory_db().await;
        let err = db.coupons().insert(&coupon("a!", None, None)).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_total_limit_enforced_at_redeem() {
        let db = memory_db().await;
        let c = coupon("ONCE", Some(1), None);
        db.coupons().insert(&c).await.unwrap();

        redeem(&db, &c, "alice").await.unwrap();
        let err = redeem(&db, &c, "bob").await.unwrap_err();
        assert!(matches!(
            err,
            DbError::CouponRejected {
                ref code,
                reason: CouponRejection::UsageLimitReached,
            } if code == "ONCE"
        ));

        let loaded = db.coupons().get_by_code("ONCE").await.unwrap().unwrap();
        assert_eq!(loaded.usage_count, 1);
    }

    #[tokio::test]
    async fn test_per_customer_limit_enforced_at_redeem() {
        let db = memory_db().await;
        let c = coupon("TWICE", None, Some(2));
        db.coupons().insert(&c).await.unwrap();

        redeem(&db, &c, "alice").await.unwrap();
        redeem(&db, &c, "alice").await.unwrap();
        let err = redeem(&db, &c, "alice").await.unwrap_err();
        assert!(matches!(
            err,
            DbError::CouponRejected {
                reason: CouponRejection::CustomerLimitReached { limit: 2 },
                ..
            }
        ));

        // The rolled-back attempt did not bump the global counter.
        let loaded = db.coupons().get_by_code("TWICE").await.unwrap().unwrap();
        assert_eq!(loaded.usage_count, 2);
        assert_eq!(db.coupons().usage_for(&c.id, "alice").await.unwrap(), 2);
        assert_eq!(db.coupons().usage_for(&c.id, "bob").await.unwrap(), 0);

        redeem(&db, &c, "bob").await.unwrap();
    }
}
