//! # Product Repository
//!
//! Catalog reads and the administrative writes that do not touch stock.
//!
//! ## Stock Ownership
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 Who writes products.available_quantity?                 │
//! │                                                                         │
//! │   ProductRepository::insert ──► initial level only                     │
//! │   StockLedger::reserve      ──► available - n   (floor-guarded)        │
//! │   StockLedger::release      ──► available + n   (once per token)       │
//! │   StockLedger::restock      ──► available + n   (receiving goods)      │
//! │                                                                         │
//! │   Nothing else writes the column.                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::{parse_decimal, placeholders};
use ledgerline_core::{Money, Product, ProductStatus};

const PRODUCT_COLUMNS: &str = "id, sku, name, category, price_cents, weight_kg, status, \
     available_quantity, low_stock_alert, created_at, updated_at";

#[derive(Debug, FromRow)]
struct ProductRow {
    id: String,
    sku: String,
    name: String,
    category: String,
    price_cents: i64,
    weight_kg: String,
    status: ProductStatus,
    available_quantity: i64,
    low_stock_alert: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProductRow> for Product {
    type Error = DbError;

    fn try_from(row: ProductRow) -> DbResult<Self> {
        Ok(Product {
            weight_kg: parse_decimal("products.weight_kg", &row.weight_kg)?,
            id: row.id,
            sku: row.sku,
            name: row.name,
            category: row.category,
            price: Money::from_cents(row.price_cents),
            status: row.status,
            available_quantity: row.available_quantity,
            low_stock_alert: row.low_stock_alert,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_products(rows: Vec<ProductRow>) -> DbResult<Vec<Product>> {
    rows.into_iter().map(Product::try_from).collect()
}

/// Repository for product database operations.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Inserts a new product with its opening stock level.
    ///
    /// ## Returns
    /// * `Err(DbError::UniqueViolation)` - id or SKU already exists
    /// * `Err(DbError::InvalidInput)` - negative price or stock
    pub async fn insert(&self, product: &Product) -> DbResult<()> {
        debug!(product_id = %product.id, sku = %product.sku, "Inserting product");

        if product.price.is_negative() || product.available_quantity < 0 {
            return Err(DbError::InvalidInput(format!(
                "product {} has a negative price or stock level",
                product.id
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO products (
                id, sku, name, category, price_cents, weight_kg, status,
                available_quantity, low_stock_alert, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&product.id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(&product.category)
        .bind(product.price.cents())
        .bind(product.weight_kg.to_string())
        .bind(product.status)
        .bind(product.available_quantity)
        .bind(product.low_stock_alert)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets a product by its ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1");
        let row: Option<ProductRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Product::try_from).transpose()
    }

    /// Fetches several products at once. Missing ids are simply absent
    /// from the result.
    pub async fn get_many(&self, ids: &[String]) -> DbResult<Vec<Product>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id IN ({})",
            placeholders(1, ids.len())
        );
        let mut query = sqlx::query_as::<_, ProductRow>(&sql);
        for id in ids {
            query = query.bind(id);
        }

        into_products(query.fetch_all(&self.pool).await?)
    }

    /// Lists purchasable products by name.
    pub async fn list_active(&self, limit: u32) -> DbResult<Vec<Product>> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE status = 'active' ORDER BY name LIMIT ?1"
        );
        let rows: Vec<ProductRow> = sqlx::query_as(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        into_products(rows)
    }

    /// Products at or below their low-stock threshold, lowest first.
    pub async fn low_stock(&self) -> DbResult<Vec<Product>> {
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products \
             WHERE available_quantity <= low_stock_alert \
             ORDER BY available_quantity, name"
        );
        let rows: Vec<ProductRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;

        into_products(rows)
    }

    /// Changes catalog status (delisting does not touch stock).
    pub async fn set_status(&self, id: &str, status: ProductStatus) -> DbResult<()> {
        debug!(product_id = %id, status = %status, "Updating product status");

        let result = sqlx::query("UPDATE products SET status = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(status)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", id));
        }
        Ok(())
    }

    /// Changes the list price. Placed orders keep their frozen prices.
    pub async fn update_price(&self, id: &str, price: Money) -> DbResult<()> {
        debug!(product_id = %id, price = %price, "Updating product price");

        if price.is_negative() {
            return Err(DbError::InvalidInput(format!("negative price for {id}")));
        }

        let result = sqlx::query("UPDATE products SET price_cents = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(price.cents())
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", id));
        }
        Ok(())
    }

    /// Counts all products.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{memory_db, product, seed_product};
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_insert_and_get() {
        let db = memory_db().await;
        let p = seed_product(&db, "p1", 1299, 5).await;

        let loaded = db.products().get_by_id("p1").await.unwrap().unwrap();
        assert_eq!(loaded.sku, p.sku);
        assert_eq!(loaded.price.cents(), 1299);
        assert_eq!(loaded.weight_kg, Decimal::new(5, 1));
        assert_eq!(loaded.status, ProductStatus::Active);
        assert_eq!(db.products().count().await.unwrap(), 1);
        assert!(db.products().get_by_id("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_sku_rejected() {
        let db = memory_db().await;
        seed_product(&db, "p1", 100, 1).await;

        let mut dup = product("p2", 100, 1);
        dup.sku = "SKU-p1".to_string();
        let err = db.products().insert(&dup).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn test_status_and_price_updates() {
        let db = memory_db().await;
        seed_product(&db, "p1", 100, 1).await;
        seed_product(&db, "p2", 200, 50).await;

        db.products().set_status("p1", ProductStatus::Inactive).await.unwrap();
        db.products().update_price("p2", Money::from_cents(250)).await.unwrap();

        let active = db.products().list_active(10).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].price.cents(), 250);

        let many = db
            .products()
            .get_many(&["p1".to_string(), "p2".to_string(), "p3".to_string()])
            .await
            .unwrap();
        assert_eq!(many.len(), 2);

        assert!(matches!(
            db.products().set_status("p9", ProductStatus::Active).await,
            Err(DbError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_low_stock() {
        let db = memory_db().await;
        seed_product(&db, "p1", 100, 1).await;
        seed_product(&db, "p2", 100, 40).await;

        let low = db.products().low_stock().await.unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].id, "p1");
    }
}
