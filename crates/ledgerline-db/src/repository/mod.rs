//! # Repository Module
//!
//! Database repository implementations for Ledgerline.
//!
//! ## Repository Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  OrderLifecycleManager (apps/checkout)                                 │
//! │       │                                                                 │
//! │       ├── db.products()        ProductRepository     catalog reads     │
//! │       ├── db.stock()           StockLedger           reserve/release   │
//! │       ├── db.shipping_rules()  ShippingRuleRepository default flag     │
//! │       ├── db.coupons()         CouponRepository      guarded redeem    │
//! │       ├── db.carts()           CartRepository        save/load/expire  │
//! │       ├── db.orders()          OrderRepository       persist + CAS     │
//! │       └── db.payments()        PaymentRepository     one per order     │
//! │                                                                         │
//! │  Row structs (`…Row`) mirror tables; `TryFrom<Row>` builds the core    │
//! │  type and reports bad column data as `DbError::Decode`.                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod cart;
pub mod coupon;
pub mod order;
pub mod payment;
pub mod product;
pub mod shipping;
pub mod stock;

use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::{DbError, DbResult};

// =============================================================================
// Column Codecs
// =============================================================================

/// Parses a TEXT decimal column.
pub(crate) fn parse_decimal(column: &str, value: &str) -> DbResult<Decimal> {
    Decimal::from_str(value.trim())
        .map_err(|e| DbError::Decode(format!("{column} '{value}': {e}")))
}

/// Converts a stored INTEGER count into `u32`.
pub(crate) fn to_u32(column: &str, value: i64) -> DbResult<u32> {
    u32::try_from(value).map_err(|_| DbError::Decode(format!("{column} out of range: {value}")))
}

/// Comma-separated `?N` placeholders starting at `first`.
pub(crate) fn placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|n| format!("?{n}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Fixtures shared by the repository tests.

    use chrono::Utc;
    use ledgerline_core::{Money, Product, ProductStatus};
    use rust_decimal::Decimal;

    use crate::pool::{Database, DbConfig};

    pub async fn memory_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    pub fn product(id: &str, cents: i64, stock: i64) -> Product {
        let now = Utc::now();
        Product {
            id: id.to_string(),
            sku: format!("SKU-{id}"),
            name: format!("Product {id}"),
            category: "general".to_string(),
            price: Money::from_cents(cents),
            weight_kg: Decimal::new(5, 1),
            status: ProductStatus::Active,
            available_quantity: stock,
            low_stock_alert: 2,
            created_at: now,
            updated_at: now,
        }
    }

    pub async fn seed_product(db: &Database, id: &str, cents: i64, stock: i64) -> Product {
        let p = product(id, cents, stock);
        db.products().insert(&p).await.unwrap();
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(3, 2), "?3, ?4");
        assert_eq!(placeholders(1, 0), "");
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal("w", "0.5").unwrap(), Decimal::new(5, 1));
        assert!(matches!(parse_decimal("w", "abc"), Err(DbError::Decode(_))));
        assert!(to_u32("q", -1).is_err());
    }
}
