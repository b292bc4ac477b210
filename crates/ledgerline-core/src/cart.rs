//! # Cart Aggregate
//!
//! The per-customer collection of line items that feeds the pricing engine.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Cart::new(owner)                                                       │
//! │     │                                                                   │
//! │     ├── add_item / update_quantity / remove_item   (touch → +30 days)  │
//! │     ├── apply_coupon / remove_coupon                                    │
//! │     │                                                                   │
//! │     ├── create_order succeeds ──► cleared                               │
//! │     └── 30 days idle ──────────► soft-deleted by the expiry sweep       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The cart is not a business record: prices are snapshots taken at
//! add-to-cart time and re-checked when the order is created. The stock
//! check here is advisory; the binding check is the stock ledger's reserve.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::{Product, StockRequest};
use crate::validation::validate_quantity;
use crate::{CART_INACTIVITY_DAYS, MAX_CART_ITEMS, MAX_ITEM_QUANTITY};

// =============================================================================
// Line Item
// =============================================================================

/// A product in a cart, priced at the moment it was added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LineItem {
    pub product_id: String,
    pub name: String,
    pub category: String,
    pub unit_price: Money,
    pub quantity: u32,
    #[ts(as = "String")]
    pub weight_kg: Decimal,
    #[ts(as = "String")]
    pub added_at: DateTime<Utc>,
}

impl LineItem {
    /// Snapshots a product into a line.
    pub fn from_product(product: &Product, quantity: u32, now: DateTime<Utc>) -> Self {
        LineItem {
            product_id: product.id.clone(),
            name: product.name.clone(),
            category: product.category.clone(),
            unit_price: product.price,
            quantity,
            weight_kg: product.weight_kg,
            added_at: now,
        }
    }

    /// `unit_price × quantity`.
    #[inline]
    pub fn line_subtotal(&self) -> Money {
        self.unit_price.multiply_quantity(self.quantity)
    }

    /// `weight_kg × quantity`.
    #[inline]
    pub fn line_weight(&self) -> Decimal {
        self.weight_kg * Decimal::from(self.quantity)
    }
}

// =============================================================================
// Summary
// =============================================================================

/// Derived view of the cart, recomputed from the items on every call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct CartSummary {
    /// Distinct lines.
    pub item_count: usize,
    /// Sum of quantities.
    pub total_quantity: u32,
    pub subtotal: Money,
    #[ts(as = "String")]
    pub total_weight: Decimal,
}

// =============================================================================
// Cart
// =============================================================================

/// A customer's cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Cart {
    /// `customer_id` or `guest:<email>`.
    pub owner: String,
    /// Insertion order is kept for display only.
    pub items: Vec<LineItem>,
    pub applied_coupon: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub expires_at: DateTime<Utc>,
}

impl Cart {
    /// Creates an empty cart for `owner`.
    pub fn new(owner: impl Into<String>, now: DateTime<Utc>) -> Self {
        Cart {
            owner: owner.into(),
            items: Vec::new(),
            applied_coupon: None,
            created_at: now,
            updated_at: now,
            expires_at: now + Duration::days(CART_INACTIVITY_DAYS),
        }
    }

    /// Adds `quantity` of a product, merging with an existing line.
    ///
    /// ## Errors
    /// - `ProductUnavailable` if the product is not active
    /// - `QuantityTooLarge` if the merged line would exceed the limit
    /// - `CartTooLarge` if a new line would exceed the line limit
    /// - `InsufficientStock` if the catalog shows too little stock
    pub fn add_item(&mut self, product: &Product, quantity: u32, now: DateTime<Utc>) -> CoreResult<()> {
        if !product.is_purchasable() {
            return Err(CoreError::ProductUnavailable {
                product_id: product.id.clone(),
                status: product.status.to_string(),
            });
        }
        validate_quantity(quantity)?;

        let existing = self.items.iter().position(|i| i.product_id == product.id);
        let merged = existing
            .map(|idx| self.items[idx].quantity)
            .unwrap_or(0)
            .saturating_add(quantity);

        if merged > MAX_ITEM_QUANTITY {
            return Err(CoreError::QuantityTooLarge {
                requested: merged,
                max: MAX_ITEM_QUANTITY,
            });
        }
        if existing.is_none() && self.items.len() >= MAX_CART_ITEMS {
            return Err(CoreError::CartTooLarge { max: MAX_CART_ITEMS });
        }
        if product.available_quantity < i64::from(merged) {
            return Err(CoreError::InsufficientStock {
                product_id: product.id.clone(),
                available: product.available_quantity,
                requested: merged,
            });
        }

        match existing {
            Some(idx) => {
                let line = &mut self.items[idx];
                line.quantity = merged;
                // Re-adding refreshes the price snapshot.
                line.unit_price = product.price;
                line.weight_kg = product.weight_kg;
            }
            None => self.items.push(LineItem::from_product(product, quantity, now)),
        }

        self.touch(now);
        Ok(())
    }

    /// Sets a line's quantity. Zero removes the line.
    pub fn update_quantity(&mut self, product_id: &str, quantity: u32, now: DateTime<Utc>) -> CoreResult<()> {
        if quantity == 0 {
            return self.remove_item(product_id, now);
        }
        validate_quantity(quantity)?;

        let line = self
            .items
            .iter_mut()
            .find(|i| i.product_id == product_id)
            .ok_or_else(|| CoreError::NotInCart(product_id.to_string()))?;
        line.quantity = quantity;

        self.touch(now);
        Ok(())
    }

    /// Removes a line.
    pub fn remove_item(&mut self, product_id: &str, now: DateTime<Utc>) -> CoreResult<()> {
        let before = self.items.len();
        self.items.retain(|i| i.product_id != product_id);
        if self.items.len() == before {
            return Err(CoreError::NotInCart(product_id.to_string()));
        }

        self.touch(now);
        Ok(())
    }

    /// Empties the cart and drops the applied coupon.
    pub fn clear(&mut self, now: DateTime<Utc>) {
        self.items.clear();
        self.applied_coupon = None;
        self.touch(now);
    }

    /// Records a coupon code on the cart. The code is checked by the coupon
    /// evaluator at quote and order time, not here.
    pub fn apply_coupon(&mut self, code: impl Into<String>, now: DateTime<Utc>) {
        self.applied_coupon = Some(code.into());
        self.touch(now);
    }

    pub fn remove_coupon(&mut self, now: DateTime<Utc>) {
        self.applied_coupon = None;
        self.touch(now);
    }

    /// Recomputes the derived summary.
    pub fn summary(&self) -> CartSummary {
        CartSummary {
            item_count: self.items.len(),
            total_quantity: self.items.iter().map(|i| i.quantity).sum(),
            subtotal: self.items.iter().map(LineItem::line_subtotal).sum(),
            total_weight: self.items.iter().map(LineItem::line_weight).sum(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// A cart idle past its expiry is treated as absent.
    #[inline]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Records activity and pushes the expiry out.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.expires_at = now + Duration::days(CART_INACTIVITY_DAYS);
    }

    /// What the stock ledger must reserve for this cart.
    pub fn stock_requests(&self) -> Vec<StockRequest> {
        self.items
            .iter()
            .map(|i| StockRequest::new(i.product_id.clone(), i.quantity))
            .collect()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProductStatus;

    fn product(id: &str, cents: i64, stock: i64) -> Product {
        let now = Utc::now();
        Product {
            id: id.to_string(),
            sku: format!("SKU-{id}"),
            name: format!("Product {id}"),
            category: "general".to_string(),
            price: Money::from_cents(cents),
            weight_kg: Decimal::new(25, 2),
            status: ProductStatus::Active,
            available_quantity: stock,
            low_stock_alert: 2,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_add_merges_lines() {
        let now = Utc::now();
        let mut cart = Cart::new("cust-1", now);
        let p = product("p1", 1000, 20);

        cart.add_item(&p, 2, now).unwrap();
        cart.add_item(&p, 3, now).unwrap();

        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].quantity, 5);

        let summary = cart.summary();
        assert_eq!(summary.subtotal.cents(), 5000);
        assert_eq!(summary.total_weight, Decimal::new(125, 2));
    }

    #[test]
    fn test_add_rejects_inactive_product() {
        let now = Utc::now();
        let mut cart = Cart::new("cust-1", now);
        let mut p = product("p1", 1000, 20);
        p.status = ProductStatus::Draft;

        let err = cart.add_item(&p, 1, now).unwrap_err();
        assert!(matches!(err, CoreError::ProductUnavailable { .. }));
        assert!(cart.is_empty());
    }

    #[test]
    fn test_add_enforces_line_quantity_limit() {
        let now = Utc::now();
        let mut cart = Cart::new("cust-1", now);
        let p = product("p1", 1000, 100);

        cart.add_item(&p, 8, now).unwrap();
        let err = cart.add_item(&p, 3, now).unwrap_err();
        assert!(matches!(err, CoreError::QuantityTooLarge { requested: 11, .. }));
        assert_eq!(cart.items[0].quantity, 8);
    }

    #[test]
    fn test_add_soft_stock_check() {
        let now = Utc::now();
        let mut cart = Cart::new("cust-1", now);
        let p = product("p1", 1000, 1);

        let err = cart.add_item(&p, 2, now).unwrap_err();
        assert!(matches!(err, CoreError::InsufficientStock { available: 1, .. }));
    }

    #[test]
    fn test_update_and_remove() {
        let now = Utc::now();
        let mut cart = Cart::new("cust-1", now);
        cart.add_item(&product("p1", 500, 10), 1, now).unwrap();
        cart.add_item(&product("p2", 700, 10), 1, now).unwrap();

        cart.update_quantity("p1", 4, now).unwrap();
        assert_eq!(cart.summary().total_quantity, 5);

        cart.update_quantity("p2", 0, now).unwrap();
        assert_eq!(cart.items.len(), 1);

        assert!(matches!(
            cart.remove_item("p2", now),
            Err(CoreError::NotInCart(_))
        ));
    }

    #[test]
    fn test_clear_drops_coupon() {
        let now = Utc::now();
        let mut cart = Cart::new("cust-1", now);
        cart.add_item(&product("p1", 500, 10), 1, now).unwrap();
        cart.apply_coupon("SAVE10", now);

        cart.clear(now);
        assert!(cart.is_empty());
        assert_eq!(cart.applied_coupon, None);
    }

    #[test]
    fn test_expiry_follows_activity() {
        let start = Utc::now();
        let mut cart = Cart::new("cust-1", start);
        assert!(!cart.is_expired(start + Duration::days(29)));
        assert!(cart.is_expired(start + Duration::days(30)));

        let later = start + Duration::days(20);
        cart.touch(later);
        assert!(!cart.is_expired(start + Duration::days(45)));
    }

    #[test]
    fn test_stock_requests() {
        let now = Utc::now();
        let mut cart = Cart::new("cust-1", now);
        cart.add_item(&product("p1", 500, 10), 3, now).unwrap();
        assert_eq!(cart.stock_requests(), vec![StockRequest::new("p1", 3)]);
    }
}
