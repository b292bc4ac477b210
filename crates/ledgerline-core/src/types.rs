//! # Domain Types
//!
//! Shared domain types used throughout Ledgerline.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │    Customer     │   │    Address      │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id, sku        │   │  Registered     │   │  street, city   │       │
//! │  │  price, weight  │   │  Guest (email)  │   │  state, zip     │       │
//! │  │  status, stock  │   │  owner_key()    │   │  country        │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  StockRequest   │   │ StockShortfall  │   │ ShippingMethod  │       │
//! │  │  product_id     │   │  product_id     │   │  Standard       │       │
//! │  │  quantity       │   │  requested      │   │  Express        │       │
//! │  └─────────────────┘   │  available      │   │  Overnight      │       │
//! │                        └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::Money;

// =============================================================================
// Product
// =============================================================================

/// Catalog status of a product. Only `Active` products can be bought.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    #[default]
    Active,
    Inactive,
    Draft,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Active => "active",
            ProductStatus::Inactive => "inactive",
            ProductStatus::Draft => "draft",
        }
    }
}

impl fmt::Display for ProductStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A product as seen by checkout.
///
/// `available_quantity` is read-only here: the stock ledger is the only
/// writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub sku: String,
    pub name: String,
    pub category: String,
    pub price: Money,
    /// Shipping weight per unit, in kilograms.
    pub weight_kg: Decimal,
    pub status: ProductStatus,
    pub available_quantity: i64,
    /// At or below this level a reservation logs a low-stock warning.
    pub low_stock_alert: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Checks whether the product can be put in a cart at all.
    #[inline]
    pub fn is_purchasable(&self) -> bool {
        self.status == ProductStatus::Active
    }
}

/// Weight assumed for a unit whose product carries none.
pub fn default_item_weight() -> Decimal {
    Decimal::new(5, 1)
}

// =============================================================================
// Stock
// =============================================================================

/// One line of a reserve/release request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRequest {
    pub product_id: String,
    pub quantity: u32,
}

impl StockRequest {
    pub fn new(product_id: impl Into<String>, quantity: u32) -> Self {
        StockRequest {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// Why a product could not be reserved at the requested quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockShortfall {
    pub product_id: String,
    pub requested: u32,
    pub available: i64,
}

impl fmt::Display for StockShortfall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: requested {}, available {}",
            self.product_id, self.requested, self.available
        )
    }
}

// =============================================================================
// Customer
// =============================================================================

/// Who is checking out, as supplied by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Customer {
    /// Authenticated account holder.
    Registered {
        customer_id: String,
        email: Option<String>,
    },
    /// Guest checkout; ownership is tied to a verified email.
    Guest { email: String },
}

impl Customer {
    /// Stable key used for cart ownership, order ownership and
    /// per-customer coupon usage.
    ///
    /// ```rust
    /// use ledgerline_core::types::Customer;
    ///
    /// let guest = Customer::Guest { email: "Ann@Example.com".into() };
    /// assert_eq!(guest.owner_key(), "guest:ann@example.com");
    /// ```
    pub fn owner_key(&self) -> String {
        match self {
            Customer::Registered { customer_id, .. } => customer_id.clone(),
            Customer::Guest { email } => format!("guest:{}", email.trim().to_lowercase()),
        }
    }

    pub fn customer_id(&self) -> Option<&str> {
        match self {
            Customer::Registered { customer_id, .. } => Some(customer_id),
            Customer::Guest { .. } => None,
        }
    }

    pub fn email(&self) -> Option<&str> {
        match self {
            Customer::Registered { email, .. } => email.as_deref(),
            Customer::Guest { email } => Some(email),
        }
    }
}

// =============================================================================
// Address
// =============================================================================

/// Shipping destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Address {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
}

// =============================================================================
// Shipping Method
// =============================================================================

/// Service level chosen at checkout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ShippingMethod {
    #[default]
    Standard,
    Express,
    Overnight,
}

impl ShippingMethod {
    pub const ALL: [ShippingMethod; 3] = [
        ShippingMethod::Standard,
        ShippingMethod::Express,
        ShippingMethod::Overnight,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ShippingMethod::Standard => "standard",
            ShippingMethod::Express => "express",
            ShippingMethod::Overnight => "overnight",
        }
    }
}

impl fmt::Display for ShippingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShippingMethod {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "standard" => Ok(ShippingMethod::Standard),
            "express" => Ok(ShippingMethod::Express),
            "overnight" => Ok(ShippingMethod::Overnight),
            _ => Err(ValidationError::NotAllowed {
                field: "shipping_method".to_string(),
                allowed: ShippingMethod::ALL
                    .iter()
                    .map(|m| m.as_str().to_string())
                    .collect(),
            }),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shipping_method_parsing() {
        assert_eq!("express".parse::<ShippingMethod>().unwrap(), ShippingMethod::Express);
        assert_eq!(" Overnight ".parse::<ShippingMethod>().unwrap(), ShippingMethod::Overnight);
        let err = "drone".parse::<ShippingMethod>().unwrap_err();
        assert_eq!(err.field(), "shipping_method");
    }

    #[test]
    fn test_owner_keys() {
        let registered = Customer::Registered {
            customer_id: "cust-42".into(),
            email: None,
        };
        assert_eq!(registered.owner_key(), "cust-42");
        assert_eq!(registered.customer_id(), Some("cust-42"));

        let guest = Customer::Guest {
            email: " Bob@Shop.io ".into(),
        };
        assert_eq!(guest.owner_key(), "guest:bob@shop.io");
        assert_eq!(guest.customer_id(), None);
    }

    #[test]
    fn test_shortfall_display() {
        let s = StockShortfall {
            product_id: "p-1".into(),
            requested: 2,
            available: 0,
        };
        assert_eq!(s.to_string(), "p-1: requested 2, available 0");
    }
}
