//! # Coupon Evaluator
//!
//! Decides whether a coupon applies to a cart and what it is worth.
//!
//! ## Validation Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  validate(coupon, now, customer_usage, cart_amount, items)              │
//! │                                                                         │
//! │   1. is_active                       ──✗──► Inactive                    │
//! │   2. starts_at <= now < ends_at      ──✗──► NotStarted / Expired        │
//! │   3. usage_count < total limit       ──✗──► UsageLimitReached           │
//! │   4. customer usage < per-customer   ──✗──► CustomerLimitReached        │
//! │   5. cart_amount >= minimum_purchase ──✗──► MinimumPurchaseNotMet       │
//! │   6. Σ quantity >= minimum_items     ──✗──► MinimumItemsNotMet          │
//! │   7. category intersection           ──✗──► NoEligibleItems             │
//! │                                                                         │
//! │   First failure wins. Nothing here writes usage counters: redemption   │
//! │   happens only inside the order-persist transaction.                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

use crate::cart::LineItem;
use crate::money::Money;

// =============================================================================
// Discount Strategy
// =============================================================================

/// How a coupon computes its discount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CouponDiscount {
    /// `base × percent / 100`, percent in (0, 100].
    Percentage { percent: Decimal },
    /// `min(amount, base)`.
    Fixed { amount: Money },
}

impl CouponDiscount {
    /// Exact discount on `base`, never more than `base`.
    pub fn evaluate(&self, base: Money) -> Decimal {
        let base = base.to_decimal().max(Decimal::ZERO);
        let raw = match self {
            CouponDiscount::Percentage { percent } => base * *percent / Decimal::ONE_HUNDRED,
            CouponDiscount::Fixed { amount } => amount.to_decimal(),
        };
        raw.max(Decimal::ZERO).min(base)
    }
}

// =============================================================================
// Coupon
// =============================================================================

/// Redemption caps. `None` means uncapped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageLimit {
    pub total: Option<u32>,
    pub per_customer: Option<u32>,
}

/// A coupon as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coupon {
    pub id: String,
    /// Stored upper-case; matched case-insensitively.
    pub code: String,
    pub description: Option<String>,
    pub discount: CouponDiscount,
    pub starts_at: DateTime<Utc>,
    /// Exclusive.
    pub ends_at: DateTime<Utc>,
    pub usage_limit: UsageLimit,
    pub usage_count: u32,
    pub minimum_purchase: Money,
    pub minimum_items: u32,
    /// Empty means every category.
    pub applicable_categories: Vec<String>,
    pub is_active: bool,
}

impl Coupon {
    /// Whether a line counts toward a category-restricted coupon.
    pub fn applies_to(&self, item: &LineItem) -> bool {
        self.applicable_categories.is_empty()
            || self
                .applicable_categories
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&item.category))
    }
}

// =============================================================================
// Rejection Reasons
// =============================================================================

/// Why a coupon cannot be used. Every variant renders a message fit for
/// the customer.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, TS)]
#[serde(tag = "reason", rename_all = "snake_case")]
#[ts(export)]
pub enum CouponRejection {
    #[error("Coupon {code} does not exist")]
    NotFound { code: String },

    #[error("This coupon is no longer active")]
    Inactive,

    #[error("This coupon is not valid until {starts_at}")]
    NotStarted {
        #[ts(as = "String")]
        starts_at: DateTime<Utc>,
    },

    #[error("This coupon expired on {ended_at}")]
    Expired {
        #[ts(as = "String")]
        ended_at: DateTime<Utc>,
    },

    #[error("This coupon has reached its usage limit")]
    UsageLimitReached,

    #[error("You have already used this coupon the maximum number of times ({limit})")]
    CustomerLimitReached { limit: u32 },

    #[error("A minimum purchase of {required} is required (cart is {actual})")]
    MinimumPurchaseNotMet { required: Money, actual: Money },

    #[error("At least {required} items are required (cart has {actual})")]
    MinimumItemsNotMet { required: u32, actual: u32 },

    #[error("No items in the cart are eligible for this coupon")]
    NoEligibleItems,
}

// =============================================================================
// Evaluation
// =============================================================================

/// Checks whether `coupon` can be applied. Pure: never touches usage counts.
///
/// `customer_usage` is the caller's redemption count for this coupon, or
/// `None` when the caller's identity is unknown (per-customer cap skipped).
pub fn validate(
    coupon: &Coupon,
    now: DateTime<Utc>,
    customer_usage: Option<u32>,
    cart_amount: Money,
    items: &[LineItem],
) -> Result<(), CouponRejection> {
    if !coupon.is_active {
        return Err(CouponRejection::Inactive);
    }
    if now < coupon.starts_at {
        return Err(CouponRejection::NotStarted {
            starts_at: coupon.starts_at,
        });
    }
    if now >= coupon.ends_at {
        return Err(CouponRejection::Expired {
            ended_at: coupon.ends_at,
        });
    }
    if let Some(total) = coupon.usage_limit.total {
        if coupon.usage_count >= total {
            return Err(CouponRejection::UsageLimitReached);
        }
    }
    if let (Some(limit), Some(used)) = (coupon.usage_limit.per_customer, customer_usage) {
        if used >= limit {
            return Err(CouponRejection::CustomerLimitReached { limit });
        }
    }
    if cart_amount < coupon.minimum_purchase {
        return Err(CouponRejection::MinimumPurchaseNotMet {
            required: coupon.minimum_purchase,
            actual: cart_amount,
        });
    }

    let item_count: u32 = items.iter().map(|i| i.quantity).sum();
    if item_count < coupon.minimum_items {
        return Err(CouponRejection::MinimumItemsNotMet {
            required: coupon.minimum_items,
            actual: item_count,
        });
    }
    if !coupon.applicable_categories.is_empty() && !items.iter().any(|i| coupon.applies_to(i)) {
        return Err(CouponRejection::NoEligibleItems);
    }

    Ok(())
}

/// Exact discount for a validated coupon.
///
/// Unrestricted coupons discount `cart_amount`. Category-restricted coupons
/// discount only the subtotal of matching lines.
///
/// ## Example
/// ```rust
/// use ledgerline_core::coupon::CouponDiscount;
/// use ledgerline_core::money::Money;
/// use rust_decimal::Decimal;
///
/// let fixed = CouponDiscount::Fixed { amount: Money::from_cents(1500) };
/// assert_eq!(fixed.evaluate(Money::from_cents(1000)), Decimal::new(1000, 2));
/// ```
pub fn calculate_discount(cart_amount: Money, items: &[LineItem], coupon: &Coupon) -> Decimal {
    let base = if coupon.applicable_categories.is_empty() {
        cart_amount
    } else {
        items
            .iter()
            .filter(|i| coupon.applies_to(i))
            .map(LineItem::line_subtotal)
            .sum()
    };
    coupon.discount.evaluate(base)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn line(category: &str, cents: i64, qty: u32) -> LineItem {
        LineItem {
            product_id: format!("{category}-{cents}"),
            name: "item".to_string(),
            category: category.to_string(),
            unit_price: Money::from_cents(cents),
            quantity: qty,
            weight_kg: Decimal::ONE,
            added_at: Utc::now(),
        }
    }

    fn coupon(discount: CouponDiscount) -> Coupon {
        let now = Utc::now();
        Coupon {
            id: "c-1".to_string(),
            code: "SAVE10".to_string(),
            description: None,
            discount,
            starts_at: now - Duration::days(1),
            ends_at: now + Duration::days(1),
            usage_limit: UsageLimit::default(),
            usage_count: 0,
            minimum_purchase: Money::zero(),
            minimum_items: 0,
            applicable_categories: Vec::new(),
            is_active: true,
        }
    }

    fn percent(p: i64) -> CouponDiscount {
        CouponDiscount::Percentage {
            percent: Decimal::from(p),
        }
    }

    #[test]
    fn test_valid_coupon() {
        let c = coupon(percent(10));
        let items = vec![line("books", 5000, 2)];
        assert!(validate(&c, Utc::now(), Some(0), Money::from_cents(10_000), &items).is_ok());
    }

    #[test]
    fn test_checks_short_circuit_in_order() {
        let mut c = coupon(percent(10));
        c.is_active = false;
        c.usage_limit.total = Some(1);
        c.usage_count = 1;
        // Inactive is reported before the usage cap.
        assert_eq!(
            validate(&c, Utc::now(), None, Money::zero(), &[]),
            Err(CouponRejection::Inactive)
        );

        c.is_active = true;
        assert_eq!(
            validate(&c, Utc::now(), None, Money::zero(), &[]),
            Err(CouponRejection::UsageLimitReached)
        );
    }

    #[test]
    fn test_window_is_half_open() {
        let c = coupon(percent(10));
        let items = vec![line("books", 100, 1)];

        assert!(matches!(
            validate(&c, c.starts_at - Duration::seconds(1), None, Money::from_cents(100), &items),
            Err(CouponRejection::NotStarted { .. })
        ));
        assert!(validate(&c, c.starts_at, None, Money::from_cents(100), &items).is_ok());
        assert!(matches!(
            validate(&c, c.ends_at, None, Money::from_cents(100), &items),
            Err(CouponRejection::Expired { .. })
        ));
    }

    #[test]
    fn test_per_customer_limit_needs_identity() {
        let mut c = coupon(percent(10));
        c.usage_limit.per_customer = Some(1);
        let items = vec![line("books", 100, 1)];

        assert_eq!(
            validate(&c, Utc::now(), Some(1), Money::from_cents(100), &items),
            Err(CouponRejection::CustomerLimitReached { limit: 1 })
        );
        assert!(validate(&c, Utc::now(), None, Money::from_cents(100), &items).is_ok());
    }

    #[test]
    fn test_minimums() {
        let mut c = coupon(percent(10));
        c.minimum_purchase = Money::from_cents(5000);
        let items = vec![line("books", 1000, 1)];
        assert!(matches!(
            validate(&c, Utc::now(), None, Money::from_cents(1000), &items),
            Err(CouponRejection::MinimumPurchaseNotMet { .. })
        ));

        c.minimum_purchase = Money::zero();
        c.minimum_items = 3;
        assert_eq!(
            validate(&c, Utc::now(), None, Money::from_cents(1000), &items),
            Err(CouponRejection::MinimumItemsNotMet {
                required: 3,
                actual: 1
            })
        );
    }

    #[test]
    fn test_category_restriction() {
        let mut c = coupon(percent(50));
        c.applicable_categories = vec!["Books".to_string()];

        let toys = vec![line("toys", 2000, 1)];
        assert_eq!(
            validate(&c, Utc::now(), None, Money::from_cents(2000), &toys),
            Err(CouponRejection::NoEligibleItems)
        );

        // Only the books line is discounted.
        let mixed = vec![line("books", 1000, 1), line("toys", 3000, 1)];
        let discount = calculate_discount(Money::from_cents(4000), &mixed, &c);
        assert_eq!(discount, Decimal::new(500, 2));
    }

    #[test]
    fn test_fixed_discount_capped_at_base() {
        let c = coupon(CouponDiscount::Fixed {
            amount: Money::from_cents(1000),
        });
        let items = vec![line("books", 600, 1)];
        assert_eq!(
            calculate_discount(Money::from_cents(600), &items, &c),
            Decimal::new(600, 2)
        );
    }

    #[test]
    fn test_rejection_messages() {
        let err = CouponRejection::MinimumPurchaseNotMet {
            required: Money::from_cents(5000),
            actual: Money::from_cents(1250),
        };
        assert_eq!(
            err.to_string(),
            "A minimum purchase of $50.00 is required (cart is $12.50)"
        );
    }
}
