//! # Pricing Engine
//!
//! One pure function, [`compute_totals`], turns priced lines plus a coupon,
//! a shipping fee and a tax rate into [`Totals`].
//!
//! ## Rounding
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  subtotal  = Σ unit_price × quantity                      (exact cents) │
//! │  discount  = coupon discount, capped at subtotal          (exact)       │
//! │  tax       = round2(subtotal × rate)                      (half-up)     │
//! │  total     = max(0, subtotal − discount + shipping + tax)               │
//! │              rounded half-up ONCE, at the end                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Shipping is quoted on the pre-discount subtotal and is never discounted.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::cart::LineItem;
use crate::coupon::{calculate_discount, Coupon};
use crate::money::Money;
use crate::tax::TaxRate;

/// Price breakdown frozen onto an order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Totals {
    pub subtotal: Money,
    pub discount: Money,
    pub shipping: Money,
    pub tax: Money,
    pub total: Money,
}

/// Computes order totals. Deterministic: equal inputs give equal outputs.
///
/// The caller resolves `shipping` beforehand (see `shipping::resolve`);
/// `None` means no shipping charge applies.
///
/// ## Example
/// ```rust
/// use ledgerline_core::pricing::compute_totals;
/// use ledgerline_core::tax::TaxRate;
/// use ledgerline_core::money::Money;
///
/// let totals = compute_totals(&[], None, Some(Money::from_cents(500)), TaxRate::zero());
/// assert_eq!(totals.total.cents(), 500);
/// ```
pub fn compute_totals(
    items: &[LineItem],
    coupon: Option<&Coupon>,
    shipping: Option<Money>,
    tax_rate: TaxRate,
) -> Totals {
    let subtotal: Money = items.iter().map(LineItem::line_subtotal).sum();
    let subtotal_exact = subtotal.to_decimal();

    let discount_exact = coupon
        .map(|c| calculate_discount(subtotal, items, c))
        .unwrap_or(Decimal::ZERO)
        .max(Decimal::ZERO)
        .min(subtotal_exact.max(Decimal::ZERO));

    let shipping = shipping.unwrap_or_default();
    let tax = subtotal.calculate_tax(tax_rate);

    let total_exact =
        (subtotal_exact - discount_exact + shipping.to_decimal() + tax.to_decimal()).max(Decimal::ZERO);

    Totals {
        subtotal,
        discount: Money::from_decimal(discount_exact),
        shipping,
        tax,
        total: Money::from_decimal(total_exact),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
