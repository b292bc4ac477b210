//! # Money
//!
//! Every amount that is stored, summed or charged is a whole number of
//! cents. Fractional rates (tax, percentage coupons, per-kg shipping) are
//! evaluated in `rust_decimal::Decimal` and rounded back to cents once.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  price (cents) ──► × quantity ──► line subtotal (cents)                 │
//! │                                        │                                │
//! │  rate (Decimal) ──► Decimal product ───┴──► round half-up ──► cents     │
//! │                                                                         │
//! │  f64 never appears on this path                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ```rust
//! use ledgerline_core::money::Money;
//!
//! let shirt = Money::from_cents(1099);
//! let line = shirt.multiply_quantity(2);
//! assert_eq!(line.to_string(), "$21.98");
//! assert_eq!((line + Money::from_cents(500)).cents(), 2698);
//! ```

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use ts_rs::TS;

use crate::tax::TaxRate;

const CENTS_PER_UNIT: i64 = 100;

/// An amount in cents. Serializes as a bare integer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Rounds a major-unit decimal to the nearest cent, midpoint away from
    /// zero. Values outside the `i64` range clamp to its bounds.
    ///
    /// ```rust
    /// use ledgerline_core::money::Money;
    /// use rust_decimal::Decimal;
    ///
    /// // 10.005 → 10.01
    /// assert_eq!(Money::from_decimal(Decimal::new(10_005, 3)).cents(), 1001);
    /// ```
    pub fn from_decimal(amount: Decimal) -> Self {
        let clamp = if amount.is_sign_negative() { i64::MIN } else { i64::MAX };
        amount
            .checked_mul(Decimal::from(CENTS_PER_UNIT))
            .map(|scaled| scaled.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
            .and_then(|whole| whole.to_i64())
            .map_or(Money(clamp), Money)
    }

    /// 1099 cents → `10.99`.
    #[inline]
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.0, 2)
    }

    /// Tax owed on this amount, rounded once to the cent.
    ///
    /// ```rust
    /// use ledgerline_core::money::Money;
    /// use ledgerline_core::tax::TaxRate;
    ///
    /// // 8.25% of $10.00 is $0.825
    /// let tax = Money::from_cents(1000).calculate_tax(TaxRate::from_bps(825));
    /// assert_eq!(tax.cents(), 83);
    /// ```
    pub fn calculate_tax(&self, rate: TaxRate) -> Money {
        Money::from_decimal(rate.apply(self.to_decimal()))
    }

    /// Line total for `qty` units. Saturates rather than wrapping.
    #[inline]
    pub const fn multiply_quantity(&self, qty: u32) -> Self {
        Money(self.0.saturating_mul(qty as i64))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let magnitude = self.0.unsigned_abs();
        let units = magnitude / CENTS_PER_UNIT as u64;
        let rest = magnitude % CENTS_PER_UNIT as u64;
        if self.0 < 0 {
            f.write_str("-")?;
        }
        write!(f, "${units}.{rest:02}")
    }
}

/// Addition and subtraction clamp at the `i64` bounds, like
/// [`Money::multiply_quantity`].
impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        *self = *self + rhs;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0.saturating_sub(rhs.0))
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        *self = *self - rhs;
    }
}

impl Mul<u32> for Money {
    type Output = Money;

    fn mul(self, qty: u32) -> Money {
        self.multiply_quantity(qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.copied().sum()
    }
}
