//! # Tax Rates
//!
//! Tax is a pluggable lookup: the pricing engine only needs
//! `rate_for_region(state) -> TaxRate`. [`TaxTable`] is the configured
//! implementation; anything else (a tax service client, a fixed test rate)
//! can implement [`TaxRates`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Tax Rate
// =============================================================================

/// A tax rate as an exact fraction (0.0825 = 8.25%).
///
/// ## Why Decimal and not basis points?
/// Real rates such as New York's 8.875% are not whole basis points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaxRate(Decimal);

impl TaxRate {
    /// Creates a tax rate from basis points (825 = 8.25%).
    #[inline]
    pub fn from_bps(bps: u32) -> Self {
        TaxRate(Decimal::new(i64::from(bps), 4))
    }

    /// Creates a tax rate from a fraction (`0.0825`).
    #[inline]
    pub const fn from_decimal(rate: Decimal) -> Self {
        TaxRate(rate)
    }

    /// Returns the rate as a fraction.
    #[inline]
    pub const fn rate(&self) -> Decimal {
        self.0
    }

    /// Zero tax rate.
    #[inline]
    pub const fn zero() -> Self {
        TaxRate(Decimal::ZERO)
    }

    /// Checks if tax rate is zero.
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Exact tax on an amount in major units. No rounding.
    #[inline]
    pub fn apply(&self, amount: Decimal) -> Decimal {
        amount * self.0
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        TaxRate::zero()
    }
}

// =============================================================================
// Lookup
// =============================================================================

/// Region → rate lookup consumed by the pricing engine.
///
/// Implementations must return a rate for every input; unknown regions get
/// a baseline rate rather than an error.
pub trait TaxRates: Send + Sync {
    fn rate_for_region(&self, region: &str) -> TaxRate;
}

/// Table-driven tax rates keyed by region code (US state abbreviation).
///
/// ## Example
/// ```rust
/// use ledgerline_core::tax::{TaxRates, TaxTable};
/// use rust_decimal::Decimal;
///
/// let table = TaxTable::default();
/// assert_eq!(table.rate_for_region("ca").rate(), Decimal::new(825, 4));
/// assert_eq!(table.rate_for_region("ZZ").rate(), Decimal::new(6, 2));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxTable {
    /// Applied when the region is not listed.
    pub default_rate: TaxRate,

    /// Region code → rate. Codes are matched case-insensitively.
    #[serde(default)]
    pub regions: BTreeMap<String, TaxRate>,
}

impl TaxTable {
    /// Creates an empty table that charges `default_rate` everywhere.
    pub fn new(default_rate: TaxRate) -> Self {
        TaxTable {
            default_rate,
            regions: BTreeMap::new(),
        }
    }

    /// Adds or replaces a region rate.
    pub fn with_region(mut self, region: &str, rate: TaxRate) -> Self {
        self.regions.insert(normalize_region(region), rate);
        self
    }

    /// Upper-cases every key so lookups are case-insensitive.
    ///
    /// Tables deserialized from config may carry mixed-case keys.
    pub fn normalized(self) -> Self {
        let regions = self
            .regions
            .into_iter()
            .map(|(k, v)| (normalize_region(&k), v))
            .collect();
        TaxTable {
            default_rate: self.default_rate,
            regions,
        }
    }
}

impl Default for TaxTable {
    fn default() -> Self {
        TaxTable::new(TaxRate::from_decimal(Decimal::new(6, 2)))
            .with_region("CA", TaxRate::from_decimal(Decimal::new(825, 4)))
            .with_region("NY", TaxRate::from_decimal(Decimal::new(8875, 5)))
            .with_region("TX", TaxRate::from_decimal(Decimal::new(825, 4)))
            .with_region("FL", TaxRate::from_decimal(Decimal::new(7, 2)))
    }
}

impl TaxRates for TaxTable {
    fn rate_for_region(&self, region: &str) -> TaxRate {
        self.regions
            .get(&normalize_region(region))
            .copied()
            .unwrap_or(self.default_rate)
    }
}

fn normalize_region(region: &str) -> String {
    region.trim().to_uppercase()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tax_rate_from_bps() {
        assert_eq!(TaxRate::from_bps(825).rate(), Decimal::new(825, 4));
        assert!(TaxRate::from_bps(0).is_zero());
    }

    #[test]
    fn test_default_table() {
        let table = TaxTable::default();
        assert_eq!(table.rate_for_region("NY").rate(), Decimal::new(8875, 5));
        assert_eq!(table.rate_for_region(" tx ").rate(), Decimal::new(825, 4));
        assert_eq!(table.rate_for_region("OR").rate(), Decimal::new(6, 2));
    }

    #[test]
    fn test_normalized_keys() {
        let mut table = TaxTable::new(TaxRate::zero());
        table
            .regions
            .insert("wa".to_string(), TaxRate::from_bps(650));
        let table = table.normalized();
        assert_eq!(table.rate_for_region("WA"), TaxRate::from_bps(650));
    }

    #[test]
    fn test_table_deserializes_from_strings() {
        let json = r#"{"default_rate":"0.05","regions":{"ca":"0.0825"}}"#;
        let table: TaxTable = serde_json::from_str::<TaxTable>(json).unwrap().normalized();
        assert_eq!(table.rate_for_region("CA").rate(), Decimal::new(825, 4));
        assert_eq!(table.rate_for_region("NV").rate(), Decimal::new(5, 2));
    }
}
