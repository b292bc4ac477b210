//! # Shipping Fee Calculator
//!
//! Evaluates a prioritized list of fee rules against an order context and
//! returns the first admissible fee.
//!
//! ## Rule Selection
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  rules (active only) sorted by priority ASC                             │
//! │     │                                                                   │
//! │     ├── amount within [min_order_amount, max_order_amount]?             │
//! │     ├── weight within [min_weight_kg, max_weight_kg]?                   │
//! │     ├── country ∈ applicable_countries (or list empty)?                 │
//! │     ├── state   ∈ applicable_states    (or list empty)?                 │
//! │     ├── method  ∈ applicable_methods   (or list empty)?                 │
//! │     │                                                                   │
//! │     ▼  first rule passing every check                                   │
//! │  strategy.evaluate(ctx) ──► FeeResult                                   │
//! │                                                                         │
//! │  none admissible ──► active default rule's fallback fee                 │
//! │  no active default ──► ShippingUnavailable (never silently free)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

use crate::cart::LineItem;
use crate::money::Money;
use crate::types::{Address, ShippingMethod};

// =============================================================================
// Fee Strategies
// =============================================================================

/// One entry of a location-based fee table.
///
/// Empty or missing fields match anything. The zip range is inclusive and
/// compared as strings; it only applies when both ends are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFee {
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub zip_from: Option<String>,
    #[serde(default)]
    pub zip_to: Option<String>,
    pub fee: Money,
}

impl LocationFee {
    fn matches(&self, ctx: &ShippingContext) -> bool {
        let field_ok = |want: &Option<String>, have: &str| match want.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(w) => w.eq_ignore_ascii_case(have.trim()),
        };

        let zip_ok = match (self.zip_from.as_deref(), self.zip_to.as_deref()) {
            (Some(from), Some(to)) => {
                let zip = ctx.zip_code.trim();
                zip >= from && zip <= to
            }
            _ => true,
        };

        field_ok(&self.country, ctx.country.as_str())
            && field_ok(&self.state, ctx.state.as_str())
            && field_ok(&self.city, ctx.city.as_str())
            && zip_ok
    }
}

/// How a rule turns an order context into a fee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeeStrategy {
    /// Fixed amount.
    Flat { rate: Money },

    /// `base_price` up to `base_weight_kg`, then `additional_per_kg` for
    /// every kilogram above it.
    WeightBased {
        base_weight_kg: Decimal,
        base_price: Money,
        additional_per_kg: Money,
    },

    /// Free from `min_order_amount`, otherwise `fee_under_minimum`.
    PriceBased {
        min_order_amount: Money,
        fee_under_minimum: Money,
    },

    /// First matching location entry, else `fallback_rate`.
    LocationBased {
        locations: Vec<LocationFee>,
        fallback_rate: Money,
    },

    Free,
}

impl FeeStrategy {
    /// Exact fee for `ctx`. Rounding to cents happens at quote time.
    pub fn evaluate(&self, ctx: &ShippingContext) -> Decimal {
        match self {
            FeeStrategy::Flat { rate } => rate.to_decimal(),
            FeeStrategy::WeightBased {
                base_weight_kg,
                base_price,
                additional_per_kg,
            } => {
                if ctx.weight_kg <= *base_weight_kg {
                    base_price.to_decimal()
                } else {
                    base_price.to_decimal()
                        + (ctx.weight_kg - *base_weight_kg) * additional_per_kg.to_decimal()
                }
            }
            FeeStrategy::PriceBased {
                min_order_amount,
                fee_under_minimum,
            } => {
                if ctx.amount >= *min_order_amount {
                    Decimal::ZERO
                } else {
                    fee_under_minimum.to_decimal()
                }
            }
            FeeStrategy::LocationBased {
                locations,
                fallback_rate,
            } => locations
                .iter()
                .find(|l| l.matches(ctx))
                .map(|l| l.fee)
                .unwrap_or(*fallback_rate)
                .to_decimal(),
            FeeStrategy::Free => Decimal::ZERO,
        }
    }

    /// Flat component charged when this rule is used as the default
    /// fallback for an order no rule admits.
    pub fn fallback_fee(&self) -> Money {
        match self {
            FeeStrategy::Flat { rate } => *rate,
            FeeStrategy::WeightBased { base_price, .. } => *base_price,
            FeeStrategy::PriceBased {
                fee_under_minimum, ..
            } => *fee_under_minimum,
            FeeStrategy::LocationBased { fallback_rate, .. } => *fallback_rate,
            FeeStrategy::Free => Money::zero(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FeeStrategy::Flat { .. } => "flat",
            FeeStrategy::WeightBased { .. } => "weight_based",
            FeeStrategy::PriceBased { .. } => "price_based",
            FeeStrategy::LocationBased { .. } => "location_based",
            FeeStrategy::Free => "free",
        }
    }
}

// =============================================================================
// Rules
// =============================================================================

/// Amount and weight bounds, all inclusive. `None` is unbounded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShippingConditions {
    #[serde(default)]
    pub min_order_amount: Option<Money>,
    #[serde(default)]
    pub max_order_amount: Option<Money>,
    #[serde(default)]
    pub min_weight_kg: Option<Decimal>,
    #[serde(default)]
    pub max_weight_kg: Option<Decimal>,
}

impl ShippingConditions {
    fn admits(&self, ctx: &ShippingContext) -> bool {
        self.min_order_amount.map_or(true, |min| ctx.amount >= min)
            && self.max_order_amount.map_or(true, |max| ctx.amount <= max)
            && self.min_weight_kg.map_or(true, |min| ctx.weight_kg >= min)
            && self.max_weight_kg.map_or(true, |max| ctx.weight_kg <= max)
    }
}

/// Delivery window quoted alongside a fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DeliveryEstimate {
    pub min_days: u32,
    pub max_days: u32,
}

impl Default for DeliveryEstimate {
    fn default() -> Self {
        DeliveryEstimate {
            min_days: 1,
            max_days: 7,
        }
    }
}

/// A shipping fee rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingRule {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub strategy: FeeStrategy,
    pub conditions: ShippingConditions,
    /// Empty means every country.
    pub applicable_countries: Vec<String>,
    /// Empty means every state.
    pub applicable_states: Vec<String>,
    /// Empty means every method.
    pub applicable_methods: Vec<ShippingMethod>,
    pub estimated_delivery: DeliveryEstimate,
    /// Lower evaluates first.
    pub priority: i64,
    pub is_active: bool,
    /// At most one rule holds this flag; only the repository's
    /// `set_default` writes it.
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ShippingRule {
    /// Whether this rule's conditions and region/method restrictions all
    /// pass for `ctx`. Does not look at `is_active`.
    pub fn admits(&self, ctx: &ShippingContext) -> bool {
        let in_list = |list: &[String], value: &str| {
            list.is_empty() || list.iter().any(|v| v.trim().eq_ignore_ascii_case(value.trim()))
        };
        let method_ok = match ctx.method {
            Some(m) => self.applicable_methods.is_empty() || self.applicable_methods.contains(&m),
            None => true,
        };

        self.conditions.admits(ctx)
            && in_list(self.applicable_countries.as_slice(), ctx.country.as_str())
            && in_list(self.applicable_states.as_slice(), ctx.state.as_str())
            && method_ok
    }

    fn quote(&self, fee: Decimal, is_fallback: bool) -> FeeResult {
        FeeResult {
            rule_id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            fee: Money::from_decimal(fee),
            estimated_delivery: self.estimated_delivery,
            is_fallback,
        }
    }
}

// =============================================================================
// Context and Results
// =============================================================================

/// What the calculator knows about the order being shipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingContext {
    /// Pre-discount subtotal.
    pub amount: Money,
    pub weight_kg: Decimal,
    pub country: String,
    pub state: String,
    pub city: String,
    pub zip_code: String,
    pub method: Option<ShippingMethod>,
}

impl ShippingContext {
    /// Builds a context from cart lines and a destination.
    pub fn for_items(items: &[LineItem], address: &Address, method: Option<ShippingMethod>) -> Self {
        ShippingContext {
            amount: items.iter().map(LineItem::line_subtotal).sum(),
            weight_kg: items.iter().map(LineItem::line_weight).sum(),
            country: address.country.clone(),
            state: address.state.clone(),
            city: address.city.clone(),
            zip_code: address.zip_code.clone(),
            method,
        }
    }
}

/// A quoted shipping fee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct FeeResult {
    pub rule_id: String,
    pub name: String,
    pub description: Option<String>,
    pub fee: Money,
    pub estimated_delivery: DeliveryEstimate,
    /// True when no rule was admissible and the default rule's fallback
    /// fee was charged.
    pub is_fallback: bool,
}

/// No rule admits the order and there is no active default rule.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("No shipping option is available to {country}/{state} for this order")]
pub struct ShippingUnavailable {
    pub country: String,
    pub state: String,
}

// =============================================================================
// Calculator
// =============================================================================

fn active_by_priority(rules: &[ShippingRule]) -> Vec<&ShippingRule> {
    let mut active: Vec<&ShippingRule> = rules.iter().filter(|r| r.is_active).collect();
    // Stable sort keeps caller order among equal priorities.
    active.sort_by_key(|r| r.priority);
    active
}

fn default_fallback(rules: &[ShippingRule], ctx: &ShippingContext) -> Result<FeeResult, ShippingUnavailable> {
    rules
        .iter()
        .find(|r| r.is_default && r.is_active)
        .map(|r| r.quote(r.strategy.fallback_fee().to_decimal(), true))
        .ok_or_else(|| ShippingUnavailable {
            country: ctx.country.clone(),
            state: ctx.state.clone(),
        })
}

/// First admissible active rule's fee, or `None`.
pub fn fee(rules: &[ShippingRule], ctx: &ShippingContext) -> Option<FeeResult> {
    active_by_priority(rules)
        .into_iter()
        .find(|r| r.admits(ctx))
        .map(|r| r.quote(r.strategy.evaluate(ctx), false))
}

/// [`fee`], falling back to the active default rule.
///
/// ## Errors
/// `ShippingUnavailable` when nothing is admissible and no active rule is
/// flagged default.
pub fn resolve(rules: &[ShippingRule], ctx: &ShippingContext) -> Result<FeeResult, ShippingUnavailable> {
    match fee(rules, ctx) {
        Some(result) => Ok(result),
        None => default_fallback(rules, ctx),
    }
}

/// Every admissible active rule's quote, in priority order. Falls back to
/// the default rule when the list would be empty.
pub fn shipping_options(
    rules: &[ShippingRule],
    ctx: &ShippingContext,
) -> Result<Vec<FeeResult>, ShippingUnavailable> {
    let options: Vec<FeeResult> = active_by_priority(rules)
        .into_iter()
        .filter(|r| r.admits(ctx))
        .map(|r| r.quote(r.strategy.evaluate(ctx), false))
        .collect();

    if options.is_empty() {
        return default_fallback(rules, ctx).map(|f| vec![f]);
    }
    Ok(options)
}

/// Quotes one chosen rule. `None` if the rule is inactive or does not
/// admit the order.
pub fn quote_rule(rule: &ShippingRule, ctx: &ShippingContext) -> Option<FeeResult> {
    (rule.is_active && rule.admits(ctx)).then(|| rule.quote(rule.strategy.evaluate(ctx), false))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str, priority: i64, strategy: FeeStrategy) -> ShippingRule {
        let now = Utc::now();
        ShippingRule {
            id: id.to_string(),
            name: id.to_string(),
            description: None,
            strategy,
            conditions: ShippingConditions::default(),
            applicable_countries: Vec::new(),
            applicable_states: Vec::new(),
            applicable_methods: Vec::new(),
            estimated_delivery: DeliveryEstimate::default(),
            priority,
            is_active: true,
            is_default: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn ctx(amount_cents: i64, weight: Decimal) -> ShippingContext {
        ShippingContext {
            amount: Money::from_cents(amount_cents),
            weight_kg: weight,
            country: "USA".to_string(),
            state: "CA".to_string(),
            city: "San Francisco".to_string(),
            zip_code: "94105".to_string(),
            method: Some(ShippingMethod::Standard),
        }
    }

    fn flat(cents: i64) -> FeeStrategy {
        FeeStrategy::Flat {
            rate: Money::from_cents(cents),
        }
    }

    #[test]
    fn test_lowest_priority_wins() {
        let rules = vec![rule("b", 20, flat(900)), rule("a", 10, flat(500))];
        let result = fee(&rules, &ctx(1000, Decimal::ONE)).unwrap();
        assert_eq!(result.rule_id, "a");
        assert_eq!(result.fee.cents(), 500);
    }

    #[test]
    fn test_conditions_filter_rules() {
        let mut cheap = rule("cheap", 1, flat(300));
        cheap.conditions.max_weight_kg = Some(Decimal::new(2, 0));
        let heavy = rule("heavy", 2, flat(1500));
        let rules = vec![cheap, heavy];

        assert_eq!(fee(&rules, &ctx(1000, Decimal::new(2, 0))).unwrap().rule_id, "cheap");
        assert_eq!(fee(&rules, &ctx(1000, Decimal::new(3, 0))).unwrap().rule_id, "heavy");
    }

    #[test]
    fn test_region_and_method_restrictions() {
        let mut ny_only = rule("ny", 1, flat(100));
        ny_only.applicable_states = vec!["ny".to_string()];
        let mut overnight = rule("overnight", 2, flat(2500));
        overnight.applicable_methods = vec![ShippingMethod::Overnight];
        let rules = vec![ny_only, overnight];

        assert!(fee(&rules, &ctx(1000, Decimal::ONE)).is_none());

        let mut c = ctx(1000, Decimal::ONE);
        c.method = Some(ShippingMethod::Overnight);
        assert_eq!(fee(&rules, &c).unwrap().rule_id, "overnight");
    }

    #[test]
    fn test_weight_based() {
        let strategy = FeeStrategy::WeightBased {
            base_weight_kg: Decimal::new(2, 0),
            base_price: Money::from_cents(500),
            additional_per_kg: Money::from_cents(150),
        };
        assert_eq!(strategy.evaluate(&ctx(0, Decimal::new(15, 1))), Decimal::new(500, 2));
        // 5.00 + 1.5 × 1.50 = 7.25
        assert_eq!(strategy.evaluate(&ctx(0, Decimal::new(35, 1))), Decimal::new(725, 2));
    }

    #[test]
    fn test_price_based() {
        let strategy = FeeStrategy::PriceBased {
            min_order_amount: Money::from_cents(5000),
            fee_under_minimum: Money::from_cents(799),
        };
        assert_eq!(strategy.evaluate(&ctx(5000, Decimal::ONE)), Decimal::ZERO);
        assert_eq!(strategy.evaluate(&ctx(4999, Decimal::ONE)), Decimal::new(799, 2));
    }

    #[test]
    fn test_location_based_first_match() {
        let strategy = FeeStrategy::LocationBased {
            locations: vec![
                LocationFee {
                    country: Some("USA".to_string()),
                    state: Some("CA".to_string()),
                    city: None,
                    zip_from: Some("94000".to_string()),
                    zip_to: Some("94199".to_string()),
                    fee: Money::from_cents(300),
                },
                LocationFee {
                    country: Some("USA".to_string()),
                    state: None,
                    city: None,
                    zip_from: None,
                    zip_to: None,
                    fee: Money::from_cents(800),
                },
            ],
            fallback_rate: Money::from_cents(2000),
        };

        assert_eq!(strategy.evaluate(&ctx(0, Decimal::ONE)), Decimal::new(300, 2));

        let mut la = ctx(0, Decimal::ONE);
        la.zip_code = "90001".to_string();
        assert_eq!(strategy.evaluate(&la), Decimal::new(800, 2));

        let mut abroad = ctx(0, Decimal::ONE);
        abroad.country = "CAN".to_string();
        assert_eq!(strategy.evaluate(&abroad), Decimal::new(2000, 2));
    }

    #[test]
    fn test_default_fallback() {
        let mut only_ny = rule("ny", 1, flat(100));
        only_ny.applicable_states = vec!["NY".to_string()];
        let mut default = rule("default", 99, flat(999));
        default.applicable_countries = vec!["CAN".to_string()];
        default.is_default = true;
        let rules = vec![only_ny, default];

        let result = resolve(&rules, &ctx(1000, Decimal::ONE)).unwrap();
        assert_eq!(result.rule_id, "default");
        assert!(result.is_fallback);
        assert_eq!(result.fee.cents(), 999);
    }

    #[test]
    fn test_unavailable_without_active_default() {
        let mut only_ny = rule("ny", 1, flat(100));
        only_ny.applicable_states = vec!["NY".to_string()];
        let mut default = rule("default", 99, flat(999));
        default.applicable_states = vec!["NY".to_string()];
        default.is_default = true;
        default.is_active = false;
        let rules = vec![only_ny, default];

        let err = resolve(&rules, &ctx(1000, Decimal::ONE)).unwrap_err();
        assert_eq!(err.state, "CA");
        assert!(shipping_options(&rules, &ctx(1000, Decimal::ONE)).is_err());
    }

    #[test]
    fn test_shipping_options_and_quote_rule() {
        let mut express = rule("express", 2, flat(1500));
        express.applicable_methods = vec![ShippingMethod::Express];
        let rules = vec![rule("std", 1, flat(500)), rule("free", 3, FeeStrategy::Free), express];

        let options = shipping_options(&rules, &ctx(1000, Decimal::ONE)).unwrap();
        let ids: Vec<&str> = options.iter().map(|o| o.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["std", "free"]);

        assert!(quote_rule(&rules[2], &ctx(1000, Decimal::ONE)).is_none());
        assert_eq!(quote_rule(&rules[1], &ctx(1000, Decimal::ONE)).unwrap().fee, Money::zero());
    }

    #[test]
    fn test_strategy_serde_tag() {
        let json = serde_json::to_value(flat(500)).unwrap();
        assert_eq!(json["type"], "flat");
        let back: FeeStrategy = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), "flat");
    }
}
