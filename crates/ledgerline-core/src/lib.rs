//! # ledgerline-core: Pure Checkout Logic for Ledgerline
//!
//! Everything that decides what an order costs and which lifecycle
//! transitions are legal lives here, as pure functions over plain data.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Ledgerline Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │           apps/checkout (OrderLifecycleManager)                 │   │
//! │  │  create_order, cancel_order, refund_order, quote_shipping ...   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │             ★ ledgerline-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │  ┌─────────┐ ┌─────────┐ ┌──────────┐ ┌────────┐ ┌─────────┐  │   │
//! │  │  │  cart   │ │ pricing │ │ shipping │ │ coupon │ │  order  │  │   │
//! │  │  │  Cart   │ │ Totals  │ │ Strategy │ │ checks │ │ states  │  │   │
//! │  │  └─────────┘ └─────────┘ └──────────┘ └────────┘ └─────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO CLOCK • PURE FUNCTIONS             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 ledgerline-db (Database Layer)                  │   │
//! │  │        Stock ledger, orders, coupons, shipping rules            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`tax`] - Tax rates and the pluggable region lookup
//! - [`types`] - Shared domain types (products, addresses, customers)
//! - [`cart`] - The per-customer cart aggregate
//! - [`pricing`] - Deterministic totals computation
//! - [`shipping`] - Shipping fee rules and strategies
//! - [`coupon`] - Coupon validation and discount calculation
//! - [`order`] - Order/payment records and their state machines
//! - [`validation`] - Input validation
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use ledgerline_core::money::Money;
//! use ledgerline_core::tax::TaxRate;
//!
//! let subtotal = Money::from_cents(10_000); // $100.00
//! let tax = subtotal.calculate_tax(TaxRate::from_bps(800));
//! assert_eq!(tax.cents(), 800);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cart;
pub mod coupon;
pub mod error;
pub mod money;
pub mod order;
pub mod pricing;
pub mod shipping;
pub mod tax;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use cart::{Cart, CartSummary, LineItem};
pub use coupon::{Coupon, CouponDiscount, CouponRejection, UsageLimit};
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use order::{
    Order, OrderDraft, OrderItem, OrderStatus, Payment, PaymentMethod, PaymentStatus, Refund,
    TransactionStatus,
};
pub use pricing::{compute_totals, Totals};
pub use shipping::{FeeResult, FeeStrategy, ShippingContext, ShippingRule, ShippingUnavailable};
pub use tax::{TaxRate, TaxRates, TaxTable};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum distinct lines allowed in a single cart.
pub const MAX_CART_ITEMS: usize = 100;

/// Maximum quantity of a single line in the cart.
///
/// ## Business Reason
/// Checkout is consumer-facing; anything above this is almost always a
/// typo or a reseller and goes through a different channel.
pub const MAX_ITEM_QUANTITY: u32 = 10;

/// Days of inactivity after which a cart is soft-deleted.
pub const CART_INACTIVITY_DAYS: i64 = 30;

/// Stock level at or below which a product is reported as low.
pub const DEFAULT_LOW_STOCK_ALERT: i64 = 10;

/// Currency used when none is configured (ISO 4217).
pub const DEFAULT_CURRENCY: &str = "USD";

/// Country assumed when a shipping address omits it.
pub const DEFAULT_COUNTRY: &str = "USA";
