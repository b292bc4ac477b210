//! # Orders and Payments
//!
//! Order/payment records and the two state machines that govern them.
//!
//! ## Order Status
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   pending ──► confirmed ──► shipped ──► delivered                       │
//! │      │            │                                                     │
//! │      └────────────┴──► cancelled                                        │
//! │                                                                         │
//! │   shipped / delivered / cancelled never reach cancelled again          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Payment Status
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │   pending ──► paid ──► refunded                                         │
//! │      │                                                                  │
//! │      └──► failed                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The transition tables here are the single source of truth. The database
//! layer turns them into compare-and-set `WHERE status IN (...)` clauses so
//! a transition is checked and applied atomically.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::cart::LineItem;
use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::pricing::Totals;
use crate::tax::TaxRate;
use crate::types::{Address, ShippingMethod};

// =============================================================================
// Order Status
// =============================================================================

/// Fulfilment state of an order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Confirmed, Shipped)
                | (Shipped, Delivered)
                | (Pending, Cancelled)
                | (Confirmed, Cancelled)
        )
    }

    /// Checks the move and returns the new status.
    pub fn transition(self, next: OrderStatus) -> CoreResult<OrderStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidTransition {
                machine: "order",
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    pub fn is_cancellable(&self) -> bool {
        self.can_transition_to(OrderStatus::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Payment Status
// =============================================================================

/// Payment state of an order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Paid) | (Pending, Failed) | (Paid, Refunded)
        )
    }

    pub fn transition(self, next: PaymentStatus) -> CoreResult<PaymentStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidTransition {
                machine: "payment",
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Payment Records
// =============================================================================

/// How the customer pays. Card and gateway details stay with the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CreditCard,
    DebitCard,
    Paypal,
    Stripe,
}

/// State of the processor transaction behind a [`Payment`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    Refunded,
}

/// The single payment attached to an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Payment {
    pub id: String,
    pub order_id: String,
    pub method: PaymentMethod,
    /// Equals the order's `totals.total` at creation.
    pub amount: Money,
    pub currency: String,
    pub status: TransactionStatus,
    pub transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Order
// =============================================================================

/// A frozen copy of a cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderItem {
    pub product_id: String,
    pub name: String,
    pub category: String,
    pub unit_price: Money,
    pub quantity: u32,
    pub line_subtotal: Money,
}

impl From<&LineItem> for OrderItem {
    fn from(item: &LineItem) -> Self {
        OrderItem {
            product_id: item.product_id.clone(),
            name: item.name.clone(),
            category: item.category.clone(),
            unit_price: item.unit_price,
            quantity: item.quantity,
            line_subtotal: item.line_subtotal(),
        }
    }
}

/// Refund details recorded on the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Refund {
    pub amount: Money,
    pub reason: String,
    #[ts(as = "String")]
    pub refunded_at: DateTime<Utc>,
}

/// Everything needed to persist a new order. The repository assigns the
/// order number and timestamps inside the persist transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderDraft {
    pub id: String,
    pub owner_key: String,
    pub customer_id: Option<String>,
    pub customer_email: Option<String>,
    pub items: Vec<OrderItem>,
    pub totals: Totals,
    pub tax_rate: TaxRate,
    pub shipping_address: Address,
    pub shipping_method: ShippingMethod,
    pub shipping_rule_id: String,
    pub coupon_code: Option<String>,
    pub notes: Option<String>,
    pub reservation_id: String,
}

impl OrderDraft {
    /// Materializes the order in its initial state.
    pub fn into_order(self, order_number: String, now: DateTime<Utc>) -> Order {
        Order {
            id: self.id,
            order_number,
            owner_key: self.owner_key,
            customer_id: self.customer_id,
            customer_email: self.customer_email,
            items: self.items,
            totals: self.totals,
            tax_rate: self.tax_rate,
            shipping_address: self.shipping_address,
            shipping_method: self.shipping_method,
            shipping_rule_id: self.shipping_rule_id,
            coupon_code: self.coupon_code,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            tracking_number: None,
            notes: self.notes,
            cancel_reason: None,
            refund: None,
            reservation_id: self.reservation_id,
            created_at: now,
            updated_at: now,
            confirmed_at: None,
            shipped_at: None,
            delivered_at: None,
            cancelled_at: None,
        }
    }
}

/// A placed order.
///
/// Items, totals and address are frozen at creation. Only the status
/// fields, the tracking number and the refund/cancel details change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Order {
    pub id: String,
    /// `ORD-YYYYMMDD-NNNN`.
    pub order_number: String,
    pub owner_key: String,
    pub customer_id: Option<String>,
    pub customer_email: Option<String>,
    pub items: Vec<OrderItem>,
    pub totals: Totals,
    #[ts(as = "String")]
    pub tax_rate: TaxRate,
    pub shipping_address: Address,
    pub shipping_method: ShippingMethod,
    pub shipping_rule_id: String,
    pub coupon_code: Option<String>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub tracking_number: Option<String>,
    pub notes: Option<String>,
    pub cancel_reason: Option<String>,
    pub refund: Option<Refund>,
    /// Stock reservation backing this order's items.
    pub reservation_id: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub shipped_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// Formats an order number from the day and its sequence value.
///
/// ```rust
/// use chrono::NaiveDate;
/// use ledgerline_core::order::format_order_number;
///
/// let day = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
/// assert_eq!(format_order_number(day, 7), "ORD-20240309-0007");
/// ```
pub fn format_order_number(day: NaiveDate, sequence: i64) -> String {
    format!("ORD-{}-{:04}", day.format("%Y%m%d"), sequence)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_happy_path() {
        let s = OrderStatus::Pending;
        let s = s.transition(OrderStatus::Confirmed).unwrap();
        let s = s.transition(OrderStatus::Shipped).unwrap();
        let s = s.transition(OrderStatus::Delivered).unwrap();
        assert_eq!(s, OrderStatus::Delivered);
    }

    #[test]
    fn test_cancel_only_before_shipping() {
        assert!(OrderStatus::Pending.is_cancellable());
        assert!(OrderStatus::Confirmed.is_cancellable());
        assert!(!OrderStatus::Shipped.is_cancellable());
        assert!(!OrderStatus::Delivered.is_cancellable());
        assert!(!OrderStatus::Cancelled.is_cancellable());

        let err = OrderStatus::Shipped
            .transition(OrderStatus::Cancelled)
            .unwrap_err();
        assert_eq!(err.to_string(), "Cannot move order from shipped to cancelled");
    }

    #[test]
    fn test_no_state_reaches_cancelled_from_terminal() {
        // Every reachable path out of shipped/delivered avoids cancelled.
        let mut frontier = vec![OrderStatus::Shipped, OrderStatus::Delivered];
        let mut seen = Vec::new();
        while let Some(s) = frontier.pop() {
            assert_ne!(s, OrderStatus::Cancelled);
            seen.push(s);
            for next in OrderStatus::ALL {
                if s.can_transition_to(next) && !seen.contains(&next) {
                    frontier.push(next);
                }
            }
        }
    }

    #[test]
    fn test_payment_machine() {
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Paid));
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Failed));
        assert!(PaymentStatus::Paid.can_transition_to(PaymentStatus::Refunded));

        assert!(!PaymentStatus::Pending.can_transition_to(PaymentStatus::Refunded));
        assert!(!PaymentStatus::Failed.can_transition_to(PaymentStatus::Refunded));
        assert!(PaymentStatus::Refunded
            .transition(PaymentStatus::Refunded)
            .is_err());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&OrderStatus::Confirmed).unwrap(),
            "\"confirmed\""
        );
        assert_eq!(
            serde_json::to_string(&PaymentMethod::CreditCard).unwrap(),
            "\"credit_card\""
        );
    }
}
