//! Post-creation order operations: status transitions, cancellation,
//! payment, refunds, bulk actions, queries and maintenance sweeps.
//!
//! Every transition is a compare-and-set in the repository. When the CAS
//! misses, the order is re-read and the caller gets a `StateConflict`
//! naming the status that blocked it.

use chrono::Utc;
use ledgerline_core::validation::validate_notes;
use ledgerline_core::{
    CoreError, Customer, Money, Order, OrderStatus, PaymentMethod, PaymentStatus, ValidationError,
};
use ledgerline_db::{DbError, PaymentOutcome};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{owner_of, OrderLifecycleManager};
use crate::error::{CheckoutError, CheckoutResult, ErrorResponse};

/// What the payment processor is asked to collect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentRequest {
    pub order_id: String,
    pub payment_id: String,
    pub amount: Money,
    pub currency: String,
}

/// One action applied to many orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BulkAction {
    Confirm,
    Ship {
        #[serde(default)]
        tracking_number: Option<String>,
    },
    Cancel {
        #[serde(default)]
        reason: Option<String>,
    },
}

/// Per-order result of a bulk action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkOutcome {
    pub order_id: String,
    /// Status after the action, when it succeeded.
    pub status: Option<OrderStatus>,
    pub error: Option<ErrorResponse>,
}

impl BulkOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkReport {
    pub outcomes: Vec<BulkOutcome>,
}

impl BulkReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

fn verb(target: OrderStatus) -> &'static str {
    match target {
        OrderStatus::Pending => "reopen",
        OrderStatus::Confirmed => "confirm",
        OrderStatus::Shipped => "ship",
        OrderStatus::Delivered => "deliver",
        OrderStatus::Cancelled => "cancel",
    }
}

/// A move the core state machine refuses, reported against `order_id`.
fn transition_refused(order_id: &str, action: impl Into<String>, err: CoreError) -> CheckoutError {
    match err {
        CoreError::InvalidTransition { machine: "payment", from, .. } => {
            CheckoutError::state_conflict(order_id, action, format!("payment {from}"))
        }
        CoreError::InvalidTransition { from, .. } => CheckoutError::state_conflict(order_id, action, from),
        other => other.into(),
    }
}

impl OrderLifecycleManager {
    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_order(&self, order_id: &str) -> CheckoutResult<Order> {
        self.storage("load order", self.db.orders().get_by_id(order_id))
            .await?
            .ok_or_else(|| CheckoutError::not_found("Order", order_id))
    }

    pub async fn order_by_number(&self, order_number: &str) -> CheckoutResult<Order> {
        self.storage("load order", self.db.orders().get_by_number(order_number))
            .await?
            .ok_or_else(|| CheckoutError::not_found("Order", order_number))
    }

    /// A customer's orders, newest first.
    pub async fn orders_for_owner(&self, customer: &Customer, limit: u32) -> CheckoutResult<Vec<Order>> {
        let owner = owner_of(customer)?;
        self.storage("list orders", self.db.orders().list_for_owner(&owner, limit))
            .await
    }

    // =========================================================================
    // Status transitions
    // =========================================================================

    async fn advance(
        &self,
        order_id: &str,
        target: OrderStatus,
        tracking_number: Option<&str>,
    ) -> CheckoutResult<Order> {
        let current = self.get_order(order_id).await?;
        let next = current
            .status
            .transition(target)
            .map_err(|e| transition_refused(order_id, verb(target), e))?;

        // The CAS pins the status just read, so a concurrent move is a miss.
        let moved = self
            .storage(
                "update order status",
                self.db
                    .orders()
                    .transition(order_id, &[current.status], next, tracking_number, Utc::now()),
            )
            .await?;

        let order = self.get_order(order_id).await?;
        if !moved {
            warn!(order_id = %order_id, status = %order.status, target = %target, "Transition refused");
            return Err(CheckoutError::state_conflict(order_id, verb(target), order.status));
        }
        Ok(order)
    }

    /// `pending → confirmed`
    pub async fn confirm_order(&self, order_id: &str) -> CheckoutResult<Order> {
        self.advance(order_id, OrderStatus::Confirmed, None).await
    }

    /// `confirmed → shipped`
    pub async fn ship_order(&self, order_id: &str, tracking_number: Option<&str>) -> CheckoutResult<Order> {
        let tracking_number = tracking_number.map(str::trim).filter(|t| !t.is_empty());
        self.advance(order_id, OrderStatus::Shipped, tracking_number).await
    }

    /// `shipped → delivered`
    pub async fn deliver_order(&self, order_id: &str) -> CheckoutResult<Order> {
        self.advance(order_id, OrderStatus::Delivered, None).await
    }

    /// Cancels a pending or confirmed order and releases its stock.
    ///
    /// Cancelling an already cancelled order returns it unchanged; stock
    /// is released at most once per order.
    pub async fn cancel_order(&self, order_id: &str, reason: Option<&str>) -> CheckoutResult<Order> {
        let reason = validate_notes(reason)?;
        let order = self.get_order(order_id).await?;

        if order.status == OrderStatus::Cancelled {
            debug!(order_id = %order_id, "Order already cancelled");
            return Ok(order);
        }
        if !order.status.is_cancellable() {
            return Err(CheckoutError::state_conflict(order_id, "cancel", order.status));
        }

        let moved = self
            .storage(
                "cancel order",
                self.db.orders().cancel(order_id, reason.as_deref(), Utc::now()),
            )
            .await?;

        let current = self.get_order(order_id).await?;
        match (moved, current.status) {
            (true, _) | (false, OrderStatus::Cancelled) => Ok(current),
            (false, status) => Err(CheckoutError::state_conflict(order_id, "cancel", status)),
        }
    }

    // =========================================================================
    // Payment
    // =========================================================================

    /// Creates the order's payment and returns what the processor should
    /// collect. Asking again returns the same payment.
    pub async fn request_payment(&self, order_id: &str, method: PaymentMethod) -> CheckoutResult<PaymentRequest> {
        let order = self.get_order(order_id).await?;

        if order.status == OrderStatus::Cancelled {
            return Err(CheckoutError::state_conflict(order_id, "request payment for", order.status));
        }
        if order.payment_status != PaymentStatus::Pending {
            return Err(CheckoutError::state_conflict(
                order_id,
                "request payment for",
                format!("payment {}", order.payment_status),
            ));
        }

        let payment = self
            .storage(
                "create payment",
                self.db.payments().create(&order, method, &self.settings.currency),
            )
            .await?;

        info!(order_id = %order_id, payment_id = %payment.id, amount = %payment.amount, "Payment requested");
        Ok(PaymentRequest {
            order_id: order.id,
            payment_id: payment.id,
            amount: payment.amount,
            currency: payment.currency,
        })
    }

    /// Applies an outcome pushed by the payment processor.
    ///
    /// A repeated push of the outcome already recorded is accepted as a
    /// no-op. An outcome for an order with no requested payment is a
    /// `StateConflict` and changes nothing.
    pub async fn record_payment_result(&self, order_id: &str, outcome: &PaymentOutcome) -> CheckoutResult<Order> {
        let recorded = self
            .bounded(
                "record payment",
                self.db.orders().record_payment(order_id, outcome, Utc::now()),
            )
            .await?;
        let moved = match recorded {
            Ok(moved) => moved,
            Err(DbError::Conflict { .. }) => {
                return Err(CheckoutError::state_conflict(
                    order_id,
                    format!("record {} payment for", outcome.label()),
                    "awaiting a payment request",
                ));
            }
            Err(other) => return Err(other.into()),
        };

        let order = self.get_order(order_id).await?;
        if moved {
            return Ok(order);
        }

        let already = match outcome {
            PaymentOutcome::Paid { .. } => PaymentStatus::Paid,
            PaymentOutcome::Failed { .. } => PaymentStatus::Failed,
        };
        if order.payment_status == already {
            debug!(order_id = %order_id, outcome = outcome.label(), "Duplicate payment result");
            return Ok(order);
        }

        warn!(
            order_id = %order_id,
            status = %order.status,
            payment_status = %order.payment_status,
            outcome = outcome.label(),
            "Payment result refused"
        );
        Err(CheckoutError::state_conflict(
            order_id,
            format!("record {} payment for", outcome.label()),
            format!("{} with payment {}", order.status, order.payment_status),
        ))
    }

    /// Refunds a paid order and releases its stock unless a cancellation
    /// already did.
    ///
    /// `amount` defaults to the order total and must satisfy
    /// `0 < amount <= total`.
    pub async fn refund_order(
        &self,
        order_id: &str,
        amount: Option<Money>,
        reason: &str,
    ) -> CheckoutResult<Order> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ValidationError::Required {
                field: "reason".to_string(),
            }
            .into());
        }
        let reason = validate_notes(Some(reason))?.unwrap_or_default();

        let order = self.get_order(order_id).await?;
        order
            .payment_status
            .transition(PaymentStatus::Refunded)
            .map_err(|e| transition_refused(order_id, "refund", e))?;

        let total = order.totals.total;
        let amount = amount.unwrap_or(total);
        if !amount.is_positive() || amount > total {
            return Err(ValidationError::OutOfRange {
                field: "amount".to_string(),
                min: 1,
                max: total.cents(),
            }
            .into());
        }

        let moved = self
            .storage(
                "refund order",
                self.db.orders().refund(order_id, amount, &reason, Utc::now()),
            )
            .await?;

        let current = self.get_order(order_id).await?;
        if !moved {
            return Err(CheckoutError::state_conflict(
                order_id,
                "refund",
                format!("payment {}", current.payment_status),
            ));
        }
        Ok(current)
    }

    // =========================================================================
    // Bulk
    // =========================================================================

    /// Applies `action` to each order on its own. One failure never stops
    /// or undoes the others.
    pub async fn bulk(&self, order_ids: &[String], action: &BulkAction) -> BulkReport {
        let mut outcomes = Vec::with_capacity(order_ids.len());

        for order_id in order_ids {
            let result = match action {
                BulkAction::Confirm => self.confirm_order(order_id).await,
                BulkAction::Ship { tracking_number } => {
                    self.ship_order(order_id, tracking_number.as_deref()).await
                }
                BulkAction::Cancel { reason } => self.cancel_order(order_id, reason.as_deref()).await,
            };

            outcomes.push(match result {
                Ok(order) => BulkOutcome {
                    order_id: order_id.clone(),
                    status: Some(order.status),
                    error: None,
                },
                Err(err) => BulkOutcome {
                    order_id: order_id.clone(),
                    status: None,
                    error: Some(err.to_response()),
                },
            });
        }

        let report = BulkReport { outcomes };
        info!(
            total = order_ids.len(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Bulk action finished"
        );
        report
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Releases reservations still held after the reservation TTL.
    pub async fn sweep_stale_reservations(&self) -> CheckoutResult<Vec<String>> {
        let cutoff = Utc::now() - self.settings.reservation_ttl;
        self.storage("sweep stale reservations", self.db.stock().sweep_stale(cutoff))
            .await
    }

    /// Soft-deletes carts past their inactivity expiry.
    pub async fn expire_inactive_carts(&self) -> CheckoutResult<u64> {
        self.storage("expire carts", self.db.carts().expire_inactive(Utc::now()))
            .await
    }
}
