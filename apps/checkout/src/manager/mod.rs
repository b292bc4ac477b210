//! # Order Lifecycle Manager
//!
//! Orchestrates checkout: pure decisions come from `ledgerline-core`,
//! every write goes through `ledgerline-db`.
//!
//! ## Order Creation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  create_order(request)                                                  │
//! │                                                                         │
//! │  1. validate input          address, method, notes, customer, code      │
//! │  2. re-check cart lines     product exists, active, price unchanged     │
//! │  3. coupon                  validate (read-only, usage untouched)       │
//! │  4. shipping                resolve over active rules                   │
//! │  5. totals                  compute_totals(tax for address.state)       │
//! │  6. reserve stock  ─────────────────────────── ReservationGuard armed   │
//! │  7. place order   (one tx: order + items, commit reservation,           │
//! │                    clear cart, redeem coupon)                           │
//! │        ok  → guard disarmed, order returned                             │
//! │        err → guard releases the held reservation, error returned        │
//! │  request dropped between 6 and 7 → guard releases on drop               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every storage call is bounded by the configured storage timeout. A call
//! that runs out of time is a retryable `StorageFailure`.

mod cart;
mod lifecycle;


pub use lifecycle::{BulkAction, BulkOutcome, BulkReport, PaymentRequest};

use chrono::{DateTime, Utc};
use ledgerline_core::coupon::{self, Coupon, CouponRejection};
use ledgerline_core::shipping::{self, FeeResult, ShippingContext};
use ledgerline_core::validation::{
    validate_address, validate_coupon_code, validate_email, validate_notes,
};
use ledgerline_core::{
    compute_totals, Address, Cart, Customer, LineItem, Money, Order, OrderDraft, OrderItem,
    Product, ShippingMethod, TaxRates, ValidationError,
};
use ledgerline_db::{Database, DbError, DbResult, ReleaseOutcome, StockLedger};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::CheckoutConfig;
use crate::error::{CheckoutError, CheckoutResult, ItemIssue};

// =============================================================================
// Settings
// =============================================================================

/// Runtime knobs of the manager.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub storage_timeout: Duration,
    pub currency: String,
    pub reservation_ttl: chrono::Duration,
    pub cart_inactivity: chrono::Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        ManagerSettings::from(&CheckoutConfig::default())
    }
}

impl From<&CheckoutConfig> for ManagerSettings {
    fn from(config: &CheckoutConfig) -> Self {
        ManagerSettings {
            storage_timeout: config.storage_timeout(),
            currency: config.currency(),
            reservation_ttl: config.reservation_ttl(),
            cart_inactivity: chrono::Duration::days(config.checkout.cart_inactivity_days),
        }
    }
}

// =============================================================================
// Requests and Results
// =============================================================================

/// Everything `create_order` needs from the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub customer: Customer,
    /// Snapshot of the customer's cart.
    pub cart: Cart,
    pub shipping_address: Address,
    /// `standard`, `express` or `overnight`.
    pub shipping_method: String,
    /// Overrides the code applied on the cart, if any.
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Outcome of a coupon check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CouponCheck {
    Valid { code: String, discount: Money },
    Invalid { code: String, reason: CouponRejection },
}

impl CouponCheck {
    pub fn is_valid(&self) -> bool {
        matches!(self, CouponCheck::Valid { .. })
    }
}

/// Input that passed validation.
struct CheckedRequest {
    owner_key: String,
    customer_id: Option<String>,
    customer_email: Option<String>,
    address: Address,
    method: ShippingMethod,
    notes: Option<String>,
    coupon_code: Option<String>,
}

// =============================================================================
// Reservation Guard
// =============================================================================

/// Releases a held reservation unless disarmed.
///
/// Covers the request being dropped between reserve and persist: `Drop`
/// spawns the release on the current runtime. The ledger only releases a
/// reservation that is still `held`, so a guard can never take stock away
/// from a persisted order.
struct ReservationGuard {
    ledger: StockLedger,
    reservation_id: Option<String>,
}

impl ReservationGuard {
    fn new(ledger: StockLedger, reservation_id: String) -> Self {
        ReservationGuard {
            ledger,
            reservation_id: Some(reservation_id),
        }
    }

    fn disarm(mut self) {
        self.reservation_id = None;
    }

    /// Takes the id out, leaving the guard inert.
    fn take(&mut self) -> Option<String> {
        self.reservation_id.take()
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        let Some(reservation_id) = self.reservation_id.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(reservation_id = %reservation_id, "Checkout abandoned, releasing reservation");
                release_in_background(&handle, self.ledger.clone(), reservation_id);
            }
            Err(_) => warn!(
                reservation_id = %reservation_id,
                "No runtime to release reservation, left for the stale sweep"
            ),
        }
    }
}

/// Abandons the reservation on a spawned task, waiting on SQLite's busy
/// timeout rather than the manager's storage timeout.
fn release_in_background(handle: &tokio::runtime::Handle, ledger: StockLedger, reservation_id: String) {
    handle.spawn(async move {
        if let Err(e) = ledger.abandon(&reservation_id).await {
            error!(
                reservation_id = %reservation_id,
                error = %e,
                "Background release failed, left for the stale sweep"
            );
        }
    });
}

// =============================================================================
// Manager
// =============================================================================

/// Entry point for every checkout and order operation.
///
/// Cheap to clone; clones share the pool and the tax table.
#[derive(Clone)]
pub struct OrderLifecycleManager {
    db: Database,
    tax: Arc<dyn TaxRates>,
    settings: ManagerSettings,
}

impl std::fmt::Debug for OrderLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderLifecycleManager")
            .field("db", &self.db)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl OrderLifecycleManager {
    pub fn new(db: Database, tax: Arc<dyn TaxRates>, settings: ManagerSettings) -> Self {
        OrderLifecycleManager { db, tax, settings }
    }

    /// Builds a manager from loaded configuration.
    pub fn from_config(db: Database, config: &CheckoutConfig) -> Self {
        OrderLifecycleManager::new(db, Arc::new(config.tax_table()), ManagerSettings::from(config))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    // -------------------------------------------------------------------------
    // Bounded storage calls
    // -------------------------------------------------------------------------

    /// Runs a storage call under the storage timeout.
    ///
    /// The outer error is the timeout; the inner result is the call's own.
    pub(crate) async fn bounded<T, F>(&self, operation: &'static str, call: F) -> CheckoutResult<DbResult<T>>
    where
        F: Future<Output = DbResult<T>>,
    {
        match tokio::time::timeout(self.settings.storage_timeout, call).await {
            Ok(result) => Ok(result),
            Err(_) => {
                let timeout_ms = self.settings.storage_timeout.as_millis() as u64;
                warn!(operation, timeout_ms, "Storage call timed out");
                Err(CheckoutError::StorageFailure(format!(
                    "{operation} timed out after {timeout_ms} ms"
                )))
            }
        }
    }

    /// [`bounded`](Self::bounded) with the storage error converted.
    pub(crate) async fn storage<T, F>(&self, operation: &'static str, call: F) -> CheckoutResult<T>
    where
        F: Future<Output = DbResult<T>>,
    {
        Ok(self.bounded(operation, call).await??)
    }

    // -------------------------------------------------------------------------
    // Create order
    // -------------------------------------------------------------------------

    /// Turns a cart snapshot into a pending order.
    ///
    /// ## Errors
    /// * `Validation` - malformed address, method, notes, email or code
    /// * `ItemsUnavailable` - a line's product vanished, went inactive or
    ///   changed price
    /// * `CouponInvalid` - at validation, or lost a usage race at redemption
    /// * `ShippingUnavailable` - no rule and no active default
    /// * `InsufficientStock` - the full shortfall list; nothing reserved
    /// * `StorageFailure` - retryable; any reservation was released
    pub async fn create_order(&self, request: CreateOrderRequest) -> CheckoutResult<Order> {
        let now = Utc::now();
        let checked = self.check_request(&request)?;
        let items = &request.cart.items;

        debug!(owner = %checked.owner_key, lines = items.len(), "Creating order");

        self.recheck_items(items).await?;

        let coupon = match &checked.coupon_code {
            Some(code) => match self.evaluate_coupon(code, Some(&checked.owner_key), items, now).await? {
                Ok(coupon) => Some(coupon),
                Err(reason) => {
                    warn!(owner = %checked.owner_key, code = %code, %reason, "Coupon refused");
                    return Err(CheckoutError::CouponInvalid {
                        code: code.clone(),
                        reason,
                    });
                }
            },
            None => None,
        };

        let rules = self
            .storage("load shipping rules", self.db.shipping_rules().list_active())
            .await?;
        let context = ShippingContext::for_items(items, &checked.address, Some(checked.method));
        let shipping = shipping::resolve(&rules, &context)?;

        let tax_rate = self.tax.rate_for_region(&checked.address.state);
        let totals = compute_totals(items, coupon.as_ref(), Some(shipping.fee), tax_rate);

        let token = self
            .storage("reserve stock", self.db.stock().reserve(&request.cart.stock_requests()))
            .await?;
        let mut guard = ReservationGuard::new(self.db.stock(), token.id.clone());

        let draft = OrderDraft {
            id: Uuid::new_v4().to_string(),
            owner_key: checked.owner_key,
            customer_id: checked.customer_id,
            customer_email: checked.customer_email,
            items: items.iter().map(OrderItem::from).collect(),
            totals,
            tax_rate,
            shipping_address: checked.address,
            shipping_method: checked.method,
            shipping_rule_id: shipping.rule_id,
            coupon_code: coupon.as_ref().map(|c| c.code.clone()),
            notes: checked.notes,
            reservation_id: token.id.clone(),
        };

        let placed = match self
            .bounded("persist order", self.db.orders().place(draft, coupon.as_ref(), now))
            .await
        {
            Ok(Ok(order)) => Ok(order),
            Ok(Err(err)) => Err(placement_error(err)),
            Err(timeout) => Err(timeout),
        };

        match placed {
            Ok(order) => {
                guard.disarm();
                info!(
                    order_id = %order.id,
                    order_number = %order.order_number,
                    total = %order.totals.total,
                    "Order created"
                );
                Ok(order)
            }
            Err(err) => {
                if let Some(reservation_id) = guard.take() {
                    self.compensate(&reservation_id).await;
                }
                Err(err)
            }
        }
    }

    fn check_request(&self, request: &CreateOrderRequest) -> CheckoutResult<CheckedRequest> {
        let owner_key = owner_of(&request.customer)?;

        if request.cart.is_empty() {
            return Err(ValidationError::Required {
                field: "items".to_string(),
            }
            .into());
        }
        if request.cart.owner != owner_key {
            return Err(ValidationError::InvalidFormat {
                field: "cart".to_string(),
                reason: "cart belongs to another customer".to_string(),
            }
            .into());
        }

        let coupon_code = request
            .coupon_code
            .as_deref()
            .or(request.cart.applied_coupon.as_deref())
            .map(validate_coupon_code)
            .transpose()?;

        Ok(CheckedRequest {
            customer_id: request.customer.customer_id().map(str::to_string),
            customer_email: request
                .customer
                .email()
                .map(|e| e.trim().to_lowercase()),
            address: validate_address(&request.shipping_address)?,
            method: request.shipping_method.parse()?,
            notes: validate_notes(request.notes.as_deref())?,
            coupon_code,
            owner_key,
        })
    }

    /// Every line must still be purchasable at the price in the cart.
    async fn recheck_items(&self, items: &[LineItem]) -> CheckoutResult<()> {
        let ids: Vec<String> = items.iter().map(|i| i.product_id.clone()).collect();
        let products = self
            .storage("load products", self.db.products().get_many(&ids))
            .await?;
        let by_id: HashMap<&str, &Product> = products.iter().map(|p| (p.id.as_str(), p)).collect();

        let issues: Vec<ItemIssue> = items
            .iter()
            .filter_map(|item| match by_id.get(item.product_id.as_str()) {
                None => Some(ItemIssue::Missing {
                    product_id: item.product_id.clone(),
                }),
                Some(product) if !product.is_purchasable() => Some(ItemIssue::Inactive {
                    product_id: item.product_id.clone(),
                    status: product.status.to_string(),
                }),
                Some(product) if product.price != item.unit_price => Some(ItemIssue::PriceChanged {
                    product_id: item.product_id.clone(),
                    cart_price: item.unit_price,
                    current_price: product.price,
                }),
                Some(_) => None,
            })
            .collect();

        if issues.is_empty() {
            return Ok(());
        }
        for issue in &issues {
            warn!(%issue, "Cart line failed re-check");
        }
        Err(CheckoutError::ItemsUnavailable { issues })
    }

    /// Gives back a reservation after a failed persist.
    async fn compensate(&self, reservation_id: &str) {
        match self
            .bounded("release reservation", self.db.stock().abandon(reservation_id))
            .await
        {
            Ok(Ok(ReleaseOutcome::Released(items))) => {
                info!(reservation_id = %reservation_id, lines = items.len(), "Reservation compensated");
            }
            Ok(Ok(ReleaseOutcome::AlreadyReleased)) => {
                debug!(reservation_id = %reservation_id, "Reservation was already released");
            }
            Ok(Ok(ReleaseOutcome::Committed)) => {
                warn!(reservation_id = %reservation_id, "Reservation is owned by an order, left in place");
            }
            Ok(Err(e)) => error!(
                reservation_id = %reservation_id,
                error = %e,
                "Compensating release failed, left for the stale sweep"
            ),
            Err(e) => {
                warn!(
                    reservation_id = %reservation_id,
                    error = %e,
                    "Compensating release timed out, retrying in the background"
                );
                release_in_background(
                    &tokio::runtime::Handle::current(),
                    self.db.stock(),
                    reservation_id.to_string(),
                );
            }
        }
    }

    // -------------------------------------------------------------------------
    // Coupons
    // -------------------------------------------------------------------------

    /// Looks a code up and runs every check. Read-only: usage counters are
    /// never touched here.
    ///
    /// `owner_key` enables the per-customer cap; `None` skips it.
    async fn evaluate_coupon(
        &self,
        code: &str,
        owner_key: Option<&str>,
        items: &[LineItem],
        now: DateTime<Utc>,
    ) -> CheckoutResult<Result<Coupon, CouponRejection>> {
        let Some(coupon) = self
            .storage("load coupon", self.db.coupons().get_by_code(code))
            .await?
        else {
            return Ok(Err(CouponRejection::NotFound {
                code: code.to_string(),
            }));
        };

        let usage = match owner_key {
            Some(owner) => Some(
                self.storage("load coupon usage", self.db.coupons().usage_for(&coupon.id, owner))
                    .await?,
            ),
            None => None,
        };

        let subtotal: Money = items.iter().map(LineItem::line_subtotal).sum();
        Ok(coupon::validate(&coupon, now, usage, subtotal, items).map(|_| coupon))
    }

    /// Checks a code against a cart and reports the discount it would give.
    pub async fn validate_coupon(
        &self,
        code: &str,
        customer: Option<&Customer>,
        cart: &Cart,
    ) -> CheckoutResult<CouponCheck> {
        let code = validate_coupon_code(code)?;
        let owner = customer.map(owner_of).transpose()?;

        let check = match self
            .evaluate_coupon(&code, owner.as_deref(), &cart.items, Utc::now())
            .await?
        {
            Ok(coupon) => {
                let subtotal = cart.summary().subtotal;
                let discount = Money::from_decimal(
                    coupon::calculate_discount(subtotal, &cart.items, &coupon).min(subtotal.to_decimal()),
                );
                CouponCheck::Valid { code, discount }
            }
            Err(reason) => CouponCheck::Invalid { code, reason },
        };
        debug!(valid = check.is_valid(), "Coupon checked");
        Ok(check)
    }

    // -------------------------------------------------------------------------
    // Shipping
    // -------------------------------------------------------------------------

    /// Builds a shipping context for a cart after validating the
    /// destination and the method name.
    pub fn shipping_context(
        &self,
        cart: &Cart,
        address: &Address,
        method: Option<&str>,
    ) -> CheckoutResult<ShippingContext> {
        let address = validate_address(address)?;
        let method = method.map(str::parse::<ShippingMethod>).transpose()?;
        Ok(ShippingContext::for_items(&cart.items, &address, method))
    }

    /// The fee the first admissible rule charges, or the default rule's
    /// fallback.
    pub async fn quote_shipping(&self, context: &ShippingContext) -> CheckoutResult<FeeResult> {
        let rules = self
            .storage("load shipping rules", self.db.shipping_rules().list_active())
            .await?;
        Ok(shipping::resolve(&rules, context)?)
    }

    /// Every admissible option, cheapest priority first.
    pub async fn shipping_options(&self, context: &ShippingContext) -> CheckoutResult<Vec<FeeResult>> {
        let rules = self
            .storage("load shipping rules", self.db.shipping_rules().list_active())
            .await?;
        Ok(shipping::shipping_options(&rules, context)?)
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Validates the caller's identity and returns its owner key.
pub(crate) fn owner_of(customer: &Customer) -> CheckoutResult<String> {
    match customer {
        Customer::Registered { customer_id, .. } => {
            if customer_id.trim().is_empty() {
                return Err(ValidationError::Required {
                    field: "customer_id".to_string(),
                }
                .into());
            }
        }
        Customer::Guest { email } => {
            validate_email(email)?;
        }
    }
    Ok(customer.owner_key())
}

/// Maps a failed persist onto the caller taxonomy.
fn placement_error(err: DbError) -> CheckoutError {
    match err {
        DbError::CouponRejected { code, reason } => {
            warn!(%code, %reason, "Coupon lost a usage race at redemption");
            CheckoutError::CouponInvalid { code, reason }
        }
        DbError::Conflict { entity, id, reason } if entity == "Reservation" => {
            warn!(reservation_id = %id, %reason, "Reservation expired before the order was saved");
            CheckoutError::StorageFailure(format!("reservation {id} {reason}"))
        }
        other => other.into(),
    }
}
