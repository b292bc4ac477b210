//! Cart operations: load, mutate through the core aggregate, save.

use chrono::{DateTime, Utc};
use ledgerline_core::validation::validate_coupon_code;
use ledgerline_core::{Cart, Customer, CoreResult};
use tracing::debug;

use super::{owner_of, CouponCheck, OrderLifecycleManager};
use crate::error::{CheckoutError, CheckoutResult};

impl OrderLifecycleManager {
    /// The customer's live cart, or a new empty one.
    pub async fn cart_for(&self, customer: &Customer) -> CheckoutResult<Cart> {
        let owner = owner_of(customer)?;
        let now = Utc::now();
        let cart = self
            .storage("load cart", self.db.carts().load(&owner, now))
            .await?;
        Ok(cart.unwrap_or_else(|| Cart::new(owner, now)))
    }

    async fn update_cart<F>(&self, customer: &Customer, change: F) -> CheckoutResult<Cart>
    where
        F: FnOnce(&mut Cart, DateTime<Utc>) -> CoreResult<()>,
    {
        let mut cart = self.cart_for(customer).await?;
        let now = Utc::now();
        change(&mut cart, now)?;
        self.save_cart(&mut cart).await?;
        Ok(cart)
    }

    async fn save_cart(&self, cart: &mut Cart) -> CheckoutResult<()> {
        cart.expires_at = cart.updated_at + self.settings.cart_inactivity;
        self.storage("save cart", self.db.carts().save(cart)).await?;
        debug!(owner = %cart.owner, lines = cart.items.len(), "Cart saved");
        Ok(())
    }

    /// Adds a product at its current catalog price.
    pub async fn add_to_cart(&self, customer: &Customer, product_id: &str, quantity: u32) -> CheckoutResult<Cart> {
        let product = self
            .storage("load product", self.db.products().get_by_id(product_id))
            .await?
            .ok_or_else(|| CheckoutError::not_found("Product", product_id))?;

        self.update_cart(customer, |cart, now| cart.add_item(&product, quantity, now))
            .await
    }

    /// Sets a line's quantity; zero removes it.
    pub async fn update_cart_item(&self, customer: &Customer, product_id: &str, quantity: u32) -> CheckoutResult<Cart> {
        self.update_cart(customer, |cart, now| cart.update_quantity(product_id, quantity, now))
            .await
    }

    pub async fn remove_from_cart(&self, customer: &Customer, product_id: &str) -> CheckoutResult<Cart> {
        self.update_cart(customer, |cart, now| cart.remove_item(product_id, now))
            .await
    }

    pub async fn clear_cart(&self, customer: &Customer) -> CheckoutResult<Cart> {
        self.update_cart(customer, |cart, now| {
            cart.clear(now);
            Ok(())
        })
        .await
    }

    /// Validates a code against the cart and records it when valid.
    pub async fn apply_coupon_to_cart(&self, customer: &Customer, code: &str) -> CheckoutResult<CouponCheck> {
        let code = validate_coupon_code(code)?;
        let mut cart = self.cart_for(customer).await?;

        let check = self.validate_coupon(&code, Some(customer), &cart).await?;
        if check.is_valid() {
            cart.apply_coupon(code, Utc::now());
            self.save_cart(&mut cart).await?;
        }
        Ok(check)
    }

    pub async fn remove_coupon_from_cart(&self, customer: &Customer) -> CheckoutResult<Cart> {
        self.update_cart(customer, |cart, now| {
            cart.remove_coupon(now);
            Ok(())
        })
        .await
    }
}
