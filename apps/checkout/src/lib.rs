//! # Ledgerline Checkout
//!
//! The Order Lifecycle Manager: turns carts into orders and drives them
//! through confirmation, shipping, payment, cancellation and refund.
//!
//! ## Module Organization
//! ```text
//! ledgerline_checkout/
//! ├── lib.rs             ◄─── You are here (exports, tracing setup)
//! ├── config.rs          ◄─── checkout.toml + LEDGERLINE_* overrides
//! ├── error.rs           ◄─── CheckoutError, ErrorCode, ErrorResponse
//! └── manager/
//!     ├── mod.rs         ◄─── create_order saga, coupons, shipping quotes
//!     ├── lifecycle.rs   ◄─── transitions, payment, refund, bulk, sweeps
//!     └── cart.rs        ◄─── cart load/mutate/save
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! use ledgerline_checkout::{init_tracing, CheckoutConfig, OrderLifecycleManager};
//! use ledgerline_db::Database;
//!
//! init_tracing();
//! let config = CheckoutConfig::load_default()?;
//! let db = Database::new(config.db_config()).await?;
//! let manager = OrderLifecycleManager::from_config(db, &config);
//!
//! let order = manager.create_order(request).await?;
//! ```

pub mod config;
pub mod error;
pub mod manager;

pub use config::{CheckoutConfig, ConfigError};
pub use error::{CheckoutError, CheckoutResult, ErrorCode, ErrorResponse, ItemIssue};
pub use manager::{
    BulkAction, BulkOutcome, BulkReport, CouponCheck, CreateOrderRequest, ManagerSettings,
    OrderLifecycleManager, PaymentRequest,
};

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,ledgerline=debug,sqlx=warn";

/// Initializes the tracing subscriber.
///
/// `RUST_LOG` overrides [`DEFAULT_LOG_FILTER`]. Calling it twice is
/// harmless; the second call keeps the first subscriber.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
