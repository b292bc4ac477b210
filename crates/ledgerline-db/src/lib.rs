//! # ledgerline-db: Database Layer for Ledgerline
//!
//! SQLite persistence for the checkout core, through sqlx.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Database (pool.rs) ── SqlitePool, WAL, busy_timeout                    │
//! │     ├── stock()          StockLedger: reserve / commit / release        │
//! │     ├── orders()         place in one transaction, status CAS           │
//! │     ├── payments()       one payment per order, refunds                 │
//! │     ├── coupons()        redemption counted under the caps              │
//! │     ├── shipping_rules() single default rule                            │
//! │     ├── carts()          one live cart per owner                        │
//! │     └── products()       catalog                                        │
//! │                                                                         │
//! │  migrations/sqlite/*.sql embedded and applied on connect                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ledgerline_db::{Database, DbConfig};
//! use ledgerline_core::StockRequest;
//!
//! let db = Database::new(DbConfig::new("ledgerline.db")).await?;
//!
//! let token = db.stock().reserve(&[StockRequest::new("p-1", 2)]).await?;
//! db.stock().release(&token.id).await?;
//! ```

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::cart::CartRepository;
pub use repository::coupon::CouponRepository;
pub use repository::order::OrderRepository;
pub use repository::payment::{PaymentOutcome, PaymentRepository};
pub use repository::product::ProductRepository;
pub use repository::shipping::ShippingRuleRepository;
pub use repository::stock::{LowStock, ReleaseOutcome, ReservationStatus, ReservationToken, StockLedger};
