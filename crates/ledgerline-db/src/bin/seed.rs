//! # Seed Data Generator
//!
//! Populates a database with a small catalog, shipping rules and coupons
//! for development.
//!
//! ## Usage
//! ```bash
//! # Seed ./ledgerline_dev.db
//! cargo run -p ledgerline-db --bin seed
//!
//! # Specify database path
//! cargo run -p ledgerline-db --bin seed -- --db ./data/ledgerline.db
//! ```
//!
//! ## Generated Data
//! - Products across apparel, electronics and home categories, some of
//!   them already at their low-stock alert
//! - Shipping rules: free over $75, weight-based express, location-based
//!   for Alaska/Hawaii, and a flat $5.99 default
//! - Coupons: `SAVE10` (fixed $10), `WELCOME15` (15%, once per customer),
//!   `ELEC20` (20% on electronics, 100 uses)

use chrono::{Duration, Utc};
use ledgerline_core::coupon::{Coupon, CouponDiscount, UsageLimit};
use ledgerline_core::shipping::{
    DeliveryEstimate, FeeStrategy, LocationFee, ShippingConditions, ShippingRule,
};
use ledgerline_core::{Money, Product, ProductStatus, ShippingMethod, DEFAULT_LOW_STOCK_ALERT};
use ledgerline_db::{Database, DbConfig};
use rust_decimal::Decimal;
use std::env;

/// (category, name, price cents, weight in grams, stock)
const PRODUCTS: &[(&str, &str, i64, i64, i64)] = &[
    ("apparel", "Canvas Tote", 1899, 300, 120),
    ("apparel", "Merino Beanie", 2450, 150, 60),
    ("apparel", "Rain Shell", 8900, 700, 8),
    ("apparel", "Wool Socks 3-Pack", 1500, 250, 200),
    ("electronics", "USB-C Cable 2m", 1299, 80, 300),
    ("electronics", "Wireless Earbuds", 5999, 120, 25),
    ("electronics", "Power Bank 20k", 4499, 450, 3),
    ("electronics", "Mechanical Keyboard", 10900, 1100, 15),
    ("home", "Ceramic Mug", 1400, 400, 90),
    ("home", "Pour-Over Kettle", 4200, 900, 12),
    ("home", "Linen Napkins (4)", 2600, 350, 40),
    ("home", "Cast Iron Skillet", 3900, 2600, 1),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    let mut db_path = String::from("./ledgerline_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Ledgerline Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./ledgerline_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 Ledgerline Seed Data Generator");
    println!("================================");
    println!("Database: {}", db_path);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.products().count().await?;
    if existing > 0 {
        println!("⚠ Database already has {} products", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    println!();
    println!("Generating products...");
    for (idx, product) in PRODUCTS.iter().enumerate() {
        let product = generate_product(idx, *product);
        if let Err(e) = db.products().insert(&product).await {
            eprintln!("Failed to insert {}: {}", product.sku, e);
        }
    }
    println!("✓ {} products", db.products().count().await?);

    println!();
    println!("Generating shipping rules...");
    let rules = shipping_rules();
    for rule in &rules {
        db.shipping_rules().insert(rule).await?;
    }
    db.shipping_rules().set_default("standard-flat").await?;
    println!("✓ {} rules (default: standard-flat)", rules.len());

    println!();
    println!("Generating coupons...");
    let coupons = coupons();
    for coupon in &coupons {
        db.coupons().insert(coupon).await?;
    }
    println!("✓ {} coupons", coupons.len());

    let low = db.products().low_stock().await?;
    println!();
    println!("Low stock: {} product(s)", low.len());
    for p in low {
        println!("  {} ({}): {} left", p.name, p.sku, p.available_quantity);
    }

    println!();
    println!("✓ Seed complete!");
    Ok(())
}

/// Builds one catalog product from its seed tuple.
fn generate_product(idx: usize, (category, name, price_cents, grams, stock): (&str, &str, i64, i64, i64)) -> Product {
    let now = Utc::now();
    let prefix: String = category.chars().take(3).collect::<String>().to_uppercase();

    Product {
        id: format!("prod-{:03}", idx + 1),
        sku: format!("{}-{:04}", prefix, idx + 1),
        name: name.to_string(),
        category: category.to_string(),
        price: Money::from_cents(price_cents),
        weight_kg: Decimal::new(grams, 3),
        status: ProductStatus::Active,
        available_quantity: stock,
        low_stock_alert: DEFAULT_LOW_STOCK_ALERT,
        created_at: now,
        updated_at: now,
    }
}

fn rule(id: &str, name: &str, strategy: FeeStrategy, priority: i64) -> ShippingRule {
    let now = Utc::now();
    ShippingRule {
        id: id.to_string(),
        name: name.to_string(),
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

fn shipping_rules() -> Vec<ShippingRule> {
    let mut remote = rule(
        "remote-states",
        "Alaska & Hawaii",
        FeeStrategy::LocationBased {
            locations: vec![
                LocationFee {
                    country: Some("USA".to_string()),
                    state: Some("AK".to_string()),
                    city: None,
                    zip_from: None,
                    zip_to: None,
                    fee: Money::from_cents(2499),
                },
                LocationFee {
                    country: Some("USA".to_string()),
                    state: Some("HI".to_string()),
                    city: None,
                    zip_from: None,
                    zip_to: None,
                    fee: Money::from_cents(2999),
                },
            ],
            fallback_rate: Money::from_cents(1999),
        },
        0,
    );
    remote.applicable_states = vec!["AK".to_string(), "HI".to_string()];
    remote.estimated_delivery = DeliveryEstimate { min_days: 5, max_days: 12 };

    let mut free = rule("free-over-75", "Free shipping over $75", FeeStrategy::Free, 10);
    free.conditions.min_order_amount = Some(Money::from_cents(7500));
    free.applicable_methods = vec![ShippingMethod::Standard];

    let mut express = rule(
        "express-weight",
        "Express (by weight)",
        FeeStrategy::WeightBased {
            base_weight_kg: Decimal::new(1, 0),
            base_price: Money::from_cents(1299),
            additional_per_kg: Money::from_cents(250),
        },
        20,
    );
    express.applicable_methods = vec![ShippingMethod::Express, ShippingMethod::Overnight];
    express.estimated_delivery = DeliveryEstimate { min_days: 1, max_days: 2 };

    let standard = rule(
        "standard-flat",
        "Standard",
        FeeStrategy::Flat {
            rate: Money::from_cents(599),
        },
        100,
    );

    vec![remote, free, express, standard]
}

fn coupons() -> Vec<Coupon> {
    let now = Utc::now();
    let base = Coupon {
        id: String::new(),
        code: String::new(),
        description: None,
        discount: CouponDiscount::Fixed {
            amount: Money::from_cents(1000),
        },
        starts_at: now - Duration::days(1),
        ends_at: now + Duration::days(90),
        usage_limit: UsageLimit::default(),
        usage_count: 0,
        minimum_purchase: Money::zero(),
        minimum_items: 0,
        applicable_categories: Vec::new(),
        is_active: true,
    };

    vec![
        Coupon {
            id: "coupon-save10".to_string(),
            code: "SAVE10".to_string(),
            description: Some("$10 off orders over $50".to_string()),
            minimum_purchase: Money::from_cents(5000),
            ..base.clone()
        },
        Coupon {
            id: "coupon-welcome15".to_string(),
            code: "WELCOME15".to_string(),
            description: Some("15% off your first order".to_string()),
            discount: CouponDiscount::Percentage {
                percent: Decimal::new(15, 0),
            },
            usage_limit: UsageLimit {
                total: None,
                per_customer: Some(1),
            },
            ..base.clone()
        },
        Coupon {
            id: "coupon-elec20".to_string(),
            code: "ELEC20".to_string(),
            description: Some("20% off electronics".to_string()),
            discount: CouponDiscount::Percentage {
                percent: Decimal::new(20, 0),
            },
            usage_limit: UsageLimit {
                total: Some(100),
                per_customer: Some(2),
            },
            applicable_categories: vec!["electronics".to_string()],
            ..base
        },
    ]
}
