//! # Ledgerline Maintenance Runner
//!
//! Periodically releases stale stock reservations and expires idle carts.
//!
//! ## Usage
//! ```bash
//! # Run until ctrl-c, sweeping every 60 seconds
//! ledgerline-checkout
//!
//! # One pass with an explicit config file
//! ledgerline-checkout --config ./checkout.toml --once
//! ```

use ledgerline_checkout::{init_tracing, CheckoutConfig, OrderLifecycleManager};
use ledgerline_db::Database;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

struct Args {
    config: Option<PathBuf>,
    once: bool,
    interval: Duration,
}

fn print_help() {
    println!("Ledgerline Maintenance Runner");
    println!();
    println!("Usage: ledgerline-checkout [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -c, --config <PATH>        Configuration file (default: platform config dir)");
    println!("      --once                 Run a single pass and exit");
    println!("  -i, --interval-secs <N>    Seconds between passes (default: 60)");
    println!("  -h, --help                 Show this help message");
}

/// `Ok(None)` when help was printed.
fn parse_args() -> Result<Option<Args>, String> {
    let mut args = Args {
        config: None,
        once: false,
        interval: Duration::from_secs(60),
    };

    let mut iter = env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = iter.next().ok_or("--config needs a path")?;
                args.config = Some(PathBuf::from(path));
            }
            "--once" => args.once = true,
            "--interval-secs" | "-i" => {
                let secs: u64 = iter
                    .next()
                    .ok_or("--interval-secs needs a value")?
                    .parse()
                    .map_err(|_| "--interval-secs must be a whole number")?;
                if secs == 0 {
                    return Err("--interval-secs must be positive".to_string());
                }
                args.interval = Duration::from_secs(secs);
            }
            "--help" | "-h" => {
                print_help();
                return Ok(None);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(Some(args))
}

async fn run_pass(manager: &OrderLifecycleManager) {
    match manager.sweep_stale_reservations().await {
        Ok(released) => info!(released = released.len(), "Stale reservation sweep done"),
        Err(e) => error!(error = %e, "Stale reservation sweep failed"),
    }
    match manager.expire_inactive_carts().await {
        Ok(expired) => info!(expired, "Cart expiry done"),
        Err(e) => error!(error = %e, "Cart expiry failed"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let Some(args) = parse_args()? else {
        return Ok(());
    };

    init_tracing();

    let config = match &args.config {
        Some(path) => CheckoutConfig::load(path)?,
        None => CheckoutConfig::load_default()?,
    };

    if let Some(parent) = config.database.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db = Database::new(config.db_config()).await?;
    let manager = OrderLifecycleManager::from_config(db.clone(), &config);
    info!(
        path = %config.database.path.display(),
        interval_secs = args.interval.as_secs(),
        "Maintenance runner started"
    );

    if args.once {
        run_pass(&manager).await;
        db.close().await;
        return Ok(());
    }

    let mut ticker = tokio::time::interval(args.interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => run_pass(&manager).await,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    db.close().await;
    Ok(())
}
