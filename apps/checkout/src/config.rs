//! # Checkout Configuration
//!
//! Loaded from a TOML file, then overridden by `LEDGERLINE_*` environment
//! variables, then validated.
//!
//! ## File Layout
//! ```toml
//! [database]
//! path = "/var/lib/ledgerline/ledgerline.db"
//! max_connections = 5
//! min_connections = 1
//! storage_timeout_ms = 5000
//!
//! [checkout]
//! currency = "USD"
//! reservation_ttl_secs = 900
//! cart_inactivity_days = 30
//!
//! [tax]
//! default_rate = "0.06"
//!
//! [tax.regions]
//! CA = "0.0825"
//! NY = "0.08875"
//! ```
//!
//! ## Environment Overrides
//! | Variable                          | Field                            |
//! |-----------------------------------|----------------------------------|
//! | `LEDGERLINE_DB_PATH`              | `database.path`                  |
//! | `LEDGERLINE_STORAGE_TIMEOUT_MS`   | `database.storage_timeout_ms`    |
//! | `LEDGERLINE_CURRENCY`             | `checkout.currency`              |
//! | `LEDGERLINE_RESERVATION_TTL_SECS` | `checkout.reservation_ttl_secs`  |
//! | `LEDGERLINE_DEFAULT_TAX_RATE`     | `tax.default_rate`               |

use directories::ProjectDirs;
use ledgerline_core::{TaxRate, TaxTable, CART_INACTIVITY_DAYS, DEFAULT_CURRENCY};
use ledgerline_db::DbConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Name of the configuration file inside the platform config directory.
pub const CONFIG_FILE_NAME: &str = "checkout.toml";

const ENV_DB_PATH: &str = "LEDGERLINE_DB_PATH";
const ENV_STORAGE_TIMEOUT_MS: &str = "LEDGERLINE_STORAGE_TIMEOUT_MS";
const ENV_CURRENCY: &str = "LEDGERLINE_CURRENCY";
const ENV_RESERVATION_TTL_SECS: &str = "LEDGERLINE_RESERVATION_TTL_SECS";
const ENV_DEFAULT_TAX_RATE: &str = "LEDGERLINE_DEFAULT_TAX_RATE";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "ledgerline", "checkout")
}

// =============================================================================
// Sections
// =============================================================================

/// `[database]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Upper bound on every storage call made by the manager.
    #[serde(default = "default_storage_timeout_ms")]
    pub storage_timeout_ms: u64,
}

/// `[checkout]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSection {
    /// ISO 4217 code sent to the payment processor.
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Age after which a reservation no order took is swept.
    #[serde(default = "default_reservation_ttl_secs")]
    pub reservation_ttl_secs: u64,

    #[serde(default = "default_cart_inactivity_days")]
    pub cart_inactivity_days: i64,
}

/// `[tax]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxSection {
    #[serde(default = "default_tax_rate")]
    pub default_rate: Decimal,

    #[serde(default = "default_tax_regions")]
    pub regions: BTreeMap<String, Decimal>,
}

fn default_db_path() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().join("ledgerline.db"))
        .unwrap_or_else(|| PathBuf::from("ledgerline.db"))
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_storage_timeout_ms() -> u64 {
    5_000
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_reservation_ttl_secs() -> u64 {
    15 * 60
}

fn default_cart_inactivity_days() -> i64 {
    CART_INACTIVITY_DAYS
}

fn default_tax_rate() -> Decimal {
    TaxTable::default().default_rate.rate()
}

fn default_tax_regions() -> BTreeMap<String, Decimal> {
    TaxTable::default()
        .regions
        .into_iter()
        .map(|(region, rate)| (region, rate.rate()))
        .collect()
}

impl Default for DatabaseSection {
    fn default() -> Self {
        DatabaseSection {
            path: default_db_path(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            storage_timeout_ms: default_storage_timeout_ms(),
        }
    }
}

impl Default for CheckoutSection {
    fn default() -> Self {
        CheckoutSection {
            currency: default_currency(),
            reservation_ttl_secs: default_reservation_ttl_secs(),
            cart_inactivity_days: default_cart_inactivity_days(),
        }
    }
}

impl Default for TaxSection {
    fn default() -> Self {
        TaxSection {
            default_rate: default_tax_rate(),
            regions: default_tax_regions(),
        }
    }
}

// =============================================================================
// Checkout Config
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckoutConfig {
    #[serde(default)]
    pub database: DatabaseSection,

    #[serde(default)]
    pub checkout: CheckoutSection,

    #[serde(default)]
    pub tax: TaxSection,
}

impl CheckoutConfig {
    /// Reads `path`, applies environment overrides and validates.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = CheckoutConfig::from_toml(&text)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;

        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Loads the platform default file if it exists, otherwise starts from
    /// defaults. Environment overrides apply either way.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => {
                debug!("No configuration file, using defaults");
                let mut config = CheckoutConfig::default();
                config.apply_overrides(|key| std::env::var(key).ok())?;
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// `<platform config dir>/checkout.toml`
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Applies `LEDGERLINE_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_DB_PATH) {
            self.database.path = PathBuf::from(path);
        }
        if let Some(value) = lookup(ENV_STORAGE_TIMEOUT_MS) {
            self.database.storage_timeout_ms = parse_env(ENV_STORAGE_TIMEOUT_MS, &value)?;
        }
        if let Some(currency) = lookup(ENV_CURRENCY) {
            self.checkout.currency = currency;
        }
        if let Some(value) = lookup(ENV_RESERVATION_TTL_SECS) {
            self.checkout.reservation_ttl_secs = parse_env(ENV_RESERVATION_TTL_SECS, &value)?;
        }
        if let Some(value) = lookup(ENV_DEFAULT_TAX_RATE) {
            self.tax.default_rate = parse_env(ENV_DEFAULT_TAX_RATE, &value)?;
        }
        Ok(())
    }

    /// Rejects settings the manager cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::invalid("database.max_connections", "must be at least 1"));
        }
        if self.database.min_connections == 0 {
            return Err(ConfigError::invalid("database.min_connections", "must be at least 1"));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::invalid(
                "database.min_connections",
                "cannot exceed max_connections",
            ));
        }
        if self.database.storage_timeout_ms == 0 {
            return Err(ConfigError::invalid("database.storage_timeout_ms", "must be positive"));
        }
        if self.checkout.reservation_ttl_secs == 0 {
            return Err(ConfigError::invalid("checkout.reservation_ttl_secs", "must be positive"));
        }
        if self.checkout.cart_inactivity_days <= 0 {
            return Err(ConfigError::invalid("checkout.cart_inactivity_days", "must be positive"));
        }

        let currency = &self.checkout.currency;
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::invalid(
                "checkout.currency",
                format!("'{currency}' is not a 3-letter currency code"),
            ));
        }

        check_rate("tax.default_rate", self.tax.default_rate)?;
        for (region, rate) in &self.tax.regions {
            check_rate(&format!("tax.regions.{region}"), *rate)?;
        }
        Ok(())
    }

    /// Pool settings for `ledgerline_db::Database::new`.
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database.path)
            .max_connections(self.database.max_connections)
            .min_connections(self.database.min_connections)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.database.storage_timeout_ms)
    }

    pub fn reservation_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.checkout.reservation_ttl_secs.min(u64::from(u32::MAX)) as i64)
    }

    /// The configured rates as a lookup table, region keys upper-cased.
    pub fn tax_table(&self) -> TaxTable {
        TaxTable {
            default_rate: TaxRate::from_decimal(self.tax.default_rate),
            regions: self
                .tax
                .regions
                .iter()
                .map(|(region, rate)| (region.clone(), TaxRate::from_decimal(*rate)))
                .collect(),
        }
        .normalized()
    }

    /// Currency code, upper-cased.
    pub fn currency(&self) -> String {
        self.checkout.currency.to_uppercase()
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(key, format!("cannot parse '{value}'")))
}

fn check_rate(key: &str, rate: Decimal) -> Result<(), ConfigError> {
    if rate < Decimal::ZERO || rate > Decimal::ONE {
        return Err(ConfigError::invalid(key, format!("{rate} is outside [0, 1]")));
    }
    Ok(())
}

// =============================================================================
// Errors
// =============================================================================

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

impl ConfigError {
    fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
