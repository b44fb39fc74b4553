//! Ledger configuration loaded from TOML.
//!
//! ```toml
//! [database]
//! path = "clinic.db"
//!
//! [pricing]
//! price_tolerance = "0.001"
//!
//! [listing]
//! default_limit = 10
//!
//! [logging]
//! level = "info"
//! json = false
//! ```
//!
//! Every section is optional. `CLINIC_LEDGER_DATABASE_PATH` and
//! `CLINIC_LEDGER_LOG_LEVEL` override the file.

use std::fs;
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::listing::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation failed: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LedgerConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub listing: ListingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the SQLite file lives. `None` means in-memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricingConfig {
    /// Largest accepted difference between a quoted unit price and the
    /// patient's current consultation price when selling credits
    #[serde(default = "default_price_tolerance")]
    pub price_tolerance: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingConfig {
    /// Page size when the caller omits `limit`
    #[serde(default = "default_limit")]
    pub default_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_price_tolerance() -> Decimal {
    Decimal::new(1, 3)
}

fn default_limit() -> u32 {
    DEFAULT_PAGE_LIMIT
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            price_tolerance: default_price_tolerance(),
        }
    }
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl LedgerConfig {
    /// Read, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let mut config = Self::from_toml_str(&contents)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse without environment overrides.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: LedgerConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides looked up by variable name.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("CLINIC_LEDGER_DATABASE_PATH") {
            self.database.path = Some(path);
        }
        if let Some(level) = lookup("CLINIC_LEDGER_LOG_LEVEL") {
            self.logging.level = level.to_lowercase();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pricing.price_tolerance < Decimal::ZERO {
            return Err(ConfigError::Invalid(format!(
                "pricing.price_tolerance must not be negative, got {}",
                self.pricing.price_tolerance
            )));
        }

        if !(1..=MAX_PAGE_LIMIT).contains(&self.listing.default_limit) {
            return Err(ConfigError::Invalid(format!(
                "listing.default_limit must be between 1 and {}, got {}",
                MAX_PAGE_LIMIT, self.listing.default_limit
            )));
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid logging.level '{}'. Must be one of: {}",
                self.logging.level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        Ok(())
    }
}
