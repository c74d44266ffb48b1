//! Configuration loading and representation.
//!
//! Values come from the process environment:
//!
//! | variable | default |
//! |---|---|
//! | `STOCKLEDGER_DEFAULT_REORDER_LEVEL` | 5 |
//! | `STOCKLEDGER_DEFAULT_MAX_STOCK_LEVEL` | 100 |
//! | `STOCKLEDGER_UNIQUE_SKUS` | true |

use thiserror::Error;

use stockledger_inventory::{DEFAULT_MAX_STOCK_LEVEL, DEFAULT_REORDER_LEVEL, LedgerSettings};

pub const ENV_DEFAULT_REORDER_LEVEL: &str = "STOCKLEDGER_DEFAULT_REORDER_LEVEL";
pub const ENV_DEFAULT_MAX_STOCK_LEVEL: &str = "STOCKLEDGER_DEFAULT_MAX_STOCK_LEVEL";
pub const ENV_UNIQUE_SKUS: &str = "STOCKLEDGER_UNIQUE_SKUS";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a non-negative integer, got '{value}'")]
    InvalidInteger { var: &'static str, value: String },

    #[error("{var} must be a boolean (true/false/1/0), got '{value}'")]
    InvalidBool { var: &'static str, value: String },

    #[error("default max stock level ({max}) is below default reorder level ({reorder})")]
    InconsistentThresholds { reorder: i64, max: i64 },
}

/// Registry-wide settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub default_reorder_level: i64,
    pub default_max_stock_level: i64,
    /// Reject a second ledger carrying an SKU already in use (case-insensitive).
    pub unique_skus: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_reorder_level: DEFAULT_REORDER_LEVEL,
            default_max_stock_level: DEFAULT_MAX_STOCK_LEVEL,
            unique_skus: true,
        }
    }
}

impl RegistryConfig {
    /// Load from the process environment, falling back to defaults for unset variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let default_reorder_level = match lookup(ENV_DEFAULT_REORDER_LEVEL) {
            Some(raw) => parse_level(ENV_DEFAULT_REORDER_LEVEL, &raw)?,
            None => defaults.default_reorder_level,
        };
        let default_max_stock_level = match lookup(ENV_DEFAULT_MAX_STOCK_LEVEL) {
            Some(raw) => parse_level(ENV_DEFAULT_MAX_STOCK_LEVEL, &raw)?,
            None => defaults.default_max_stock_level,
        };
        let unique_skus = match lookup(ENV_UNIQUE_SKUS) {
            Some(raw) => parse_bool(ENV_UNIQUE_SKUS, &raw)?,
            None => defaults.unique_skus,
        };

        if default_max_stock_level < default_reorder_level {
            return Err(ConfigError::InconsistentThresholds {
                reorder: default_reorder_level,
                max: default_max_stock_level,
            });
        }

        Ok(Self {
            default_reorder_level,
            default_max_stock_level,
            unique_skus,
        })
    }

    /// Ledger settings carrying the configured default thresholds.
    pub fn default_settings(&self) -> LedgerSettings {
        LedgerSettings::with_thresholds(self.default_reorder_level, self.default_max_stock_level)
    }
}

fn parse_level(var: &'static str, raw: &str) -> Result<i64, ConfigError> {
    match raw.trim().parse::<i64>() {
        Ok(value) if value >= 0 => Ok(value),
        _ => Err(ConfigError::InvalidInteger {
            var,
            value: raw.to_string(),
        }),
    }
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            var,
            value: raw.to_string(),
        }),
    }
}
