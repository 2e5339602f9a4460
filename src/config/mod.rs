//! Configuration management for the hedge desk.
//!
//! Loads settings from environment variables and config files.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::market::SymbolPrecision;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Named exchange accounts and their credentials
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    /// Venue connectivity
    #[serde(default)]
    pub binance: BinanceConfig,
    /// Per-symbol decimal precision overrides
    #[serde(default)]
    pub symbols: HashMap<String, SymbolPrecision>,
    /// Sizing and execution parameters
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Rotation grouping parameters
    #[serde(default)]
    pub rotation: RotationConfig,
    /// Position reconciliation tunables
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    /// Local storage
    #[serde(default)]
    pub storage: StorageConfig,
}

/// One account entry from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub name: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinanceConfig {
    /// Use testnet instead of production
    #[serde(default)]
    pub testnet: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Leverage applied to every participant before opening
    #[serde(default = "default_leverage")]
    pub default_leverage: u32,
    /// Fraction of the computed margin ceiling that may actually be used.
    /// The venue rejects orders placed too close to full margin use.
    #[serde(default = "default_margin_safety")]
    pub margin_safety: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    /// Stop grouping once the lowest account weight reaches this value
    #[serde(default = "default_target_weight")]
    pub target_weight: Decimal,
    /// ...and every account carries at least this much
    #[serde(default = "default_floor_weight")]
    pub floor_weight: Decimal,
    /// Drop an account from further rounds once it reaches this weight
    #[serde(default = "default_retire_weight")]
    pub retire_weight: Decimal,
    /// Hard iteration ceiling so grouping always terminates
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Venue-side rounding slack when matching opposing leg sizes
    #[serde(default = "default_size_tolerance")]
    pub size_tolerance: Decimal,
    /// Fills whose update timestamps lie within this window are treated as
    /// belonging to the same attempt. The venue provides no shared
    /// transaction id across accounts; this is a documented approximation,
    /// not a guarantee, and clock skew can misclassify either way.
    #[serde(default = "default_match_window_ms")]
    pub match_window_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path for drafts and account statistics
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

// Default value functions

fn default_leverage() -> u32 {
    10
}

fn default_margin_safety() -> Decimal {
    Decimal::new(9, 1) // 0.9
}

fn default_target_weight() -> Decimal {
    Decimal::new(8, 0)
}

fn default_floor_weight() -> Decimal {
    Decimal::new(6, 0)
}

fn default_retire_weight() -> Decimal {
    Decimal::new(15, 0)
}

fn default_max_rounds() -> u32 {
    100_000
}

fn default_size_tolerance() -> Decimal {
    Decimal::new(1, 3) // 0.001
}

fn default_match_window_ms() -> i64 {
    2_000
}

fn default_db_path() -> String {
    "data/hedge_desk.db".to_string()
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self { testnet: false }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_leverage: default_leverage(),
            margin_safety: default_margin_safety(),
        }
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            target_weight: default_target_weight(),
            floor_weight: default_floor_weight(),
            retire_weight: default_retire_weight(),
            max_rounds: default_max_rounds(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            size_tolerance: default_size_tolerance(),
            match_window_ms: default_match_window_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("HEDGE"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.execution.margin_safety > Decimal::ZERO
                && self.execution.margin_safety <= Decimal::ONE,
            "margin_safety must be between 0 and 1"
        );

        anyhow::ensure!(
            self.execution.default_leverage >= 1,
            "default_leverage must be >= 1"
        );

        anyhow::ensure!(
            self.reconcile.size_tolerance >= Decimal::ZERO,
            "size_tolerance must not be negative"
        );

        anyhow::ensure!(
            self.reconcile.match_window_ms > 0,
            "match_window_ms must be positive"
        );

        anyhow::ensure!(
            self.rotation.floor_weight <= self.rotation.target_weight,
            "floor_weight must not exceed target_weight"
        );

        let mut seen = std::collections::HashSet::new();
        for account in &self.accounts {
            anyhow::ensure!(
                seen.insert(account.name.as_str()),
                "duplicate account name: {}",
                account.name
            );
        }

        Ok(())
    }
}
