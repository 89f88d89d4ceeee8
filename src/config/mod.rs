//! Configuration management for the trading engine.
//!
//! Loads settings from environment variables (prefix `OAT`) and an optional
//! config file.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Cycle scheduling and evaluation parameters
    #[serde(default)]
    pub engine: EngineConfig,
    /// Paper account parameters
    #[serde(default)]
    pub account: AccountConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between scheduled cycles
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,
    /// Bound on concurrently evaluated rules per cycle
    #[serde(default = "default_max_concurrent_evaluations")]
    pub max_concurrent_evaluations: usize,
    /// Per-call timeout for market data fetches, in seconds
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Retries per fetch after the first failure (per cycle, per rule)
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,
    /// Trailing window for activity reporting, in hours
    #[serde(default = "default_activity_window_hours")]
    pub activity_window_hours: u64,
    /// Exit parameters applied to positions whose automation was deleted
    #[serde(default = "default_orphan_profit_target_pct")]
    pub orphan_profit_target_pct: Decimal,
    #[serde(default = "default_orphan_stop_loss_pct")]
    pub orphan_stop_loss_pct: Decimal,
    #[serde(default = "default_orphan_max_days_to_hold")]
    pub orphan_max_days_to_hold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Starting paper balance in USD
    #[serde(default = "default_initial_balance")]
    pub initial_balance: Decimal,
    /// SQLite database path for state snapshots
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Seconds between persisted snapshots while running
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,
}

// Default value functions
fn default_cycle_interval_secs() -> u64 {
    300
}

fn default_max_concurrent_evaluations() -> usize {
    4
}

fn default_fetch_timeout_secs() -> u64 {
    5
}

fn default_fetch_retries() -> u32 {
    1
}

fn default_activity_window_hours() -> u64 {
    24
}

fn default_orphan_profit_target_pct() -> Decimal {
    Decimal::new(50, 0) // +50%
}

fn default_orphan_stop_loss_pct() -> Decimal {
    Decimal::new(100, 0) // -100%
}

fn default_orphan_max_days_to_hold() -> u32 {
    30
}

fn default_initial_balance() -> Decimal {
    Decimal::new(10_000, 0)
}

fn default_db_path() -> String {
    "data/paper_state.db".to_string()
}

fn default_snapshot_interval_secs() -> u64 {
    600
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("OAT"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.engine.cycle_interval_secs > 0,
            "cycle_interval_secs must be positive"
        );

        anyhow::ensure!(
            self.engine.max_concurrent_evaluations > 0,
            "max_concurrent_evaluations must be positive"
        );

        anyhow::ensure!(
            self.engine.fetch_timeout_secs > 0,
            "fetch_timeout_secs must be positive"
        );

        anyhow::ensure!(
            self.engine.orphan_profit_target_pct > Decimal::ZERO,
            "orphan_profit_target_pct must be positive"
        );

        anyhow::ensure!(
            self.account.initial_balance >= Decimal::ZERO,
            "initial_balance must not be negative"
        );

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            account: AccountConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: default_cycle_interval_secs(),
            max_concurrent_evaluations: default_max_concurrent_evaluations(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            fetch_retries: default_fetch_retries(),
            activity_window_hours: default_activity_window_hours(),
            orphan_profit_target_pct: default_orphan_profit_target_pct(),
            orphan_stop_loss_pct: default_orphan_stop_loss_pct(),
            orphan_max_days_to_hold: default_orphan_max_days_to_hold(),
        }
    }
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            initial_balance: default_initial_balance(),
            db_path: default_db_path(),
            snapshot_interval_secs: default_snapshot_interval_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = Config::default();
        config.engine.cycle_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_balance_rejected() {
        let mut config = Config::default();
        config.account.initial_balance = Decimal::new(-1, 0);
        assert!(config.validate().is_err());
    }
}
