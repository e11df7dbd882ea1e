//! Central configuration for the paper-trading session.
//!
//! Loads from `config.toml` at the project root.
//! All session parameters are runtime-configurable — no recompilation
//! needed. Numeric fields are plain TOML numbers and are converted to
//! `Decimal` at engine construction.

use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

use crate::risk::RiskLimits;

/// Session-level engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Starting cash balance
    #[serde(default = "default_initial_cash")]
    pub initial_cash: f64,
    /// Commission per fill as a fraction of notional (e.g. 0.001 = 10bps)
    #[serde(default)]
    pub commission_rate: f64,
}

fn default_initial_cash() -> f64 {
    100_000.0
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_cash: 100_000.0,
            commission_rate: 0.0,
        }
    }
}

/// Risk limit knobs as they appear in the TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_max_position_size")]
    pub max_position_size: f64,
    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss: f64,
    #[serde(default = "default_max_drawdown")]
    pub max_drawdown: f64,
    #[serde(default = "default_max_leverage")]
    pub max_leverage: f64,
    #[serde(default = "default_max_concentration")]
    pub max_concentration: f64,
    #[serde(default = "default_position_equity_fraction")]
    pub position_equity_fraction: f64,
    #[serde(default)]
    pub allow_short_selling: bool,
    #[serde(default)]
    pub allow_options: bool,
    #[serde(default)]
    pub allow_futures: bool,
}

fn default_max_position_size() -> f64 {
    100_000.0
}
fn default_max_daily_loss() -> f64 {
    5_000.0
}
fn default_max_drawdown() -> f64 {
    0.10
}
fn default_max_leverage() -> f64 {
    2.0
}
fn default_max_concentration() -> f64 {
    0.25
}
fn default_position_equity_fraction() -> f64 {
    0.25
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_size: default_max_position_size(),
            max_daily_loss: default_max_daily_loss(),
            max_drawdown: default_max_drawdown(),
            max_leverage: default_max_leverage(),
            max_concentration: default_max_concentration(),
            position_equity_fraction: default_position_equity_fraction(),
            allow_short_selling: false,
            allow_options: false,
            allow_futures: false,
        }
    }
}

impl RiskConfig {
    pub fn to_limits(&self) -> RiskLimits {
        let dec = |v: f64| Decimal::try_from(v).unwrap_or(Decimal::ZERO);
        RiskLimits {
            max_position_size: dec(self.max_position_size),
            max_daily_loss: dec(self.max_daily_loss),
            max_drawdown: dec(self.max_drawdown),
            max_leverage: dec(self.max_leverage),
            max_concentration: dec(self.max_concentration),
            position_equity_fraction: dec(self.position_equity_fraction),
            allow_short_selling: self.allow_short_selling,
            allow_options: self.allow_options,
            allow_futures: self.allow_futures,
        }
    }
}

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub risk: RiskConfig,
}

impl AppConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from the default location (project root config.toml).
    pub fn load_default() -> Self {
        let candidates = [
            "config.toml",
            concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml"),
        ];

        for path in &candidates {
            if let Ok(cfg) = Self::load(Path::new(path)) {
                tracing::info!("Loaded config from {}", path);
                return cfg;
            }
        }

        tracing::warn!("No config.toml found, using defaults");
        Self::default()
    }

    pub fn initial_cash(&self) -> Decimal {
        Decimal::try_from(self.session.initial_cash).unwrap_or(Decimal::ZERO)
    }

    pub fn commission_rate(&self) -> Decimal {
        Decimal::try_from(self.session.commission_rate).unwrap_or(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_toml_with_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [session]
            initial_cash = 50000.0

            [risk]
            max_daily_loss = 1000.0
            allow_short_selling = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.session.initial_cash, 50_000.0);
        assert_eq!(cfg.session.commission_rate, 0.0);
        assert_eq!(cfg.risk.max_daily_loss, 1_000.0);
        assert!(cfg.risk.allow_short_selling);
        assert_eq!(cfg.risk.max_leverage, 2.0);
    }

    #[test]
    fn limits_conversion_is_decimal() {
        let cfg = AppConfig::default();
        let limits = cfg.risk.to_limits();
        assert_eq!(limits.max_position_size, Decimal::from(100_000));
        assert_eq!(limits.max_drawdown, "0.1".parse().unwrap());
    }
}
