//! Runtime configuration (§6): a single TOML file plus `ARB__`-prefixed
//! environment overrides, loaded once at startup into an immutable `Config`.
//!
//! Unlike the compile-time, Cargo-feature-driven configuration the original
//! trading engine this crate descends from used for its hot-path risk
//! limits, every value here is a genuine runtime knob: triangular
//! arbitrage paths, fee rates, and risk ratios are operator-tunable without
//! a rebuild, so there is no const-propagation case to make for baking them
//! into features.

pub mod types;

use std::path::Path as FsPath;
use std::time::Duration;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use tracing::warn;

use crate::core::errors::ConfigError;
use crate::core::types::Path as TradePath;
use crate::evaluator::EvaluatorConfig;
use crate::execution::ExecutorConfig;
use crate::risk::types::RiskLimits;
pub use types::{CredentialsConfig, RawConfig, RawPath, RiskSectionConfig, SystemConfig, TradingConfig};

#[derive(Debug, Clone)]
pub struct Config {
    raw: RawConfig,
    paths: Vec<TradePath>,
}

impl Config {
    pub fn load(path: impl AsRef<FsPath>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml_str(&text)
    }

    pub fn load_default() -> Result<Self> {
        Self::load("config/default.toml")
    }

    pub(crate) fn from_toml_str(text: &str) -> Result<Self> {
        let mut value: toml::Value = text.parse().context("parsing config TOML")?;
        apply_deprecated_aliases(&mut value);
        apply_env_overrides(&mut value);
        check_unknown_keys(&value)?;
        let raw: RawConfig = value.try_into().context("deserializing config")?;
        let paths = build_paths(&raw.trading.paths)?;
        let config = Self { raw, paths };
        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks beyond what serde defaults already cover.
    pub fn validate(&self) -> Result<()> {
        let t = &self.raw.trading;
        let r = &self.raw.risk;

        if t.fee_rate < Decimal::ZERO || t.fee_rate > Decimal::ONE {
            anyhow::bail!("trading.fee_rate must be within 0..=1, got {}", t.fee_rate);
        }
        if t.slippage_tolerance < Decimal::ZERO || t.slippage_tolerance > Decimal::new(2, 2) {
            anyhow::bail!(
                "trading.slippage_tolerance must be within 0..=0.02, got {}",
                t.slippage_tolerance
            );
        }
        if t.min_profit_threshold < Decimal::ZERO || t.min_profit_threshold > Decimal::new(5, 2) {
            anyhow::bail!(
                "trading.min_profit_threshold must be within 0..=0.05, got {}",
                t.min_profit_threshold
            );
        }
        if t.order_timeout_secs > 60 {
            anyhow::bail!("trading.order_timeout_secs must be within 0..=60, got {}", t.order_timeout_secs);
        }
        if t.min_trade_amount <= Decimal::ZERO {
            anyhow::bail!("trading.min_trade_amount must be positive");
        }
        if t.monitor_interval_secs == 0 {
            anyhow::bail!("trading.monitor_interval_secs must be positive");
        }
        if t.quote_asset.trim().is_empty() {
            anyhow::bail!("trading.quote_asset must not be empty");
        }

        if r.max_position_ratio < Decimal::ZERO || r.max_position_ratio > Decimal::ONE {
            anyhow::bail!("risk.max_position_ratio must be within 0..=1, got {}", r.max_position_ratio);
        }
        if r.max_single_trade_ratio < Decimal::ZERO || r.max_single_trade_ratio > Decimal::ONE {
            anyhow::bail!(
                "risk.max_single_trade_ratio must be within 0..=1, got {}",
                r.max_single_trade_ratio
            );
        }
        if r.min_arbitrage_interval_secs > 3600 {
            anyhow::bail!("risk.min_arbitrage_interval must be within 0..=3600, got {}", r.min_arbitrage_interval_secs);
        }
        if !(1..=10_000).contains(&r.max_daily_trades) {
            anyhow::bail!("risk.max_daily_trades must be within 1..=10000, got {}", r.max_daily_trades);
        }
        if r.max_daily_loss_ratio < Decimal::ZERO || r.max_daily_loss_ratio > Decimal::ONE {
            anyhow::bail!(
                "risk.max_daily_loss_ratio must be within 0..=1, got {}",
                r.max_daily_loss_ratio
            );
        }
        if r.stop_loss_ratio < Decimal::ZERO || r.stop_loss_ratio > Decimal::ONE {
            anyhow::bail!("risk.stop_loss_ratio must be within 0..=1, got {}", r.stop_loss_ratio);
        }
        if r.network_retry_count > 10 {
            anyhow::bail!("risk.network_retry_count must be within 0..=10, got {}", r.network_retry_count);
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.raw.system.log_level.as_str()) {
            anyhow::bail!(
                "invalid system.log_level '{}', must be one of {:?}",
                self.raw.system.log_level,
                valid_log_levels
            );
        }

        if let Some(creds) = &self.raw.credentials {
            if creds.flag != "0" && creds.flag != "1" {
                anyhow::bail!("credentials.flag must be '0' or '1', got '{}'", creds.flag);
            }
        }

        if self.paths.is_empty() {
            anyhow::bail!("no 'path*' keys configured; need at least one arbitrage path");
        }

        Ok(())
    }

    pub fn paths(&self) -> &[TradePath] {
        &self.paths
    }

    pub fn system(&self) -> &SystemConfig {
        &self.raw.system
    }

    pub fn credentials(&self) -> Option<&CredentialsConfig> {
        self.raw.credentials.as_ref()
    }

    pub fn initial_balances(&self) -> &std::collections::HashMap<String, Decimal> {
        &self.raw.trading.initial_balances
    }

    pub fn quote_asset(&self) -> &str {
        &self.raw.trading.quote_asset
    }

    pub fn evaluator_config(&self) -> EvaluatorConfig {
        let t = &self.raw.trading;
        EvaluatorConfig {
            default_fee_rate: t.fee_rate,
            fee_overrides: t.fee_rate_overrides.clone(),
            freshness_budget: Duration::from_secs(t.monitor_interval_secs.max(1)),
            min_profit_threshold: t.min_profit_threshold,
            min_trade_amount: t.min_trade_amount,
            max_profit_rate_threshold: t.max_profit_rate_threshold,
        }
    }

    pub fn risk_limits(&self) -> RiskLimits {
        let t = &self.raw.trading;
        let r = &self.raw.risk;
        RiskLimits {
            max_position_ratio: r.max_position_ratio,
            max_single_trade_ratio: r.max_single_trade_ratio,
            min_arbitrage_interval: Duration::from_secs(r.min_arbitrage_interval_secs),
            max_daily_trades: r.max_daily_trades,
            max_daily_loss_ratio: r.max_daily_loss_ratio,
            stop_loss_ratio: r.stop_loss_ratio,
            min_trade_amount: t.min_trade_amount,
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        let t = &self.raw.trading;
        ExecutorConfig {
            slippage_tolerance: t.slippage_tolerance,
            order_timeout: Duration::from_secs(t.order_timeout_secs),
            poll_interval: Duration::from_millis(150),
            dust_threshold: t.min_trade_amount * Decimal::new(1, 2),
            steps: std::collections::HashMap::new(),
        }
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.raw.trading.monitor_interval_secs.max(1))
    }

    pub fn network_retry(&self) -> (u32, Duration) {
        (
            self.raw.risk.network_retry_count,
            Duration::from_secs(self.raw.risk.network_retry_delay_secs),
        )
    }

    pub fn rest_base_url(&self) -> &str {
        &self.raw.system.rest_base_url
    }

    pub fn ws_url(&self) -> &str {
        &self.raw.system.ws_url
    }
}

fn build_paths(raw_paths: &std::collections::HashMap<String, RawPath>) -> Result<Vec<TradePath>> {
    let mut keys: Vec<&String> = raw_paths.keys().collect();
    keys.sort();
    keys.into_iter()
        .map(|key| {
            let raw = &raw_paths[key];
            let steps = raw
                .to_steps()
                .map_err(|e| anyhow::anyhow!("config path '{key}' ({}): {e}", raw.route))?;
            TradePath::new(key.clone(), steps)
                .map_err(|e| anyhow::anyhow!("config path '{key}' ({}): {e}", raw.route))
        })
        .collect()
}

/// `trading.price_adjustment` (legacy) aliases `trading.slippage_tolerance`.
fn apply_deprecated_aliases(value: &mut toml::Value) {
    let Some(table) = value.get_mut("trading").and_then(|v| v.as_table_mut()) else {
        return;
    };
    if let Some(legacy) = table.remove("price_adjustment") {
        if table.contains_key("slippage_tolerance") {
            warn!("config carries both deprecated 'trading.price_adjustment' and 'trading.slippage_tolerance'; ignoring the deprecated key");
        } else {
            warn!("config key 'trading.price_adjustment' is deprecated, use 'trading.slippage_tolerance' instead");
            table.insert("slippage_tolerance".to_string(), legacy);
        }
    }
}

const TOP_LEVEL_KEYS: &[&str] = &["trading", "risk", "system", "credentials"];

const TRADING_KEYS: &[&str] = &[
    "initial_balances",
    "fee_rate",
    "fee_rate_overrides",
    "slippage_tolerance",
    "min_profit_threshold",
    "order_timeout_secs",
    "min_trade_amount",
    "quote_asset",
    "monitor_interval_secs",
    "max_profit_rate_threshold",
    "max_price_spread",
    "max_stablecoin_spread",
    "stablecoin_price_range_min",
    "stablecoin_price_range_max",
    "paths",
];

const RISK_KEYS: &[&str] = &[
    "max_position_ratio",
    "max_single_trade_ratio",
    "min_arbitrage_interval_secs",
    "max_daily_trades",
    "max_daily_loss_ratio",
    "stop_loss_ratio",
    "network_retry_count",
    "network_retry_delay_secs",
];

const SYSTEM_KEYS: &[&str] = &["log_level", "log_path", "json_logs", "metrics_addr", "journal_path", "rest_base_url", "ws_url"];

const CREDENTIALS_KEYS: &[&str] = &["api_key", "secret_key", "passphrase", "flag"];

const PATH_KEYS: &[&str] = &["route", "steps"];

/// Fail-fast unknown-key scan (§6): a typo like `feee_rate` must surface as
/// a `ConfigError`, not silently fall back to that field's default. Walks
/// the already-alias-resolved, already-env-overridden TOML tree against
/// each section's known key set before `try_into` ever runs.
fn check_unknown_keys(value: &toml::Value) -> Result<(), ConfigError> {
    let Some(table) = value.as_table() else {
        return Ok(());
    };
    for key in table.keys() {
        if !TOP_LEVEL_KEYS.contains(&key.as_str()) {
            return Err(ConfigError::UnknownKey(key.clone()));
        }
    }

    if let Some(trading) = table.get("trading").and_then(|v| v.as_table()) {
        check_section(trading, TRADING_KEYS, "trading")?;
        if let Some(paths) = trading.get("paths").and_then(|v| v.as_table()) {
            for (name, raw_path) in paths {
                if let Some(path_table) = raw_path.as_table() {
                    check_section(path_table, PATH_KEYS, &format!("trading.paths.{name}"))?;
                }
            }
        }
    }
    if let Some(risk) = table.get("risk").and_then(|v| v.as_table()) {
        check_section(risk, RISK_KEYS, "risk")?;
    }
    if let Some(system) = table.get("system").and_then(|v| v.as_table()) {
        check_section(system, SYSTEM_KEYS, "system")?;
    }
    if let Some(credentials) = table.get("credentials").and_then(|v| v.as_table()) {
        check_section(credentials, CREDENTIALS_KEYS, "credentials")?;
    }
    Ok(())
}

fn check_section(table: &toml::value::Table, known: &[&str], section: &str) -> Result<(), ConfigError> {
    for key in table.keys() {
        if !known.contains(&key.as_str()) {
            return Err(ConfigError::UnknownKey(format!("{section}.{key}")));
        }
    }
    Ok(())
}

/// Applies `ARB__SECTION__KEY=value` environment overrides on top of the
/// parsed TOML tree, mirroring the `Environment::with_prefix(...).
/// separator("__")` convention without pulling in the `config` crate for a
/// single-file, single-process tool.
fn apply_env_overrides(value: &mut toml::Value) {
    for (key, raw) in std::env::vars() {
        let Some(rest) = key.strip_prefix("ARB__") else {
            continue;
        };
        let path: Vec<String> = rest.to_lowercase().split("__").map(String::from).collect();
        set_nested(value, &path, &raw);
    }
}

fn set_nested(value: &mut toml::Value, path: &[String], raw: &str) {
    if path.is_empty() {
        return;
    }
    if !value.is_table() {
        *value = toml::Value::Table(Default::default());
    }
    let table = value.as_table_mut().expect("just ensured table");
    if path.len() == 1 {
        table.insert(path[0].clone(), parse_scalar(raw));
    } else {
        let entry = table
            .entry(path[0].clone())
            .or_insert_with(|| toml::Value::Table(Default::default()));
        set_nested(entry, &path[1..], raw);
    }
}

fn parse_scalar(raw: &str) -> toml::Value {
    if let Ok(b) = raw.parse::<bool>() {
        return toml::Value::Boolean(b);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return toml::Value::Integer(i);
    }
    toml::Value::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_toml() -> String {
        r#"
            [trading]
            fee_rate = "0.001"
            slippage_tolerance = "0.002"
            min_profit_threshold = "0.003"
            min_trade_amount = "10"

            [trading.paths.path1]
            route = "USDT->BTC->USDC->USDT"
            steps = [
                { pair = "BTC-USDT", action = "buy" },
                { pair = "BTC-USDC", action = "sell" },
                { pair = "USDC-USDT", action = "sell" },
            ]
        "#
        .to_string()
    }

    #[test]
    fn loads_minimal_config_with_defaults() {
        let config = Config::from_toml_str(&sample_toml()).unwrap();
        assert_eq!(config.paths().len(), 1);
        assert_eq!(config.paths()[0].name, "path1");
        assert_eq!(config.risk_limits().max_position_ratio, Decimal::new(2, 1));
    }

    #[test]
    fn deprecated_price_adjustment_aliases_slippage_tolerance() {
        let toml = sample_toml().replace("slippage_tolerance = \"0.002\"", "price_adjustment = \"0.004\"");
        let config = Config::from_toml_str(&toml).unwrap();
        assert_eq!(config.evaluator_config().min_profit_threshold, Decimal::new(3, 3));
        assert_eq!(config.executor_config().slippage_tolerance, Decimal::new(4, 3));
    }

    #[test]
    fn rejects_config_with_no_paths() {
        let toml = r#"
            [trading]
            fee_rate = "0.001"
            min_trade_amount = "10"
        "#;
        assert!(Config::from_toml_str(toml).is_err());
    }

    #[test]
    fn rejects_out_of_range_ratio() {
        let toml = sample_toml().replace(
            "[trading]",
            "[risk]\nmax_position_ratio = \"1.5\"\n\n[trading]",
        );
        assert!(Config::from_toml_str(&toml).is_err());
    }
}
