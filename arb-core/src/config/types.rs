//! Raw, serde-facing configuration shape. This is deliberately permissive
//! (most fields optional with spec-mandated defaults) so `Config::load` can
//! apply the deprecated-key mapping and cross-field validation in one place
//! before anything downstream ever sees it.

use std::collections::HashMap;
use std::path::PathBuf;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::types::{Pair, PathStep, Side};

/// Top-level configuration, one section per spec §6 group.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RawConfig {
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub risk: RiskSectionConfig,
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub credentials: Option<CredentialsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// `initial_<asset>` balances, keyed by asset symbol (without prefix).
    #[serde(default)]
    pub initial_balances: HashMap<String, Decimal>,

    #[serde(default = "default_fee_rate")]
    pub fee_rate: Decimal,

    /// `fee_rate_<pair>` overrides, keyed by canonical pair id.
    #[serde(default)]
    pub fee_rate_overrides: HashMap<String, Decimal>,

    #[serde(default = "default_slippage_tolerance")]
    pub slippage_tolerance: Decimal,

    #[serde(default = "default_min_profit_threshold")]
    pub min_profit_threshold: Decimal,

    #[serde(default = "default_order_timeout_secs")]
    pub order_timeout_secs: u64,

    pub min_trade_amount: Decimal,

    /// Asset every balance is valued in for risk-ratio checks, e.g. `USDT`.
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,

    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,

    #[serde(default)]
    pub max_profit_rate_threshold: Option<Decimal>,

    #[serde(default)]
    pub max_price_spread: Option<Decimal>,

    #[serde(default)]
    pub max_stablecoin_spread: Option<Decimal>,

    #[serde(default)]
    pub stablecoin_price_range_min: Option<Decimal>,

    #[serde(default)]
    pub stablecoin_price_range_max: Option<Decimal>,

    /// One entry per configured path. Keyed by the `path*` key that
    /// supplied it (e.g. `path1`), order is not significant.
    #[serde(default)]
    pub paths: HashMap<String, RawPath>,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            initial_balances: HashMap::new(),
            fee_rate: default_fee_rate(),
            fee_rate_overrides: HashMap::new(),
            slippage_tolerance: default_slippage_tolerance(),
            min_profit_threshold: default_min_profit_threshold(),
            order_timeout_secs: default_order_timeout_secs(),
            min_trade_amount: Decimal::ZERO,
            quote_asset: default_quote_asset(),
            monitor_interval_secs: default_monitor_interval_secs(),
            max_profit_rate_threshold: None,
            max_price_spread: None,
            max_stablecoin_spread: None,
            stablecoin_price_range_min: None,
            stablecoin_price_range_max: None,
            paths: HashMap::new(),
        }
    }
}

/// The JSON-encoded value carried by each `path*` config key: `{route:
/// "A->B->C->A", steps: [{pair, action}, ...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPath {
    pub route: String,
    pub steps: Vec<RawPathStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPathStep {
    pub pair: String,
    pub action: String,
}

impl RawPath {
    pub fn to_steps(&self) -> Result<Vec<PathStep>, String> {
        self.steps
            .iter()
            .map(|s| {
                let pair = Pair::from_id(&s.pair).map_err(|e| e.to_string())?;
                let action = match s.action.to_lowercase().as_str() {
                    "buy" => Side::Buy,
                    "sell" => Side::Sell,
                    other => return Err(format!("unknown side '{other}' in path step")),
                };
                Ok(PathStep::new(pair, action))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSectionConfig {
    #[serde(default = "default_max_position_ratio")]
    pub max_position_ratio: Decimal,

    #[serde(default = "default_max_single_trade_ratio")]
    pub max_single_trade_ratio: Decimal,

    #[serde(default = "default_min_arbitrage_interval_secs")]
    pub min_arbitrage_interval_secs: u64,

    #[serde(default = "default_max_daily_trades")]
    pub max_daily_trades: u32,

    #[serde(default = "default_max_daily_loss_ratio")]
    pub max_daily_loss_ratio: Decimal,

    #[serde(default = "default_stop_loss_ratio")]
    pub stop_loss_ratio: Decimal,

    #[serde(default = "default_network_retry_count")]
    pub network_retry_count: u32,

    #[serde(default = "default_network_retry_delay_secs")]
    pub network_retry_delay_secs: u64,
}

impl Default for RiskSectionConfig {
    fn default() -> Self {
        Self {
            max_position_ratio: default_max_position_ratio(),
            max_single_trade_ratio: default_max_single_trade_ratio(),
            min_arbitrage_interval_secs: default_min_arbitrage_interval_secs(),
            max_daily_trades: default_max_daily_trades(),
            max_daily_loss_ratio: default_max_daily_loss_ratio(),
            stop_loss_ratio: default_stop_loss_ratio(),
            network_retry_count: default_network_retry_count(),
            network_retry_delay_secs: default_network_retry_delay_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_path: Option<PathBuf>,

    #[serde(default = "default_json_logs")]
    pub json_logs: bool,

    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,

    #[serde(default = "default_journal_path")]
    pub journal_path: PathBuf,

    /// REST base URL of the exchange gateway's collaborator implementation.
    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,

    /// WebSocket URL of the exchange gateway's order-book feed.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_path: None,
            json_logs: default_json_logs(),
            metrics_addr: default_metrics_addr(),
            journal_path: default_journal_path(),
            rest_base_url: default_rest_base_url(),
            ws_url: default_ws_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    pub api_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub passphrase: Option<String>,
    /// `"1"` denotes sandbox, `"0"` (or absent) denotes production.
    #[serde(default = "default_sandbox_flag")]
    pub flag: String,
}

impl CredentialsConfig {
    pub fn is_sandbox(&self) -> bool {
        self.flag == "1"
    }
}

fn default_fee_rate() -> Decimal {
    Decimal::new(1, 3) // 0.001
}

fn default_slippage_tolerance() -> Decimal {
    Decimal::new(2, 3) // 0.002
}

fn default_min_profit_threshold() -> Decimal {
    Decimal::new(3, 3) // 0.003
}

fn default_order_timeout_secs() -> u64 {
    3
}

fn default_monitor_interval_secs() -> u64 {
    1
}

fn default_max_position_ratio() -> Decimal {
    Decimal::new(2, 1) // 0.2
}

fn default_max_single_trade_ratio() -> Decimal {
    Decimal::new(1, 1) // 0.1
}

fn default_min_arbitrage_interval_secs() -> u64 {
    10
}

fn default_max_daily_trades() -> u32 {
    100
}

fn default_max_daily_loss_ratio() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_stop_loss_ratio() -> Decimal {
    Decimal::new(1, 1) // 0.1
}

fn default_network_retry_count() -> u32 {
    3
}

fn default_network_retry_delay_secs() -> u64 {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_json_logs() -> bool {
    false
}

fn default_metrics_addr() -> String {
    "127.0.0.1:9090".to_string()
}

fn default_journal_path() -> PathBuf {
    PathBuf::from("./data/trades.jsonl")
}

fn default_sandbox_flag() -> String {
    "0".to_string()
}

fn default_quote_asset() -> String {
    "USDT".to_string()
}

fn default_rest_base_url() -> String {
    "https://api.exchange.invalid".to_string()
}

fn default_ws_url() -> String {
    "wss://ws.exchange.invalid".to_string()
}
