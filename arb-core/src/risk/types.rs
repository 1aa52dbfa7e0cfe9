//! Risk gate value types: the decision returned from every validation call,
//! the tunable limits that drive it, and the risk level derived from recent
//! results.

use rust_decimal::Decimal;

use crate::core::errors::RiskRejected;

/// Derived from how close the day's realized loss is to the stop-loss
/// boundary. Purely informational except at `Critical`, which always
/// accompanies a kill-switch trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Tunable risk limits; immutable once the gate is constructed.
#[derive(Debug, Clone)]
pub struct RiskLimits {
    pub max_position_ratio: Decimal,
    pub max_single_trade_ratio: Decimal,
    pub min_arbitrage_interval: std::time::Duration,
    pub max_daily_trades: u32,
    pub max_daily_loss_ratio: Decimal,
    pub stop_loss_ratio: Decimal,
    pub min_trade_amount: Decimal,
}

/// Outcome of a single `validate` call. `reason` is set whenever `passed`
/// is `false`, carrying the short machine-readable tokens the operator
/// surface and tests key off of (`"frequency"`, `"stop_loss"`, ...) inside
/// the same `RiskRejected` the error taxonomy uses elsewhere.
#[derive(Debug, Clone)]
pub struct RiskDecision {
    pub passed: bool,
    pub reason: Option<RiskRejected>,
    pub level: RiskLevel,
    pub suggested_stake: Decimal,
    pub warnings: Vec<String>,
}

impl RiskDecision {
    pub fn reject(reason: impl Into<String>, level: RiskLevel) -> Self {
        Self {
            passed: false,
            reason: Some(RiskRejected { reason: reason.into() }),
            level,
            suggested_stake: Decimal::ZERO,
            warnings: Vec::new(),
        }
    }

    pub fn accept(stake: Decimal, level: RiskLevel) -> Self {
        Self {
            passed: true,
            reason: None,
            level,
            suggested_stake: stake,
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// The rejection token, if any, as a bare string (`"frequency"`, ...).
    pub fn reason_str(&self) -> Option<&str> {
        self.reason.as_ref().map(|r| r.reason.as_str())
    }
}
