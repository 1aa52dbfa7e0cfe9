//! Risk gate (§4.4): accepts, rejects, and sizes every opportunity the
//! evaluator produces. Owns the day-boundary rolling counters and the
//! kill-switch; mutated only from the controller task, so no locking is
//! needed as long as that single-writer discipline holds.

pub mod types;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::core::types::{Path, Side};
use crate::evaluator::Opportunity;
use crate::orderbook::OrderBookCache;
use crate::portfolio::Portfolio;
pub use types::{RiskDecision, RiskLevel, RiskLimits};

fn utc_day_index(now: std::time::SystemTime) -> i64 {
    now.duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
        / 86_400
}

pub struct RiskGate {
    limits: RiskLimits,
    /// The asset every balance is valued in for ratio checks (e.g. USDT).
    quote_asset: String,
    trading_enabled: bool,
    day_index: i64,
    trades_today: u32,
    realized_pnl_today: Decimal,
    last_attempt: Option<Instant>,
    kill_switch_tripped: bool,
}

impl RiskGate {
    pub fn new(limits: RiskLimits, quote_asset: impl Into<String>, trading_enabled: bool) -> Self {
        Self {
            limits,
            quote_asset: quote_asset.into(),
            trading_enabled,
            day_index: utc_day_index(std::time::SystemTime::now()),
            trades_today: 0,
            realized_pnl_today: Decimal::ZERO,
            last_attempt: None,
            kill_switch_tripped: false,
        }
    }

    fn roll_day_if_needed(&mut self) {
        let today = utc_day_index(std::time::SystemTime::now());
        if today != self.day_index {
            info!(
                previous_trades = self.trades_today,
                previous_pnl = %self.realized_pnl_today,
                "risk gate day rollover, counters reset"
            );
            self.day_index = today;
            self.trades_today = 0;
            self.realized_pnl_today = Decimal::ZERO;
            self.kill_switch_tripped = false;
        }
    }

    fn current_level(&self, total_balance: Decimal) -> RiskLevel {
        if total_balance <= Decimal::ZERO {
            return RiskLevel::Low;
        }
        let loss_ratio = self.realized_pnl_today.min(Decimal::ZERO).abs() / total_balance;
        if loss_ratio >= self.limits.stop_loss_ratio {
            RiskLevel::Critical
        } else if loss_ratio >= self.limits.max_daily_loss_ratio {
            RiskLevel::High
        } else if loss_ratio > Decimal::new(1, 2) {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    /// Checks 1-8 of §4.4, in order; first failure wins.
    pub fn validate(
        &mut self,
        opportunity: &Opportunity,
        path: &Path,
        portfolio: Option<&Portfolio>,
        cache: &OrderBookCache,
        max_age: Duration,
        requested_stake: Option<Decimal>,
    ) -> RiskDecision {
        self.roll_day_if_needed();

        if self.kill_switch_tripped {
            return RiskDecision::reject("stop_loss", RiskLevel::Critical);
        }

        if !self.trading_enabled || portfolio.is_none() {
            return RiskDecision::reject("trading_disabled_or_public_only", RiskLevel::Low);
        }
        let portfolio = portfolio.expect("checked above");

        if opportunity.is_expired(max_age) {
            return RiskDecision::reject("expired", RiskLevel::Low);
        }

        if let Some(last) = self.last_attempt {
            if last.elapsed() < self.limits.min_arbitrage_interval {
                return RiskDecision::reject("frequency", RiskLevel::Low);
            }
        }

        if self.trades_today >= self.limits.max_daily_trades {
            return RiskDecision::reject("max_daily_trades", RiskLevel::Medium);
        }

        let total_balance = total_balance_in_quote(portfolio, cache, &self.quote_asset);
        let level = self.current_level(total_balance);

        if total_balance > Decimal::ZERO {
            let loss_ratio = self.realized_pnl_today.min(Decimal::ZERO).abs() / total_balance;
            if loss_ratio >= self.limits.stop_loss_ratio {
                warn!(%loss_ratio, "stop-loss ratio breached, tripping kill switch");
                self.kill_switch_tripped = true;
                return RiskDecision::reject("stop_loss", RiskLevel::Critical);
            }
            if loss_ratio >= self.limits.max_daily_loss_ratio {
                return RiskDecision::reject("max_daily_loss_ratio", RiskLevel::High);
            }
        }

        let stake = match requested_stake {
            Some(stake) => stake,
            None => match self.size_inner(opportunity, path, portfolio, total_balance) {
                Ok(stake) => stake,
                Err(decision) => return decision,
            },
        };

        if stake > self.limits.max_single_trade_ratio * total_balance {
            return RiskDecision::reject("max_single_trade_ratio", level);
        }

        for (asset, exposure) in projected_exposures(path, stake, cache) {
            // The quote asset itself is cash, not a position; a path always
            // returns to it and concentration risk doesn't apply to it.
            if asset == self.quote_asset {
                continue;
            }
            let projected_native = portfolio.free(&asset) + exposure;
            let projected_quote = asset_value_in_quote(&asset, projected_native, &self.quote_asset, cache);
            if total_balance > Decimal::ZERO && projected_quote > self.limits.max_position_ratio * total_balance {
                return RiskDecision::reject("max_position_ratio", level);
            }
        }

        if stake > opportunity.max_stake {
            return RiskDecision::reject("depth_limit", level);
        }

        let start_asset = path.start_asset();
        if portfolio.free(start_asset) < stake {
            return RiskDecision::reject("insufficient_balance", level);
        }

        RiskDecision::accept(stake, level)
    }

    /// Sizing policy used when `validate` is called without a pre-computed
    /// stake: `min(max_stake, max_single_trade_ratio * total_balance,
    /// free_balance_in_start_asset)`, floored at `min_trade_amount`.
    pub fn size(&self, opportunity: &Opportunity, path: &Path, portfolio: &Portfolio, cache: &OrderBookCache) -> Result<Decimal, RiskDecision> {
        let total_balance = total_balance_in_quote(portfolio, cache, &self.quote_asset);
        self.size_inner(opportunity, path, portfolio, total_balance)
    }

    fn size_inner(
        &self,
        opportunity: &Opportunity,
        path: &Path,
        portfolio: &Portfolio,
        total_balance: Decimal,
    ) -> Result<Decimal, RiskDecision> {
        let free = portfolio.free(path.start_asset());
        let stake = opportunity
            .max_stake
            .min(self.limits.max_single_trade_ratio * total_balance)
            .min(free);
        if stake < self.limits.min_trade_amount {
            return Err(RiskDecision::reject("below_min_trade_amount", RiskLevel::Low));
        }
        Ok(stake)
    }

    /// Records the outcome of an executed (or attempted) opportunity:
    /// increments the trade counter and integrates realized P&L. Counters
    /// reset at the next day boundary.
    pub fn record(&mut self, realized_pnl: Decimal) {
        self.roll_day_if_needed();
        self.trades_today += 1;
        self.realized_pnl_today += realized_pnl;
        self.last_attempt = Some(Instant::now());
    }

    pub fn trades_today(&self) -> u32 {
        self.trades_today
    }

    pub fn realized_pnl_today(&self) -> Decimal {
        self.realized_pnl_today
    }

    pub fn is_halted(&self) -> bool {
        self.kill_switch_tripped
    }
}

/// Best-effort per-asset exposure a path would create for `stake`, using
/// current mid-prices rather than a full depth walk. Good enough for a
/// sizing guard, not precise enough for profit computation (that's the
/// evaluator's job).
fn projected_exposures(path: &Path, stake: Decimal, cache: &OrderBookCache) -> HashMap<String, Decimal> {
    let mut exposures = HashMap::new();
    let mut remaining = stake;
    for step in &path.steps {
        let Some(book) = cache.fetch_or_stale_fallback(&step.pair.id()) else {
            continue;
        };
        let (Some((bid, _)), Some((ask, _))) = (book.best_bid(), book.best_ask()) else {
            continue;
        };
        let mid = (bid + ask) / Decimal::from(2);
        if mid <= Decimal::ZERO {
            continue;
        }
        remaining = match step.action {
            Side::Buy => remaining / mid,
            Side::Sell => remaining * mid,
        };
        *exposures.entry(step.output_asset().to_string()).or_insert(Decimal::ZERO) += remaining;
    }
    exposures
}

/// Conversion of every balance into `quote`, treating any asset with no
/// discoverable mid-price as a zero contribution (conservative, per §4.4).
pub fn total_balance_in_quote(portfolio: &Portfolio, cache: &OrderBookCache, quote: &str) -> Decimal {
    portfolio
        .balances
        .iter()
        .map(|(asset, balance)| asset_value_in_quote(asset, *balance, quote, cache))
        .sum()
}

/// Values `amount` of `asset` in `quote` terms off the cached mid-price,
/// treating a missing or stale book as a zero contribution. Shared by
/// `total_balance_in_quote` and the position-ratio check in `validate`, so
/// both compare quote-denominated figures against quote-denominated limits.
fn asset_value_in_quote(asset: &str, amount: Decimal, quote: &str, cache: &OrderBookCache) -> Decimal {
    if asset == quote {
        return amount;
    }
    let Ok(pair) = crate::core::types::Pair::new(asset.to_string(), quote.to_string()) else {
        return Decimal::ZERO;
    };
    let Some(book) = cache.fetch_or_stale_fallback(&pair.id()) else {
        return Decimal::ZERO;
    };
    let (Some((bid, _)), Some((ask, _))) = (book.best_bid(), book.best_ask()) else {
        return Decimal::ZERO;
    };
    let mid = (bid + ask) / Decimal::from(2);
    if pair.base == *asset {
        amount * mid
    } else if mid.is_zero() {
        Decimal::ZERO
    } else {
        amount / mid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Pair, PathStep};
    use crate::orderbook::Update;
    use rust_decimal_macros::dec;
    use std::time::Instant as StdInstant;

    fn limits() -> RiskLimits {
        RiskLimits {
            max_position_ratio: dec!(0.2),
            max_single_trade_ratio: dec!(0.1),
            min_arbitrage_interval: Duration::from_secs(10),
            max_daily_trades: 100,
            max_daily_loss_ratio: dec!(0.05),
            stop_loss_ratio: dec!(0.1),
            min_trade_amount: dec!(1),
        }
    }

    fn opp(max_stake: Decimal) -> Opportunity {
        Opportunity {
            path_name: "test".into(),
            profit_rate: dec!(0.005),
            max_stake,
            evaluated_at: StdInstant::now(),
        }
    }

    fn triangle() -> Path {
        Path::new(
            "usdt_btc_usdc",
            vec![
                PathStep::new(Pair::new("BTC", "USDT").unwrap(), Side::Buy),
                PathStep::new(Pair::new("BTC", "USDC").unwrap(), Side::Sell),
                PathStep::new(Pair::new("USDC", "USDT").unwrap(), Side::Sell),
            ],
        )
        .unwrap()
    }

    fn portfolio(usdt: Decimal) -> Portfolio {
        let mut balances = HashMap::new();
        balances.insert("USDT".to_string(), usdt);
        Portfolio { balances }
    }

    fn seeded_cache() -> OrderBookCache {
        let cache = OrderBookCache::new();
        cache.on_incremental_update(
            "BTC-USDT",
            Update::Snapshot {
                bids: vec![(dec!(60000), dec!(1))],
                asks: vec![(dec!(60010), dec!(1))],
            },
        );
        cache.on_incremental_update(
            "BTC-USDC",
            Update::Snapshot {
                bids: vec![(dec!(60000), dec!(1))],
                asks: vec![(dec!(60010), dec!(1))],
            },
        );
        cache.on_incremental_update(
            "USDC-USDT",
            Update::Snapshot {
                bids: vec![(dec!(0.999), dec!(1_000_000))],
                asks: vec![(dec!(1.001), dec!(1_000_000))],
            },
        );
        cache
    }

    #[test]
    fn public_only_mode_is_hard_reject() {
        let mut gate = RiskGate::new(limits(), "USDT", true);
        let cache = seeded_cache();
        let decision = gate.validate(&opp(dec!(1000)), &triangle(), None, &cache, Duration::from_secs(5), Some(dec!(100)));
        assert!(!decision.passed);
        assert_eq!(decision.reason_str(), Some("trading_disabled_or_public_only"));
    }

    #[test]
    fn frequency_throttle_rejects_second_attempt() {
        let mut gate = RiskGate::new(limits(), "USDT", true);
        let cache = seeded_cache();
        let p = portfolio(dec!(100000));
        let first = gate.validate(&opp(dec!(1000)), &triangle(), Some(&p), &cache, Duration::from_secs(5), Some(dec!(100)));
        assert!(first.passed);
        gate.record(dec!(1));
        let second = gate.validate(&opp(dec!(1000)), &triangle(), Some(&p), &cache, Duration::from_secs(5), Some(dec!(100)));
        assert!(!second.passed);
        assert_eq!(second.reason_str(), Some("frequency"));
    }

    #[test]
    fn depth_limit_rejects_oversized_stake() {
        let mut gate = RiskGate::new(limits(), "USDT", true);
        let cache = seeded_cache();
        let p = portfolio(dec!(100000));
        let decision = gate.validate(&opp(dec!(50)), &triangle(), Some(&p), &cache, Duration::from_secs(5), Some(dec!(100)));
        assert!(!decision.passed);
        assert_eq!(decision.reason_str(), Some("depth_limit"));
    }

    #[test]
    fn insufficient_balance_is_rejected() {
        let mut gate = RiskGate::new(limits(), "USDT", true);
        let cache = seeded_cache();
        // Most of the portfolio's value sits in ETH (untouched by this
        // path), so total_balance clears the single-trade-ratio gate while
        // free USDT itself is too small to cover the requested stake.
        cache.on_incremental_update(
            "ETH-USDT",
            Update::Snapshot {
                bids: vec![(dec!(2999), dec!(100))],
                asks: vec![(dec!(3001), dec!(100))],
            },
        );
        let mut balances = HashMap::new();
        balances.insert("USDT".to_string(), dec!(50));
        balances.insert("ETH".to_string(), dec!(100));
        let p = Portfolio { balances };
        let decision = gate.validate(&opp(dec!(1000)), &triangle(), Some(&p), &cache, Duration::from_secs(5), Some(dec!(100)));
        assert!(!decision.passed);
        assert_eq!(decision.reason_str(), Some("insufficient_balance"));
    }

    #[test]
    fn max_position_ratio_rejects_concentrated_exposure() {
        let mut gate = RiskGate::new(limits(), "USDT", true);
        let cache = seeded_cache();
        let mut balances = HashMap::new();
        balances.insert("USDT".to_string(), dec!(100000));
        balances.insert("BTC".to_string(), dec!(0.5)); // ~30000 in quote terms
        let p = Portfolio { balances };
        // A 10000 USDT stake buys ~0.1666 more BTC on top of the 0.5 already
        // held; that combined BTC position, valued in quote terms, clears
        // max_position_ratio (0.2) of total_balance even though the stake
        // itself stays under max_single_trade_ratio (0.1).
        let decision = gate.validate(&opp(dec!(50000)), &triangle(), Some(&p), &cache, Duration::from_secs(5), Some(dec!(10000)));
        assert!(!decision.passed);
        assert_eq!(decision.reason_str(), Some("max_position_ratio"));
    }

    #[test]
    fn kill_switch_trips_on_stop_loss_breach() {
        let mut gate = RiskGate::new(limits(), "USDT", true);
        let cache = seeded_cache();
        let p = portfolio(dec!(100000));
        gate.record(dec!(-10100)); // 10.1% of 100k
        let decision = gate.validate(&opp(dec!(1000)), &triangle(), Some(&p), &cache, Duration::from_secs(5), Some(dec!(100)));
        assert!(!decision.passed);
        assert_eq!(decision.reason_str(), Some("stop_loss"));
        assert_eq!(decision.level, RiskLevel::Critical);
        assert!(gate.is_halted());
    }

    #[test]
    fn record_accumulates_trades_and_pnl() {
        let mut gate = RiskGate::new(limits(), "USDT", true);
        gate.record(dec!(5));
        gate.record(dec!(-2));
        assert_eq!(gate.trades_today(), 2);
        assert_eq!(gate.realized_pnl_today(), dec!(3));
    }
}
