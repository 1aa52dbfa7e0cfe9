//! Arbitrage evaluator (§4.3): a pure function of the order-book cache and
//! a set of configured paths, with no side effects. This is what makes it
//! cheap to property-test and safe to call from the hot path of the
//! controller loop.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;

use crate::core::types::{Path, Side};
use crate::orderbook::{FetchResult, OrderBook, OrderBookCache};

/// A path evaluated against current depth and found to yield a positive,
/// feasible profit. Expires after `max_age` from `evaluated_at`.
#[derive(Debug, Clone)]
pub struct Opportunity {
    pub path_name: String,
    pub profit_rate: Decimal,
    pub max_stake: Decimal,
    pub evaluated_at: Instant,
}

impl Opportunity {
    pub fn is_expired(&self, max_age: Duration) -> bool {
        self.evaluated_at.elapsed() > max_age
    }
}

#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    pub default_fee_rate: Decimal,
    pub fee_overrides: HashMap<String, Decimal>,
    pub freshness_budget: Duration,
    pub min_profit_threshold: Decimal,
    pub min_trade_amount: Decimal,
    /// Reject implausible profit rates above this bound as likely data
    /// artifacts. `None` disables the sanity filter.
    pub max_profit_rate_threshold: Option<Decimal>,
}

impl EvaluatorConfig {
    fn fee_for(&self, pair_id: &str) -> Decimal {
        self.fee_overrides
            .get(pair_id)
            .copied()
            .unwrap_or(self.default_fee_rate)
    }
}

struct LegBook {
    book: OrderBook,
    age: Duration,
}

/// `Evaluate(paths, cache) -> list<Opportunity>`, ordered by profit rate
/// descending, as a pure function of its inputs.
pub fn evaluate(paths: &[Path], cache: &OrderBookCache, config: &EvaluatorConfig) -> Vec<Opportunity> {
    let mut opportunities: Vec<Opportunity> = paths
        .iter()
        .filter_map(|path| evaluate_path(path, cache, config))
        .collect();
    opportunities.sort_by(|a, b| b.profit_rate.cmp(&a.profit_rate));
    opportunities
}

fn evaluate_path(path: &Path, cache: &OrderBookCache, config: &EvaluatorConfig) -> Option<Opportunity> {
    let mut books = Vec::with_capacity(path.len());
    for step in &path.steps {
        let pair_id = step.pair.id();
        match cache.fetch(&pair_id, config.freshness_budget) {
            FetchResult::Fresh(book) => {
                let age = cache.age(&pair_id).unwrap_or(config.freshness_budget);
                books.push(LegBook { book, age });
            }
            FetchResult::Stale | FetchResult::Missing => return None,
        }
    }

    // Freshness coherence: the oldest leg must be within the freshness
    // budget of the newest, not just within budget individually.
    let newest = books.iter().map(|b| b.age).min().unwrap_or_default();
    let oldest = books.iter().map(|b| b.age).max().unwrap_or_default();
    if oldest.checked_sub(newest).unwrap_or_default() > config.freshness_budget {
        return None;
    }

    let capacity = leg_capacity(&path.steps[0], &books[0].book);
    if capacity <= Decimal::ZERO {
        return None;
    }

    let max_stake = max_feasible_stake(path, &books, config, capacity);
    if max_stake < config.min_trade_amount {
        return None;
    }

    let output = simulate(path, &books, config, max_stake)?;
    let profit_rate = output / max_stake - Decimal::ONE;

    if profit_rate < config.min_profit_threshold {
        return None;
    }
    if let Some(cap_rate) = config.max_profit_rate_threshold {
        if profit_rate > cap_rate {
            return None;
        }
    }

    Some(Opportunity {
        path_name: path.name.clone(),
        profit_rate,
        max_stake,
        evaluated_at: Instant::now(),
    })
}

/// Total depth of the first leg's book expressed in the path's start
/// asset (an upper bound no feasible stake can exceed).
fn leg_capacity(first_step: &crate::core::types::PathStep, book: &OrderBook) -> Decimal {
    match first_step.action {
        Side::Buy => book.asks.iter().map(|(price, size)| price * size).sum(),
        Side::Sell => book.bids.iter().map(|(_, size)| *size).sum(),
    }
}

/// Binary search for the largest stake that does not exhaust any leg's
/// book, bounded above by the first leg's total capacity.
fn max_feasible_stake(path: &Path, books: &[LegBook], config: &EvaluatorConfig, capacity: Decimal) -> Decimal {
    let mut low = Decimal::ZERO;
    let mut high = capacity;
    let precision = Decimal::new(1, 9);
    for _ in 0..60 {
        if high - low < precision {
            break;
        }
        let mid = low + (high - low) / Decimal::from(2);
        if simulate(path, books, config, mid).is_some() {
            low = mid;
        } else {
            high = mid;
        }
    }
    low
}

/// Walks every leg for a given starting stake, returning the final output
/// in the start asset, or `None` if any leg would exhaust its side of the
/// book before fully consuming its input.
fn simulate(path: &Path, books: &[LegBook], config: &EvaluatorConfig, x0: Decimal) -> Option<Decimal> {
    let mut remaining = x0;
    for (step, leg) in path.steps.iter().zip(books) {
        let mut output = Decimal::ZERO;
        let mut input_left = remaining;
        let levels: &[(Decimal, Decimal)] = match step.action {
            Side::Buy => &leg.book.asks,
            Side::Sell => &leg.book.bids,
        };
        for (price, size) in levels {
            if input_left <= Decimal::ZERO {
                break;
            }
            let level_depth_in_input = match step.action {
                Side::Buy => price * size,
                Side::Sell => *size,
            };
            let consumed = input_left.min(level_depth_in_input);
            let produced = match step.action {
                Side::Buy => consumed / price,
                Side::Sell => consumed * price,
            };
            output += produced;
            input_left -= consumed;
        }
        if input_left > Decimal::ZERO {
            return None;
        }
        let fee = config.fee_for(&step.pair.id());
        remaining = output * (Decimal::ONE - fee);
    }
    Some(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Pair, PathStep};
    use crate::orderbook::Update;
    use rust_decimal_macros::dec;

    fn config(fee: Decimal) -> EvaluatorConfig {
        EvaluatorConfig {
            default_fee_rate: fee,
            fee_overrides: HashMap::new(),
            freshness_budget: Duration::from_millis(500),
            min_profit_threshold: dec!(0.003),
            min_trade_amount: dec!(1),
            max_profit_rate_threshold: Some(dec!(0.01)),
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

    fn seed(cache: &OrderBookCache, pair: &str, bid: Decimal, bid_size: Decimal, ask: Decimal, ask_size: Decimal) {
        cache.on_incremental_update(
            pair,
            Update::Snapshot {
                bids: vec![(bid, bid_size)],
                asks: vec![(ask, ask_size)],
            },
        );
    }

    #[test]
    fn no_op_tick_emits_nothing() {
        let cache = OrderBookCache::new();
        seed(&cache, "BTC-USDT", dec!(60000), dec!(1), dec!(60010), dec!(1));
        seed(&cache, "BTC-USDC", dec!(60000), dec!(1), dec!(60010), dec!(1));
        seed(&cache, "USDC-USDT", dec!(0.999), dec!(1_000_000), dec!(1.001), dec!(1_000_000));

        let opportunities = evaluate(&[triangle()], &cache, &config(dec!(0.001)));
        assert!(opportunities.is_empty());
    }

    #[test]
    fn profitable_round_trip_is_emitted() {
        let cache = OrderBookCache::new();
        seed(&cache, "BTC-USDT", dec!(59990), dec!(1), dec!(60000), dec!(1));
        seed(&cache, "BTC-USDC", dec!(60500), dec!(1), dec!(60510), dec!(1));
        seed(&cache, "USDC-USDT", dec!(1.000), dec!(1_000_000), dec!(1.002), dec!(1_000_000));

        let opportunities = evaluate(&[triangle()], &cache, &config(dec!(0.001)));
        assert_eq!(opportunities.len(), 1);
        assert!(opportunities[0].profit_rate > Decimal::ZERO);
    }

    #[test]
    fn stale_leg_is_skipped() {
        let cache = OrderBookCache::new();
        seed(&cache, "BTC-USDT", dec!(59990), dec!(1), dec!(60000), dec!(1));
        seed(&cache, "BTC-USDC", dec!(60500), dec!(1), dec!(60510), dec!(1));
        seed(&cache, "USDC-USDT", dec!(1.000), dec!(1_000_000), dec!(1.002), dec!(1_000_000));
        std::thread::sleep(Duration::from_millis(10));

        let mut cfg = config(dec!(0.001));
        cfg.freshness_budget = Duration::from_millis(1);
        let opportunities = evaluate(&[triangle()], &cache, &cfg);
        assert!(opportunities.is_empty());
    }

    #[test]
    fn missing_leg_is_skipped() {
        let cache = OrderBookCache::new();
        seed(&cache, "BTC-USDT", dec!(59990), dec!(1), dec!(60000), dec!(1));
        let opportunities = evaluate(&[triangle()], &cache, &config(dec!(0.001)));
        assert!(opportunities.is_empty());
    }

    #[test]
    fn max_stake_never_exceeds_book_depth() {
        let cache = OrderBookCache::new();
        seed(&cache, "BTC-USDT", dec!(59990), dec!(1), dec!(60000), dec!(0.05));
        seed(&cache, "BTC-USDC", dec!(60500), dec!(1), dec!(60510), dec!(1));
        seed(&cache, "USDC-USDT", dec!(1.000), dec!(1_000_000), dec!(1.002), dec!(1_000_000));

        let opportunities = evaluate(&[triangle()], &cache, &config(dec!(0.001)));
        if let Some(opp) = opportunities.first() {
            assert!(opp.max_stake <= dec!(60000) * dec!(0.05) + dec!(0.01));
        }
    }

    #[test]
    fn evaluator_is_deterministic() {
        let cache = OrderBookCache::new();
        seed(&cache, "BTC-USDT", dec!(59990), dec!(1), dec!(60000), dec!(1));
        seed(&cache, "BTC-USDC", dec!(60500), dec!(1), dec!(60510), dec!(1));
        seed(&cache, "USDC-USDT", dec!(1.000), dec!(1_000_000), dec!(1.002), dec!(1_000_000));

        let cfg = config(dec!(0.001));
        let a = evaluate(&[triangle()], &cache, &cfg);
        let b = evaluate(&[triangle()], &cache, &cfg);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.profit_rate, y.profit_rate);
            assert_eq!(x.max_stake, y.max_stake);
        }
    }
}
