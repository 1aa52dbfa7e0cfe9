//! Executor (§4.5): turns an accepted opportunity and sized stake into a
//! sequenced chain of marketable limit orders, one call at a time. Callers
//! MUST serialize invocations (the controller enforces zero-or-one
//! in-flight execution).

pub mod journal;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};

use crate::core::errors::PartialFillError;
use crate::core::types::{LegStatus, LocalOrderId, OrderStatus, Path, Side};
use crate::evaluator::Opportunity;
use crate::gateway::{ExchangeGateway, OrderType};
use crate::orderbook::OrderBookCache;
use crate::portfolio::PortfolioCache;
pub use types::{ExecutionResult, LegResult};

#[derive(Debug, Clone)]
pub struct PairSteps {
    pub quantity_step: Decimal,
    pub price_step: Decimal,
}

impl Default for PairSteps {
    fn default() -> Self {
        Self {
            quantity_step: Decimal::new(1, 8),
            price_step: Decimal::new(1, 8),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub slippage_tolerance: Decimal,
    pub order_timeout: Duration,
    pub poll_interval: Duration,
    /// Residual below this, at timeout on a partial fill, is tolerated and
    /// the chain continues; above it the chain aborts.
    pub dust_threshold: Decimal,
    pub steps: HashMap<String, PairSteps>,
}

impl ExecutorConfig {
    fn steps_for(&self, pair: &str) -> PairSteps {
        self.steps.get(pair).cloned().unwrap_or_default()
    }
}

fn floor_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    (value / step).floor() * step
}

pub struct Executor {
    gateway: Arc<dyn ExchangeGateway>,
    cache: Arc<OrderBookCache>,
    portfolio: Arc<PortfolioCache>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        cache: Arc<OrderBookCache>,
        portfolio: Arc<PortfolioCache>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            gateway,
            cache,
            portfolio,
            config,
        }
    }

    /// `Execute(opportunity, stake) -> ExecutionResult`. Single-threaded
    /// per call.
    #[instrument(skip(self, path, opportunity), fields(path = %path.name))]
    pub async fn execute(&self, path: &Path, opportunity: &Opportunity, stake: Decimal) -> ExecutionResult {
        let start_asset = path.start_asset();
        if let Some(portfolio) = self.portfolio.snapshot() {
            let headroom = stake * Decimal::new(1, 3); // 0.1% headroom
            if portfolio.free(start_asset) < stake + headroom {
                return ExecutionResult {
                    path_name: path.name.clone(),
                    stake,
                    legs: path
                        .steps
                        .iter()
                        .map(|s| LegResult::not_attempted(s.pair.id(), Decimal::ZERO))
                        .collect(),
                    realized_profit: Decimal::ZERO,
                    success: false,
                    error: Some("insufficient start-asset balance for pre-trade headroom check".into()),
                };
            }
        }

        let mut legs = Vec::with_capacity(path.steps.len());
        let mut current_input = stake;
        let mut current_asset = start_asset.to_string();
        let mut aborted = false;
        let mut abort_reason = None;

        for step in &path.steps {
            if aborted {
                legs.push(LegResult::not_attempted(step.pair.id(), Decimal::ZERO));
                continue;
            }

            let leg_started = Instant::now();
            match self.run_leg(step, current_input).await {
                Ok(result) => {
                    if let (true, Some(price)) = (result.filled_size > Decimal::ZERO, result.average_price) {
                        let input_spent = match step.action {
                            Side::Buy => result.filled_size * price,
                            Side::Sell => result.filled_size,
                        };
                        let output = match step.action {
                            Side::Buy => result.filled_size,
                            Side::Sell => result.filled_size * price,
                        };
                        self.portfolio.apply_delta(step.input_asset(), -input_spent);
                        self.portfolio.apply_delta(step.output_asset(), output);
                        current_input = output;
                        current_asset = step.output_asset().to_string();
                    }
                    let terminal = result.status.0;
                    if matches!(terminal, LegStatus::Timeout) && result.filled_size > Decimal::ZERO {
                        let err = PartialFillError {
                            pair: step.pair.id(),
                            filled: result.filled_size,
                            requested: result.requested_size,
                        };
                        warn!(error = %err, "leg partially filled at timeout");
                        aborted = true;
                        abort_reason = Some(err.to_string());
                    } else if !matches!(terminal, LegStatus::Filled) {
                        aborted = true;
                        abort_reason = Some(format!("leg {} ended as {terminal}", step.pair.id()));
                    }
                    legs.push(result);
                }
                Err(reason) => {
                    aborted = true;
                    abort_reason = Some(reason.clone());
                    legs.push(LegResult {
                        pair: step.pair.id(),
                        order_id: None,
                        requested_size: current_input,
                        filled_size: Decimal::ZERO,
                        average_price: None,
                        status: types::SerializableLegStatus(LegStatus::Failed),
                        elapsed_ms: leg_started.elapsed().as_millis() as u64,
                    });
                }
            }
        }

        let success = !aborted;
        let realized_profit = if success {
            current_input - stake
        } else {
            self.asset_value_in(&current_asset, current_input, start_asset) - stake
        };

        if let Ok(fresh) = self.gateway.get_balance().await {
            self.portfolio.update(fresh);
        }

        if !success {
            warn!(path = %path.name, reason = ?abort_reason, "execution chain aborted");
        } else {
            info!(path = %path.name, %realized_profit, "execution chain completed");
        }

        ExecutionResult {
            path_name: path.name.clone(),
            stake,
            legs,
            realized_profit,
            success,
            error: abort_reason,
        }
    }

    /// Best-effort valuation of a stranded balance in `target`'s terms,
    /// used only to report realized P&L on a partial-failure abort.
    /// Missing prices contribute zero, matching the risk gate's
    /// conservative convention.
    fn asset_value_in(&self, asset: &str, amount: Decimal, target: &str) -> Decimal {
        if asset == target {
            return amount;
        }
        let Ok(pair) = crate::core::types::Pair::new(asset.to_string(), target.to_string()) else {
            return Decimal::ZERO;
        };
        let Some(book) = self.cache.fetch_or_stale_fallback(&pair.id()) else {
            return Decimal::ZERO;
        };
        let (Some((bid, _)), Some((ask, _))) = (book.best_bid(), book.best_ask()) else {
            return Decimal::ZERO;
        };
        let mid = (bid + ask) / Decimal::from(2);
        if pair.base == asset {
            amount * mid
        } else if mid.is_zero() {
            Decimal::ZERO
        } else {
            amount / mid
        }
    }

    async fn run_leg(&self, step: &crate::core::types::PathStep, input_amount: Decimal) -> Result<LegResult, String> {
        let pair_id = step.pair.id();
        let local_id = LocalOrderId::next();
        let steps = self.config.steps_for(&pair_id);

        let book = match self.cache.fetch(&pair_id, self.config.poll_interval * 5) {
            crate::orderbook::FetchResult::Fresh(book) => book,
            _ => return Err(format!("{pair_id}: no fresh book to price leg against")),
        };

        let (price, size) = match step.action {
            Side::Buy => {
                let (ask, _) = book.best_ask().ok_or_else(|| format!("{pair_id}: empty ask side"))?;
                let price = floor_to_step(ask * (Decimal::ONE + self.config.slippage_tolerance), steps.price_step);
                let size = floor_to_step(input_amount / price, steps.quantity_step);
                (price, size)
            }
            Side::Sell => {
                let (bid, _) = book.best_bid().ok_or_else(|| format!("{pair_id}: empty bid side"))?;
                let price = floor_to_step(bid * (Decimal::ONE - self.config.slippage_tolerance), steps.price_step);
                let size = floor_to_step(input_amount, steps.quantity_step);
                (price, size)
            }
        };

        if size <= Decimal::ZERO {
            return Err(format!("{pair_id}: computed order size rounds to zero"));
        }

        info!(%local_id, pair = %pair_id, %size, %price, "placing order");
        let order_id = self
            .gateway
            .place_order(&pair_id, step.action, OrderType::Limit, size, price)
            .await
            .map_err(|e| e.to_string())?;

        let deadline = Instant::now() + self.config.order_timeout;
        let started = Instant::now();
        loop {
            let status = self
                .gateway
                .get_order_status(&pair_id, &order_id)
                .await
                .map_err(|e| e.to_string())?;
            debug!(%local_id, pair = %pair_id, status = ?status.status, "polled order status");

            if status.status == OrderStatus::Filled {
                return Ok(LegResult {
                    pair: pair_id,
                    order_id: Some(order_id),
                    requested_size: size,
                    filled_size: status.filled_size,
                    average_price: status.average_price,
                    status: types::SerializableLegStatus(LegStatus::Filled),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
            }

            if Instant::now() >= deadline {
                let _ = self.gateway.cancel_order(&pair_id, &order_id).await;
                let remaining = size - status.filled_size;
                if status.filled_size > Decimal::ZERO && remaining <= self.config.dust_threshold {
                    return Ok(LegResult {
                        pair: pair_id,
                        order_id: Some(order_id),
                        requested_size: size,
                        filled_size: status.filled_size,
                        average_price: status.average_price,
                        status: types::SerializableLegStatus(LegStatus::Filled),
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    });
                }
                return Ok(LegResult {
                    pair: pair_id,
                    order_id: Some(order_id),
                    requested_size: size,
                    filled_size: status.filled_size,
                    average_price: status.average_price,
                    status: types::SerializableLegStatus(LegStatus::Timeout),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Pair, PathStep};
    use crate::gateway::fake::{FakeGateway, ScriptedFill};
    use crate::orderbook::Update;
    use crate::portfolio::Portfolio;
    use rust_decimal_macros::dec;
    use std::time::Instant as StdInstant;

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

    fn seeded_cache() -> Arc<OrderBookCache> {
        let cache = OrderBookCache::new();
        cache.on_incremental_update(
            "BTC-USDT",
            Update::Snapshot {
                bids: vec![(dec!(59990), dec!(1))],
                asks: vec![(dec!(60000), dec!(1))],
            },
        );
        cache.on_incremental_update(
            "BTC-USDC",
            Update::Snapshot {
                bids: vec![(dec!(60500), dec!(1))],
                asks: vec![(dec!(60510), dec!(1))],
            },
        );
        cache.on_incremental_update(
            "USDC-USDT",
            Update::Snapshot {
                bids: vec![(dec!(1.000), dec!(1_000_000))],
                asks: vec![(dec!(1.002), dec!(1_000_000))],
            },
        );
        Arc::new(cache)
    }

    fn config() -> ExecutorConfig {
        ExecutorConfig {
            slippage_tolerance: dec!(0.002),
            order_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
            dust_threshold: dec!(0.0001),
            steps: HashMap::new(),
        }
    }

    fn opp() -> Opportunity {
        Opportunity {
            path_name: "usdt_btc_usdc".into(),
            profit_rate: dec!(0.005),
            max_stake: dec!(6000),
            evaluated_at: StdInstant::now(),
        }
    }

    #[tokio::test]
    async fn full_fill_chain_succeeds() {
        let mut balances = HashMap::new();
        balances.insert("USDT".to_string(), dec!(10000));
        let gateway: Arc<dyn ExchangeGateway> = Arc::new(FakeGateway::new(Portfolio { balances }));
        let cache = seeded_cache();
        let portfolio = Arc::new(PortfolioCache::new(false));
        portfolio.update(Portfolio {
            balances: {
                let mut b = HashMap::new();
                b.insert("USDT".to_string(), dec!(10000));
                b
            },
        });

        let executor = Executor::new(gateway, cache, portfolio, config());
        let result = executor.execute(&triangle(), &opp(), dec!(6000)).await;
        assert!(result.success);
        assert_eq!(result.legs.len(), 3);
        assert!(result.legs.iter().all(|l| matches!(l.status.0, LegStatus::Filled)));
    }

    #[tokio::test]
    async fn partial_fill_aborts_remaining_legs() {
        let mut balances = HashMap::new();
        balances.insert("USDT".to_string(), dec!(10000));
        let gateway = Arc::new(FakeGateway::new(Portfolio { balances }));
        gateway.script_fill(ScriptedFill::full());
        gateway.script_fill(ScriptedFill::partial(dec!(0.4)));
        let gateway: Arc<dyn ExchangeGateway> = gateway;
        let cache = seeded_cache();
        let portfolio = Arc::new(PortfolioCache::new(false));
        portfolio.update(Portfolio {
            balances: {
                let mut b = HashMap::new();
                b.insert("USDT".to_string(), dec!(10000));
                b
            },
        });

        let executor = Executor::new(gateway, cache, portfolio, config());
        let result = executor.execute(&triangle(), &opp(), dec!(6000)).await;
        assert!(!result.success);
        assert_eq!(result.legs.len(), 3);
        assert!(matches!(result.legs[2].status.0, LegStatus::NotAttempted));
    }

    #[tokio::test]
    async fn insufficient_balance_aborts_before_any_leg() {
        let gateway: Arc<dyn ExchangeGateway> = Arc::new(FakeGateway::new(Portfolio::empty()));
        let cache = seeded_cache();
        let portfolio = Arc::new(PortfolioCache::new(false));
        portfolio.update(Portfolio::empty());

        let executor = Executor::new(gateway, cache, portfolio, config());
        let result = executor.execute(&triangle(), &opp(), dec!(6000)).await;
        assert!(!result.success);
        assert!(result.legs.iter().all(|l| matches!(l.status.0, LegStatus::NotAttempted)));
    }
}
