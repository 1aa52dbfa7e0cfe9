//! Controller (§4.6): the single orchestrator task. Owns the state machine,
//! drives the scan/act loop against the evaluator and risk gate, and
//! invokes the executor at most once per tick. Every other task in the
//! process (feed handler, balance sync) is a single writer to a cache the
//! controller only reads.

pub mod stats;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::prelude::ToPrimitive;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::core::types::LegStatus;
use crate::evaluator::{self, EvaluatorConfig};
use crate::execution::journal::TradeJournal;
use crate::execution::{Executor, ExecutionResult};
use crate::gateway::ExchangeGateway;
use crate::monitoring::MetricsRegistry;
use crate::orderbook::OrderBookCache;
use crate::portfolio::PortfolioCache;
use crate::risk::RiskGate;

pub use stats::ControllerStats;

/// Controller lifecycle state (§4.6). `Error` is terminal for the current
/// run; a fresh `start()` is required to recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControllerState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
    Error = 4,
}

impl ControllerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ControllerState::Stopped,
            1 => ControllerState::Starting,
            2 => ControllerState::Running,
            3 => ControllerState::Stopping,
            _ => ControllerState::Error,
        }
    }
}

/// Shared, lock-free state flag the controller loop checks between every
/// suspension point, and that `stop()` can flip from any task.
#[derive(Clone)]
pub struct ControllerHandle {
    state: Arc<AtomicU8>,
}

impl ControllerHandle {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(ControllerState::Stopped as u8)),
        }
    }

    pub fn state(&self) -> ControllerState {
        ControllerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set(&self, state: ControllerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Requests a graceful stop. Idempotent: calling this on an already
    /// stopped or stopping controller has no effect.
    pub fn stop(&self) {
        let current = self.state();
        if current == ControllerState::Running || current == ControllerState::Starting {
            self.set(ControllerState::Stopping);
        }
    }

    fn should_continue(&self) -> bool {
        matches!(self.state(), ControllerState::Running)
    }
}

/// Ties together the caches, gate, and executor the loop reads and
/// mutates. Constructed once at startup from a validated `Config`.
pub struct Controller {
    config: Config,
    evaluator_config: EvaluatorConfig,
    cache: Arc<OrderBookCache>,
    portfolio: Arc<PortfolioCache>,
    risk: RiskGate,
    executor: Executor,
    journal: Option<TradeJournal>,
    handle: ControllerHandle,
    stats: ControllerStats,
    max_book_age: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl Controller {
    pub fn new(
        config: Config,
        gateway: Arc<dyn ExchangeGateway>,
        cache: Arc<OrderBookCache>,
        portfolio: Arc<PortfolioCache>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let evaluator_config = config.evaluator_config();
        let risk = RiskGate::new(config.risk_limits(), config.quote_asset().to_string(), !gateway.is_public_only());
        let executor = Executor::new(gateway, cache.clone(), portfolio.clone(), config.executor_config());
        let max_book_age = evaluator_config.freshness_budget;

        let journal = match TradeJournal::open(&config.system().journal_path) {
            Ok(journal) => Some(journal),
            Err(e) => {
                warn!(error = %e, "failed to open trade journal, executions will not be persisted");
                None
            }
        };

        Self {
            config,
            evaluator_config,
            cache,
            portfolio,
            risk,
            executor,
            journal,
            handle: ControllerHandle::new(),
            stats: ControllerStats::default(),
            max_book_age,
            metrics,
        }
    }

    pub fn handle(&self) -> ControllerHandle {
        self.handle.clone()
    }

    pub fn stats(&self) -> &ControllerStats {
        &self.stats
    }

    /// Sets the lifecycle state on both the handle other tasks observe and
    /// the metrics gauge scraped by Prometheus. The sole place the handle's
    /// state is mutated from.
    fn set_state(&self, state: ControllerState) {
        self.handle.set(state);
        self.metrics.system().controller_state.set(state as u8 as i64);
    }

    /// Runs until `stop()` is called on a clone of this controller's
    /// handle, or a fatal error forces an early exit. Not re-entrant: one
    /// call per `Controller` instance.
    #[instrument(skip(self))]
    pub async fn run(&mut self) {
        if self.handle.state() != ControllerState::Stopped {
            warn!("controller already started, ignoring duplicate run()");
            return;
        }

        self.set_state(ControllerState::Starting);
        info!("controller starting");
        self.set_state(ControllerState::Running);

        let tick_interval = self.config.monitor_interval();
        let portfolio_stale_bound = tick_interval * 10;
        // An invariant the risk gate depends on: fresh balances. If the sync
        // task has been dead this long, every sizing decision downstream is
        // built on stale data, so this is treated as fatal rather than just
        // logged.
        let fatal_stale_bound = portfolio_stale_bound * 5;

        loop {
            if !self.handle.should_continue() {
                break;
            }

            let tick_started = Instant::now();
            self.tick(portfolio_stale_bound, fatal_stale_bound).await;
            self.stats.ticks += 1;

            if !self.handle.should_continue() {
                break;
            }

            // Backpressure (§5): never queue ticks. If this tick ran long,
            // proceed straight to the next one instead of sleeping a
            // negative or zero duration.
            let elapsed = tick_started.elapsed();
            if elapsed < tick_interval {
                let remaining = tick_interval - elapsed;
                tokio::select! {
                    _ = tokio::time::sleep(remaining) => {}
                    _ = self.wait_for_stop() => {}
                }
            } else {
                debug!(?elapsed, interval = ?tick_interval, "tick overran interval, skipping sleep");
            }
        }

        info!(ticks = self.stats.ticks, attempts = self.stats.attempts, "controller stopped");
        if self.handle.state() != ControllerState::Error {
            self.set_state(ControllerState::Stopped);
        }
    }

    async fn wait_for_stop(&self) {
        while self.handle.should_continue() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// One scan/act cycle (§4.6): refresh-trigger, evaluate, and at most one
    /// risk-gated execution. Transitions to `Error` and aborts the cycle if
    /// the portfolio cache has been stale long enough that the risk gate's
    /// sizing decisions can no longer be trusted.
    async fn tick(&mut self, portfolio_stale_bound: Duration, fatal_stale_bound: Duration) {
        if !self.portfolio.is_public_only() && self.portfolio.is_stale(portfolio_stale_bound) {
            debug!(age = ?self.portfolio.age(), "portfolio cache stale, refresh should be in flight on the sync task");
            if self.portfolio.is_stale(fatal_stale_bound) {
                error!(age = ?self.portfolio.age(), "portfolio cache stale well past the sync interval, balance sync task presumed dead");
                self.set_state(ControllerState::Error);
                return;
            }
        }

        let opportunities = evaluator::evaluate(self.config.paths(), &self.cache, &self.evaluator_config);
        self.metrics.evaluator().opportunities_evaluated_total.inc_by(opportunities.len() as u64);
        if let Some(portfolio) = self.portfolio.snapshot() {
            for (asset, amount) in &portfolio.balances {
                self.metrics.portfolio().balance.with_label_values(&[asset.as_str()]).set(amount.to_f64().unwrap_or(0.0));
            }
        }
        if opportunities.is_empty() {
            return;
        }
        debug!(count = opportunities.len(), "opportunities evaluated this tick");

        let portfolio_snapshot = self.portfolio.snapshot();

        for opportunity in &opportunities {
            let Some(path) = self.config.paths().iter().find(|p| p.name == opportunity.path_name) else {
                continue;
            };

            let decision = self.risk.validate(
                opportunity,
                path,
                portfolio_snapshot.as_ref(),
                &self.cache,
                self.max_book_age,
                None,
            );

            if !decision.passed {
                let reason = decision.reason_str().unwrap_or("unknown");
                debug!(path = %path.name, reason, "opportunity rejected by risk gate");
                self.stats.record_rejection(reason);
                self.metrics.risk().rejections_total.with_label_values(&[reason]).inc();
                continue;
            }

            info!(path = %path.name, stake = %decision.suggested_stake, rate = %opportunity.profit_rate, "executing opportunity");
            self.stats.attempts += 1;
            self.metrics.execution().attempts_total.inc();

            let result = self.executor.execute(path, opportunity, decision.suggested_stake).await;

            self.risk.record(result.realized_profit);
            if result.success {
                self.stats.successes += 1;
                self.metrics.execution().successes_total.inc();
            } else {
                self.stats.failures += 1;
                self.metrics.execution().failures_total.with_label_values(&[failure_label(&result).as_str()]).inc();
            }
            self.stats.realized_pnl += result.realized_profit;
            self.metrics.execution().realized_pnl_total.set(self.stats.realized_pnl.to_f64().unwrap_or(0.0));

            if let Some(journal) = &self.journal {
                if let Err(e) = journal.append(&result) {
                    error!(error = %e, "failed to append execution to trade journal");
                }
            }

            // At most one execution per tick, to respect min_arbitrage_interval
            // and keep the concurrency model at zero-or-one in-flight chains.
            break;
        }
    }
}

/// The terminal status of the first leg that didn't fill, used as the
/// `failures_total` label. Falls back to `"unknown"` for a chain that
/// aborted before any leg was attempted.
fn failure_label(result: &ExecutionResult) -> String {
    result
        .legs
        .iter()
        .find(|l| !matches!(l.status.0, LegStatus::Filled))
        .map(|l| l.status.0.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::core::types::{Pair, Path, PathStep, Side};
    use crate::gateway::fake::FakeGateway;
    use crate::orderbook::Update;
    use crate::portfolio::Portfolio;

    fn quick_config(min_trade_amount: Decimal) -> Config {
        let toml = format!(
            r#"
            [trading]
            min_trade_amount = "{min_trade_amount}"
            monitor_interval_secs = 1

            [trading.paths.path1]
            route = "USDT->BTC->ETH->USDT"
            steps = [
                {{ pair = "BTC-USDT", action = "buy" }},
                {{ pair = "ETH-BTC", action = "buy" }},
                {{ pair = "ETH-USDT", action = "sell" }},
            ]
            "#
        );
        Config::from_toml_str(&toml).expect("valid test config")
    }

    // Arbitrage-free-ish quotes (ETH-BTC implied from the other two legs'
    // mid prices) plus a normal spread on each pair, so the round trip loses
    // a bit to spread and fees rather than presenting an artificial
    // opportunity.
    fn seed_books(cache: &OrderBookCache) {
        cache.on_incremental_update(
            "BTC-USDT",
            Update::Snapshot {
                bids: vec![(dec!(30000), dec!(10))],
                asks: vec![(dec!(30010), dec!(10))],
            },
        );
        cache.on_incremental_update(
            "ETH-BTC",
            Update::Snapshot {
                bids: vec![(dec!(0.06660), dec!(100))],
                asks: vec![(dec!(0.06671), dec!(100))],
            },
        );
        cache.on_incremental_update(
            "ETH-USDT",
            Update::Snapshot {
                bids: vec![(dec!(1999), dec!(100))],
                asks: vec![(dec!(2001), dec!(100))],
            },
        );
    }

    #[tokio::test]
    async fn no_op_tick_when_no_paths_profitable() {
        let config = quick_config(dec!(10));
        let cache = Arc::new(OrderBookCache::new());
        seed_books(&cache);

        let mut balances = HashMap::new();
        balances.insert("USDT".to_string(), dec!(1000));
        let gateway: Arc<dyn ExchangeGateway> = Arc::new(FakeGateway::new(Portfolio { balances }));

        let portfolio = Arc::new(PortfolioCache::new(false));
        portfolio.update(Portfolio {
            balances: HashMap::from([("USDT".to_string(), dec!(1000))]),
        });

        let metrics = Arc::new(MetricsRegistry::new().unwrap());
        let mut controller = Controller::new(config, gateway, cache, portfolio, metrics);
        controller.tick(Duration::from_secs(60), Duration::from_secs(3600)).await;
        assert_eq!(controller.stats().attempts, 0);
    }

    #[test]
    fn stop_is_idempotent() {
        let handle = ControllerHandle::new();
        handle.set(ControllerState::Running);
        handle.stop();
        handle.stop();
        assert_eq!(handle.state(), ControllerState::Stopping);
    }

    #[test]
    fn controller_path_lookup_matches_opportunity_by_name() {
        let pair = Pair::new("BTC".to_string(), "USDT".to_string()).unwrap();
        let step = PathStep::new(pair, Side::Buy);
        let path = Path::new("solo", vec![step.clone(), step.clone(), step]);
        assert!(path.is_err(), "a path whose steps don't close should fail to build");
    }

    #[tokio::test]
    async fn tick_transitions_to_error_on_long_dead_portfolio_sync() {
        let config = quick_config(dec!(10));
        let cache = Arc::new(OrderBookCache::new());
        seed_books(&cache);

        let gateway: Arc<dyn ExchangeGateway> = Arc::new(FakeGateway::new(Portfolio::empty()));
        let portfolio = Arc::new(PortfolioCache::new(false));
        portfolio.update(Portfolio {
            balances: HashMap::from([("USDT".to_string(), dec!(1000))]),
        });

        let metrics = Arc::new(MetricsRegistry::new().unwrap());
        let mut controller = Controller::new(config, gateway, cache, portfolio, metrics);
        controller.set_state(ControllerState::Running);

        // Freshly-updated cache: not stale by any bound.
        controller.tick(Duration::from_millis(1), Duration::from_secs(3600)).await;
        assert_eq!(controller.handle().state(), ControllerState::Running);

        // Same cache, now treated as long past both bounds: the sync task
        // is presumed dead and the controller should fault.
        controller.tick(Duration::from_nanos(1), Duration::from_nanos(1)).await;
        assert_eq!(controller.handle().state(), ControllerState::Error);
    }
}
