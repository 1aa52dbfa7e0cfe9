//! Prometheus metrics for the arbitrage engine, grouped the way the
//! controller's own subsystems are: opportunities, executions, risk
//! rejections, and feed/system health.

use std::sync::Arc;

use prometheus::{Gauge, GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use tracing::info;

#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Arc<Registry>,
    evaluator: Arc<EvaluatorMetrics>,
    execution: Arc<ExecutionMetrics>,
    risk: Arc<RiskMetrics>,
    system: Arc<SystemMetrics>,
    portfolio: Arc<PortfolioMetrics>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Arc::new(Registry::new());

        let evaluator = Arc::new(EvaluatorMetrics::new(&registry)?);
        let execution = Arc::new(ExecutionMetrics::new(&registry)?);
        let risk = Arc::new(RiskMetrics::new(&registry)?);
        let system = Arc::new(SystemMetrics::new(&registry)?);
        let portfolio = Arc::new(PortfolioMetrics::new(&registry)?);

        info!("prometheus metrics registry initialized");

        Ok(Self {
            registry,
            evaluator,
            execution,
            risk,
            system,
            portfolio,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn evaluator(&self) -> &EvaluatorMetrics {
        &self.evaluator
    }

    pub fn execution(&self) -> &ExecutionMetrics {
        &self.execution
    }

    pub fn risk(&self) -> &RiskMetrics {
        &self.risk
    }

    pub fn system(&self) -> &SystemMetrics {
        &self.system
    }

    pub fn portfolio(&self) -> &PortfolioMetrics {
        &self.portfolio
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new().unwrap_or_else(|e| {
            tracing::error!("failed to create metrics registry: {e}");
            panic!("cannot create metrics registry")
        })
    }
}

/// Evaluator-side metrics: how many opportunities each tick finds, and why
/// ones that don't trade got skipped.
pub struct EvaluatorMetrics {
    pub opportunities_evaluated_total: IntCounter,
    pub opportunities_skipped_total: IntCounterVec,
    pub best_profit_rate: Gauge,
    pub evaluation_latency_us: Histogram,
}

impl EvaluatorMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let opportunities_evaluated_total = IntCounter::new(
            "arb_evaluator_opportunities_evaluated_total",
            "Total profitable opportunities emitted by the evaluator",
        )?;
        registry.register(Box::new(opportunities_evaluated_total.clone()))?;

        let opportunities_skipped_total = IntCounterVec::new(
            Opts::new("evaluator_opportunities_skipped_total", "Paths skipped, by reason").namespace("arb"),
            &["reason"],
        )?;
        registry.register(Box::new(opportunities_skipped_total.clone()))?;

        let best_profit_rate = Gauge::new(
            "arb_evaluator_best_profit_rate",
            "Highest profit rate seen on the most recent tick",
        )?;
        registry.register(Box::new(best_profit_rate.clone()))?;

        let evaluation_latency_us = Histogram::with_opts(
            HistogramOpts::new(
                "arb_evaluator_evaluation_latency_us",
                "Wall-clock time to evaluate all configured paths, in microseconds",
            )
            .buckets(vec![50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]),
        )?;
        registry.register(Box::new(evaluation_latency_us.clone()))?;

        Ok(Self {
            opportunities_evaluated_total,
            opportunities_skipped_total,
            best_profit_rate,
            evaluation_latency_us,
        })
    }
}

/// Executor-side metrics.
pub struct ExecutionMetrics {
    pub attempts_total: IntCounter,
    pub successes_total: IntCounter,
    pub failures_total: IntCounterVec,
    pub leg_fill_latency_ms: Histogram,
    pub realized_pnl_total: Gauge,
}

impl ExecutionMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let attempts_total = IntCounter::new("arb_execution_attempts_total", "Total execution attempts")?;
        registry.register(Box::new(attempts_total.clone()))?;

        let successes_total = IntCounter::new("arb_execution_successes_total", "Total fully-filled execution chains")?;
        registry.register(Box::new(successes_total.clone()))?;

        let failures_total = IntCounterVec::new(
            Opts::new("execution_failures_total", "Execution chains that aborted, by terminal leg status").namespace("arb"),
            &["leg_status"],
        )?;
        registry.register(Box::new(failures_total.clone()))?;

        let leg_fill_latency_ms = Histogram::with_opts(
            HistogramOpts::new("arb_execution_leg_fill_latency_ms", "Time from order placement to terminal leg status, in milliseconds")
                .buckets(vec![10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 3000.0]),
        )?;
        registry.register(Box::new(leg_fill_latency_ms.clone()))?;

        let realized_pnl_total = Gauge::new("arb_execution_realized_pnl_total", "Cumulative realized P&L across all executions")?;
        registry.register(Box::new(realized_pnl_total.clone()))?;

        Ok(Self {
            attempts_total,
            successes_total,
            failures_total,
            leg_fill_latency_ms,
            realized_pnl_total,
        })
    }
}

/// Risk gate metrics.
pub struct RiskMetrics {
    pub rejections_total: IntCounterVec,
    pub daily_pnl: Gauge,
    pub trades_today: IntGauge,
    pub kill_switch_tripped: IntGauge,
    pub risk_level: IntGauge,
}

impl RiskMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let rejections_total = IntCounterVec::new(
            Opts::new("risk_rejections_total", "Risk gate rejections, by reason").namespace("arb"),
            &["reason"],
        )?;
        registry.register(Box::new(rejections_total.clone()))?;

        let daily_pnl = Gauge::new("arb_risk_daily_pnl", "Realized P&L for the current trading day")?;
        registry.register(Box::new(daily_pnl.clone()))?;

        let trades_today = IntGauge::new("arb_risk_trades_today", "Trades attempted so far today")?;
        registry.register(Box::new(trades_today.clone()))?;

        let kill_switch_tripped = IntGauge::new("arb_risk_kill_switch_tripped", "1 if the kill switch is tripped, else 0")?;
        registry.register(Box::new(kill_switch_tripped.clone()))?;

        let risk_level = IntGauge::new("arb_risk_level", "Current risk level: 0=low, 1=medium, 2=high, 3=critical")?;
        registry.register(Box::new(risk_level.clone()))?;

        Ok(Self {
            rejections_total,
            daily_pnl,
            trades_today,
            kill_switch_tripped,
            risk_level,
        })
    }
}

/// Feed/connection and controller state metrics.
pub struct SystemMetrics {
    pub feed_connected: IntGauge,
    pub reconnection_attempts_total: IntCounter,
    pub checksum_mismatches_total: IntCounter,
    pub controller_state: IntGauge,
    pub errors_total: IntCounterVec,
    pub uptime_seconds: IntGauge,
}

impl SystemMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let feed_connected = IntGauge::new(
            "arb_system_feed_connected",
            "Order book feed connection status (1 = connected, 0 = disconnected)",
        )?;
        registry.register(Box::new(feed_connected.clone()))?;

        let reconnection_attempts_total =
            IntCounter::new("arb_system_reconnection_attempts_total", "Total feed reconnection attempts")?;
        registry.register(Box::new(reconnection_attempts_total.clone()))?;

        let checksum_mismatches_total =
            IntCounter::new("arb_system_checksum_mismatches_total", "Total order book checksum mismatches")?;
        registry.register(Box::new(checksum_mismatches_total.clone()))?;

        let controller_state = IntGauge::new(
            "arb_system_controller_state",
            "Controller state: 0=stopped, 1=starting, 2=running, 3=stopping, 4=error",
        )?;
        registry.register(Box::new(controller_state.clone()))?;

        let errors_total = IntCounterVec::new(
            Opts::new("system_errors_total", "Total errors, by component").namespace("arb"),
            &["component"],
        )?;
        registry.register(Box::new(errors_total.clone()))?;

        let uptime_seconds = IntGauge::new("arb_system_uptime_seconds", "Process uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            feed_connected,
            reconnection_attempts_total,
            checksum_mismatches_total,
            controller_state,
            errors_total,
            uptime_seconds,
        })
    }
}

/// Portfolio balance, per asset, as last synced from the exchange (or the
/// fake balance in public-only mode).
pub struct PortfolioMetrics {
    pub balance: GaugeVec,
}

impl PortfolioMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let balance = GaugeVec::new(
            Opts::new("portfolio_balance", "Free balance per asset, in native units").namespace("arb"),
            &["asset"],
        )?;
        registry.register(Box::new(balance.clone()))?;

        Ok(Self { balance })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_creates_all_metric_families() {
        let registry = MetricsRegistry::new().unwrap();
        assert!(!registry.registry().gather().is_empty());
    }

    #[test]
    fn evaluator_and_risk_metrics_record() {
        let registry = MetricsRegistry::new().unwrap();
        registry.evaluator().opportunities_evaluated_total.inc();
        registry.risk().rejections_total.with_label_values(&["frequency"]).inc();
        registry.system().controller_state.set(2);
        assert!(!registry.registry().gather().is_empty());
    }
}
