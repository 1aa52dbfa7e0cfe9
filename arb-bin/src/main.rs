//! Binary entry point for the arbitrage engine: parses CLI args, builds the
//! gateway/caches/controller, and drives them until a shutdown signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use arb_core::config::Config;
use arb_core::gateway::http::{Credentials, HttpGateway};
use arb_core::gateway::ExchangeGateway;
use arb_core::monitoring::{MetricsServer, MetricsServerConfig, MetricsRegistry};
use arb_core::orderbook::OrderBookCache;
use arb_core::portfolio::{Portfolio, PortfolioCache};
use arb_core::resilience::{BackoffConfig, FeedHandler};
use arb_core::utils::init_logger;
use arb_core::{Controller, ControllerState};
use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Trading enabled: accepted opportunities are executed.
    Auto,
    /// Trading disabled: the controller evaluates and logs but never calls
    /// the executor's order-placing path.
    Monitor,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Triangular arbitrage engine")]
struct Args {
    /// Trading mode.
    #[arg(value_enum)]
    mode: Mode,

    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config/default.toml")]
    config: String,

    /// Emit structured JSON logs instead of human-readable ones.
    #[arg(long)]
    log_format_json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config).with_context(|| format!("loading config from {}", args.config))?;
    init_logger(&config.system().log_level, args.log_format_json || config.system().json_logs);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    runtime.block_on(run(args.mode, config))
}

async fn run(mode: Mode, config: Config) -> Result<()> {
    info!(?mode, "starting arbitrage engine");

    let credentials = match mode {
        Mode::Monitor => {
            info!("monitor mode: trading disabled, gateway runs public-only");
            None
        }
        Mode::Auto => config.credentials().map(|c| Credentials {
            api_key: c.api_key.clone(),
            secret_key: c.secret_key.clone(),
            passphrase: c.passphrase.clone(),
        }),
    };
    if mode == Mode::Auto && credentials.is_none() {
        warn!("auto mode requested but no credentials configured; falling back to public-only");
    }

    let gateway: Arc<dyn ExchangeGateway> = Arc::new(HttpGateway::new(config.rest_base_url(), config.ws_url(), credentials));

    let cache = Arc::new(OrderBookCache::new());
    let portfolio = Arc::new(PortfolioCache::new(gateway.is_public_only()));

    let pairs: Vec<String> = config
        .paths()
        .iter()
        .flat_map(|p| p.steps.iter().map(|s| s.pair.id()))
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();

    let (retry_count, retry_delay) = config.network_retry();
    let feed_handler = FeedHandler::new(gateway.clone(), cache.clone(), pairs, BackoffConfig::from_network_retry(retry_count, retry_delay));

    let shutdown = Arc::new(AtomicBool::new(false));
    let metrics_registry = Arc::new(MetricsRegistry::new().context("initializing metrics registry")?);
    let mut controller = Controller::new(config.clone(), gateway.clone(), cache.clone(), portfolio.clone(), metrics_registry.clone());
    let handle = controller.handle();

    let shutdown_ctrlc = shutdown.clone();
    let handle_ctrlc = handle.clone();
    ctrlc::set_handler(move || {
        if shutdown_ctrlc.swap(true, Ordering::SeqCst) {
            warn!("second interrupt received, forcing immediate exit");
            std::process::exit(1);
        }
        warn!("interrupt received, shutting down gracefully");
        handle_ctrlc.stop();
    })
    .context("installing signal handler")?;

    if let Ok(listen_addr) = config.system().metrics_addr.parse() {
        let metrics_server = MetricsServer::new(
            MetricsServerConfig { listen_addr, metrics_path: "/metrics".to_string() },
            metrics_registry,
            handle.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = metrics_server.serve().await {
                error!(error = %e, "metrics server exited");
            }
        });
    } else {
        warn!(addr = %config.system().metrics_addr, "invalid metrics_addr, metrics server not started");
    }

    let feed_gateway_public = gateway.is_public_only();
    tokio::spawn(async move {
        loop {
            let stats = feed_handler.run().await;
            warn!(?stats, "feed handler exhausted reconnection attempts, restarting");
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        }
    });

    if !feed_gateway_public {
        let sync_gateway = gateway.clone();
        let sync_portfolio = portfolio.clone();
        let sync_interval = config.monitor_interval() * 5;
        tokio::spawn(async move {
            loop {
                match sync_gateway.get_balance().await {
                    Ok(portfolio) => sync_portfolio.update(portfolio),
                    Err(e) => warn!(error = %e, "balance sync failed"),
                }
                tokio::time::sleep(sync_interval).await;
            }
        });
    } else {
        portfolio.update(Portfolio::empty());
    }

    controller.run().await;

    let stats = controller.stats();
    info!("=== session summary ===");
    info!(ticks = stats.ticks, "ticks processed");
    info!(attempts = stats.attempts, successes = stats.successes, failures = stats.failures, "executions");
    info!(realized_pnl = %stats.realized_pnl, "realized P&L");
    for (reason, count) in &stats.rejections_by_reason {
        info!(reason = reason.as_str(), count = *count, "risk rejections");
    }

    if handle.state() == ControllerState::Error {
        error!("controller exited in error state");
        std::process::exit(1);
    }

    Ok(())
}
