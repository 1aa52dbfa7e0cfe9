//! arb-core: a triangular arbitrage trading engine for a single centralized
//! exchange.
//!
//! ## Architecture
//! - `core`: shared domain types (`Pair`, `Path`, `Side`, order/leg status)
//!   and the error taxonomy every other module maps its failures onto.
//! - `orderbook`: the incremental order-book cache the feed handler writes
//!   and the evaluator reads.
//! - `portfolio`: the best-effort free-balance cache.
//! - `evaluator`: the pure function that turns configured paths plus the
//!   current book into ranked, profitable opportunities.
//! - `risk`: the gate every opportunity passes through before execution,
//!   and the day-bounded counters and kill switch it owns.
//! - `execution`: turns an accepted, sized opportunity into a sequenced
//!   chain of orders, and the trade journal that persists the outcome.
//! - `gateway`: the exchange-agnostic REST/WebSocket contract, a live HTTP
//!   implementation, and a scriptable fake for tests.
//! - `resilience`: reconnect/backoff machinery for the order-book feed.
//! - `config`: runtime TOML + environment-variable configuration.
//! - `monitoring`: Prometheus metrics and the HTTP server that exposes them.
//! - `utils`: logging setup.
//! - `engine`: the controller that ties the above into the scan/act loop.

pub mod config;
pub mod core;
pub mod engine;
pub mod evaluator;
pub mod execution;
pub mod gateway;
pub mod monitoring;
pub mod orderbook;
pub mod portfolio;
pub mod resilience;
pub mod risk;
pub mod utils;

pub use config::Config;
pub use core::errors::{ConfigError, DataError, FatalError, OrderError, PartialFillError, RiskRejected, TransportError};
pub use core::types::{Pair, Path, PathStep, Side};
pub use engine::{Controller, ControllerHandle, ControllerState, ControllerStats};
pub use evaluator::Opportunity;
pub use execution::{ExecutionResult, Executor};
pub use gateway::ExchangeGateway;
pub use orderbook::OrderBookCache;
pub use portfolio::{Portfolio, PortfolioCache};
pub use risk::{RiskDecision, RiskGate};

pub use anyhow::{Error, Result};
