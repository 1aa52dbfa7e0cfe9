//! Metrics and the HTTP server that exposes them (§6 operator surface).

pub mod metrics;
pub mod server;

pub use metrics::MetricsRegistry;
pub use server::{MetricsServer, MetricsServerConfig};
