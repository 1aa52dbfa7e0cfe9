//! HTTP server exposing `/metrics`, `/health`, and `/healthz` for Prometheus
//! scraping and liveness probes.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, TextEncoder};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::engine::{ControllerHandle, ControllerState};

use super::MetricsRegistry;

#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    pub listen_addr: SocketAddr,
    pub metrics_path: String,
}

impl Default for MetricsServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:9090".parse().expect("valid default socket addr"),
            metrics_path: "/metrics".to_string(),
        }
    }
}

pub struct MetricsServer {
    config: MetricsServerConfig,
    registry: Arc<MetricsRegistry>,
    controller: ControllerHandle,
}

impl MetricsServer {
    pub fn new(config: MetricsServerConfig, registry: Arc<MetricsRegistry>, controller: ControllerHandle) -> Self {
        Self { config, registry, controller }
    }

    /// Runs indefinitely, serving metrics on the configured address. Spawn
    /// this as its own task.
    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .context("failed to bind metrics server")?;

        info!(
            "metrics server listening on http://{}{}",
            self.config.listen_addr, self.config.metrics_path
        );

        let registry = self.registry.clone();
        let metrics_path = self.config.metrics_path.clone();
        let controller = self.controller.clone();

        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("failed to accept metrics connection: {e}");
                    continue;
                }
            };

            let registry = registry.clone();
            let metrics_path = metrics_path.clone();
            let controller = controller.clone();

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let registry = registry.clone();
                    let metrics_path = metrics_path.clone();
                    let controller = controller.clone();
                    async move { handle_request(req, registry, metrics_path, controller).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("metrics connection error from {remote_addr}: {err}");
                }
            });
        }
    }

    /// Synchronous one-shot encode, for tests.
    pub fn serve_metrics_once(&self) -> Result<String> {
        encode_metrics(&self.registry)
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    registry: Arc<MetricsRegistry>,
    metrics_path: String,
    controller: ControllerHandle,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let path = req.uri().path();
    debug!("metrics request: {} {}", req.method(), path);

    if path == "/health" || path == "/healthz" {
        let state = controller.state();
        let healthy = matches!(state, ControllerState::Running | ControllerState::Starting);
        let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
        return Ok(Response::builder()
            .status(status)
            .body(Full::new(Bytes::from(format!("{state:?}"))))
            .unwrap());
    }

    if path == metrics_path {
        return match encode_metrics(&registry) {
            Ok(text) => Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4")
                .body(Full::new(Bytes::from(text)))
                .unwrap()),
            Err(e) => {
                error!("failed to encode metrics: {e}");
                Ok(Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Full::new(Bytes::from(format!("error: {e}"))))
                    .unwrap())
            }
        };
    }

    if path == "/" {
        let help = format!("arbitrage engine metrics\n\nendpoints:\n  {metrics_path} - prometheus metrics\n  /healthz - liveness\n");
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from(help)))
            .unwrap());
    }

    warn!("unknown metrics endpoint requested: {path}");
    Ok(Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Full::new(Bytes::from("Not Found")))
        .unwrap())
}

fn encode_metrics(registry: &MetricsRegistry) -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = registry.registry().gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).context("failed to encode metrics")?;
    String::from_utf8(buffer).context("invalid utf-8 in metrics")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_conventions() {
        let config = MetricsServerConfig::default();
        assert_eq!(config.metrics_path, "/metrics");
        assert_eq!(config.listen_addr.port(), 9090);
    }

    #[test]
    fn serve_metrics_once_encodes_prometheus_text() {
        let registry = Arc::new(MetricsRegistry::new().unwrap());
        registry.evaluator().opportunities_evaluated_total.inc();
        let server = MetricsServer::new(MetricsServerConfig::default(), registry, ControllerHandle::new());
        let text = server.serve_metrics_once().unwrap();
        assert!(text.contains("arb_evaluator_opportunities_evaluated_total"));
        assert!(text.contains("TYPE"));
    }

    #[test]
    fn health_reports_unhealthy_before_handle_is_running() {
        let handle = ControllerHandle::new();
        assert!(!matches!(handle.state(), ControllerState::Running | ControllerState::Starting));
    }
}
