//! Resilient order-book feed handler (§4.1): drives `OrderBookCache` off
//! `ExchangeGateway::subscribe_books`, reconnecting with exponential backoff
//! on disconnect and invalidating the cache so the evaluator never trades on
//! a frozen book while a reconnect is in flight.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tracing::{debug, error, info, warn};

use crate::core::errors::DataError;
use crate::gateway::{BookEvent, ExchangeGateway};
use crate::orderbook::{fold_checksum, OrderBookCache, Update};

use super::backoff::{BackoffConfig, ExponentialBackoff};

/// Connection state of the feed handler, surfaced to metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Reconnecting,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ReconnectionStats {
    pub reconnection_attempts: u64,
    pub successful_reconnections: u64,
    pub failed_reconnections: u64,
    pub last_reconnection: Option<Instant>,
}

impl Default for ReconnectionStats {
    fn default() -> Self {
        Self {
            reconnection_attempts: 0,
            successful_reconnections: 0,
            failed_reconnections: 0,
            last_reconnection: None,
        }
    }
}

/// Runs the feed loop until the gateway's stream ends for good (backoff
/// exhausted). Intended to be spawned as its own task by the controller.
pub struct FeedHandler {
    gateway: Arc<dyn ExchangeGateway>,
    cache: Arc<OrderBookCache>,
    pairs: Vec<String>,
    backoff_config: BackoffConfig,
    checksum_depth: usize,
}

impl FeedHandler {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        cache: Arc<OrderBookCache>,
        pairs: Vec<String>,
        backoff_config: BackoffConfig,
    ) -> Self {
        Self {
            gateway,
            cache,
            pairs,
            backoff_config,
            checksum_depth: 25,
        }
    }

    /// Subscribes, consumes events into the cache, and resubscribes with
    /// backoff on every disconnect. Returns once backoff is exhausted.
    pub async fn run(&self) -> ReconnectionStats {
        let mut backoff = ExponentialBackoff::with_config(self.backoff_config.clone());
        let mut stats = ReconnectionStats::default();
        let mut state = ConnectionState::Reconnecting;

        loop {
            stats.reconnection_attempts += 1;
            match self.gateway.subscribe_books(self.pairs.clone()).await {
                Ok(mut stream) => {
                    info!(pairs = ?self.pairs, "order book feed connected");
                    state = ConnectionState::Connected;
                    stats.successful_reconnections += 1;
                    stats.last_reconnection = Some(Instant::now());
                    backoff.reset();

                    while let Some(event) = stream.next().await {
                        if !self.handle_event(event) {
                            break;
                        }
                    }

                    warn!("order book feed disconnected, invalidating cache");
                    self.cache.invalidate_all();
                    state = ConnectionState::Reconnecting;
                }
                Err(e) => {
                    error!(error = %e, "failed to subscribe to order book feed");
                    stats.failed_reconnections += 1;
                }
            }

            if state == ConnectionState::Failed {
                break;
            }

            match backoff.next_delay() {
                Some(delay) => {
                    debug!(?delay, attempt = backoff.attempt_number(), "retrying feed subscription");
                    tokio::time::sleep(delay).await;
                }
                None => {
                    error!("order book feed exhausted reconnection attempts");
                    state = ConnectionState::Failed;
                    break;
                }
            }
        }

        stats
    }

    /// Applies one event to the cache. Returns `false` when the stream
    /// should be torn down and resubscribed.
    fn handle_event(&self, event: BookEvent) -> bool {
        match event {
            BookEvent::Snapshot { pair, bids, asks, checksum } => {
                self.cache.on_incremental_update(&pair, Update::Snapshot { bids, asks });
                self.verify_checksum(&pair, checksum);
                true
            }
            BookEvent::Update { pair, bids, asks, checksum } => {
                self.cache.on_incremental_update(&pair, Update::Delta { bids, asks });
                self.verify_checksum(&pair, checksum);
                true
            }
            BookEvent::Disconnected => false,
        }
    }

    fn verify_checksum(&self, pair: &str, checksum: Option<u32>) {
        let Some(expected) = checksum else {
            return;
        };
        let Some(book) = self.cache.fetch_or_stale_fallback(pair) else {
            return;
        };
        let actual = fold_checksum(&book, self.checksum_depth);
        if actual != expected {
            let err = DataError::ChecksumMismatch { pair: pair.to_string() };
            warn!(error = %err, expected, actual, "removing pair pending resync");
            self.cache.remove(pair);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::fake::FakeGateway;
    use crate::portfolio::Portfolio;

    #[tokio::test]
    async fn empty_stream_exhausts_backoff_quickly() {
        let gateway: Arc<dyn ExchangeGateway> = Arc::new(FakeGateway::new(Portfolio::empty()));
        let cache = Arc::new(OrderBookCache::new());
        let backoff = BackoffConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 1.5,
            max_retries: Some(2),
            jitter_factor: 0.0,
        };
        let handler = FeedHandler::new(gateway, cache, vec!["BTC-USDT".into()], backoff);
        let stats = handler.run().await;
        assert!(stats.reconnection_attempts >= 1);
    }
}
