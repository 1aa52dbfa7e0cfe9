//! An in-memory, deterministic gateway used by scenario tests. Orders fill
//! according to a script the test installs up front rather than any real
//! matching logic. This exists to drive the executor and controller
//! through the literal end-to-end scenarios, not to model exchange
//! behavior.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::core::errors::{OrderError, TransportError};
use crate::core::types::{OrderStatus, Side};
use crate::gateway::{BookEvent, BookSnapshot, ExchangeGateway, OrderStatusReport, OrderType, Ticker};
use crate::portfolio::Portfolio;

/// A scripted fill for one placed order: how much of the requested size
/// actually fills, and at what terminal status.
#[derive(Debug, Clone)]
pub struct ScriptedFill {
    pub status: OrderStatus,
    pub filled_ratio: Decimal,
}

impl ScriptedFill {
    pub fn full() -> Self {
        Self {
            status: OrderStatus::Filled,
            filled_ratio: Decimal::ONE,
        }
    }

    pub fn partial(ratio: Decimal) -> Self {
        Self {
            status: OrderStatus::PartiallyFilled,
            filled_ratio: ratio,
        }
    }

    pub fn unfilled() -> Self {
        Self {
            status: OrderStatus::Open,
            filled_ratio: Decimal::ZERO,
        }
    }
}

struct PlacedOrder {
    pair: String,
    price: Decimal,
    requested: Decimal,
    fill: ScriptedFill,
}

pub struct FakeGateway {
    balances: Mutex<Portfolio>,
    scripted_fills: Mutex<Vec<ScriptedFill>>,
    orders: Mutex<HashMap<String, PlacedOrder>>,
    next_id: AtomicU64,
    public_only: bool,
}

impl FakeGateway {
    pub fn new(balances: Portfolio) -> Self {
        Self {
            balances: Mutex::new(balances),
            scripted_fills: Mutex::new(Vec::new()),
            orders: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            public_only: false,
        }
    }

    pub fn public_only() -> Self {
        Self {
            public_only: true,
            ..Self::new(Portfolio::empty())
        }
    }

    /// Queues the fill outcome for the next `place_order` call, in order.
    pub fn script_fill(&self, fill: ScriptedFill) {
        self.scripted_fills.lock().push(fill);
    }
}

#[async_trait]
impl ExchangeGateway for FakeGateway {
    async fn get_balance(&self) -> Result<Portfolio, TransportError> {
        if self.public_only {
            return Err(TransportError::Disconnected {
                reason: "public-only mode".into(),
            });
        }
        Ok(self.balances.lock().clone())
    }

    async fn get_order_book(&self, pair: &str, _depth: usize) -> Result<BookSnapshot, TransportError> {
        Ok(BookSnapshot {
            pair: pair.to_string(),
            bids: Vec::new(),
            asks: Vec::new(),
        })
    }

    async fn get_ticker(&self, pair: &str) -> Result<Ticker, TransportError> {
        Ok(Ticker {
            pair: pair.to_string(),
            bid: Decimal::ZERO,
            ask: Decimal::ZERO,
        })
    }

    async fn place_order(
        &self,
        pair: &str,
        _side: Side,
        _order_type: OrderType,
        size: Decimal,
        price: Decimal,
    ) -> Result<String, OrderError> {
        let fill = {
            let mut fills = self.scripted_fills.lock();
            if fills.is_empty() {
                ScriptedFill::full()
            } else {
                fills.remove(0)
            }
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let order_id = format!("fake-{id}");
        self.orders.lock().insert(
            order_id.clone(),
            PlacedOrder {
                pair: pair.to_string(),
                price,
                requested: size,
                fill,
            },
        );
        Ok(order_id)
    }

    async fn cancel_order(&self, _pair: &str, order_id: &str) -> Result<(), OrderError> {
        if let Some(order) = self.orders.lock().get_mut(order_id) {
            if order.fill.status == OrderStatus::Open {
                order.fill.status = OrderStatus::Cancelled;
            }
        }
        Ok(())
    }

    async fn get_order_status(&self, _pair: &str, order_id: &str) -> Result<OrderStatusReport, TransportError> {
        let orders = self.orders.lock();
        let order = orders.get(order_id).ok_or_else(|| TransportError::Rest {
            status: 404,
            body: format!("unknown order {order_id}"),
        })?;
        let filled_size = order.requested * order.fill.filled_ratio;
        Ok(OrderStatusReport {
            status: order.fill.status,
            filled_size,
            average_price: if filled_size > Decimal::ZERO { Some(order.price) } else { None },
        })
    }

    async fn subscribe_books(&self, _pairs: Vec<String>) -> Result<BoxStream<'static, BookEvent>, TransportError> {
        Ok(stream::empty().boxed())
    }

    fn is_public_only(&self) -> bool {
        self.public_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_fill_is_reported_back() {
        let gateway = FakeGateway::new(Portfolio::empty());
        gateway.script_fill(ScriptedFill::partial(Decimal::new(4, 1)));
        let id = gateway
            .place_order("BTC-USDT", Side::Buy, OrderType::Limit, Decimal::ONE, Decimal::from(100))
            .await
            .unwrap();
        let status = gateway.get_order_status("BTC-USDT", &id).await.unwrap();
        assert_eq!(status.status, OrderStatus::PartiallyFilled);
        assert_eq!(status.filled_size, Decimal::new(4, 1));
    }

    #[tokio::test]
    async fn public_only_gateway_refuses_balance() {
        let gateway = FakeGateway::public_only();
        assert!(gateway.get_balance().await.is_err());
        assert!(gateway.is_public_only());
    }
}
