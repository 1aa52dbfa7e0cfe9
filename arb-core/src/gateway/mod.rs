//! Exchange Gateway contract (§6): the abstracted REST/WebSocket surface
//! the rest of the engine is built against. Signing, transport, and
//! reconnection mechanics of any specific exchange are an external
//! collaborator's concern. This module only fixes the shape of that
//! collaboration so the engine can be built and tested against it.

pub mod fake;
pub mod http;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use rust_decimal::Decimal;

use crate::core::errors::{OrderError, TransportError};
use crate::core::types::{OrderStatus, Side};
use crate::orderbook::Level;
use crate::portfolio::Portfolio;

/// Order type accepted by `place_order`. The executor only ever places
/// `Limit` orders (marketable, at a price computed from the current
/// top-of-book plus slippage tolerance); the others exist so the contract
/// matches what a real exchange client actually exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Limit,
    Market,
    PostOnly,
}

/// A single point-in-time best bid/ask reading, used by the REST fallback
/// path rather than the WebSocket feed.
#[derive(Debug, Clone)]
pub struct Ticker {
    pub pair: String,
    pub bid: Decimal,
    pub ask: Decimal,
}

/// REST snapshot of a pair's depth, used to (re)seed the order-book cache.
#[derive(Debug, Clone)]
pub struct BookSnapshot {
    pub pair: String,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

/// A single poll of an order's exchange-side state.
#[derive(Debug, Clone)]
pub struct OrderStatusReport {
    pub status: OrderStatus,
    pub filled_size: Decimal,
    pub average_price: Option<Decimal>,
}

/// One message off the `books` WebSocket channel.
#[derive(Debug, Clone)]
pub enum BookEvent {
    Snapshot { pair: String, bids: Vec<Level>, asks: Vec<Level>, checksum: Option<u32> },
    Update { pair: String, bids: Vec<Level>, asks: Vec<Level>, checksum: Option<u32> },
    Disconnected,
}

/// The full contract an exchange client must satisfy. `get_balance` and
/// `place_order`/`cancel_order`/`get_order_status` require credentials;
/// implementations may return `TransportError`/`OrderError` for all of
/// them in public-only mode.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn get_balance(&self) -> Result<Portfolio, TransportError>;

    async fn get_order_book(&self, pair: &str, depth: usize) -> Result<BookSnapshot, TransportError>;

    async fn get_ticker(&self, pair: &str) -> Result<Ticker, TransportError>;

    async fn place_order(
        &self,
        pair: &str,
        side: Side,
        order_type: OrderType,
        size: Decimal,
        price: Decimal,
    ) -> Result<String, OrderError>;

    async fn cancel_order(&self, pair: &str, order_id: &str) -> Result<(), OrderError>;

    async fn get_order_status(&self, pair: &str, order_id: &str) -> Result<OrderStatusReport, TransportError>;

    /// Subscribes to the `books` channel for each pair and returns a stream
    /// of snapshot/update/disconnect events in arrival order. Reconnection
    /// after a `Disconnected` event is the caller's responsibility (the
    /// feed handler task resubscribes and expects a fresh `Snapshot`).
    async fn subscribe_books(&self, pairs: Vec<String>) -> Result<BoxStream<'static, BookEvent>, TransportError>;

    /// `true` when the gateway was constructed without credentials
    /// (the portfolio cache and risk gate both key off of this).
    fn is_public_only(&self) -> bool;
}
