//! Order-book cache and feed fusion (§4.1): the freshest consistent depth
//! view per subscribed pair, sourced from an incremental WebSocket feed with
//! REST-snapshot recovery. The cache is the sole piece of mutable shared
//! state the feed handler writes; everyone else only reads through
//! [`OrderBookCache::fetch`].

use std::time::{Duration, Instant};

use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::core::errors::DataError;

/// One price level: (price, size). A size of zero means "delete this level"
/// in a delta message, and is never stored.
pub type Level = (Decimal, Decimal);

/// A snapshot of one pair's depth at the moment it was last touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBook {
    pub pair: String,
    /// Sorted descending by price.
    pub bids: Vec<Level>,
    /// Sorted ascending by price.
    pub asks: Vec<Level>,
}

impl OrderBook {
    pub fn empty(pair: impl Into<String>) -> Self {
        Self {
            pair: pair.into(),
            bids: Vec::new(),
            asks: Vec::new(),
        }
    }

    pub fn best_bid(&self) -> Option<Level> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<Level> {
        self.asks.first().copied()
    }

    /// `bids[0].price <= asks[0].price` whenever both sides are non-empty.
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => bid >= ask,
            _ => false,
        }
    }
}

/// An update applied to a cached book: a full replacement or an incremental
/// delta where each level either upserts (size > 0) or deletes (size == 0).
#[derive(Debug, Clone)]
pub enum Update {
    Snapshot { bids: Vec<Level>, asks: Vec<Level> },
    Delta { bids: Vec<Level>, asks: Vec<Level> },
}

/// Result of a freshness-gated read.
#[derive(Debug, Clone)]
pub enum FetchResult {
    Fresh(OrderBook),
    /// Newest cached copy is older than the caller's freshness budget.
    Stale,
    /// The pair has never been subscribed/seen.
    Missing,
}

struct CachedBook {
    book: OrderBook,
    updated_at: Instant,
    crossed: bool,
}

/// Sole writer: the WebSocket feed handler task. Sole readers: the evaluator
/// and the controller's status surface. Backed by a concurrent map so reads
/// never block on each other; the single-writer discipline means no lock is
/// needed beyond what `DashMap` already provides per shard.
pub struct OrderBookCache {
    books: DashMap<String, CachedBook>,
}

impl OrderBookCache {
    pub fn new() -> Self {
        Self {
            books: DashMap::new(),
        }
    }

    /// Execution-path read: returns `Stale` if the cached copy is older than
    /// `freshness_budget`, `Missing` if the pair has never been seen, and
    /// never falls back to a slower source mid-evaluation.
    pub fn fetch(&self, pair: &str, freshness_budget: Duration) -> FetchResult {
        match self.books.get(pair) {
            None => FetchResult::Missing,
            Some(entry) => {
                if entry.crossed {
                    return FetchResult::Stale;
                }
                if entry.updated_at.elapsed() > freshness_budget {
                    FetchResult::Stale
                } else {
                    FetchResult::Fresh(entry.book.clone())
                }
            }
        }
    }

    /// Display-path-only read that ignores freshness and crossed-book
    /// invalidation. Never call this from the evaluator or executor.
    pub fn fetch_or_stale_fallback(&self, pair: &str) -> Option<OrderBook> {
        self.books.get(pair).map(|entry| entry.book.clone())
    }

    /// Age of the cached entry for `pair`, if any.
    pub fn age(&self, pair: &str) -> Option<Duration> {
        self.books.get(pair).map(|entry| entry.updated_at.elapsed())
    }

    /// Sole mutator. Snapshots replace the book wholesale; deltas merge
    /// level-by-level, removing levels whose incoming size is zero. After
    /// merging, checks for a crossed book and invalidates the pair if so.
    pub fn on_incremental_update(&self, pair: &str, update: Update) {
        if let Some(reason) = invalid_levels_reason(&update) {
            let err = DataError::Malformed { pair: pair.to_string(), reason };
            warn!(error = %err, "dropping update");
            return;
        }

        let mut entry = self
            .books
            .entry(pair.to_string())
            .or_insert_with(|| CachedBook {
                book: OrderBook::empty(pair),
                updated_at: Instant::now(),
                crossed: false,
            });

        match update {
            Update::Snapshot { bids, asks } => {
                entry.book.bids = sort_bids(bids);
                entry.book.asks = sort_asks(asks);
                entry.crossed = false;
            }
            Update::Delta { bids, asks } => {
                apply_delta(&mut entry.book.bids, bids, true);
                apply_delta(&mut entry.book.asks, asks, false);
            }
        }

        entry.updated_at = Instant::now();
        if entry.book.is_crossed() {
            let err = DataError::Crossed { pair: pair.to_string() };
            warn!(error = %err, "invalidating until next snapshot");
            entry.crossed = true;
        } else {
            entry.crossed = false;
        }
    }

    /// Marks every cached pair stale, used when the WebSocket session drops.
    /// Re-subscription will restore each pair via a fresh snapshot.
    pub fn invalidate_all(&self) {
        debug!("invalidating order book cache after disconnect");
        for mut entry in self.books.iter_mut() {
            entry.updated_at = Instant::now() - Duration::from_secs(24 * 3600);
        }
    }

    pub fn remove(&self, pair: &str) {
        self.books.remove(pair);
    }
}

impl Default for OrderBookCache {
    fn default() -> Self {
        Self::new()
    }
}

/// A negative price or size can only mean a corrupted or unparseable
/// message made it past the transport layer; never worth applying.
fn invalid_levels_reason(update: &Update) -> Option<String> {
    let (bids, asks) = match update {
        Update::Snapshot { bids, asks } => (bids, asks),
        Update::Delta { bids, asks } => (bids, asks),
    };
    for (price, size) in bids.iter().chain(asks.iter()) {
        if *price < Decimal::ZERO || *size < Decimal::ZERO {
            return Some(format!("negative price or size: {price}:{size}"));
        }
    }
    None
}

fn sort_bids(mut levels: Vec<Level>) -> Vec<Level> {
    levels.retain(|(_, size)| *size > Decimal::ZERO);
    levels.sort_by(|a, b| b.0.cmp(&a.0));
    levels
}

fn sort_asks(mut levels: Vec<Level>) -> Vec<Level> {
    levels.retain(|(_, size)| *size > Decimal::ZERO);
    levels.sort_by(|a, b| a.0.cmp(&b.0));
    levels
}

fn apply_delta(book_side: &mut Vec<Level>, updates: Vec<Level>, descending: bool) {
    for (price, size) in updates {
        let pos = book_side.iter().position(|(p, _)| *p == price);
        if size == Decimal::ZERO {
            if let Some(idx) = pos {
                book_side.remove(idx);
            }
            continue;
        }
        match pos {
            Some(idx) => book_side[idx].1 = size,
            None => book_side.push((price, size)),
        }
    }
    if descending {
        book_side.sort_by(|a, b| b.0.cmp(&a.0));
    } else {
        book_side.sort_by(|a, b| a.0.cmp(&b.0));
    }
}

/// Checksum scheme described in §4.1: integer-fold modulo 2^32 over the top
/// `depth` `price:size` pairs, alternating bid/ask starting with bid.
pub fn fold_checksum(book: &OrderBook, depth: usize) -> u32 {
    let mut acc: u64 = 0;
    for i in 0..depth {
        if let Some((price, size)) = book.bids.get(i) {
            acc = fold_in(acc, price, size);
        }
        if let Some((price, size)) = book.asks.get(i) {
            acc = fold_in(acc, price, size);
        }
    }
    acc as u32
}

fn fold_in(acc: u64, price: &Decimal, size: &Decimal) -> u64 {
    let token = format!("{price}:{size}");
    let mut next = acc;
    for byte in token.bytes() {
        next = next.wrapping_add(byte as u64);
    }
    next % (1u64 << 32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_update() -> Update {
        Update::Snapshot {
            bids: vec![(dec!(100), dec!(1)), (dec!(99), dec!(2))],
            asks: vec![(dec!(101), dec!(1)), (dec!(102), dec!(2))],
        }
    }

    #[test]
    fn fetch_missing_for_unknown_pair() {
        let cache = OrderBookCache::new();
        assert!(matches!(cache.fetch("BTC-USDT", Duration::from_millis(500)), FetchResult::Missing));
    }

    #[test]
    fn snapshot_then_fetch_is_fresh() {
        let cache = OrderBookCache::new();
        cache.on_incremental_update("BTC-USDT", sample_update());
        match cache.fetch("BTC-USDT", Duration::from_millis(500)) {
            FetchResult::Fresh(book) => {
                assert_eq!(book.best_bid(), Some((dec!(100), dec!(1))));
                assert_eq!(book.best_ask(), Some((dec!(101), dec!(1))));
            }
            other => panic!("expected fresh, got {other:?}"),
        }
    }

    #[test]
    fn stale_beyond_freshness_budget() {
        let cache = OrderBookCache::new();
        cache.on_incremental_update("BTC-USDT", sample_update());
        std::thread::sleep(Duration::from_millis(5));
        assert!(matches!(
            cache.fetch("BTC-USDT", Duration::from_millis(1)),
            FetchResult::Stale
        ));
    }

    #[test]
    fn delta_upserts_and_deletes_levels() {
        let cache = OrderBookCache::new();
        cache.on_incremental_update("BTC-USDT", sample_update());
        cache.on_incremental_update(
            "BTC-USDT",
            Update::Delta {
                bids: vec![(dec!(99), Decimal::ZERO), (dec!(100.5), dec!(3))],
                asks: vec![],
            },
        );
        let book = match cache.fetch("BTC-USDT", Duration::from_secs(1)) {
            FetchResult::Fresh(book) => book,
            other => panic!("expected fresh, got {other:?}"),
        };
        assert_eq!(book.bids, vec![(dec!(100.5), dec!(3)), (dec!(100), dec!(1))]);
    }

    #[test]
    fn crossed_book_invalidates_until_snapshot() {
        let cache = OrderBookCache::new();
        cache.on_incremental_update("BTC-USDT", sample_update());
        cache.on_incremental_update(
            "BTC-USDT",
            Update::Delta {
                bids: vec![(dec!(105), dec!(1))],
                asks: vec![],
            },
        );
        assert!(matches!(
            cache.fetch("BTC-USDT", Duration::from_secs(1)),
            FetchResult::Stale
        ));
        cache.on_incremental_update("BTC-USDT", sample_update());
        assert!(matches!(
            cache.fetch("BTC-USDT", Duration::from_secs(1)),
            FetchResult::Fresh(_)
        ));
    }

    #[test]
    fn invalidate_all_marks_everything_stale() {
        let cache = OrderBookCache::new();
        cache.on_incremental_update("BTC-USDT", sample_update());
        cache.invalidate_all();
        assert!(matches!(
            cache.fetch("BTC-USDT", Duration::from_secs(3600)),
            FetchResult::Stale
        ));
    }

    #[test]
    fn checksum_is_order_independent_of_call_site() {
        let cache = OrderBookCache::new();
        cache.on_incremental_update("BTC-USDT", sample_update());
        let book = match cache.fetch("BTC-USDT", Duration::from_secs(1)) {
            FetchResult::Fresh(book) => book,
            _ => unreachable!(),
        };
        let a = fold_checksum(&book, 25);
        let b = fold_checksum(&book, 25);
        assert_eq!(a, b);
    }
}
