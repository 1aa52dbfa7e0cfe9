//! Core value types shared across the arbitrage engine: instruments, cyclic
//! trading paths, and the small enums that thread through every subsystem.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Assets that rank above everything else when picking the canonical
/// base/quote order for a pair. Mirrors how the exchange itself names
/// markets (`BTC-USDT`, not `USDT-BTC`).
const MAJOR_ASSETS: &[&str] = &["BTC", "ETH"];

/// Stablecoins rank below majors but above everything else.
const STABLE_ASSETS: &[&str] = &["USDT", "USDC", "BUSD", "DAI"];

fn asset_tier(asset: &str) -> u8 {
    if MAJOR_ASSETS.contains(&asset) {
        0
    } else if STABLE_ASSETS.contains(&asset) {
        1
    } else {
        2
    }
}

/// Orders a pair of asset symbols into (base, quote) using the priority rule
/// major > stable > lexicographic.
fn canonical_order(a: &str, b: &str) -> (String, String) {
    match asset_tier(a).cmp(&asset_tier(b)) {
        std::cmp::Ordering::Less => (a.to_string(), b.to_string()),
        std::cmp::Ordering::Greater => (b.to_string(), a.to_string()),
        std::cmp::Ordering::Equal => {
            if a <= b {
                (a.to_string(), b.to_string())
            } else {
                (b.to_string(), a.to_string())
            }
        }
    }
}

/// A tradeable instrument, canonicalized so that `Pair::new("USDT", "BTC")`
/// and `Pair::new("BTC", "USDT")` produce the same value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pair {
    pub base: String,
    pub quote: String,
}

impl Pair {
    /// Builds a pair from two asset symbols, applying the canonical
    /// base/quote ordering. Errors if the two symbols are equal.
    pub fn new(asset_a: impl Into<String>, asset_b: impl Into<String>) -> Result<Self, PairError> {
        let asset_a = asset_a.into();
        let asset_b = asset_b.into();
        if asset_a.eq_ignore_ascii_case(&asset_b) {
            return Err(PairError::SameAsset(asset_a));
        }
        let (base, quote) = canonical_order(&asset_a, &asset_b);
        Ok(Self { base, quote })
    }

    /// Parses a canonical `BASE-QUOTE` id back into a `Pair` without
    /// re-deriving the canonical order (used when the id came from a
    /// trusted source, e.g. our own config).
    pub fn from_id(id: &str) -> Result<Self, PairError> {
        let (base, quote) = id
            .split_once('-')
            .ok_or_else(|| PairError::MalformedId(id.to_string()))?;
        if base.is_empty() || quote.is_empty() {
            return Err(PairError::MalformedId(id.to_string()));
        }
        Ok(Self {
            base: base.to_string(),
            quote: quote.to_string(),
        })
    }

    /// Canonical `BASE-QUOTE` id, e.g. `BTC-USDT`.
    pub fn id(&self) -> String {
        format!("{}-{}", self.base, self.quote)
    }

    /// True if `asset` is either leg of this pair.
    pub fn touches(&self, asset: &str) -> bool {
        self.base == asset || self.quote == asset
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairError {
    SameAsset(String),
    MalformedId(String),
}

impl fmt::Display for PairError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairError::SameAsset(asset) => write!(f, "base and quote asset are both {asset}"),
            PairError::MalformedId(id) => write!(f, "malformed pair id '{id}', expected BASE-QUOTE"),
        }
    }
}

impl std::error::Error for PairError {}

/// Which side of a pair a trade executes on. Reused both for a path step's
/// intended action and for the concrete order placed to realize it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single leg of a configured arbitrage path: trade `pair` in direction
/// `action`. Buying `BASE-QUOTE` spends quote and yields base; selling
/// spends base and yields quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStep {
    pub pair: Pair,
    pub action: Side,
}

impl PathStep {
    pub fn new(pair: Pair, action: Side) -> Self {
        Self { pair, action }
    }

    /// The asset this step consumes.
    pub fn input_asset(&self) -> &str {
        match self.action {
            Side::Buy => &self.pair.quote,
            Side::Sell => &self.pair.base,
        }
    }

    /// The asset this step produces.
    pub fn output_asset(&self) -> &str {
        match self.action {
            Side::Buy => &self.pair.base,
            Side::Sell => &self.pair.quote,
        }
    }
}

/// An ordered, cyclic sequence of trades that starts and ends in the same
/// asset. Paths are statically configured, never discovered at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub name: String,
    pub steps: Vec<PathStep>,
}

impl Path {
    /// Builds a path, validating that it has at least three steps, that
    /// each step's output feeds the next step's input, and that the cycle
    /// closes (last output == first input).
    pub fn new(name: impl Into<String>, steps: Vec<PathStep>) -> Result<Self, PathError> {
        if steps.len() < 3 {
            return Err(PathError::TooShort(steps.len()));
        }
        for window in steps.windows(2) {
            let (prev, next) = (&window[0], &window[1]);
            if prev.output_asset() != next.input_asset() {
                return Err(PathError::Disjoint {
                    produced: prev.output_asset().to_string(),
                    expected: next.input_asset().to_string(),
                });
            }
        }
        let first_input = steps[0].input_asset();
        let last_output = steps[steps.len() - 1].output_asset();
        if first_input != last_output {
            return Err(PathError::DoesNotClose {
                start: first_input.to_string(),
                end: last_output.to_string(),
            });
        }
        Ok(Self {
            name: name.into(),
            steps,
        })
    }

    pub fn start_asset(&self) -> &str {
        self.steps[0].input_asset()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    TooShort(usize),
    Disjoint { produced: String, expected: String },
    DoesNotClose { start: String, end: String },
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathError::TooShort(n) => write!(f, "path needs at least 3 steps, got {n}"),
            PathError::Disjoint { produced, expected } => write!(
                f,
                "step output '{produced}' does not feed next step's input '{expected}'"
            ),
            PathError::DoesNotClose { start, end } => {
                write!(f, "path does not close: starts in {start}, ends in {end}")
            }
        }
    }
}

impl std::error::Error for PathError {}

/// Locally-assigned order identifier, monotonically increasing within a
/// process lifetime. Used to tag placements before the exchange hands back
/// its own order id, and to reconcile status polls by that returned id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalOrderId(pub u64);

static NEXT_LOCAL_ORDER_ID: AtomicU64 = AtomicU64::new(1);

impl LocalOrderId {
    pub fn next() -> Self {
        Self(NEXT_LOCAL_ORDER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for LocalOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local-{}", self.0)
    }
}

/// Lifecycle state of an order as tracked against the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

/// Terminal outcome of a single executed leg, distinct from `OrderStatus`:
/// this is the executor's verdict on the leg, not the exchange's order
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegStatus {
    Filled,
    Cancelled,
    Failed,
    Timeout,
    NotAttempted,
}

impl fmt::Display for LegStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LegStatus::Filled => "filled",
            LegStatus::Cancelled => "cancelled",
            LegStatus::Failed => "failed",
            LegStatus::Timeout => "timeout",
            LegStatus::NotAttempted => "not_attempted",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_order_prefers_major_over_stable() {
        let pair = Pair::new("USDT", "BTC").unwrap();
        assert_eq!(pair.id(), "BTC-USDT");
    }

    #[test]
    fn canonical_order_breaks_stable_ties_lexicographically() {
        let pair = Pair::new("USDT", "USDC").unwrap();
        assert_eq!(pair.id(), "USDC-USDT");
    }

    #[test]
    fn same_asset_pair_is_rejected() {
        assert!(Pair::new("BTC", "BTC").is_err());
    }

    #[test]
    fn from_id_roundtrips() {
        let pair = Pair::from_id("BTC-USDT").unwrap();
        assert_eq!(pair.base, "BTC");
        assert_eq!(pair.quote, "USDT");
    }

    #[test]
    fn from_id_rejects_malformed() {
        assert!(Pair::from_id("BTCUSDT").is_err());
    }

    fn triangle() -> Path {
        Path::new(
            "usdt_btc_usdc",
            vec![
                PathStep::new(Pair::new("BTC", "USDT").unwrap(), Side::Buy),
                PathStep::new(Pair::new("BTC", "USDC").unwrap(), Side::Sell),
                PathStep::new(Pair::new("USDC", "USDT").unwrap(), Side::Sell),
            ],
        )
        .unwrap()
    }

    #[test]
    fn path_closes_and_chains() {
        let path = triangle();
        assert_eq!(path.start_asset(), "USDT");
        assert_eq!(path.len(), 3);
    }

    #[test]
    fn path_rejects_too_short() {
        let steps = vec![
            PathStep::new(Pair::new("BTC", "USDT").unwrap(), Side::Buy),
            PathStep::new(Pair::new("BTC", "USDT").unwrap(), Side::Sell),
        ];
        assert!(Path::new("short", steps).is_err());
    }

    #[test]
    fn path_rejects_disjoint_steps() {
        let steps = vec![
            PathStep::new(Pair::new("BTC", "USDT").unwrap(), Side::Buy),
            PathStep::new(Pair::new("ETH", "USDC").unwrap(), Side::Buy),
            PathStep::new(Pair::new("ETH", "USDT").unwrap(), Side::Sell),
        ];
        assert!(Path::new("disjoint", steps).is_err());
    }

    #[test]
    fn local_order_ids_are_monotonic() {
        let a = LocalOrderId::next();
        let b = LocalOrderId::next();
        assert!(b.0 > a.0);
    }
}
