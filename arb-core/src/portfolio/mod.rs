//! Portfolio cache (§4.2): a best-effort view of free balances, refreshed
//! periodically from REST and immediately after every execution. Sole
//! writer is the balance-sync task; readers are the controller and risk
//! gate.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rust_decimal::Decimal;

/// A balance snapshot: free balance per asset, taken at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Portfolio {
    pub balances: HashMap<String, Decimal>,
}

impl Portfolio {
    pub fn empty() -> Self {
        Self {
            balances: HashMap::new(),
        }
    }

    pub fn free(&self, asset: &str) -> Decimal {
        self.balances.get(asset).copied().unwrap_or(Decimal::ZERO)
    }
}

struct Inner {
    portfolio: Option<Portfolio>,
    updated_at: Instant,
}

/// `None` contents mean public-only mode: no credentials, no balances, and
/// the risk gate treats that as a hard reject of every opportunity.
pub struct PortfolioCache {
    inner: RwLock<Inner>,
    public_only: bool,
}

impl PortfolioCache {
    pub fn new(public_only: bool) -> Self {
        Self {
            inner: RwLock::new(Inner {
                portfolio: None,
                updated_at: Instant::now(),
            }),
            public_only,
        }
    }

    pub fn is_public_only(&self) -> bool {
        self.public_only
    }

    /// Returns `None` in public-only mode, or if no refresh has completed
    /// yet.
    pub fn snapshot(&self) -> Option<Portfolio> {
        if self.public_only {
            return None;
        }
        self.inner.read().portfolio.clone()
    }

    pub fn age(&self) -> Duration {
        self.inner.read().updated_at.elapsed()
    }

    /// Sole mutator, called by the balance-sync task after a REST refresh
    /// or by the executor's local balance-delta cache after a fill.
    pub fn update(&self, portfolio: Portfolio) {
        let mut inner = self.inner.write();
        inner.portfolio = Some(portfolio);
        inner.updated_at = Instant::now();
    }

    /// Applies a local delta (debit on placement, credit on fill) without
    /// waiting for the next REST refresh. Does nothing in public-only mode
    /// or before the first real snapshot has landed.
    pub fn apply_delta(&self, asset: &str, delta: Decimal) {
        let mut inner = self.inner.write();
        if let Some(portfolio) = inner.portfolio.as_mut() {
            let entry = portfolio.balances.entry(asset.to_string()).or_insert(Decimal::ZERO);
            *entry += delta;
            if *entry < Decimal::ZERO {
                *entry = Decimal::ZERO;
            }
        }
    }

    pub fn is_stale(&self, bound: Duration) -> bool {
        self.age() > bound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn public_only_cache_never_snapshots() {
        let cache = PortfolioCache::new(true);
        let mut balances = HashMap::new();
        balances.insert("USDT".to_string(), dec!(1000));
        cache.update(Portfolio { balances });
        assert!(cache.snapshot().is_none());
    }

    #[test]
    fn private_cache_reflects_updates() {
        let cache = PortfolioCache::new(false);
        let mut balances = HashMap::new();
        balances.insert("USDT".to_string(), dec!(1000));
        cache.update(Portfolio { balances });
        let snap = cache.snapshot().unwrap();
        assert_eq!(snap.free("USDT"), dec!(1000));
        assert_eq!(snap.free("BTC"), Decimal::ZERO);
    }

    #[test]
    fn delta_applies_and_floors_at_zero() {
        let cache = PortfolioCache::new(false);
        let mut balances = HashMap::new();
        balances.insert("USDT".to_string(), dec!(10));
        cache.update(Portfolio { balances });
        cache.apply_delta("USDT", dec!(-50));
        assert_eq!(cache.snapshot().unwrap().free("USDT"), Decimal::ZERO);
    }

    #[test]
    fn staleness_is_measured_from_last_update() {
        let cache = PortfolioCache::new(false);
        cache.update(Portfolio::empty());
        assert!(!cache.is_stale(Duration::from_secs(60)));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.is_stale(Duration::from_millis(1)));
    }
}
