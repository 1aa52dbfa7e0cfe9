//! Session-level counters the controller accumulates across its run, and
//! that `arb-bin` prints as the operator-facing summary on shutdown (§6).

use std::collections::HashMap;

use rust_decimal::Decimal;

#[derive(Debug, Clone, Default)]
pub struct ControllerStats {
    pub ticks: u64,
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub realized_pnl: Decimal,
    pub rejections_by_reason: HashMap<String, u64>,
}

impl ControllerStats {
    pub fn record_rejection(&mut self, reason: &str) {
        *self.rejections_by_reason.entry(reason.to_string()).or_insert(0) += 1;
    }
}
