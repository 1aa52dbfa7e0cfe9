//! Execution value types: the per-leg result and the bundle returned for a
//! whole attempted opportunity.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::types::LegStatus;

/// Outcome of a single leg. `average_price` is defined iff `filled_size >
/// 0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegResult {
    pub pair: String,
    pub order_id: Option<String>,
    pub requested_size: Decimal,
    pub filled_size: Decimal,
    pub average_price: Option<Decimal>,
    pub status: SerializableLegStatus,
    pub elapsed_ms: u64,
}

impl LegResult {
    pub fn not_attempted(pair: impl Into<String>, requested_size: Decimal) -> Self {
        Self {
            pair: pair.into(),
            order_id: None,
            requested_size,
            filled_size: Decimal::ZERO,
            average_price: None,
            status: SerializableLegStatus(LegStatus::NotAttempted),
            elapsed_ms: 0,
        }
    }
}

/// `LegStatus` does not derive `serde` (it lives in `core` alongside other
/// non-serializable domain enums); this newtype carries the serde impl
/// needed only by the persisted trade journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerializableLegStatus(pub LegStatus);

impl Serialize for SerializableLegStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for SerializableLegStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let status = match raw.as_str() {
            "filled" => LegStatus::Filled,
            "cancelled" => LegStatus::Cancelled,
            "failed" => LegStatus::Failed,
            "timeout" => LegStatus::Timeout,
            "not_attempted" => LegStatus::NotAttempted,
            other => return Err(serde::de::Error::custom(format!("unknown leg status '{other}'"))),
        };
        Ok(SerializableLegStatus(status))
    }
}

/// Bundle returned from a single executor invocation, and the unit
/// persisted to the trade journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub path_name: String,
    pub stake: Decimal,
    pub legs: Vec<LegResult>,
    pub realized_profit: Decimal,
    pub success: bool,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.legs.iter().map(|l| l.elapsed_ms).sum())
    }
}
