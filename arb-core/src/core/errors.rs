//! Error taxonomy for the arbitrage engine.
//!
//! Each variant maps to one of the categories the engine's operator cares
//! about: fatal-at-startup, recoverable-in-task, or recorded-and-continue.
//! None of these derive `thiserror`. The match arms are exhaustive and the
//! messages are hand-written, matching how the rest of the core treats
//! domain errors.

use std::fmt;

/// Invalid or unknown configuration key; fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    UnknownKey(String),
    InvalidValue { key: String, reason: String },
    Missing(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::UnknownKey(key) => write!(f, "unknown config key '{key}'"),
            ConfigError::InvalidValue { key, reason } => {
                write!(f, "invalid value for '{key}': {reason}")
            }
            ConfigError::Missing(key) => write!(f, "missing required config key '{key}'"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Network-level failure: timeout, disconnect, refused connection. Always
/// retried with backoff at the call site; surfaces to the evaluator as a
/// stale or missing order book rather than propagating raw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Timeout { op: String, after_ms: u64 },
    Disconnected { reason: String },
    Rest { status: u16, body: String },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Timeout { op, after_ms } => {
                write!(f, "'{op}' timed out after {after_ms}ms")
            }
            TransportError::Disconnected { reason } => write!(f, "disconnected: {reason}"),
            TransportError::Rest { status, body } => {
                write!(f, "REST call failed with status {status}: {body}")
            }
        }
    }
}

impl std::error::Error for TransportError {}

/// Malformed or internally inconsistent market data: crossed book, bad
/// checksum, unparseable message. The pair is dropped and resubscribed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataError {
    Crossed { pair: String },
    ChecksumMismatch { pair: String },
    Malformed { pair: String, reason: String },
}

impl fmt::Display for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataError::Crossed { pair } => write!(f, "{pair}: crossed book, invalidating"),
            DataError::ChecksumMismatch { pair } => write!(f, "{pair}: checksum mismatch"),
            DataError::Malformed { pair, reason } => write!(f, "{pair}: malformed update: {reason}"),
        }
    }
}

impl std::error::Error for DataError {}

/// Exchange rejected an order placement. Aborts the in-flight execution
/// chain and is recorded as a leg failure, not fatal to the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderError {
    pub pair: String,
    pub reason: String,
}

impl fmt::Display for OrderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "order rejected for {}: {}", self.pair, self.reason)
    }
}

impl std::error::Error for OrderError {}

/// A leg filled below the dust threshold at timeout; the remainder of the
/// chain is aborted but legs already filled are kept and reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialFillError {
    pub pair: String,
    pub filled: rust_decimal::Decimal,
    pub requested: rust_decimal::Decimal,
}

impl fmt::Display for PartialFillError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} partially filled: {} of {} requested",
            self.pair, self.filled, self.requested
        )
    }
}

impl std::error::Error for PartialFillError {}

/// Corrupted internal state: an invariant the rest of the system relies on
/// no longer holds. The controller transitions to `error` and shuts down;
/// this is the only variant that is not locally recoverable.
#[derive(Debug)]
pub struct FatalError {
    pub message: String,
    pub source: Option<anyhow::Error>,
}

impl FatalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn from_source(message: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            message: message.into(),
            source: Some(source),
        }
    }
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fatal: {}", self.message)
    }
}

impl std::error::Error for FatalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref())
    }
}

/// An opportunity failed one of the risk gate's checks. Recorded, never
/// fatal. The controller moves on to the next opportunity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskRejected {
    pub reason: String,
}

impl fmt::Display for RiskRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "risk rejected: {}", self.reason)
    }
}

impl std::error::Error for RiskRejected {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_error_carries_source_chain() {
        let source = anyhow::anyhow!("disk full");
        let err = FatalError::from_source("journal write failed", source);
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.to_string(), "fatal: journal write failed");
    }

    #[test]
    fn config_error_messages_name_the_key() {
        let err = ConfigError::UnknownKey("fooo".into());
        assert!(err.to_string().contains("fooo"));
    }
}
