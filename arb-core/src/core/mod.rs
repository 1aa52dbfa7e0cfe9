//! Core value types and the error taxonomy shared by every subsystem.

pub mod errors;
pub mod types;

pub use errors::{ConfigError, DataError, FatalError, OrderError, PartialFillError, RiskRejected, TransportError};
pub use types::{LegStatus, LocalOrderId, OrderStatus, Pair, PairError, Path, PathError, PathStep, Side};
