//! Resilience patterns: exponential backoff for retries, and the feed
//! handler that uses it to keep the order-book cache alive across exchange
//! disconnects.

pub mod backoff;
pub mod feed;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use feed::{ConnectionState, FeedHandler, ReconnectionStats};
