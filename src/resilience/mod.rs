//! Resilience for the stream and REST paths
//!
//! Reconnect backoff and transient-error retry.

pub mod retry;

pub use retry::{retry_transient, Backoff, BackoffConfig};
