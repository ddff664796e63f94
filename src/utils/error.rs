//! The `error` module defines the error types raised by the broker core.
//!
//! Almost every failure inside the broker is absorbed locally (clamped
//! parameters, dropped payload entries, retried lookups). What remains is
//! reported through [`BrokerError`].

/// Errors that can be raised by the broker core.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// A blocked read was interrupted before it completed.
    #[error("read cancelled while waiting for messages")]
    Cancelled,

    /// The sweep scheduler was configured with a zero period.
    #[error("sweep interval must be greater than zero")]
    InvalidSweepInterval,

    /// The sweep scheduler was started outside of a tokio runtime.
    #[error("no tokio runtime available to run the sweep scheduler")]
    NoRuntime,
}
