//! The `utils` module provides the pieces shared across the `pollbus` crate:
//! the broker error type and logging initialization.

pub mod error;
pub mod logging;
