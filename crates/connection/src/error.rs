//! Connection Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! Probing never returns these: a failed probe resets the connection and
//! reports "not handled" instead. They surface only from the explicit
//! operations a caller requests.

use derive_more::{Display, Error};

/// A connection error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for connection operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("transport error")]
    Transport,
    /// The device is absent, ejected, or the companion is not in sync mode.
    #[display("no live connection")]
    NotConnected,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotConnected)
    }
}
