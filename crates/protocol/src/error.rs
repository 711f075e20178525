//! Protocol Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A protocol error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The device could not be reached while staging or polling.
    #[display("transport error")]
    Transport,
    /// The companion app never acknowledged the command, or stopped
    /// reporting progress. The status artifact has been removed.
    #[display("companion app did not complete '{_0}' in time")]
    OperationTimedOut(#[error(not(source))] String),
    /// A status or connection artifact could not be understood.
    #[display("malformed {_0} artifact")]
    Malformed(#[error(not(source))] &'static str),
    /// Serializing a command envelope failed.
    #[display("could not serialize command envelope")]
    Serialize,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::OperationTimedOut(_) | Self::Transport)
    }
}
