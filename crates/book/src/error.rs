//! Book Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A book error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for book operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The file is not a valid container for its claimed format.
    #[display("invalid source file: {}", _0.display())]
    InvalidSourceFile(#[error(not(source))] PathBuf),
    /// The format is not one iosra can read metadata from.
    #[display("unsupported format: {}", _0.display())]
    UnsupportedFormat(#[error(not(source))] PathBuf),
    #[display("I/O error: {_0}")]
    Io(std::io::Error),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
