//! Transport Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A transport error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// File does not exist on the device.
    #[display("file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// The sandbox refused access.
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// Underlying I/O error.
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Path contains invalid characters or escapes the sandbox.
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// No app sandbox is mounted; call `mount_app` first.
    #[display("no application sandbox is mounted")]
    NotMounted,
    /// The device went away or the USB stack misbehaved mid-operation.
    #[display("device unavailable: {_0}")]
    DeviceUnavailable(#[error(not(source))] String),
    /// The transport cannot answer this question on the current platform.
    #[display("unsupported by {_0} transport")]
    Unsupported(#[error(not(source))] String),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::DeviceUnavailable(_))
    }

    /// Returns `true` if the error means the device itself is unreachable,
    /// rather than a single file being missing or unreadable.
    pub fn is_communication(&self) -> bool {
        matches!(self, Self::DeviceUnavailable(_) | Self::NotMounted | Self::Io(_))
    }
}
