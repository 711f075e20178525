//! Library Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! Errors from the lower crates are re-raised under the kind that tells the
//! user what to do about them. The original error stays in the tree as a
//! child frame.

use derive_more::{Display, Error};
use iosra_cache::error::{Error as CacheError, ErrorKind as CacheErrorKind};
use iosra_connection::error::Error as ConnectionError;
use iosra_protocol::error::{Error as ProtocolError, ErrorKind as ProtocolErrorKind};
use iosra_transport::error::{Error as TransportError, ErrorKind as TransportErrorKind};
use std::path::PathBuf;

/// A library error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

const RECONNECT: &str = "check the USB cable and that the device is unlocked, then reconnect it";

/// Actionable error categories.
///
/// ### Taxonomy
/// - [`ErrorKind::DatabaseNotFound`]
/// - [`ErrorKind::DatabaseMalformed`]
/// - [`ErrorKind::OperationTimedOut`]
/// - [`ErrorKind::Communication`]
/// - [`ErrorKind::InvalidSourceFile`]
///
/// ### Dependency Errors
/// - [`ErrorKind::Cache`]
/// - [`ErrorKind::Protocol`]
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A required file is missing from the device.
    #[display("database not found: {}", _0.display())]
    DatabaseNotFound(#[error(not(source))] PathBuf),
    /// The companion catalog exists but cannot be read. Cached booklists
    /// derived from it have been discarded.
    #[display("database malformed: {_0}")]
    DatabaseMalformed(#[error(not(source))] String),
    /// The companion app did not finish a command in time.
    #[display("'{_0}' timed out; make sure the companion app is open and in sync mode, then try again")]
    OperationTimedOut(#[error(not(source))] String),
    /// The device went away mid-operation.
    #[display("lost contact with the device: {_0}")]
    Communication(#[error(not(source))] &'static str),
    /// A book file is not a valid container for its format.
    #[display("invalid source file: {}", _0.display())]
    InvalidSourceFile(#[error(not(source))] PathBuf),
    /// The device is absent, ejected, or the companion is not in sync mode.
    #[display("no live connection to the device")]
    NotConnected,
    /// Reading or writing a local cache database failed.
    #[display("local cache error")]
    Cache,
    /// A command envelope could not be built or understood.
    #[display("companion protocol error")]
    Protocol,
    /// An upload filename template could not be rendered.
    #[display("issue with filename generation from template")]
    Template,
    /// A local file could not be read or written.
    #[display("local file error: {}", _0.display())]
    LocalFile(#[error(not(source))] PathBuf),
    /// No supported reader app goes by this name.
    #[display("unknown reader app '{_0}'")]
    UnknownApp(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::OperationTimedOut(_) | Self::Communication(_) | Self::NotConnected)
    }

    #[track_caller]
    pub fn transport(err: TransportError) -> Error {
        let kind = match &*err {
            TransportErrorKind::NotFound(path) => Self::DatabaseNotFound(path.clone()),
            _ => Self::Communication(RECONNECT),
        };
        err.raise(kind)
    }

    /// Triage a transport failure on one book of a batch: a lost device
    /// ends the batch, anything else becomes the reason recorded for the
    /// book.
    #[track_caller]
    pub(crate) fn per_book(err: TransportError) -> Result<String> {
        if err.is_communication() {
            return Err(Self::transport(err));
        }
        Ok((*err).to_string())
    }

    #[track_caller]
    pub fn protocol(err: ProtocolError) -> Error {
        let kind = match &*err {
            ProtocolErrorKind::OperationTimedOut(command) => Self::OperationTimedOut(command.clone()),
            ProtocolErrorKind::Transport => Self::Communication(RECONNECT),
            _ => Self::Protocol,
        };
        err.raise(kind)
    }

    #[track_caller]
    pub fn cache(err: CacheError) -> Error {
        let kind = match &*err {
            CacheErrorKind::NotFound(path) => Self::DatabaseNotFound(path.clone()),
            CacheErrorKind::Malformed(reason) => Self::DatabaseMalformed(reason.clone()),
            _ => Self::Cache,
        };
        err.raise(kind)
    }

    #[track_caller]
    pub fn connection(err: ConnectionError) -> Error {
        err.raise(Self::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_timeout_keeps_its_meaning() {
        let err: ProtocolError = exn::Exn::from(ProtocolErrorKind::OperationTimedOut("upload_books".to_string()));
        let err = ErrorKind::protocol(err);
        assert!(matches!(&*err, ErrorKind::OperationTimedOut(c) if c == "upload_books"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_cache_malformed_maps_to_taxonomy() {
        let err: CacheError = exn::Exn::from(CacheErrorKind::Malformed("Books".to_string()));
        assert!(matches!(&*ErrorKind::cache(err), ErrorKind::DatabaseMalformed(_)));
        let err: TransportError = exn::Exn::from(TransportErrorKind::DeviceUnavailable("gone".to_string()));
        assert!(matches!(&*ErrorKind::transport(err), ErrorKind::Communication(_)));
    }

    #[test]
    fn test_per_book_failures() {
        let err: TransportError = exn::Exn::from(TransportErrorKind::InvalidPath(PathBuf::from("../bad.pdf")));
        assert_eq!(ErrorKind::per_book(err).unwrap(), "invalid path: ../bad.pdf");
        let err: TransportError = exn::Exn::from(TransportErrorKind::NotMounted);
        assert!(matches!(&*ErrorKind::per_book(err).unwrap_err(), ErrorKind::Communication(_)));
    }
}
