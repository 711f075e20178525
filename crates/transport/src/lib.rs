//! Transport port for reaching a reader app's sandbox on an attached device.
//!
//! Everything above this crate talks to the device through the
//! [`DeviceTransport`] trait. Paths handed to a transport are always
//! relative to the mounted app sandbox; a leading `/` is accepted and
//! stripped, so `/Library/calibre/status.xml` and `Library/calibre/status.xml`
//! name the same file.

pub mod error;
mod models;
mod path;
pub mod transport;

pub use crate::models::{DeviceIdentity, EntryKind, FileStat};
pub use crate::path::validate as validate_path;
pub use crate::transport::DeviceTransport;
use std::sync::Arc;

pub type TransportHandle = Arc<dyn DeviceTransport + Send + Sync>;
