//! Device transport trait and implementations.
//!
//! A [`DeviceTransport`] is the low-level port to an attached iOS device: it
//! enumerates devices, mounts one reader app's sandbox, and offers plain file
//! operations inside that sandbox. It knows nothing about books or the
//! companion app's protocol.

mod mounted;
#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use self::mock::MockTransport;
pub use self::mounted::MountedTransport;
use crate::error::{ErrorKind, Result};
use crate::models::{DeviceIdentity, EntryKind, FileStat};
use async_trait::async_trait;
use exn::ResultExt;
use futures::{Stream, TryStreamExt};
use std::collections::BTreeMap;
use std::path::Path;
use std::pin::Pin;

pub(crate) type FileStatStream<'a> = Pin<Box<dyn Stream<Item = Result<FileStat>> + Send + 'a>>;

/// Unified interface to an attached device.
///
/// # Path Handling
/// All file paths are relative to the mounted app sandbox and must be
/// validated using [`validate_path`](crate::validate_path) before use.
/// Implementations enforce this validation. File operations before a
/// successful [`mount_app`](Self::mount_app) fail with
/// [`NotMounted`](crate::error::ErrorKind::NotMounted).
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use iosra_transport::{DeviceTransport, error::Result};
///
/// async fn status_exists(transport: &dyn DeviceTransport) -> Result<bool> {
///     transport.exists(Path::new("/Library/calibre/status.xml")).await
/// }
/// ```
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Name of the transport, used for logging only.
    fn name(&self) -> &str;

    /// Identities of every device currently attached.
    async fn list_devices(&self) -> Result<Vec<DeviceIdentity>>;

    /// Mount the sandbox of `app_id` on `device`.
    ///
    /// Returns `false` when the app is not installed. Errors are reserved for
    /// the device being unreachable.
    async fn mount_app(&self, device: &DeviceIdentity, app_id: &str) -> Result<bool>;

    /// Human-readable device name ("Zan's iPad"), if the device reports one.
    async fn device_name(&self, device: &DeviceIdentity) -> Result<Option<String>>;

    /// Release the low-level connection and unmount any sandbox.
    async fn disconnect(&self) -> Result<()>;

    /// Check if a file or directory exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Get file metadata without reading contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn stat(&self, path: &Path) -> Result<FileStat>;

    /// Immediate children of a directory. The sandbox root is `/`.
    ///
    /// Asking for a directory that doesn't exist returns an empty map.
    async fn list_dir(&self, path: &Path) -> Result<BTreeMap<String, EntryKind>>;

    /// Stream every file below `prefix`, recursing into sub-directories.
    fn list_stream<'a>(&'a self, prefix: &'a Path) -> FileStatStream<'a>;

    /// Collect [`list_stream()`](Self::list_stream) into a [`Vec`].
    async fn list(&self, prefix: &Path) -> Result<Vec<FileStat>> {
        self.list_stream(prefix).try_collect().await
    }

    /// Read file contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Create or overwrite a file. Parent directories are created as needed.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Rename a file within the sandbox, overwriting the destination.
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Delete a file.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Free space on the device, in bytes.
    async fn free_bytes(&self) -> Result<u64>;

    /// Copy a device file to a local path, creating parent directories.
    async fn copy_from_device(&self, path: &Path, local: &Path) -> Result<()> {
        let data = self.read(path).await?;
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::InvalidPath(local.to_path_buf()))?;
        }
        tokio::fs::write(local, data).await.or_raise(|| ErrorKind::InvalidPath(local.to_path_buf()))
    }

    /// Copy a local file onto the device.
    async fn copy_to_device(&self, local: &Path, path: &Path) -> Result<()> {
        let data = tokio::fs::read(local).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(local.to_path_buf()),
            _ => ErrorKind::Io(e),
        })?;
        self.write(path, &data).await
    }
}
