//! Transport over app sandboxes already mounted into the host filesystem.
//!
//! Tools such as `ifuse --documents <app_id>` expose a reader app's sandbox
//! as an ordinary directory. This transport expects one directory per app,
//! named after the app's bundle id, below a common root:
//!
//! ```text
//! <root>/
//!   com.appstafarian.MarvinIP/
//!     Documents/
//!     Library/
//!   com.amazon.Lassen/
//!     Documents/
//! ```
//!
//! The device counts as attached for as long as the root exists.

use super::{DeviceTransport, FileStatStream};
use crate::error::{ErrorKind, Result};
use crate::models::{DeviceIdentity, EntryKind, FileStat};
use crate::path::{validate as validate_path, validate_dir};
use async_stream::stream;
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use std::collections::BTreeMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use time::UtcDateTime;
use tokio::fs::{self, DirEntry};
use tokio::sync::RwLock;

enum WalkEntry {
    File(FileStat),
    Descend(PathBuf),
    Skip,
}

/// Transport over a host directory holding mounted app sandboxes.
///
/// # Examples
///
/// ```no_run
/// use iosra_transport::DeviceIdentity;
/// use iosra_transport::transport::MountedTransport;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = MountedTransport::new("ifuse", "/mnt/ipad", DeviceIdentity::new("00008030-001A"))?;
/// # Ok(())
/// # }
/// ```
pub struct MountedTransport {
    name: String,
    root: PathBuf,
    identity: DeviceIdentity,
    device_name: Option<String>,
    /// Root of the currently mounted app sandbox.
    sandbox: RwLock<Option<PathBuf>>,
}
impl MountedTransport {
    /// Create a transport rooted at an absolute host directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>, identity: DeviceIdentity) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        Ok(Self {
            name: name.into(),
            root,
            identity,
            device_name: None,
            sandbox: RwLock::new(None),
        })
    }

    /// Set the name reported by [`device_name`](DeviceTransport::device_name).
    pub fn with_device_name(mut self, device_name: impl Into<String>) -> Self {
        self.device_name = Some(device_name.into());
        self
    }

    async fn sandbox(&self) -> Result<PathBuf> {
        self.sandbox.read().await.clone().ok_or_raise(|| ErrorKind::NotMounted)
    }

    /// Validates the path and joins it with the mounted sandbox root.
    async fn absolute_path(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let validated = validate_path(path.as_ref())?;
        Ok(self.sandbox().await?.join(validated))
    }

    fn relative_path(sandbox: &Path, absolute: &Path) -> Result<PathBuf> {
        let relative = absolute
            .strip_prefix(sandbox)
            .or_raise(|| ErrorKind::InvalidPath(absolute.to_path_buf()))?;
        validate_path(relative)
    }

    fn file_stat(path: &Path, metadata: &Metadata) -> Result<FileStat> {
        let modified: UtcDateTime = metadata.modified().map_err(ErrorKind::Io)?.into();
        // Not every filesystem (or FUSE driver) records a birth time.
        let created = metadata.created().map(UtcDateTime::from).unwrap_or(modified);
        Ok(FileStat::new(path, metadata.len(), modified, created))
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }

    async fn process_entry(sandbox: &Path, entry: DirEntry) -> Result<WalkEntry> {
        let path = entry.path();
        let metadata = entry.metadata().await.map_err(|e| Self::map_io_error(e, &path))?;
        if metadata.is_dir() {
            return Ok(WalkEntry::Descend(path));
        }
        if metadata.is_file() {
            let relative = Self::relative_path(sandbox, &path)?;
            return Ok(WalkEntry::File(Self::file_stat(&relative, &metadata)?));
        }
        // Broken symlinks and sockets are not books.
        Ok(WalkEntry::Skip)
    }
}

#[async_trait]
impl DeviceTransport for MountedTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_devices(&self) -> Result<Vec<DeviceIdentity>> {
        match fs::try_exists(&self.root).await {
            Ok(true) => Ok(vec![self.identity.clone()]),
            Ok(false) => Ok(vec![]),
            Err(e) => Err(ErrorKind::DeviceUnavailable(e.to_string()).into()),
        }
    }

    async fn mount_app(&self, device: &DeviceIdentity, app_id: &str) -> Result<bool> {
        if device != &self.identity {
            exn::bail!(ErrorKind::DeviceUnavailable(format!("unknown device {device}")));
        }
        // Bundle ids are single path components.
        let candidate = self.root.join(validate_path(app_id)?);
        let is_dir = fs::metadata(&candidate).await.map(|m| m.is_dir()).unwrap_or(false);
        if is_dir {
            tracing::debug!(transport = %self.name, app_id, "Mounted app sandbox");
            *self.sandbox.write().await = Some(candidate);
        }
        Ok(is_dir)
    }

    async fn device_name(&self, _device: &DeviceIdentity) -> Result<Option<String>> {
        Ok(self.device_name.clone())
    }

    async fn disconnect(&self) -> Result<()> {
        *self.sandbox.write().await = None;
        Ok(())
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let abs_path = self.absolute_path(path).await?;
        Ok(fs::try_exists(&abs_path).await.map_err(ErrorKind::Io)?)
    }

    async fn stat(&self, path: &Path) -> Result<FileStat> {
        let abs_path = self.absolute_path(path).await?;
        let metadata = fs::metadata(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        Self::file_stat(&validate_path(path)?, &metadata)
    }

    async fn list_dir(&self, path: &Path) -> Result<BTreeMap<String, EntryKind>> {
        let abs_path = self.sandbox().await?.join(validate_dir(path)?);
        let mut listing = BTreeMap::new();
        let mut entries = match fs::read_dir(&abs_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(listing),
            Err(e) => exn::bail!(Self::map_io_error(e, path)),
        };
        while let Some(entry) = entries.next_entry().await.map_err(|e| Self::map_io_error(e, path))? {
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                continue;
            };
            let file_type = entry.file_type().await.map_err(|e| Self::map_io_error(e, path))?;
            let kind = match file_type.is_dir() {
                true => EntryKind::Directory,
                false => EntryKind::File,
            };
            listing.insert(name, kind);
        }
        Ok(listing)
    }

    fn list_stream<'a>(&'a self, prefix: &'a Path) -> FileStatStream<'a> {
        Box::pin(stream! {
            let sandbox = match self.sandbox().await {
                Ok(sandbox) => sandbox,
                Err(e) => {
                    yield Err(e);
                    return;
                },
            };
            let start = match validate_dir(prefix) {
                Ok(relative) => sandbox.join(relative),
                Err(e) => {
                    yield Err(e);
                    return;
                },
            };
            let mut stack = vec![start];

            'dirs: while let Some(current) = stack.pop() {
                let mut entries = match fs::read_dir(&current).await {
                    Ok(entries) => entries,
                    // A missing folder is an empty folder.
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(err) => {
                        yield Err(exn::Exn::from(Self::map_io_error(err, &current)));
                        continue 'dirs;
                    }
                };

                'entries: loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break 'entries,
                        Err(e) => { yield Err(exn::Exn::from(Self::map_io_error(e, &current))); continue 'entries; },
                    };
                    match Self::process_entry(&sandbox, entry).await {
                        Ok(WalkEntry::File(f)) => yield Ok(f),
                        Ok(WalkEntry::Descend(d)) => stack.push(d),
                        Ok(WalkEntry::Skip) => {},
                        Err(e) => yield Err(e),
                    };
                }
            }
        })
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let abs_path = self.absolute_path(path).await?;
        Ok(fs::read(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let abs_path = self.absolute_path(path).await?;
        if let Some(parent) = abs_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, path))?;
        }
        Ok(fs::write(&abs_path, data).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from_path = self.absolute_path(from).await?;
        let to_path = self.absolute_path(to).await?;
        if let Some(parent) = to_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, to))?;
        }
        Ok(fs::rename(&from_path, &to_path).await.map_err(|e| Self::map_io_error(e, from))?)
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let abs_path = self.absolute_path(path).await?;
        Ok(fs::remove_file(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    #[cfg(unix)]
    async fn free_bytes(&self) -> Result<u64> {
        let sandbox = self.sandbox().await?;
        let stat = tokio::task::spawn_blocking(move || nix::sys::statvfs::statvfs(&sandbox))
            .await
            .or_raise(|| ErrorKind::DeviceUnavailable("statvfs task failed".to_string()))?
            .or_raise(|| ErrorKind::DeviceUnavailable("statvfs failed".to_string()))?;
        Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
    }

    #[cfg(not(unix))]
    async fn free_bytes(&self) -> Result<u64> {
        exn::bail!(ErrorKind::Unsupported(self.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    async fn mounted(app: &str) -> (tempfile::TempDir, MountedTransport) {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp_dir.path().join(app).join("Documents")).unwrap();
        let transport = MountedTransport::new("test", temp_dir.path(), DeviceIdentity::new("udid-1")).unwrap();
        assert!(transport.mount_app(&DeviceIdentity::new("udid-1"), app).await.unwrap());
        (temp_dir, transport)
    }

    #[test]
    fn test_new_requires_absolute_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(MountedTransport::new("t", temp_dir.path(), DeviceIdentity::new("x")).is_ok());
        assert!(MountedTransport::new("t", "relative/path", DeviceIdentity::new("x")).is_err());
    }

    #[tokio::test]
    async fn test_list_devices_follows_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("ipad");
        let transport = MountedTransport::new("t", &root, DeviceIdentity::new("udid-1")).unwrap();
        assert!(transport.list_devices().await.unwrap().is_empty());
        std::fs::create_dir_all(&root).unwrap();
        assert_eq!(transport.list_devices().await.unwrap(), vec![DeviceIdentity::new("udid-1")]);
    }

    #[tokio::test]
    async fn test_mount_missing_app() {
        let temp_dir = tempfile::tempdir().unwrap();
        let transport = MountedTransport::new("t", temp_dir.path(), DeviceIdentity::new("udid-1")).unwrap();
        assert!(!transport.mount_app(&DeviceIdentity::new("udid-1"), "com.amazon.Lassen").await.unwrap());
        let err = transport.read(Path::new("/Documents/a.pdf")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotMounted));
    }

    #[tokio::test]
    async fn test_write_read_rename_delete() {
        let (_dir, transport) = mounted("com.appstafarian.MarvinIP").await;
        transport.write(Path::new("/Library/calibre/cmd.tmp"), b"<x/>").await.unwrap();
        transport
            .rename(Path::new("/Library/calibre/cmd.tmp"), Path::new("/Library/calibre/cmd.xml"))
            .await
            .unwrap();
        assert!(!transport.exists(Path::new("/Library/calibre/cmd.tmp")).await.unwrap());
        assert_eq!(transport.read(Path::new("/Library/calibre/cmd.xml")).await.unwrap(), b"<x/>");
        transport.delete(Path::new("/Library/calibre/cmd.xml")).await.unwrap();
        let err = transport.delete(Path::new("/Library/calibre/cmd.xml")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stat_and_list_dir() {
        let (_dir, transport) = mounted("com.goodiware.GoodReader").await;
        transport.write(Path::new("/Documents/a.pdf"), b"12345").await.unwrap();
        transport.write(Path::new("/Documents/sub/b.pdf"), b"1").await.unwrap();
        let stat = transport.stat(Path::new("/Documents/a.pdf")).await.unwrap();
        assert_eq!(stat.path, Path::new("Documents/a.pdf"));
        assert_eq!(stat.size, 5);
        let listing = transport.list_dir(Path::new("/Documents")).await.unwrap();
        assert_eq!(listing.get("a.pdf"), Some(&EntryKind::File));
        assert_eq!(listing.get("sub"), Some(&EntryKind::Directory));
        assert!(transport.list_dir(Path::new("/Nope")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_stream_recurses() {
        let (_dir, transport) = mounted("com.amazon.Lassen").await;
        transport.write(Path::new("/Documents/a.mobi"), b"a").await.unwrap();
        transport.write(Path::new("/Documents/x/y/b.mobi"), b"b").await.unwrap();
        transport.write(Path::new("/Library/other"), b"c").await.unwrap();
        let mut paths: Vec<_> = transport
            .list_stream(Path::new("/Documents"))
            .map_ok(|s| s.path)
            .try_collect()
            .await
            .unwrap();
        paths.sort();
        assert_eq!(paths, vec![PathBuf::from("Documents/a.mobi"), PathBuf::from("Documents/x/y/b.mobi")]);
    }

    #[tokio::test]
    async fn test_disconnect_unmounts() {
        let (_dir, transport) = mounted("com.amazon.Lassen").await;
        transport.disconnect().await.unwrap();
        assert!(transport.exists(Path::new("/Documents")).await.is_err());
    }
}
