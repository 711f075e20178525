//! In-memory device for testing.

use super::{DeviceTransport, FileStatStream};
use crate::error::{ErrorKind, Result};
use crate::models::{DeviceIdentity, EntryKind, FileStat};
use crate::path::{validate as validate_path, validate_dir};
use async_stream::stream;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use time::UtcDateTime;
use tokio::sync::RwLock;

#[derive(Clone)]
struct MockFile {
    created: UtcDateTime,
    modified: UtcDateTime,
    data: Vec<u8>,
}

/// In-memory device for testing.
///
/// Holds a single app sandbox's files in a `HashMap` behind a [`RwLock`],
/// plus the set of attached device identities and installed apps. File
/// operations work whether or not an app has been mounted, so tests can
/// seed and inspect the sandbox freely.
///
/// # Examples
///
/// ```
/// use iosra_transport::{DeviceIdentity, DeviceTransport};
/// use iosra_transport::transport::MockTransport;
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = MockTransport::with_files([("/Documents/foo.pdf", b"%PDF-1.4")])
///     .with_devices(["udid-1"])
///     .with_apps(["com.goodiware.GoodReader"]);
/// assert!(transport.mount_app(&DeviceIdentity::new("udid-1"), "com.goodiware.GoodReader").await?);
/// assert!(transport.exists(Path::new("/Documents/foo.pdf")).await?);
/// # Ok(())
/// # }
/// ```
pub struct MockTransport {
    name: String,
    files: RwLock<HashMap<PathBuf, MockFile>>,
    devices: RwLock<Vec<DeviceIdentity>>,
    apps: RwLock<HashSet<String>>,
    mounted: RwLock<Option<String>>,
    free: AtomicU64,
    fail_enumeration: AtomicBool,
    /// Files the sandbox refuses to delete.
    undeletable: RwLock<HashSet<PathBuf>>,
    mount_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
}

impl MockTransport {
    /// Create a mock device pre-populated with files.
    ///
    /// Panics if any path fails validation. If test setup is wrong, then
    /// the test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let mut map = HashMap::new();
        let now = UtcDateTime::now();
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                panic!("MockTransport::with_files: invalid path {}", path.display());
            };
            map.insert(validated, MockFile { created: now, modified: now, data: data.into() });
        }
        Self {
            name: "mock".to_string(),
            files: RwLock::new(map),
            devices: RwLock::new(Vec::new()),
            apps: RwLock::new(HashSet::new()),
            mounted: RwLock::new(None),
            free: AtomicU64::new(64 * 1024 * 1024 * 1024),
            fail_enumeration: AtomicBool::new(false),
            undeletable: RwLock::new(HashSet::new()),
            mount_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Attach devices with the given UDIDs.
    pub fn with_devices<S: Into<String>>(mut self, udids: impl IntoIterator<Item = S>) -> Self {
        self.devices = RwLock::new(udids.into_iter().map(DeviceIdentity::new).collect());
        self
    }

    /// Mark apps (by bundle id) as installed.
    pub fn with_apps<S: Into<String>>(mut self, app_ids: impl IntoIterator<Item = S>) -> Self {
        self.apps = RwLock::new(app_ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_free_bytes(self, free: u64) -> Self {
        self.free.store(free, Ordering::SeqCst);
        self
    }

    /// Replace the set of attached devices (simulates plugging/unplugging).
    pub async fn set_devices<S: Into<String>>(&self, udids: impl IntoIterator<Item = S>) {
        *self.devices.write().await = udids.into_iter().map(DeviceIdentity::new).collect();
    }

    pub async fn install_app(&self, app_id: impl Into<String>) {
        self.apps.write().await.insert(app_id.into());
    }

    pub async fn uninstall_app(&self, app_id: &str) {
        self.apps.write().await.remove(app_id);
    }

    /// Make device enumeration fail, as a USB stack error would.
    pub fn fail_enumeration(&self, fail: bool) {
        self.fail_enumeration.store(fail, Ordering::SeqCst);
    }

    /// Make deleting `path` fail with a permission error.
    pub async fn refuse_delete(&self, path: impl AsRef<Path>) {
        let Ok(path) = validate_path(path) else {
            panic!("MockTransport::refuse_delete: invalid path");
        };
        self.undeletable.write().await.insert(path);
    }

    pub fn mount_calls(&self) -> usize {
        self.mount_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    /// Bundle id of the currently mounted app, if any.
    pub async fn mounted_app(&self) -> Option<String> {
        self.mounted.read().await.clone()
    }

    /// Override a file's timestamps.
    pub async fn set_times(&self, path: impl AsRef<Path>, created: UtcDateTime, modified: UtcDateTime) -> Result<()> {
        let path = validate_path(path)?;
        let mut guard = self.files.write().await;
        let file = guard.get_mut(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        file.created = created;
        file.modified = modified;
        Ok(())
    }

    /// Every file path currently on the device, sorted.
    pub async fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.files.read().await.keys().cloned().collect();
        paths.sort();
        paths
    }

    fn file_stat(path: &Path, file: &MockFile) -> FileStat {
        FileStat::new(path, file.data.len() as u64, file.modified, file.created)
    }
}
impl Default for MockTransport {
    fn default() -> Self {
        let files: [(&str, &[u8]); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl DeviceTransport for MockTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_devices(&self) -> Result<Vec<DeviceIdentity>> {
        if self.fail_enumeration.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::DeviceUnavailable("simulated enumeration failure".to_string()));
        }
        Ok(self.devices.read().await.clone())
    }

    async fn mount_app(&self, device: &DeviceIdentity, app_id: &str) -> Result<bool> {
        self.mount_calls.fetch_add(1, Ordering::SeqCst);
        if !self.devices.read().await.contains(device) {
            exn::bail!(ErrorKind::DeviceUnavailable(format!("device {device} is not attached")));
        }
        let installed = self.apps.read().await.contains(app_id);
        if installed {
            *self.mounted.write().await = Some(app_id.to_string());
        }
        Ok(installed)
    }

    async fn device_name(&self, device: &DeviceIdentity) -> Result<Option<String>> {
        Ok(Some(format!("Mock iPad ({device})")))
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        *self.mounted.write().await = None;
        Ok(())
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        let guard = self.files.read().await;
        // Directories exist implicitly when any file lives below them.
        Ok(guard.contains_key(&path) || guard.keys().any(|p| p.starts_with(&path)))
    }

    async fn stat(&self, path: &Path) -> Result<FileStat> {
        let path = validate_path(path)?;
        let guard = self.files.read().await;
        let file = guard.get(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok(Self::file_stat(&path, file))
    }

    async fn list_dir(&self, path: &Path) -> Result<BTreeMap<String, EntryKind>> {
        let dir = validate_dir(path)?;
        let guard = self.files.read().await;
        let mut listing = BTreeMap::new();
        for file_path in guard.keys() {
            let Ok(rest) = file_path.strip_prefix(&dir) else {
                continue;
            };
            let mut components = rest.components();
            let Some(first) = components.next().and_then(|c| c.as_os_str().to_str()) else {
                continue;
            };
            let kind = match components.next() {
                Some(_) => EntryKind::Directory,
                None => EntryKind::File,
            };
            listing.insert(first.to_string(), kind);
        }
        Ok(listing)
    }

    fn list_stream<'a>(&'a self, prefix: &'a Path) -> FileStatStream<'a> {
        let validated_prefix = match validate_dir(prefix) {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };

        Box::pin(stream! {
            // Snapshot under the read lock, then drop it before yielding.
            let entries: Vec<FileStat> = {
                let guard = self.files.read().await;
                let mut entries: Vec<_> = guard
                    .iter()
                    .filter(|(path, _)| path.starts_with(&validated_prefix))
                    .map(|(path, file)| Self::file_stat(path, file))
                    .collect();
                entries.sort_by(|a, b| a.path.cmp(&b.path));
                entries
            };
            for entry in entries {
                yield Ok(entry);
            }
        })
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = validate_path(path)?;
        let file = self.files.read().await.get(&path).cloned().ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))?;
        Ok(file.data)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = validate_path(path)?;
        let now = UtcDateTime::now();
        let mut guard = self.files.write().await;
        let created = guard.get(&path).map(|f| f.created).unwrap_or(now);
        guard.insert(path, MockFile { created, modified: now, data: data.to_vec() });
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from = validate_path(from)?;
        let to = validate_path(to)?;
        let mut guard = self.files.write().await;
        let file = guard.remove(&from).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(from)))?;
        guard.insert(to, file);
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        if self.undeletable.read().await.contains(&path) {
            exn::bail!(ErrorKind::PermissionDenied(path));
        }
        self.files.write().await.remove(&path).map(|_| ()).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))
    }

    async fn free_bytes(&self) -> Result<u64> {
        Ok(self.free.load(Ordering::SeqCst))
    }
}
