//! Local copies of device files.
//!
//! SQLite cannot open a database through the transport, and metadata
//! extraction wants a real file, so device files are copied into a
//! per-device working directory first. A copy whose size and modification
//! time match the device's is reused as is; the modification time of every
//! fresh copy is set to the device's so that the check holds next time.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use filetime::FileTime;
use globset::Glob;
use iosra_transport::{FileStat, TransportHandle};
use std::path::{Path, PathBuf};
use tracing::instrument;

/// Longest local path allowed where the platform limits path length.
pub const MAX_WINDOWS_PATH: usize = 245;

const GLOB_CHARS: [char; 3] = ['*', '?', '['];

#[derive(Clone)]
pub struct Localizer {
    transport: TransportHandle,
    dir: PathBuf,
    path_limit: Option<usize>,
}

impl Localizer {
    pub fn new(transport: TransportHandle, dir: impl Into<PathBuf>) -> Self {
        Self { transport, dir: dir.into(), path_limit: cfg!(windows).then_some(MAX_WINDOWS_PATH) }
    }

    pub fn with_path_limit(mut self, limit: Option<usize>) -> Self {
        self.path_limit = limit;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn transport(&self) -> &TransportHandle {
        &self.transport
    }

    /// Resolve a remote path whose file name may contain glob characters to
    /// the first matching entry of its folder.
    pub async fn resolve(&self, remote: &str) -> Result<String> {
        let Some((parent, pattern)) = remote.rsplit_once('/') else {
            return Ok(remote.to_string());
        };
        if !pattern.contains(GLOB_CHARS) {
            return Ok(remote.to_string());
        }
        let matcher = Glob::new(pattern).or_raise(|| ErrorKind::DatabaseNotFound(remote.into()))?.compile_matcher();
        let parent = if parent.is_empty() { "/" } else { parent };
        let listing = self.transport.list_dir(Path::new(parent)).await.map_err(ErrorKind::transport)?;
        let Some(name) = listing.keys().find(|name| matcher.is_match(name.as_str())) else {
            exn::bail!(ErrorKind::DatabaseNotFound(remote.into()));
        };
        tracing::debug!(pattern = remote, resolved = %name, "Resolved remote glob");
        Ok(format!("{}/{name}", parent.trim_end_matches('/')))
    }

    /// Where the local copy of `remote` lives.
    ///
    /// The file name is the full remote path with `/` escaped as `%2F`, so
    /// different remotes never share a local copy. Where that would exceed
    /// the path limit it is replaced by a hash of the remote path, keeping
    /// the extension.
    pub fn local_path(&self, remote: &str) -> PathBuf {
        let flattened = remote.trim_start_matches('/').replace('%', "%25").replace('/', "%2F");
        let candidate = self.dir.join(flattened);
        match self.path_limit {
            Some(limit) if candidate.as_os_str().len() > limit => {
                let hash = blake3::hash(remote.as_bytes()).to_hex();
                let name = iosra_book::basename(remote);
                let short = match Path::new(name).extension().and_then(|e| e.to_str()) {
                    Some(ext) => format!("{}.{ext}", &hash[..16]),
                    None => hash[..16].to_string(),
                };
                self.dir.join(short)
            },
            _ => candidate,
        }
    }

    /// Make `remote` available locally, returning the local path.
    ///
    /// Raises [`DatabaseNotFound`](ErrorKind::DatabaseNotFound) when the
    /// remote file does not exist.
    #[instrument("localizing", skip(self))]
    pub async fn localize(&self, remote: &str) -> Result<PathBuf> {
        let remote = self.resolve(remote).await?;
        let stat = self.transport.stat(Path::new(&remote)).await.map_err(ErrorKind::transport)?;
        let local = self.local_path(&remote);
        if Self::is_current(&local, &stat).await {
            tracing::debug!(local = %local.display(), "Local copy is current");
            return Ok(local);
        }
        self.transport.copy_from_device(Path::new(&remote), &local).await.map_err(ErrorKind::transport)?;
        let mtime = FileTime::from_unix_time(stat.modified.unix_timestamp(), 0);
        filetime::set_file_mtime(&local, mtime).or_raise(|| ErrorKind::LocalFile(local.clone()))?;
        tracing::info!(remote = %remote, local = %local.display(), size = stat.size, "Localized device file");
        Ok(local)
    }

    /// Copy a local file back to the device.
    ///
    /// The local copy takes the device's new modification time, so the next
    /// [`localize`](Self::localize) reuses it.
    #[instrument("publishing", skip(self))]
    pub async fn publish(&self, local: &Path, remote: &str) -> Result<()> {
        self.transport.copy_to_device(local, Path::new(remote)).await.map_err(ErrorKind::transport)?;
        let stat = self.transport.stat(Path::new(remote)).await.map_err(ErrorKind::transport)?;
        let mtime = FileTime::from_unix_time(stat.modified.unix_timestamp(), 0);
        filetime::set_file_mtime(local, mtime).or_raise(|| ErrorKind::LocalFile(local.to_path_buf()))?;
        tracing::info!(local = %local.display(), remote, "Published local file to device");
        Ok(())
    }

    async fn is_current(local: &Path, stat: &FileStat) -> bool {
        let Ok(meta) = tokio::fs::metadata(local).await else {
            return false;
        };
        meta.len() == stat.size
            && FileTime::from_last_modification_time(&meta).unix_seconds() == stat.modified.unix_timestamp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iosra_transport::DeviceTransport;
    use iosra_transport::transport::MockTransport;
    use std::sync::Arc;
    use time::macros::utc_datetime;

    fn setup(files: &[(&str, &[u8])]) -> (Arc<MockTransport>, tempfile::TempDir) {
        let mock = Arc::new(MockTransport::with_files(files.iter().map(|(p, d)| (*p, d.to_vec()))));
        (mock, tempfile::tempdir().unwrap())
    }

    #[tokio::test]
    async fn test_copy_then_reuse() {
        let (mock, dir) = setup(&[("/Library/mainDb.sqlite", b"catalog-v1")]);
        let stamp = utc_datetime!(2024-03-01 10:00);
        mock.set_times("/Library/mainDb.sqlite", stamp, stamp).await.unwrap();
        let localizer = Localizer::new(mock.clone(), dir.path());

        let local = localizer.localize("/Library/mainDb.sqlite").await.unwrap();
        assert_eq!(local, dir.path().join("Library%2FmainDb.sqlite"));
        assert_eq!(std::fs::read(&local).unwrap(), b"catalog-v1");

        // Same size and mtime: the local copy is trusted as is.
        std::fs::write(&local, b"catalog-XX").unwrap();
        filetime::set_file_mtime(&local, FileTime::from_unix_time(stamp.unix_timestamp(), 0)).unwrap();
        localizer.localize("/Library/mainDb.sqlite").await.unwrap();
        assert_eq!(std::fs::read(&local).unwrap(), b"catalog-XX");

        // The device copy changed: copied again.
        mock.write(Path::new("/Library/mainDb.sqlite"), b"catalog-v2").await.unwrap();
        localizer.localize("/Library/mainDb.sqlite").await.unwrap();
        assert_eq!(std::fs::read(&local).unwrap(), b"catalog-v2");
    }

    #[tokio::test]
    async fn test_missing_remote() {
        let (mock, dir) = setup(&[]);
        let err = Localizer::new(mock, dir.path()).localize("/Library/mainDb.sqlite").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::DatabaseNotFound(_)));
    }

    #[tokio::test]
    async fn test_glob_resolves_first_match() {
        let (mock, dir) = setup(&[
            ("/Library/notes.txt", b"x"),
            ("/Library/catalog-2.4.sqlite", b"b"),
            ("/Library/catalog-2.3.sqlite", b"a"),
        ]);
        let localizer = Localizer::new(mock, dir.path());
        assert_eq!(localizer.resolve("/Library/catalog-*.sqlite").await.unwrap(), "/Library/catalog-2.3.sqlite");
        let local = localizer.localize("/Library/catalog-*.sqlite").await.unwrap();
        assert_eq!(std::fs::read(local).unwrap(), b"a");
        let err = localizer.resolve("/Library/*.db").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::DatabaseNotFound(_)));
    }

    #[test]
    fn test_long_names_are_shortened() {
        let mock = Arc::new(MockTransport::default());
        let localizer = Localizer::new(mock, "/tmp/iosra").with_path_limit(Some(40));
        let a = localizer.local_path("/Documents/A Very Long Book Title Indeed.epub");
        let b = localizer.local_path("/Documents/sub/A Very Long Book Title Indeed.epub");
        assert_ne!(a, b);
        assert!(a.as_os_str().len() <= 40);
        assert_eq!(a.extension().unwrap(), "epub");
        assert_eq!(localizer.local_path("/x/short.db"), Path::new("/tmp/iosra/x%2Fshort.db"));
    }

    #[tokio::test]
    async fn test_same_name_in_different_folders() {
        let (mock, dir) = setup(&[("/Documents/A/book.pdf", b"first"), ("/Documents/B/book.pdf", b"second")]);
        let localizer = Localizer::new(mock, dir.path());
        let a = localizer.localize("/Documents/A/book.pdf").await.unwrap();
        let b = localizer.localize("/Documents/B/book.pdf").await.unwrap();
        assert_ne!(a, b);
        assert_eq!(std::fs::read(a).unwrap(), b"first");
        assert_eq!(std::fs::read(b).unwrap(), b"second");
        assert_ne!(localizer.local_path("/a%2Fb"), localizer.local_path("/a/b"));
    }
}
