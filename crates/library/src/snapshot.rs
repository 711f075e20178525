//! The booklist snapshot short-circuit.
//!
//! A snapshot is a dehydrated booklist stored together with the
//! [`ContentProfile`] of the catalog it was built from. It lives locally in
//! the device's working directory and, optionally, on the device itself so
//! that another computer can benefit from it.

use crate::error::{ErrorKind, Result};
use crate::localize::Localizer;
use crate::options::SyncOptions;
use crate::registry::REMOTE_SNAPSHOT;
use iosra_book::{BookList, ContentProfile};
use iosra_cache::{Database, SnapshotStore};
use std::path::{Path, PathBuf};
use tracing::instrument;

pub struct SnapshotCache {
    localizer: Localizer,
    local: PathBuf,
    enabled: bool,
    device_caching: bool,
    /// Percent of free device space the device copy may take.
    cap_percent: f64,
}

impl SnapshotCache {
    pub fn new(localizer: Localizer, options: &SyncOptions) -> Self {
        let local = localizer.local_path(REMOTE_SNAPSHOT);
        Self {
            localizer,
            local,
            enabled: options.booklist_caching,
            device_caching: options.device_booklist_caching,
            cap_percent: options.device_booklist_cache_limit,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn local_path(&self) -> &Path {
        &self.local
    }

    async fn remote_exists(&self) -> bool {
        self.localizer.transport().exists(Path::new(REMOTE_SNAPSHOT)).await.unwrap_or(false)
    }

    /// Fetch the device copy into the local snapshot path.
    async fn restore_remote(&self) -> bool {
        match self.localizer.localize(REMOTE_SNAPSHOT).await {
            Ok(_) => {
                tracing::info!("Restored booklist snapshot from device");
                true
            },
            Err(err) => {
                tracing::debug!(error = %err, "No usable device snapshot");
                false
            },
        }
    }

    async fn remove_local(&self) {
        if let Err(err) = tokio::fs::remove_file(&self.local).await
            && err.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %self.local.display(), error = %err, "Could not remove local snapshot");
        }
    }

    /// Profile and books of the local snapshot, `None` when unreadable.
    async fn read_local(&self) -> Option<(Option<ContentProfile>, Database)> {
        let db = match Database::connect(&self.local).await {
            Ok(db) => db,
            Err(err) => {
                tracing::warn!(error = %err, "Local snapshot is unreadable");
                return None;
            },
        };
        match SnapshotStore::from(&db).load_profile().await {
            Ok(profile) => Some((profile, db)),
            Err(err) => {
                tracing::warn!(error = %err, "Local snapshot profile is unreadable");
                db.close().await;
                None
            },
        }
    }

    /// The stored booklist, if the snapshot was built from a catalog whose
    /// profile equals `current`.
    ///
    /// An invalid local snapshot is retried once against the device copy.
    #[instrument("restoring snapshot", skip_all)]
    pub async fn restore(&self, current: &ContentProfile) -> Result<Option<BookList>> {
        if !self.enabled {
            return Ok(None);
        }
        let mut from_device = false;
        if !tokio::fs::try_exists(&self.local).await.unwrap_or(false) && self.device_caching {
            from_device = self.restore_remote().await;
        }

        for attempt in 0..2 {
            if attempt == 1 {
                if from_device || !self.device_caching || !self.remote_exists().await {
                    break;
                }
                tracing::info!("Local snapshot is stale, retrying with the device copy");
                self.remove_local().await;
                if !self.restore_remote().await {
                    break;
                }
            }
            let Some((stored, db)) = self.read_local().await else {
                self.remove_local().await;
                continue;
            };
            let valid = match &stored {
                Some(stored) => {
                    let comparison = current.compare(stored);
                    comparison.log_mismatches();
                    comparison.is_match()
                },
                None => false,
            };
            if !valid {
                db.close().await;
                continue;
            }
            let books = SnapshotStore::from(&db).load_books().await.map_err(ErrorKind::cache);
            db.close().await;
            let books = books?;
            tracing::info!(books = books.len(), "Booklist snapshot is valid");
            if self.device_caching && !self.remote_exists().await {
                self.push_capped().await?;
            }
            return Ok(Some(books));
        }
        Ok(None)
    }

    /// Persist a freshly reconciled booklist and, when enabled, push it to
    /// the device.
    #[instrument("writing snapshot", skip_all, fields(books = books.len()))]
    pub async fn store(&self, books: &BookList, profile: &ContentProfile) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let db = Database::connect(&self.local).await.map_err(ErrorKind::cache)?;
        let stored = SnapshotStore::from(&db).store(books, profile).await.map_err(ErrorKind::cache);
        db.close().await;
        stored?;
        if self.device_caching {
            self.push_capped().await?;
        }
        Ok(())
    }

    /// Forget the snapshot, ahead of a command that changes the catalog.
    pub async fn clear(&self) -> Result<()> {
        if !self.enabled || !tokio::fs::try_exists(&self.local).await.unwrap_or(false) {
            return Ok(());
        }
        let db = Database::connect(&self.local).await.map_err(ErrorKind::cache)?;
        let cleared = SnapshotStore::from(&db).clear().await.map_err(ErrorKind::cache);
        db.close().await;
        cleared?;
        tracing::debug!("Cleared booklist snapshot");
        Ok(())
    }

    /// Copy the local snapshot to the device unless it would take more than
    /// the allowed share of free space, in which case any device copy is
    /// deleted instead.
    async fn push_capped(&self) -> Result<()> {
        let size = tokio::fs::metadata(&self.local).await.map(|m| m.len()).unwrap_or(0);
        let free = self.localizer.transport().free_bytes().await.map_err(ErrorKind::transport)?;
        let cap = free as f64 * self.cap_percent / 100.0;
        if (size as f64) < cap {
            return self.localizer.publish(&self.local, REMOTE_SNAPSHOT).await;
        }
        tracing::info!(size, cap = cap as u64, "Snapshot exceeds device allowance, not pushed");
        if self.remote_exists().await {
            self.localizer.transport().delete(Path::new(REMOTE_SNAPSHOT)).await.map_err(ErrorKind::transport)?;
            tracing::info!("Deleted oversized device snapshot");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iosra_book::BookRecord;
    use iosra_transport::DeviceTransport;
    use iosra_transport::transport::MockTransport;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn profile(hash: &str) -> ContentProfile {
        ContentProfile {
            content_hash: hash.to_string(),
            covers_size: 0,
            table_counts: BTreeMap::from([("Books".to_string(), 2)]),
        }
    }

    fn books() -> BookList {
        [
            BookRecord::new("Foo", vec!["A".to_string()], "u1.epub").with_uuid("u1"),
            BookRecord::new("Bar", vec!["B".to_string()], "u2.epub").with_uuid("u2"),
        ]
        .into_iter()
        .collect()
    }

    fn cache(mock: Arc<MockTransport>, dir: &Path, device_caching: bool) -> SnapshotCache {
        let mut options = SyncOptions::new(dir);
        options.device_booklist_caching = device_caching;
        SnapshotCache::new(Localizer::new(mock, dir), &options)
    }

    #[tokio::test]
    async fn test_valid_snapshot_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockTransport::default());
        let snapshot = cache(mock.clone(), dir.path(), false);

        assert!(snapshot.restore(&profile("h1")).await.unwrap().is_none());
        snapshot.store(&books(), &profile("h1")).await.unwrap();
        assert_eq!(snapshot.restore(&profile("h1")).await.unwrap().unwrap(), books());
        assert!(snapshot.restore(&profile("h2")).await.unwrap().is_none());
        assert!(!mock.exists(Path::new(REMOTE_SNAPSHOT)).await.unwrap());

        snapshot.clear().await.unwrap();
        assert!(snapshot.restore(&profile("h1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_device_copy_restores_and_retries() {
        let mock = Arc::new(MockTransport::default());
        let first = tempfile::tempdir().unwrap();
        cache(mock.clone(), first.path(), true).store(&books(), &profile("h1")).await.unwrap();
        assert!(mock.exists(Path::new(REMOTE_SNAPSHOT)).await.unwrap());

        // Another computer with no local snapshot picks up the device copy.
        let second = tempfile::tempdir().unwrap();
        let snapshot = cache(mock.clone(), second.path(), true);
        assert_eq!(snapshot.restore(&profile("h1")).await.unwrap().unwrap().len(), 2);

        // A stale local snapshot is retried once against the device copy.
        snapshot.store(&BookList::new(), &profile("h0")).await.unwrap();
        cache(mock.clone(), first.path(), true).store(&books(), &profile("h3")).await.unwrap();
        assert_eq!(snapshot.restore(&profile("h3")).await.unwrap().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_oversized_device_copy_is_deleted() {
        let mock = Arc::new(MockTransport::with_files([(REMOTE_SNAPSHOT, b"stale".to_vec())]).with_free_bytes(1024));
        let dir = tempfile::tempdir().unwrap();
        let snapshot = cache(mock.clone(), dir.path(), true);
        // Corrupt device copy: restored, rejected, no retry left.
        assert!(snapshot.restore(&profile("h1")).await.unwrap().is_none());
        snapshot.store(&books(), &profile("h1")).await.unwrap();
        assert!(!mock.exists(Path::new(REMOTE_SNAPSHOT)).await.unwrap());
        assert!(snapshot.local_path().exists());
    }
}
