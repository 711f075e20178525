//! Companion apps that keep their own catalog database.
//!
//! The booklist is read straight from the localized catalog, short-circuited
//! by the snapshot when the catalog's profile is unchanged. Every change
//! goes through a staged command that the companion executes.

mod entries;

use self::entries::{described, identified, merge_collections, with_cover};
use crate::adapter::{Live, ReaderAppAdapter, SessionContext, UploadRequest};
use crate::error::{ErrorKind, Result};
use crate::options::ExistingBooks;
use crate::registry::{CATALOG_DB, DOCUMENTS_FOLDER, cover_folder};
use crate::snapshot::SnapshotCache;
use crate::summary::{BatchSummary, BookLabel};
use async_trait::async_trait;
use iosra_book::{BookList, BookRecord, ContentProfile};
use iosra_cache::AppCatalog;
use iosra_protocol::{CommandEnvelope, CommandKind, CommandOutcome, StagingClient};
use std::collections::HashSet;
use std::path::Path;
use tracing::instrument;

pub struct DbBackedAdapter {
    context: SessionContext,
}

impl DbBackedAdapter {
    pub fn new(context: SessionContext) -> Self {
        Self { context }
    }

    fn staging(&self) -> StagingClient {
        StagingClient::new(self.context.transport().clone(), self.context.options.staging.clone())
    }

    fn snapshot(&self, live: &Live) -> SnapshotCache {
        SnapshotCache::new(live.localizer.clone(), &self.context.options)
    }

    async fn send(&self, envelope: &CommandEnvelope) -> Result<CommandOutcome> {
        let outcome = self.staging().send(envelope, self.context.progress.as_ref()).await.map_err(ErrorKind::protocol)?;
        if !outcome.is_success() {
            tracing::warn!(command = envelope.kind.name(), messages = ?outcome.messages, "Companion reported problems");
        }
        Ok(outcome)
    }

    /// Refresh the local catalog copy after a command changed it.
    async fn relocalize(live: &Live) {
        if let Err(err) = live.localizer.localize(CATALOG_DB).await {
            tracing::warn!(error = %err, "Could not refresh local catalog");
        }
    }

    /// Forget everything derived from a catalog that turned out unreadable.
    async fn invalidate(&self, snapshot: &SnapshotCache) {
        self.context.books.lock().await.retain(|_| false);
        if let Err(err) = snapshot.clear().await {
            tracing::warn!(error = %err, "Could not clear snapshot");
        }
    }

    async fn profile(&self, live: &Live, catalog: &AppCatalog) -> Result<ContentProfile> {
        let covers = cover_folder(live.state.app_version);
        // Transports that cannot stat folders report no size.
        let covers_size = match self.context.transport().stat(Path::new(covers)).await {
            Ok(stat) => stat.size,
            Err(_) => 0,
        };
        catalog.profile(covers_size).await.map_err(ErrorKind::cache)
    }

    /// Read every catalog book whose file is on the device.
    async fn read_catalog(&self, live: &Live, catalog: &AppCatalog) -> Result<BookList> {
        let transport = self.context.transport();
        let covers = cover_folder(live.state.app_version);
        let rows = catalog.books().await.map_err(ErrorKind::cache)?;
        let total = rows.len().max(1);
        let mut books = BookList::new();
        for (index, row) in rows.iter().enumerate() {
            let remote = format!("{DOCUMENTS_FOLDER}/{}", row.filename);
            let stat = match transport.stat(Path::new(&remote)).await {
                Ok(stat) => stat,
                Err(err) => {
                    tracing::info!(title = %row.title, path = %remote, error = %err, "Catalog book missing from device, skipped");
                    continue;
                },
            };
            let mut book = row.to_record().with_size(stat.size);
            if let Some(hash) = &row.cover_file {
                match transport.read(Path::new(&format!("{covers}/{hash}.jpg"))).await {
                    Ok(data) => book.thumbnail = Some(data),
                    Err(err) => tracing::debug!(title = %row.title, error = %err, "No cover thumbnail"),
                }
            }
            books.add(book);
            self.context.progress.report((index + 1) as f64 / total as f64, "Reading catalog");
        }
        Ok(books)
    }

    async fn list_inner(&self, live: &Live) -> Result<BookList> {
        let snapshot = self.snapshot(live);
        let local = live.localizer.localize(CATALOG_DB).await?;
        let catalog = match AppCatalog::open(&local).await {
            Ok(catalog) => catalog,
            Err(err) => {
                self.invalidate(&snapshot).await;
                return Err(ErrorKind::cache(err));
            },
        };

        let profile = match self.profile(live, &catalog).await {
            Ok(profile) => profile,
            Err(err) => {
                catalog.close().await;
                self.invalidate(&snapshot).await;
                return Err(err);
            },
        };
        match snapshot.restore(&profile).await {
            Ok(Some(books)) => {
                catalog.close().await;
                return Ok(books);
            },
            Ok(None) => {},
            Err(err) => tracing::warn!(error = %err, "Snapshot unusable, reading catalog"),
        }

        let books = self.read_catalog(live, &catalog).await;
        catalog.close().await;
        let books = match books {
            Ok(books) => books,
            Err(err) => {
                self.invalidate(&snapshot).await;
                return Err(err);
            },
        };
        if let Err(err) = snapshot.store(&books, &profile).await {
            tracing::warn!(error = %err, "Could not write snapshot");
        }
        Ok(books)
    }

    /// Locate a device copy of `book`: the templated filename first, then an
    /// exact title and authors match among books not uploaded in this batch.
    fn existing<'a>(
        known: &'a BookList,
        pending: &HashSet<String>,
        filename: &str,
        book: &BookRecord,
    ) -> Option<&'a BookRecord> {
        known.get(filename).or_else(|| {
            known
                .iter()
                .filter(|b| !pending.contains(&b.path))
                .find(|b| b.title == book.title && b.authors == book.authors)
        })
    }

    async fn upload_inner(&self, live: &Live, requests: &[UploadRequest]) -> Result<(Vec<BookRecord>, BatchSummary)> {
        let options = &self.context.options;
        let staging = self.staging();
        let mut known = self.context.books.lock().await.clone();
        let mut pending = HashSet::new();
        let mut summary = BatchSummary::new(requests.len());
        let mut deletes = CommandEnvelope::new(CommandKind::DeleteBooks);
        let mut uploads = CommandEnvelope::new(CommandKind::UploadBooks);
        let mut updates = CommandEnvelope::new(CommandKind::UpdateMetadata).with_cleanup_collections();
        let mut locations = Vec::new();
        let mut staged = Vec::new();
        let mut superseded = Vec::new();

        for (index, request) in requests.iter().enumerate() {
            self.context.progress.report(index as f64 / requests.len() as f64 / 2.0, "Preparing uploads");
            let label = BookLabel::from(&request.record);
            if request.record.uuid.is_none() {
                summary.malformed.push((label, "book has no library UUID".to_string()));
                continue;
            }
            let filename = match self.context.filenames.generate(&request.record, &request.extension()) {
                Ok(filename) => filename,
                Err(err) => {
                    summary.malformed.push((label, err.to_string()));
                    continue;
                },
            };

            let existing = Self::existing(&known, &pending, &filename, &request.record).cloned();
            let replacing = match (&existing, options.existing_books) {
                (None, _) => false,
                (Some(_), ExistingBooks::Protect) => {
                    tracing::info!(title = %request.record.title, "Already on device, skipped");
                    summary.skipped.push(label);
                    continue;
                },
                (Some(existing), ExistingBooks::UpdateMetadata) => {
                    let collections = merge_collections(
                        &existing.device_collections,
                        &request.record.device_collections,
                        options.merge_collections,
                    );
                    let entry = described(&existing.path, &request.record, collections);
                    updates.push(with_cover(entry, request.cover.as_deref()));
                    summary.updated.push(label);
                    continue;
                },
                (Some(_), ExistingBooks::Replace) => true,
            };

            let valid = match tokio::fs::read(&request.local).await {
                Ok(data) => self.context.extractor.extract(&request.local, &data).map(|_| data).map_err(|e| e.to_string()),
                Err(err) => Err(err.to_string()),
            };
            let data = match valid {
                Ok(data) => data,
                Err(reason) => {
                    tracing::warn!(local = %request.local.display(), %reason, "Invalid source file");
                    summary.malformed.push((label, reason));
                    continue;
                },
            };
            if let Err(err) = staging.stage_file(&data, &filename).await {
                let reason = match ErrorKind::per_book(err) {
                    Ok(reason) => reason,
                    Err(err) => {
                        staging.unstage_files(&staged).await;
                        return Err(err);
                    },
                };
                tracing::warn!(path = %filename, reason, "Could not stage book");
                summary.failed.push((label.to_string(), reason));
                continue;
            }
            staged.push(filename.clone());

            if let Some(existing) = &existing
                && existing.path != filename
            {
                deletes.push(identified(&existing.path, existing));
                superseded.push(existing.path.clone());
                known.remove(&existing.path);
            }
            let collections = request.record.device_collections.clone();
            let mut entry = with_cover(described(&filename, &request.record, collections), request.cover.as_deref());
            entry.overwrite = replacing;
            uploads.push(entry);
            if replacing {
                summary.replaced.push(label);
            }

            let mut book = request.record.clone();
            book.path = filename.clone();
            book.size = data.len() as u64;
            book.thumbnail = request.cover.clone();
            known.add(book.clone());
            pending.insert(filename);
            locations.push(book);
        }

        // Each command that completes is reflected in the session at once;
        // a later failure must not resurrect books the companion removed.
        if !deletes.is_empty() {
            if let Err(err) = self.send(&deletes).await {
                staging.unstage_files(&staged).await;
                return Err(err);
            }
            let mut books = self.context.books.lock().await;
            for path in &superseded {
                books.remove(path);
            }
        }
        if !uploads.is_empty() {
            match self.send(&uploads).await {
                Ok(outcome) => summary.rejected = outcome.rejected,
                Err(err) => {
                    staging.unstage_files(&staged).await;
                    Self::relocalize(live).await;
                    return Err(err);
                },
            }
        }
        if !summary.rejected.is_empty() {
            locations.retain(|b| !summary.rejected.contains(&b.path));
            known.retain(|b| !summary.rejected.contains(&b.path));
        }
        *self.context.books.lock().await = known;
        let updated = match updates.is_empty() {
            true => Ok(()),
            false => self.send(&updates).await.map(|_| ()),
        };
        Self::relocalize(live).await;
        updated?;
        Ok((locations, summary))
    }

    /// Filename of `book` on the device: its templated name, else a UUID
    /// match, else a title and authors match.
    fn resolve<'a>(&self, known: &'a BookList, book: &BookRecord) -> Option<&'a BookRecord> {
        let templated = self.context.filenames.generate(book, "epub").ok();
        templated
            .and_then(|name| known.get(&name))
            .or_else(|| known.find_match(book.uuid.as_deref(), &book.title, &book.authors).map(|(b, _)| b))
    }
}

#[async_trait]
impl ReaderAppAdapter for DbBackedAdapter {
    fn context(&self) -> &SessionContext {
        &self.context
    }

    #[instrument("listing books", skip_all, fields(app = %self.context.app))]
    async fn list_books(&self) -> Result<BookList> {
        let live = self.context.begin().await?;
        let books = self.list_inner(&live).await?;
        tracing::info!(books = books.len(), "Booklist ready");
        *self.context.books.lock().await = books.clone();
        Ok(books)
    }

    #[instrument("deleting books", skip_all, fields(books = paths.len()))]
    async fn delete_books(&self, paths: &[String]) -> Result<BatchSummary> {
        let live = self.context.begin().await?;
        self.snapshot(&live).clear().await?;
        let mut envelope = CommandEnvelope::new(CommandKind::DeleteBooks);
        {
            let books = self.context.books.lock().await;
            for path in paths {
                envelope.push(match books.get(path) {
                    Some(book) => identified(path, book),
                    None => iosra_protocol::BookEntry::new(path.as_str()),
                });
            }
        }
        let mut summary = BatchSummary::new(paths.len());
        if envelope.is_empty() {
            return Ok(summary);
        }
        let outcome = self.send(&envelope).await?;
        summary.rejected = outcome.rejected;
        summary.deleted = paths.iter().filter(|p| !summary.rejected.contains(p)).cloned().collect();
        {
            let mut books = self.context.books.lock().await;
            for path in &summary.deleted {
                books.remove(path);
            }
        }
        Self::relocalize(&live).await;
        summary.log("delete");
        Ok(summary)
    }

    #[instrument("uploading books", skip_all, fields(books = requests.len()))]
    async fn upload_books(&self, requests: Vec<UploadRequest>) -> Result<(Vec<BookRecord>, BatchSummary)> {
        let live = self.context.begin().await?;
        self.snapshot(&live).clear().await?;
        let (locations, summary) = self.upload_inner(&live, &requests).await?;
        summary.log("upload");
        Ok((locations, summary))
    }

    #[instrument("syncing metadata", skip_all)]
    async fn sync_metadata(&self, books: &BookList) -> Result<usize> {
        let live = self.context.begin().await?;
        let mut known = self.context.books.lock().await.clone();
        let mut envelope = CommandEnvelope::new(CommandKind::UpdateMetadata).with_cleanup_collections();
        for book in books {
            let Some(device) = self.resolve(&known, book).cloned() else {
                continue;
            };
            let collections =
                merge_collections(&device.device_collections, &book.device_collections, self.context.options.merge_collections);
            if device.title == book.title && device.authors == book.authors && device.device_collections == collections {
                continue;
            }
            envelope.push(described(&device.path, book, collections.clone()));
            if let Some(cached) = known.get_mut(&device.path) {
                cached.title = book.title.clone();
                cached.title_sort = book.title_sort.clone();
                cached.authors = book.authors.clone();
                cached.author_sort = book.author_sort.clone();
                cached.device_collections = collections;
            }
        }
        if envelope.is_empty() {
            return Ok(0);
        }
        self.snapshot(&live).clear().await?;
        self.send(&envelope).await?;
        Self::relocalize(&live).await;
        *self.context.books.lock().await = known;
        Ok(envelope.len())
    }

    #[instrument("rebuilding collections", skip_all)]
    async fn rebuild_collections(&self, books: &BookList) -> Result<usize> {
        let live = self.context.begin().await?;
        let mut known = self.context.books.lock().await.clone();
        let mut envelope = CommandEnvelope::new(CommandKind::RebuildCollections);
        for book in books {
            let Some(device) = self.resolve(&known, book).cloned() else {
                tracing::debug!(title = %book.title, "Not on device, collections not rebuilt");
                continue;
            };
            let collections =
                merge_collections(&device.device_collections, &book.device_collections, self.context.options.merge_collections);
            if collections == device.device_collections {
                continue;
            }
            let mut entry = identified(&device.path, &device);
            entry.collections = Some(collections.clone());
            envelope.push(entry);
            if let Some(cached) = known.get_mut(&device.path) {
                cached.device_collections = collections;
            }
        }
        if envelope.is_empty() {
            tracing::info!("Collections already up to date");
            return Ok(0);
        }
        self.snapshot(&live).clear().await?;
        self.send(&envelope).await?;
        Self::relocalize(&live).await;
        *self.context.books.lock().await = known;
        Ok(envelope.len())
    }
}
