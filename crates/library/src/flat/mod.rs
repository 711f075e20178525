//! Reader apps that expose nothing but a documents folder.
//!
//! Metadata for these apps lives in a small SQLite cache that travels with
//! the device (`/Library/calibre_metadata.sqlite`). Every listing refreshes
//! it against the live folder; see [`reconcile`].

mod reconcile;

pub use self::reconcile::{Listing, ReconcileEvent, Reconciled, reconcile};
use crate::adapter::{Live, ReaderAppAdapter, SessionContext, UploadRequest};
use crate::error::{ErrorKind, Result};
use crate::localize::Localizer;
use crate::options::ExistingBooks;
use crate::registry::{DOCUMENTS_FOLDER, FLAT_METADATA_DB};
use crate::summary::{BatchSummary, BookLabel};
use async_trait::async_trait;
use futures::StreamExt;
use iosra_book::{BookList, BookRecord};
use iosra_cache::{CacheEntry, Database, MetadataCache};
use std::path::Path;
use time::UtcDateTime;
use tracing::instrument;

/// The cache keeps whole seconds.
fn now_in_seconds() -> UtcDateTime {
    let now = UtcDateTime::now();
    now - time::Duration::nanoseconds(i64::from(now.nanosecond()))
}

pub struct FlatFileAdapter {
    context: SessionContext,
}

impl FlatFileAdapter {
    pub fn new(context: SessionContext) -> Self {
        Self { context }
    }

    fn listing(&self) -> Listing {
        Listing {
            recursive: self.context.app.recursive_listing(),
            formats: self.context.app.filters_formats().then(|| self.context.enabled_formats()),
        }
    }

    /// Open the local copy of the device's metadata cache, starting a fresh
    /// one when the device has none yet.
    async fn open_cache(localizer: &Localizer) -> Result<Database> {
        let local = match localizer.localize(FLAT_METADATA_DB).await {
            Ok(local) => local,
            Err(err) if matches!(&*err, ErrorKind::DatabaseNotFound(_)) => {
                tracing::info!("No metadata cache on device, starting a new one");
                localizer.local_path(FLAT_METADATA_DB)
            },
            Err(err) => return Err(err),
        };
        Database::connect(&local).await.map_err(ErrorKind::cache)
    }

    /// Compact, close and push the metadata cache back to the device.
    async fn close_cache(localizer: &Localizer, db: Database) -> Result<()> {
        let vacuumed = db.vacuum().await.map_err(ErrorKind::cache);
        db.close().await;
        vacuumed?;
        localizer.publish(&localizer.local_path(FLAT_METADATA_DB), FLAT_METADATA_DB).await
    }

    async fn reconcile_books(&self, live: &Live, cache: &MetadataCache) -> Result<(BookList, BatchSummary)> {
        let listing = self.listing();
        let mut books = BookList::new();
        let mut summary = BatchSummary::default();
        let events = reconcile(&live.localizer, cache, self.context.extractor.as_ref(), &listing);
        futures::pin_mut!(events);
        let mut total = 0;
        while let Some(event) = events.next().await {
            match event? {
                ReconcileEvent::Started | ReconcileEvent::Complete => {},
                ReconcileEvent::DiscoveryComplete(count) => {
                    total = count;
                    summary.attempted = usize::try_from(count).unwrap_or(usize::MAX);
                },
                ReconcileEvent::Reconciled(outcome) => {
                    match outcome {
                        Reconciled::Cached(book) | Reconciled::New(book) => {
                            books.add(book);
                        },
                        Reconciled::Moved { from, book } => {
                            summary.moved.push((from, book.path.clone()));
                            books.add(book);
                        },
                        Reconciled::Failed { path, reason } => {
                            let title = iosra_book::basename(&path).to_string();
                            summary.malformed.push((BookLabel::new(title, &[]), reason));
                        },
                        Reconciled::Orphaned(path) => summary.deleted.push(path),
                    }
                    if total > 0 {
                        self.context.progress.report(books.len() as f64 / total as f64, "Reading books");
                    }
                },
            }
        }
        Ok((books, summary))
    }

    /// Books the device refuses are recorded in the summary; only a lost
    /// device ends the batch.
    async fn delete_inner(&self, cache: &MetadataCache, paths: &[String]) -> Result<BatchSummary> {
        let transport = self.context.transport();
        let mut summary = BatchSummary::new(paths.len());
        for path in paths {
            let remote = format!("{DOCUMENTS_FOLDER}/{}", path.trim_start_matches('/'));
            match transport.delete(Path::new(&remote)).await {
                Ok(()) => {},
                Err(err) if matches!(&*err, iosra_transport::error::ErrorKind::NotFound(_)) => {
                    tracing::debug!(path, "Book already gone from device");
                },
                Err(err) => {
                    let reason = ErrorKind::per_book(err)?;
                    tracing::warn!(path, reason, "Could not delete book");
                    summary.failed.push((path.clone(), reason));
                    continue;
                },
            }
            if let Err(err) = cache.delete(path).await {
                tracing::warn!(path, error = %err, "Book deleted but its cache row remains");
            }
            self.context.books.lock().await.remove(path);
            summary.deleted.push(path.clone());
        }
        Ok(summary)
    }

    /// Rewrite the cached names of `book`, returning the refreshed record
    /// when the cache knows it.
    async fn update_cached_names(
        &self,
        cache: &MetadataCache,
        book: &BookRecord,
    ) -> iosra_cache::error::Result<Option<BookRecord>> {
        let Some(entry) = cache.get(&book.path).await? else {
            return Ok(None);
        };
        cache.update_names(&book.path, &book.title, &book.title_sort, &book.authors, &book.author_sort).await?;
        Ok(Some(entry.to_record()))
    }

    async fn upload_one(
        &self,
        cache: &MetadataCache,
        request: &UploadRequest,
        summary: &mut BatchSummary,
    ) -> Result<Option<BookRecord>> {
        let label = BookLabel::from(&request.record);
        let ext = request.extension();
        let filename = match self.context.filenames.generate(&request.record, &ext) {
            Ok(filename) => filename,
            Err(err) => {
                summary.malformed.push((label, err.to_string()));
                return Ok(None);
            },
        };
        let remote = format!("{DOCUMENTS_FOLDER}/{filename}");
        let transport = self.context.transport();
        let exists = match transport.exists(Path::new(&remote)).await {
            Ok(exists) => exists,
            Err(err) => {
                summary.failed.push((label.to_string(), ErrorKind::per_book(err)?));
                return Ok(None);
            },
        };
        let mut book = request.record.clone();
        book.path = filename.clone();
        if exists {
            match self.context.options.existing_books {
                ExistingBooks::Protect => {
                    tracing::info!(path = %filename, "Book already on device, skipped");
                    summary.skipped.push(label);
                    return Ok(None);
                },
                ExistingBooks::UpdateMetadata => {
                    let mut updated = match self.update_cached_names(cache, &book).await {
                        Ok(updated) => updated,
                        Err(err) => {
                            summary.failed.push((label.to_string(), (*err).to_string()));
                            return Ok(None);
                        },
                    };
                    if let Some(existing) = updated.as_mut() {
                        existing.title = book.title.clone();
                        existing.title_sort = book.title_sort.clone();
                        existing.authors = book.authors.clone();
                        existing.author_sort = book.author_sort.clone();
                    }
                    summary.updated.push(label);
                    return Ok(updated);
                },
                ExistingBooks::Replace => {},
            }
        }
        let data = match tokio::fs::read(&request.local).await {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!(local = %request.local.display(), error = %err, "Cannot read book file");
                summary.malformed.push((label, err.to_string()));
                return Ok(None);
            },
        };
        if let Err(err) = transport.write(Path::new(&remote), &data).await {
            let reason = ErrorKind::per_book(err)?;
            tracing::warn!(path = %filename, reason, "Upload failed");
            summary.failed.push((label.to_string(), reason));
            return Ok(None);
        }
        book.size = data.len() as u64;
        book.added = now_in_seconds();
        if request.cover.is_some() {
            book.thumbnail = request.cover.clone();
        }
        if let Err(err) = cache.upsert(&CacheEntry::from(&book)).await {
            tracing::warn!(path = %filename, error = %err, "Uploaded book could not be cached");
            summary.failed.push((label.to_string(), (*err).to_string()));
            return Ok(None);
        }
        if exists {
            summary.replaced.push(label);
        }
        tracing::info!(path = %filename, title = %book.title, "Uploaded book");
        Ok(Some(book))
    }
}

#[async_trait]
impl ReaderAppAdapter for FlatFileAdapter {
    fn context(&self) -> &SessionContext {
        &self.context
    }

    #[instrument("listing books", skip_all, fields(app = %self.context.app))]
    async fn list_books(&self) -> Result<BookList> {
        let live = self.context.begin().await?;
        let db = Self::open_cache(&live.localizer).await?;
        let cache = MetadataCache::from(&db);
        let reconciled = self.reconcile_books(&live, &cache).await;
        let (books, summary) = match reconciled {
            Ok(result) => result,
            Err(err) => {
                db.close().await;
                return Err(err);
            },
        };
        Self::close_cache(&live.localizer, db).await?;
        summary.log("reconcile");
        *self.context.books.lock().await = books.clone();
        Ok(books)
    }

    #[instrument("deleting books", skip_all, fields(books = paths.len()))]
    async fn delete_books(&self, paths: &[String]) -> Result<BatchSummary> {
        let live = self.context.begin().await?;
        let db = Self::open_cache(&live.localizer).await?;
        let deleted = self.delete_inner(&MetadataCache::from(&db), paths).await;
        let closed = Self::close_cache(&live.localizer, db).await;
        let summary = deleted?;
        closed?;
        summary.log("delete");
        Ok(summary)
    }

    #[instrument("uploading books", skip_all, fields(books = requests.len()))]
    async fn upload_books(&self, requests: Vec<UploadRequest>) -> Result<(Vec<BookRecord>, BatchSummary)> {
        let live = self.context.begin().await?;
        let db = Self::open_cache(&live.localizer).await?;
        let cache = MetadataCache::from(&db);
        let mut summary = BatchSummary::new(requests.len());
        let mut locations = Vec::new();
        for (index, request) in requests.iter().enumerate() {
            match self.upload_one(&cache, request, &mut summary).await {
                Ok(Some(book)) => locations.push(book),
                Ok(None) => {},
                Err(err) => {
                    db.close().await;
                    return Err(err);
                },
            }
            self.context.progress.report((index + 1) as f64 / requests.len() as f64, "Uploading books");
        }
        Self::close_cache(&live.localizer, db).await?;
        summary.log("upload");
        Ok((locations, summary))
    }

    #[instrument("syncing metadata", skip_all)]
    async fn sync_metadata(&self, books: &BookList) -> Result<usize> {
        let live = self.context.begin().await?;
        let db = Self::open_cache(&live.localizer).await?;
        let cache = MetadataCache::from(&db);
        let mut changed = 0;
        for book in books {
            let entry = match cache.get(&book.path).await.map_err(ErrorKind::cache) {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(err) => {
                    db.close().await;
                    return Err(err);
                },
            };
            if entry.title == book.title && entry.authors == book.authors {
                continue;
            }
            let updated = cache
                .update_names(&book.path, &book.title, &book.title_sort, &book.authors, &book.author_sort)
                .await
                .map_err(ErrorKind::cache);
            if let Err(err) = updated {
                db.close().await;
                return Err(err);
            }
            tracing::info!(path = %book.path, title = %book.title, "Updated cached metadata");
            changed += 1;
        }
        match changed {
            0 => db.close().await,
            _ => Self::close_cache(&live.localizer, db).await?,
        }
        Ok(changed)
    }

    async fn rebuild_collections(&self, _books: &BookList) -> Result<usize> {
        tracing::debug!(app = %self.context.app, "Collections are not supported by this app");
        Ok(0)
    }
}
