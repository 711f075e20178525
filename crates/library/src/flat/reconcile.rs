use crate::error::{ErrorKind, Result};
use crate::localize::Localizer;
use crate::registry::DOCUMENTS_FOLDER;
use async_stream::stream;
use exn::ResultExt;
use futures::{Stream, TryStreamExt};
use iosra_book::{BookRecord, MetadataExtractor, basename};
use iosra_cache::{CacheEntry, MetadataCache};
use iosra_transport::{EntryKind, FileStat};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// How the documents folder is listed.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub recursive: bool,
    /// Lowercase extensions to keep. `None` keeps every file.
    pub formats: Option<Vec<String>>,
}

impl Listing {
    fn accepts(&self, name: &str) -> bool {
        let Some(formats) = &self.formats else {
            return true;
        };
        Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| formats.iter().any(|f| f.eq_ignore_ascii_case(ext)))
    }
}

/// One file's outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciled {
    /// Metadata came straight from the cache.
    Cached(BookRecord),
    /// Found in a new folder under a cached base name; the cache was re-keyed.
    Moved { from: String, book: BookRecord },
    /// First seen: metadata extracted and cached.
    New(BookRecord),
    /// Could not be cataloged; the batch carries on.
    Failed { path: String, reason: String },
    /// Cached, but gone from the device; the entry was deleted.
    Orphaned(String),
}

/// Progress events emitted by [`reconcile`].
///
/// [`Started`](Self::Started) and [`DiscoveryComplete`](Self::DiscoveryComplete)
/// come first, once each, then one [`Reconciled`](Self::Reconciled) per live
/// file followed by one per orphan, then [`Complete`](Self::Complete). A fatal
/// error ends the stream early without `Complete`.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileEvent {
    Started,
    /// Number of live files found.
    DiscoveryComplete(u64),
    Reconciled(Reconciled),
    Complete,
}

/// Reconcile the live documents listing against the metadata cache.
///
/// Exact path hits reuse the cached row. A miss is first matched by base
/// name against cached rows whose file is gone, which catches a book moved
/// into another folder without re-reading it. Only then is the file copied
/// and its metadata extracted. Cached rows matched by neither are deleted.
pub fn reconcile<'a>(
    localizer: &'a Localizer,
    cache: &'a MetadataCache,
    extractor: &'a dyn MetadataExtractor,
    listing: &'a Listing,
) -> impl Stream<Item = Result<ReconcileEvent>> + 'a {
    stream!({
        yield Ok(ReconcileEvent::Started);

        let live = match discover(localizer, listing).await {
            Ok(live) => live,
            Err(e) => {
                yield Err(e);
                return;
            },
        };
        yield Ok(ReconcileEvent::DiscoveryComplete(u64::try_from(live.len()).unwrap_or(0)));

        let mut cached: BTreeMap<String, CacheEntry> = match cache.list().await.map_err(ErrorKind::cache) {
            Ok(entries) => entries.into_iter().map(|e| (e.filename.clone(), e)).collect(),
            Err(e) => {
                yield Err(e);
                return;
            },
        };
        let live_names: HashSet<&str> = live.keys().map(String::as_str).collect();
        // Rows whose file is gone: candidates for move detection, orphans otherwise.
        let mut unmatched: Vec<String> =
            cached.keys().filter(|name| !live_names.contains(name.as_str())).cloned().collect();

        for (name, stat) in &live {
            if let Some(entry) = cached.get(name) {
                yield Ok(ReconcileEvent::Reconciled(Reconciled::Cached(entry.to_record())));
                continue;
            }
            if let Some(index) = unmatched.iter().position(|old| basename(old) == basename(name)) {
                let from = unmatched.remove(index);
                let moved = match cache.rename(&from, name).await.map_err(ErrorKind::cache) {
                    Ok(_) => cached.remove(&from).map(|mut entry| {
                        entry.filename = name.clone();
                        entry.to_record()
                    }),
                    Err(e) => {
                        yield Err(e);
                        return;
                    },
                };
                if let Some(book) = moved {
                    tracing::info!(from = %from, to = %name, "Book moved on device");
                    yield Ok(ReconcileEvent::Reconciled(Reconciled::Moved { from, book }));
                    continue;
                }
            }
            let outcome = match catalog_new(localizer, cache, extractor, name, stat.as_ref()).await {
                Ok(book) => Reconciled::New(book),
                Err(err) => {
                    tracing::warn!(path = %name, error = %err, "Could not catalog book");
                    Reconciled::Failed { path: name.clone(), reason: err.to_string() }
                },
            };
            yield Ok(ReconcileEvent::Reconciled(outcome));
        }

        for orphan in unmatched {
            if let Err(e) = cache.delete(&orphan).await.map_err(ErrorKind::cache) {
                yield Err(e);
                return;
            }
            tracing::info!(path = %orphan, "Removed orphaned cache entry");
            yield Ok(ReconcileEvent::Reconciled(Reconciled::Orphaned(orphan)));
        }

        yield Ok(ReconcileEvent::Complete);
    })
}

/// Live book files, keyed by path relative to the documents folder. A
/// recursive listing comes with stats; a top-level one is stat-ed lazily.
async fn discover(localizer: &Localizer, listing: &Listing) -> Result<BTreeMap<String, Option<FileStat>>> {
    let transport = localizer.transport();
    let root = Path::new(DOCUMENTS_FOLDER);
    let mut live = BTreeMap::new();
    if listing.recursive {
        let files: Vec<FileStat> = transport.list_stream(root).try_collect().await.map_err(ErrorKind::transport)?;
        // Stats come back relative to the sandbox root.
        let prefix = DOCUMENTS_FOLDER.trim_start_matches('/');
        for stat in files {
            let Some(name) = stat.path.strip_prefix(prefix).ok().and_then(|p| p.to_str()).map(str::to_string) else {
                continue;
            };
            if listing.accepts(&name) {
                live.insert(name, Some(stat));
            }
        }
    } else {
        for (name, kind) in transport.list_dir(root).await.map_err(ErrorKind::transport)? {
            if kind == EntryKind::File && listing.accepts(&name) {
                live.insert(name, None);
            }
        }
    }
    tracing::debug!(files = live.len(), recursive = listing.recursive, "Listed documents folder");
    Ok(live)
}

/// Copy a first-seen file locally, extract its metadata and cache it.
async fn catalog_new(
    localizer: &Localizer,
    cache: &MetadataCache,
    extractor: &dyn MetadataExtractor,
    name: &str,
    stat: Option<&FileStat>,
) -> Result<BookRecord> {
    let remote = format!("{DOCUMENTS_FOLDER}/{name}");
    let stat = match stat {
        Some(stat) => stat.clone(),
        None => localizer.transport().stat(Path::new(&remote)).await.map_err(ErrorKind::transport)?,
    };
    let local = localizer.localize(&remote).await?;
    let data = tokio::fs::read(&local).await;
    if let Err(err) = tokio::fs::remove_file(&local).await {
        tracing::debug!(local = %local.display(), error = %err, "Could not remove local book copy");
    }
    let data = data.or_raise(|| ErrorKind::LocalFile(local.clone()))?;
    let meta = extractor
        .extract(Path::new(name), &data)
        .map_err(|err| err.raise(ErrorKind::InvalidSourceFile(Path::new(name).to_path_buf())))?;

    let mut book = BookRecord::new(meta.title, meta.authors, name).with_size(stat.size).with_added(stat.created);
    book.thumbnail = meta.cover;
    cache.upsert(&CacheEntry::from(&book)).await.map_err(ErrorKind::cache)?;
    tracing::info!(path = %name, title = %book.title, "Cataloged new book");
    Ok(book)
}
