//! One interface over every reader app.
//!
//! A session picks its adapter once, from the configured [`ReaderApp`]:
//! [`DbBackedAdapter`] for companions that keep their own catalog, and
//! [`FlatFileAdapter`] for apps that only expose a documents folder.

use crate::db_backed::DbBackedAdapter;
use crate::error::{ErrorKind, Result};
use crate::flat::FlatFileAdapter;
use crate::localize::Localizer;
use crate::options::SyncOptions;
use crate::registry::{DOCUMENTS_FOLDER, ReaderApp, Strategy};
use crate::summary::BatchSummary;
use crate::template::FilenameGenerator;
use async_trait::async_trait;
use exn::ResultExt;
use iosra_book::{BookList, BookRecord, MetadataExtractor};
use iosra_connection::{BusyGuard, ConnectionMachine, ConnectionState};
use iosra_protocol::{NoProgress, ProgressReporter};
use iosra_transport::TransportHandle;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A book the host wants on the device.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    /// The book file, already converted and with metadata embedded.
    pub local: PathBuf,
    /// Library metadata. `path` is ignored; the device filename comes from
    /// the app's template.
    pub record: BookRecord,
    pub cover: Option<Vec<u8>>,
}

impl UploadRequest {
    pub fn new(local: impl Into<PathBuf>, record: BookRecord) -> Self {
        Self { local: local.into(), record, cover: None }
    }

    /// Lowercase extension of the local file.
    pub fn extension(&self) -> String {
        self.local.extension().and_then(|e| e.to_str()).unwrap_or_default().to_ascii_lowercase()
    }
}

/// What every adapter shares: the connection, the options, and the books of
/// the current session.
pub struct SessionContext {
    pub(crate) app: ReaderApp,
    pub(crate) machine: Arc<ConnectionMachine>,
    pub(crate) options: SyncOptions,
    pub(crate) extractor: Arc<dyn MetadataExtractor>,
    pub(crate) progress: Arc<dyn ProgressReporter>,
    pub(crate) filenames: FilenameGenerator,
    /// Books as last read from the device.
    pub(crate) books: Mutex<BookList>,
}

/// A live connection, held for the duration of one operation.
pub(crate) struct Live {
    _guard: BusyGuard,
    pub(crate) state: ConnectionState,
    pub(crate) localizer: Localizer,
}

impl SessionContext {
    pub fn new(
        app: ReaderApp,
        machine: Arc<ConnectionMachine>,
        options: SyncOptions,
        extractor: Arc<dyn MetadataExtractor>,
    ) -> Result<Self> {
        Ok(Self {
            filenames: app.upload_template().parse()?,
            app,
            machine,
            options,
            extractor,
            progress: Arc::new(NoProgress),
            books: Mutex::new(BookList::new()),
        })
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn app(&self) -> ReaderApp {
        self.app
    }

    pub fn machine(&self) -> &Arc<ConnectionMachine> {
        &self.machine
    }

    pub fn transport(&self) -> &TransportHandle {
        self.machine.transport()
    }

    /// Books known to the session, as of the last listing or edit.
    pub async fn books(&self) -> BookList {
        self.books.lock().await.clone()
    }

    /// Hold the device and set up the per-device working directory.
    pub(crate) async fn begin(&self) -> Result<Live> {
        let guard = self.machine.session().await.map_err(ErrorKind::connection)?;
        let state = self.machine.state().await;
        let device = state.identity.as_ref().map(|id| id.as_str().to_string()).unwrap_or_default();
        let dir = self.options.cache_dir.join(device);
        tokio::fs::create_dir_all(&dir).await.or_raise(|| ErrorKind::LocalFile(dir.clone()))?;
        let localizer = Localizer::new(self.transport().clone(), dir);
        Ok(Live { _guard: guard, state, localizer })
    }

    /// Lowercase extensions handled as books.
    pub(crate) fn enabled_formats(&self) -> Vec<String> {
        match self.options.enabled_formats.is_empty() {
            true => self.app.default_formats().iter().map(|f| f.to_string()).collect(),
            false => self.options.enabled_formats.iter().map(|f| f.trim_start_matches('.').to_ascii_lowercase()).collect(),
        }
    }
}

/// The operations a host performs against a reader app.
#[async_trait]
pub trait ReaderAppAdapter: Send + Sync {
    fn context(&self) -> &SessionContext;

    /// Build the session's booklist from the device.
    async fn list_books(&self) -> Result<BookList>;

    /// Remove books by device path.
    async fn delete_books(&self, paths: &[String]) -> Result<BatchSummary>;

    /// Put books on the device. Returns the records of the books now on the
    /// device, ready for [`add_books_to_metadata`].
    async fn upload_books(&self, requests: Vec<UploadRequest>) -> Result<(Vec<BookRecord>, BatchSummary)>;

    /// Push title, author and collection edits made in the library. Returns
    /// the number of books changed.
    async fn sync_metadata(&self, books: &BookList) -> Result<usize>;

    /// Resend collection assignments that differ from the device's. Returns
    /// the number of books changed.
    async fn rebuild_collections(&self, books: &BookList) -> Result<usize>;

    /// One connection tick; see [`ConnectionMachine::is_usb_connected`].
    async fn probe_connection(&self) -> bool {
        self.context().machine.is_usb_connected().await
    }

    /// Copy a book from the documents folder to a local file.
    async fn get_file(&self, path: &str, local: &Path) -> Result<()> {
        let _live = self.context().begin().await?;
        let remote = format!("{DOCUMENTS_FOLDER}/{}", path.trim_start_matches('/'));
        self.context().transport().copy_from_device(Path::new(&remote), local).await.map_err(ErrorKind::transport)
    }

    /// Add freshly uploaded books to `booklist` and to the session.
    async fn add_books_to_metadata(&self, locations: &[BookRecord], booklist: &mut BookList) {
        let mut session = self.context().books.lock().await;
        for book in locations {
            session.add(book.clone());
        }
        add_books_to_metadata(locations, booklist);
    }

    /// Remove deleted books from `booklist` and from the session.
    async fn remove_books_from_metadata(&self, paths: &[String], booklist: &mut BookList) {
        let removed = remove_books_from_metadata(paths, booklist);
        let mut session = self.context().books.lock().await;
        for path in paths {
            session.remove(path);
        }
        for book in &removed {
            session.remove(&book.path);
        }
    }
}

/// Append the uploaded books to `booklist`, replacing entries at the same
/// path.
pub fn add_books_to_metadata(locations: &[BookRecord], booklist: &mut BookList) {
    for book in locations {
        booklist.add(book.clone());
    }
}

/// Remove the book behind each device path from `booklist`.
///
/// The book at the path is matched against the list by UUID first, then by
/// title and authors, so a listing built with different paths still loses
/// the right entry. Returns the removed records.
pub fn remove_books_from_metadata(paths: &[String], booklist: &mut BookList) -> Vec<BookRecord> {
    let mut removed = Vec::new();
    for path in paths {
        let target = match booklist.get(path) {
            Some(book) => book.clone(),
            None => {
                tracing::debug!(path, "Deleted path not in booklist");
                continue;
            },
        };
        let matched = booklist
            .find_match(target.uuid.as_deref(), &target.title, &target.authors)
            .map(|(book, _)| book.path.clone());
        if let Some(book) = matched.and_then(|p| booklist.remove(&p)) {
            removed.push(book);
        }
    }
    removed
}

/// The adapter for `app`.
pub fn adapter_for(context: SessionContext) -> Box<dyn ReaderAppAdapter> {
    match context.app.strategy() {
        Strategy::DbBacked => Box::new(DbBackedAdapter::new(context)),
        Strategy::FlatFile => Box::new(FlatFileAdapter::new(context)),
    }
}
