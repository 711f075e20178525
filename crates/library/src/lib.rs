//! Booklist reconciliation and syncing for iosra.
//!
//! A session talks to one reader app through a [`ReaderAppAdapter`], picked
//! from the configured [`ReaderApp`] by [`adapter_for`]:
//!
//! - **DB-backed** apps keep their own catalog. The booklist is read from a
//!   localized copy of it, short-circuited by the [`SnapshotCache`], and
//!   every change is a staged companion command.
//! - **Flat-file** apps expose only a documents folder. Their metadata is
//!   kept in a cache that is [`reconcile`]d against the live listing.
//!
//! Batch operations report per-book trouble in a [`BatchSummary`] instead of
//! failing the batch.

mod adapter;
mod db_backed;
pub mod error;
mod flat;
mod localize;
mod options;
mod registry;
mod snapshot;
mod summary;
mod template;
#[cfg(test)]
mod testing;

pub use crate::adapter::{
    ReaderAppAdapter, SessionContext, UploadRequest, adapter_for, add_books_to_metadata, remove_books_from_metadata,
};
pub use crate::db_backed::DbBackedAdapter;
pub use crate::flat::{FlatFileAdapter, Listing, ReconcileEvent, Reconciled, reconcile};
pub use crate::localize::{Localizer, MAX_WINDOWS_PATH};
pub use crate::options::{ExistingBooks, SyncOptions};
pub use crate::registry::{
    CATALOG_DB, DOCUMENTS_FOLDER, FLAT_METADATA_DB, REMOTE_SNAPSHOT, ReaderApp, Strategy, cover_folder,
};
pub use crate::snapshot::SnapshotCache;
pub use crate::summary::{BatchSummary, BookLabel};
pub use crate::template::FilenameGenerator;
