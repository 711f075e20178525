//! SQLite storage for iosra.
//!
//! Three kinds of database live here, all opened through sqlx:
//! - the **metadata cache** ([`MetadataCache`]) that flat-file reader apps
//!   rely on, because their documents folder carries no metadata of its own;
//! - the **booklist snapshot** ([`SnapshotStore`]), a dehydrated booklist
//!   plus the [`ContentProfile`](iosra_book::ContentProfile) of the catalog it
//!   was built from;
//! - the companion app's own **catalog** ([`AppCatalog`]), read-only.
//!
//! Cache and snapshot files are disposable: they are copied to and from the
//! device, and can always be rebuilt by rescanning it.

mod catalog;
mod db;
pub mod error;
#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;
mod metadata;
mod models;
mod snapshot;

pub use crate::catalog::{AppCatalog, CatalogBook};
pub use crate::db::Database;
pub use crate::metadata::{CacheEntry, MetadataCache};
pub use crate::snapshot::SnapshotStore;
