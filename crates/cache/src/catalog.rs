//! Read-only access to the companion app's own catalog database.
//!
//! The catalog is localized from the device first (it is never opened in
//! place) and is never written to. Any query failure means the catalog does
//! not look the way this code expects, which is reported as
//! [`ErrorKind::Malformed`] rather than a generic database error.

use crate::error::{ErrorKind, Result};
use crate::models::{CatalogRow, CollectionRow, SubjectRow, TitleRow};
use exn::ResultExt;
use iosra_book::{BookRecord, CollectionFlag, ContentProfile};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use time::{Time, UtcDateTime};
use tracing::instrument;

/// Tables whose row counts make up part of the [`ContentProfile`].
pub const PROFILED_TABLES: [&str; 3] = ["Books", "BookCollections", "Collections"];

/// One book as described by the companion catalog.
///
/// File size and thumbnail live on the device rather than in the catalog,
/// so [`to_record`](Self::to_record) leaves them for the caller to fill in.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogBook {
    pub id: i64,
    pub title: String,
    pub author: String,
    pub author_sort: String,
    pub title_sort: String,
    /// Path below the app's documents folder.
    pub filename: String,
    pub uuid: Option<String>,
    /// Fingerprint of the cover as last sent by the desktop library.
    pub cover_hash: Option<String>,
    /// Name (without extension) of the app's own cover thumbnail.
    pub cover_file: Option<String>,
    pub added: UtcDateTime,
    pub pubdate: Option<UtcDateTime>,
    pub publisher: Option<String>,
    pub series: Option<String>,
    pub series_index: Option<f64>,
    pub description: Option<String>,
    /// Sorted.
    pub subjects: Vec<String>,
    /// Reserved flags followed by assigned collection names, sorted.
    pub collections: Vec<String>,
}

impl CatalogBook {
    fn from_row(row: CatalogRow, collections: Vec<String>, mut subjects: Vec<String>) -> Self {
        subjects.sort();
        let mut assigned = Vec::new();
        if row.new_flag {
            assigned.push(CollectionFlag::New.label().to_string());
        }
        if row.reading_list {
            assigned.push(CollectionFlag::ReadingList.label().to_string());
        }
        if row.is_read {
            assigned.push(CollectionFlag::Read.label().to_string());
        }
        assigned.extend(collections);
        assigned.sort();

        let series = row.series.filter(|s| !s.is_empty());
        let series_index = match (row.series_index, &series) {
            (i, None) if i == 0.0 => None,
            (i, _) => Some(i),
        };
        let title = row.title.unwrap_or_default();
        let author = row.author.unwrap_or_default();
        Self {
            id: row.id,
            author_sort: row.author_sort.unwrap_or_else(|| iosra_book::sort::author_sort(&author)),
            title_sort: row.title_sort.unwrap_or_else(|| iosra_book::sort::title_sort(&title)),
            title,
            author,
            filename: row.filename.unwrap_or_default(),
            uuid: row.uuid.filter(|u| !u.is_empty()),
            cover_hash: row.cover_hash.filter(|h| !h.is_empty()),
            cover_file: row.hash.filter(|h| !h.is_empty()),
            added: row
                .date_added
                .and_then(|t| UtcDateTime::from_unix_timestamp(t).ok())
                .unwrap_or(UtcDateTime::UNIX_EPOCH),
            pubdate: row
                .date_published
                .and_then(|t| UtcDateTime::from_unix_timestamp(t).ok())
                .map(|d| d.replace_time(Time::MIDNIGHT)),
            publisher: row.publisher,
            series,
            series_index,
            description: row.description,
            subjects,
            collections: assigned,
        }
    }

    /// The catalog's view of this book. The catalog holds a single author
    /// string, which becomes the only entry of `authors`.
    pub fn to_record(&self) -> BookRecord {
        let mut book = BookRecord::new(self.title.clone(), vec![self.author.clone()], self.filename.clone())
            .with_added(self.added)
            .with_collections(self.collections.iter().cloned());
        book.author_sort = self.author_sort.clone();
        book.title_sort = self.title_sort.clone();
        book.uuid = self.uuid.clone();
        book.cover_hash = self.cover_hash.clone();
        book.pubdate = self.pubdate;
        book.publisher = self.publisher.clone();
        book.series = self.series.clone();
        book.series_index = self.series_index;
        book.description = self.description.clone();
        book.tags = self.subjects.clone();
        book
    }
}

/// A localized copy of the companion app's catalog, opened read-only.
#[derive(Debug, Clone)]
pub struct AppCatalog {
    pool: SqlitePool,
}

impl AppCatalog {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        let options = SqliteConnectOptions::new().filename(path).read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Malformed(format!("cannot open {}", path.display())))?;
        Ok(Self { pool })
    }

    /// Every book in the catalog, in catalog order.
    #[instrument("reading companion catalog", skip(self))]
    pub async fn books(&self) -> Result<Vec<CatalogBook>> {
        let rows: Vec<CatalogRow> = sqlx::query_as(include_str!("../queries/catalog_books.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Malformed("Books".to_string()))?;
        let collection_rows: Vec<CollectionRow> = sqlx::query_as(include_str!("../queries/catalog_collections.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Malformed("BookCollections".to_string()))?;
        let subject_rows: Vec<SubjectRow> = sqlx::query_as(include_str!("../queries/catalog_subjects.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Malformed("BookSubjects".to_string()))?;

        let mut collections: HashMap<i64, Vec<String>> = HashMap::new();
        for row in collection_rows {
            collections.entry(row.book_id).or_default().push(row.name);
        }
        let mut subjects: HashMap<i64, Vec<String>> = HashMap::new();
        for row in subject_rows {
            subjects.entry(row.book_id).or_default().push(row.subject);
        }
        Ok(rows
            .into_iter()
            .map(|row| {
                let id = row.id;
                CatalogBook::from_row(
                    row,
                    collections.remove(&id).unwrap_or_default(),
                    subjects.remove(&id).unwrap_or_default(),
                )
            })
            .collect())
    }

    /// Fingerprint the catalog. The cover folder lives on the device, so its
    /// size is measured by the caller.
    pub async fn profile(&self, covers_size: u64) -> Result<ContentProfile> {
        let titles: Vec<TitleRow> = sqlx::query_as(include_str!("../queries/catalog_titles.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Malformed("Books".to_string()))?;
        let mut context = md5::Context::new();
        for row in &titles {
            context.consume(row.title.as_bytes());
            context.consume(row.author.as_bytes());
        }
        let mut table_counts = BTreeMap::new();
        for table in PROFILED_TABLES {
            let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM \"{table}\""))
                .fetch_one(&self.pool)
                .await
                .or_raise(|| ErrorKind::Malformed(table.to_string()))?;
            let count = u64::try_from(count).or_raise(|| ErrorKind::InvalidData("row count"))?;
            table_counts.insert(table.to_string(), count);
        }
        Ok(ContentProfile { content_hash: format!("{:x}", context.compute()), covers_size, table_counts })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{CatalogFixture, FixtureBook};
    use time::macros::utc_datetime;

    async fn catalog(dir: &Path, fixture: CatalogFixture) -> AppCatalog {
        let path = dir.join("mainDb.sqlite");
        fixture.write(&path).await.unwrap();
        AppCatalog::open(&path).await.unwrap()
    }

    #[tokio::test]
    async fn test_missing_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppCatalog::open(dir.path().join("mainDb.sqlite")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_books_with_collections_and_flags() {
        let dir = tempfile::tempdir().unwrap();
        let mut emma = FixtureBook::new("Emma", "Jane Austen", "u-1.epub").uuid("u-1");
        emma.collections = vec!["Classics".to_string()];
        emma.subjects = vec!["Romance".to_string(), "Fiction".to_string()];
        emma.is_read = true;
        emma.date_published = Some(utc_datetime!(1815-12-23 14:00).unix_timestamp());
        let other = FixtureBook::new("Dune", "Frank Herbert", "dune.epub");
        let catalog = catalog(dir.path(), CatalogFixture::new().book(emma).book(other)).await;

        let books = catalog.books().await.unwrap();
        assert_eq!(books.len(), 2);
        assert_eq!(books[0].collections, vec!["Classics", "READ"]);
        assert_eq!(books[0].subjects, vec!["Fiction", "Romance"]);
        assert_eq!(books[0].pubdate, Some(utc_datetime!(1815-12-23 0:00)));
        assert_eq!(books[0].series_index, None);
        assert!(books[1].collections.is_empty());
        assert!(books[1].uuid.is_none());

        let record = books[0].to_record();
        assert_eq!(record.authors, vec!["Jane Austen"]);
        assert_eq!(record.active_flags(), vec!["READ"]);
        assert_eq!(record.tags, vec!["Fiction", "Romance"]);
    }

    #[tokio::test]
    async fn test_profile_tracks_content() {
        let dir = tempfile::tempdir().unwrap();
        let one = catalog(dir.path(), CatalogFixture::new().book(FixtureBook::new("A", "B", "a.epub"))).await;
        let profile = one.profile(96).await.unwrap();
        assert_eq!(profile.content_hash, format!("{:x}", md5::compute(b"AB")));
        assert_eq!(profile.covers_size, 96);
        assert_eq!(profile.table_counts["Books"], 1);
        assert_eq!(profile.table_counts["Collections"], 0);
        one.close().await;

        let dir = tempfile::tempdir().unwrap();
        let two = catalog(dir.path(), CatalogFixture::new().book(FixtureBook::new("A", "C", "a.epub"))).await;
        assert!(!two.profile(96).await.unwrap().compare(&profile).is_match());
    }

    #[tokio::test]
    async fn test_unexpected_schema_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mainDb.sqlite");
        std::fs::write(&path, b"definitely not sqlite").unwrap();
        let err = match AppCatalog::open(&path).await {
            Ok(catalog) => catalog.books().await.unwrap_err(),
            Err(err) => err,
        };
        assert!(matches!(&*err, ErrorKind::Malformed(_)));
    }
}
