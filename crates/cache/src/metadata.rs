//! Metadata cache for reader apps that only expose a folder of files.
//!
//! Re-deriving a book's metadata means copying the whole file off the device
//! and parsing it, so whatever was learned once is kept here, keyed by the
//! book's path under the documents folder. The rows are the source of truth
//! across sessions and are refreshed against the live listing every time.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{MetadataRow, json_list};
use exn::ResultExt;
use iosra_book::BookRecord;
use sqlx::SqlitePool;
use time::UtcDateTime;

/// One cached book, mirroring the durable fields of a [`BookRecord`].
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub filename: String,
    pub title: String,
    pub title_sort: String,
    pub authors: Vec<String>,
    pub author_sort: String,
    pub dateadded: UtcDateTime,
    pub size: u64,
    pub thumbnail: Option<Vec<u8>>,
    pub uuid: Option<String>,
}

impl CacheEntry {
    pub fn to_record(&self) -> BookRecord {
        let mut book = BookRecord::new(self.title.clone(), self.authors.clone(), self.filename.clone())
            .with_size(self.size)
            .with_added(self.dateadded);
        book.author_sort = self.author_sort.clone();
        book.title_sort = self.title_sort.clone();
        book.uuid = self.uuid.clone();
        book.thumbnail = self.thumbnail.clone();
        book
    }
}

impl From<&BookRecord> for CacheEntry {
    fn from(book: &BookRecord) -> Self {
        Self {
            filename: book.path.clone(),
            title: book.title.clone(),
            title_sort: book.title_sort.clone(),
            authors: book.authors.clone(),
            author_sort: book.author_sort.clone(),
            dateadded: book.added,
            size: book.size,
            thumbnail: book.thumbnail.clone(),
            uuid: book.uuid.clone(),
        }
    }
}

/// Repository over the `metadata` table.
#[derive(Debug, Clone)]
pub struct MetadataCache {
    pool: SqlitePool,
}
impl From<&Database> for MetadataCache {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl MetadataCache {
    // =========================================================================
    // Get/Fetch
    // =========================================================================

    /// Every cached entry, ordered by filename.
    pub async fn list(&self) -> Result<Vec<CacheEntry>> {
        let rows: Vec<MetadataRow> = sqlx::query_as(include_str!("../queries/metadata_list.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(CacheEntry::try_from).collect()
    }

    pub async fn get(&self, filename: &str) -> Result<Option<CacheEntry>> {
        let row: Option<MetadataRow> = sqlx::query_as(include_str!("../queries/metadata_get.sql"))
            .bind(filename)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(CacheEntry::try_from).transpose()
    }

    // =========================================================================
    // Insert/Update
    // =========================================================================

    /// Insert `entry`, replacing any entry with the same filename.
    pub async fn upsert(&self, entry: &CacheEntry) -> Result<()> {
        let row = MetadataRow::try_from(entry)?;
        sqlx::query(include_str!("../queries/metadata_upsert.sql"))
            .bind(row.filename)
            .bind(row.title)
            .bind(row.title_sort)
            .bind(row.authors)
            .bind(row.author_sort)
            .bind(row.dateadded)
            .bind(row.size)
            .bind(row.thumb_data)
            .bind(row.uuid)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Re-key an entry after its file moved to another folder. Returns
    /// `false` if nothing was cached under `from`.
    pub async fn rename(&self, from: &str, to: &str) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/metadata_rename.sql"))
            .bind(to)
            .bind(from)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }

    /// Overwrite the title and authors (and their sort keys) of an entry.
    pub async fn update_names(
        &self,
        filename: &str,
        title: &str,
        title_sort: &str,
        authors: &[String],
        author_sort: &str,
    ) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/metadata_update_names.sql"))
            .bind(title)
            .bind(title_sort)
            .bind(json_list(authors, "authors")?)
            .bind(author_sort)
            .bind(filename)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Delete
    // =========================================================================

    pub async fn delete(&self, filename: &str) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/metadata_delete.sql"))
            .bind(filename)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::utc_datetime;

    fn entry(filename: &str, title: &str) -> CacheEntry {
        CacheEntry {
            filename: filename.to_string(),
            title: title.to_string(),
            title_sort: title.to_string(),
            authors: vec!["A".to_string()],
            author_sort: "A".to_string(),
            dateadded: utc_datetime!(2024-05-01 12:00),
            size: 100,
            thumbnail: None,
            uuid: Some("u1".to_string()),
        }
    }

    async fn cache() -> (Database, MetadataCache) {
        let db = Database::connect_in_memory().await.unwrap();
        let cache = MetadataCache::from(&db);
        (db, cache)
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let (_db, cache) = cache().await;
        cache.upsert(&entry("foo.pdf", "Foo")).await.unwrap();
        assert_eq!(cache.get("foo.pdf").await.unwrap(), Some(entry("foo.pdf", "Foo")));
        assert!(cache.get("bar.pdf").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces_same_filename() {
        let (_db, cache) = cache().await;
        cache.upsert(&entry("foo.pdf", "Foo")).await.unwrap();
        cache.upsert(&entry("foo.pdf", "Foo (2nd ed.)")).await.unwrap();
        let all = cache.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "Foo (2nd ed.)");
    }

    #[tokio::test]
    async fn test_rename_keeps_attributes() {
        let (_db, cache) = cache().await;
        cache.upsert(&entry("A/book.epub", "Book")).await.unwrap();
        assert!(cache.rename("A/book.epub", "B/book.epub").await.unwrap());
        assert!(!cache.rename("A/book.epub", "C/book.epub").await.unwrap());
        let moved = cache.get("B/book.epub").await.unwrap().unwrap();
        assert_eq!(CacheEntry { filename: "A/book.epub".to_string(), ..moved }, entry("A/book.epub", "Book"));
    }

    #[tokio::test]
    async fn test_update_names_and_delete() {
        let (_db, cache) = cache().await;
        cache.upsert(&entry("foo.pdf", "Foo")).await.unwrap();
        let authors = vec!["New Person".to_string()];
        assert!(cache.update_names("foo.pdf", "Bar", "Bar", &authors, "Person, New").await.unwrap());
        let updated = cache.get("foo.pdf").await.unwrap().unwrap();
        assert_eq!(updated.title, "Bar");
        assert_eq!(updated.authors, authors);
        assert!(cache.delete("foo.pdf").await.unwrap());
        assert!(!cache.delete("foo.pdf").await.unwrap());
        assert!(cache.list().await.unwrap().is_empty());
    }

    #[test]
    fn test_entry_record_conversion() {
        let book = entry("foo.pdf", "Foo").to_record();
        assert_eq!(book.path, "foo.pdf");
        assert_eq!(book.uuid.as_deref(), Some("u1"));
        assert_eq!(book.added, utc_datetime!(2024-05-01 12:00));
        assert_eq!(CacheEntry::from(&book), entry("foo.pdf", "Foo"));
    }
}
