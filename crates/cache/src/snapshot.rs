//! Dehydrated booklist snapshots.
//!
//! A snapshot is the full booklist of a session together with the
//! [`ContentProfile`] of the companion catalog it was built from. As long as
//! the live catalog still has that profile, the booklist can be rehydrated
//! instead of rebuilt.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::BooklistRow;
use exn::ResultExt;
use iosra_book::{BookList, BookRecord, ContentProfile};
use sqlx::SqlitePool;
use tracing::instrument;

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    pool: SqlitePool,
}
impl From<&Database> for SnapshotStore {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl SnapshotStore {
    /// Replace the stored snapshot with `books` and `profile`, atomically.
    #[instrument("storing booklist snapshot", skip_all, fields(books = books.len()))]
    pub async fn store(&self, books: &BookList, profile: &ContentProfile) -> Result<()> {
        let rows = books
            .iter()
            .enumerate()
            .map(|(position, book)| BooklistRow::dehydrate(position, book))
            .collect::<Result<Vec<_>>>()?;
        let profile = serde_json::to_string(profile).or_raise(|| ErrorKind::InvalidData("content profile"))?;

        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        sqlx::query("DELETE FROM booklist").execute(&mut *tx).await.or_raise(|| ErrorKind::Database)?;
        for row in rows {
            sqlx::query(include_str!("../queries/booklist_insert.sql"))
                .bind(row.path)
                .bind(row.position)
                .bind(row.title)
                .bind(row.authors)
                .bind(row.tags)
                .bind(row.device_collections)
                .bind(row.author_sort)
                .bind(row.title_sort)
                .bind(row.uuid)
                .bind(row.size)
                .bind(row.added)
                .bind(row.publisher)
                .bind(row.series)
                .bind(row.series_index)
                .bind(row.pubdate)
                .bind(row.description)
                .bind(row.cover_hash)
                .bind(row.thumbnail)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
        }
        sqlx::query(include_str!("../queries/profile_put.sql"))
            .bind(profile)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// The profile stored with the snapshot, if a snapshot was ever taken.
    pub async fn load_profile(&self) -> Result<Option<ContentProfile>> {
        let row: Option<(String,)> = sqlx::query_as(include_str!("../queries/profile_get.sql"))
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(|(json,)| serde_json::from_str(&json).or_raise(|| ErrorKind::InvalidData("content profile")))
            .transpose()
    }

    /// Rehydrate the stored booklist, in its original order.
    pub async fn load_books(&self) -> Result<BookList> {
        let rows: Vec<BooklistRow> = sqlx::query_as(include_str!("../queries/booklist_list.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(BookRecord::try_from).collect()
    }

    /// Forget the snapshot. Used before any command that changes the
    /// companion catalog, so a stale list can never be trusted.
    pub async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        sqlx::query("DELETE FROM booklist").execute(&mut *tx).await.or_raise(|| ErrorKind::Database)?;
        sqlx::query("DELETE FROM content_profile").execute(&mut *tx).await.or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        sqlx::query("VACUUM").execute(&self.pool).await.or_raise(|| ErrorKind::Database)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn profile(books: u64) -> ContentProfile {
        ContentProfile {
            content_hash: "0cc175b9c0f1b6a831c399e269772661".to_string(),
            covers_size: 544,
            table_counts: BTreeMap::from([("Books".to_string(), books)]),
        }
    }

    fn books() -> BookList {
        let mut emma = BookRecord::new("Emma", vec!["Jane Austen".to_string()], "u-2.epub").with_uuid("u-2");
        emma.thumbnail = Some(vec![0, 159, 146, 150]);
        [BookRecord::new("Zed", vec!["Z".to_string()], "u-9.epub"), emma].into_iter().collect()
    }

    #[tokio::test]
    async fn test_empty_store() {
        let db = Database::connect_in_memory().await.unwrap();
        let store = SnapshotStore::from(&db);
        assert!(store.load_profile().await.unwrap().is_none());
        assert!(store.load_books().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_and_rehydrate_in_order() {
        let db = Database::connect_in_memory().await.unwrap();
        let store = SnapshotStore::from(&db);
        store.store(&books(), &profile(2)).await.unwrap();
        assert_eq!(store.load_books().await.unwrap(), books());
        assert_eq!(store.load_profile().await.unwrap(), Some(profile(2)));
    }

    #[tokio::test]
    async fn test_store_replaces_previous_snapshot() {
        let db = Database::connect_in_memory().await.unwrap();
        let store = SnapshotStore::from(&db);
        store.store(&books(), &profile(2)).await.unwrap();
        let fewer: BookList = books().into_iter().skip(1).collect();
        store.store(&fewer, &profile(1)).await.unwrap();
        assert_eq!(store.load_books().await.unwrap(), fewer);
        assert_eq!(store.load_profile().await.unwrap(), Some(profile(1)));
    }

    #[tokio::test]
    async fn test_clear() {
        let db = Database::connect_in_memory().await.unwrap();
        let store = SnapshotStore::from(&db);
        store.store(&books(), &profile(2)).await.unwrap();
        store.clear().await.unwrap();
        assert!(store.load_profile().await.unwrap().is_none());
        assert!(store.load_books().await.unwrap().is_empty());
    }
}
