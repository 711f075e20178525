//! Companion catalog databases for tests.
//!
//! Writes a file with the same tables and columns the companion app uses, so
//! tests can put it on a mock device and read it back through
//! [`AppCatalog`](crate::AppCatalog).

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;

const SCHEMA: &str = r#"
    CREATE TABLE Books (
        ID INTEGER PRIMARY KEY, Title TEXT, Author TEXT, AuthorSort TEXT, CalibreCoverHash TEXT,
        CalibreSeries TEXT, CalibreSeriesIndex TEXT, CalibreTitleSort TEXT, DateAdded INTEGER,
        DatePublished INTEGER, Description TEXT, FileName TEXT, Hash TEXT, IsRead INTEGER,
        NewFlag INTEGER, Publisher TEXT, ReadingList INTEGER, UUID TEXT
    );
    CREATE TABLE Collections (ID INTEGER PRIMARY KEY, Name TEXT);
    CREATE TABLE BookCollections (BookID INTEGER, CollectionID INTEGER);
    CREATE TABLE BookSubjects (BookID INTEGER, Subject TEXT);
"#;

#[derive(Debug, Clone, Default)]
pub struct FixtureBook {
    pub title: String,
    pub author: String,
    pub filename: String,
    pub uuid: Option<String>,
    pub hash: Option<String>,
    pub date_added: i64,
    pub date_published: Option<i64>,
    pub series: Option<String>,
    pub series_index: Option<f64>,
    pub collections: Vec<String>,
    pub subjects: Vec<String>,
    pub is_read: bool,
    pub new_flag: bool,
    pub reading_list: bool,
}

impl FixtureBook {
    pub fn new(title: &str, author: &str, filename: &str) -> Self {
        Self {
            title: title.to_string(),
            author: author.to_string(),
            filename: filename.to_string(),
            ..Self::default()
        }
    }

    pub fn uuid(mut self, uuid: &str) -> Self {
        self.uuid = Some(uuid.to_string());
        self
    }

    pub fn hash(mut self, hash: &str) -> Self {
        self.hash = Some(hash.to_string());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct CatalogFixture {
    books: Vec<FixtureBook>,
}

impl CatalogFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn book(mut self, book: FixtureBook) -> Self {
        self.books.push(book);
        self
    }

    /// Create the catalog at `path`, which must not exist yet.
    pub async fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let options = SqliteConnectOptions::new().filename(path.as_ref()).create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        sqlx::query(SCHEMA).execute(&pool).await.or_raise(|| ErrorKind::Database)?;

        let mut collection_ids: Vec<&str> = Vec::new();
        for (index, book) in self.books.iter().enumerate() {
            let id = i64::try_from(index + 1).or_raise(|| ErrorKind::InvalidData("book id"))?;
            sqlx::query(
                "INSERT INTO Books (ID, Title, Author, AuthorSort, CalibreCoverHash, CalibreSeries, \
                 CalibreSeriesIndex, CalibreTitleSort, DateAdded, DatePublished, Description, FileName, Hash, \
                 IsRead, NewFlag, Publisher, ReadingList, UUID) \
                 VALUES (?, ?, ?, NULL, NULL, ?, ?, NULL, ?, ?, NULL, ?, ?, ?, ?, NULL, ?, ?)",
            )
            .bind(id)
            .bind(&book.title)
            .bind(&book.author)
            .bind(book.series.as_deref().unwrap_or(""))
            .bind(book.series_index.map(|i| i.to_string()))
            .bind(book.date_added)
            .bind(book.date_published)
            .bind(&book.filename)
            .bind(&book.hash)
            .bind(i64::from(book.is_read))
            .bind(i64::from(book.new_flag))
            .bind(i64::from(book.reading_list))
            .bind(&book.uuid)
            .execute(&pool)
            .await
            .or_raise(|| ErrorKind::Database)?;

            for name in &book.collections {
                let position = match collection_ids.iter().position(|c| c == name) {
                    Some(position) => position,
                    None => {
                        collection_ids.push(name);
                        collection_ids.len() - 1
                    },
                };
                let collection_id = i64::try_from(position + 1).or_raise(|| ErrorKind::InvalidData("collection id"))?;
                sqlx::query("INSERT INTO BookCollections (BookID, CollectionID) VALUES (?, ?)")
                    .bind(id)
                    .bind(collection_id)
                    .execute(&pool)
                    .await
                    .or_raise(|| ErrorKind::Database)?;
            }
            for subject in &book.subjects {
                sqlx::query("INSERT INTO BookSubjects (BookID, Subject) VALUES (?, ?)")
                    .bind(id)
                    .bind(subject)
                    .execute(&pool)
                    .await
                    .or_raise(|| ErrorKind::Database)?;
            }
        }
        for (index, name) in collection_ids.iter().enumerate() {
            let id = i64::try_from(index + 1).or_raise(|| ErrorKind::InvalidData("collection id"))?;
            sqlx::query("INSERT INTO Collections (ID, Name) VALUES (?, ?)")
                .bind(id)
                .bind(*name)
                .execute(&pool)
                .await
                .or_raise(|| ErrorKind::Database)?;
        }
        pool.close().await;
        Ok(())
    }
}
