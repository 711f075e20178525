use super::{json_list, parse_json_list, size_from_row, size_to_row, timestamp};
use crate::error::{Error, ErrorKind, Result};
use exn::ResultExt;
use iosra_book::BookRecord;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct BooklistRow {
    pub(crate) path: String,
    pub(crate) position: i64,
    pub(crate) title: String,
    pub(crate) authors: String,
    pub(crate) tags: String,
    pub(crate) device_collections: String,
    pub(crate) author_sort: String,
    pub(crate) title_sort: String,
    pub(crate) uuid: Option<String>,
    pub(crate) size: i64,
    pub(crate) added: i64,
    pub(crate) publisher: Option<String>,
    pub(crate) series: Option<String>,
    pub(crate) series_index: Option<f64>,
    pub(crate) pubdate: Option<i64>,
    pub(crate) description: Option<String>,
    pub(crate) cover_hash: Option<String>,
    pub(crate) thumbnail: Option<Vec<u8>>,
}

impl BooklistRow {
    /// Dehydrate `book`, remembering where it sat in its list.
    pub(crate) fn dehydrate(position: usize, book: &BookRecord) -> Result<Self> {
        Ok(Self {
            path: book.path.clone(),
            position: i64::try_from(position).or_raise(|| ErrorKind::InvalidData("position"))?,
            title: book.title.clone(),
            authors: json_list(&book.authors, "authors")?,
            tags: json_list(&book.tags, "tags")?,
            device_collections: json_list(&book.device_collections, "device collections")?,
            author_sort: book.author_sort.clone(),
            title_sort: book.title_sort.clone(),
            uuid: book.uuid.clone(),
            size: size_to_row(book.size)?,
            added: book.added.unix_timestamp(),
            publisher: book.publisher.clone(),
            series: book.series.clone(),
            series_index: book.series_index,
            pubdate: book.pubdate.map(|d| d.unix_timestamp()),
            description: book.description.clone(),
            cover_hash: book.cover_hash.clone(),
            thumbnail: book.thumbnail.clone(),
        })
    }
}

impl TryFrom<BooklistRow> for BookRecord {
    type Error = Error;
    fn try_from(row: BooklistRow) -> Result<Self> {
        Ok(Self {
            authors: parse_json_list(&row.authors, "authors")?,
            tags: parse_json_list(&row.tags, "tags")?,
            device_collections: parse_json_list(&row.device_collections, "device collections")?,
            size: size_from_row(row.size)?,
            added: timestamp(row.added, "added")?,
            pubdate: row.pubdate.map(|p| timestamp(p, "pubdate")).transpose()?,
            title: row.title,
            author_sort: row.author_sort,
            title_sort: row.title_sort,
            path: row.path,
            uuid: row.uuid,
            publisher: row.publisher,
            series: row.series,
            series_index: row.series_index,
            description: row.description,
            cover_hash: row.cover_hash,
            thumbnail: row.thumbnail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::utc_datetime;

    #[test]
    fn test_dehydrate_keeps_every_field() {
        let mut book = BookRecord::new("Emma", vec!["Jane Austen".to_string()], "u-1.epub")
            .with_uuid("u-1")
            .with_size(2048)
            .with_added(utc_datetime!(2024-02-01 10:30))
            .with_collections(["Classics", "READ"]);
        book.publisher = Some("John Murray".to_string());
        book.series_index = Some(1.5);
        book.pubdate = Some(utc_datetime!(1815-12-23 0:00));
        book.tags = vec!["Fiction".to_string(), "Romance".to_string()];
        book.thumbnail = Some(vec![1, 2, 3]);
        let row = BooklistRow::dehydrate(3, &book).unwrap();
        assert_eq!(row.position, 3);
        assert_eq!(row.device_collections, r#"["Classics","READ"]"#);
        assert_eq!(BookRecord::try_from(row).unwrap(), book);
    }
}
