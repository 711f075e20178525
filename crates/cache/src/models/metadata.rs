use super::{json_list, parse_json_list, size_from_row, size_to_row, timestamp};
use crate::error::Error;
use crate::metadata::CacheEntry;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MetadataRow {
    pub(crate) filename: String,
    pub(crate) title: String,
    pub(crate) title_sort: String,
    pub(crate) authors: String,
    pub(crate) author_sort: String,
    pub(crate) dateadded: i64,
    pub(crate) size: i64,
    pub(crate) thumb_data: Option<Vec<u8>>,
    pub(crate) uuid: Option<String>,
}
impl TryFrom<&CacheEntry> for MetadataRow {
    type Error = Error;
    fn try_from(entry: &CacheEntry) -> Result<Self, Self::Error> {
        Ok(Self {
            filename: entry.filename.clone(),
            title: entry.title.clone(),
            title_sort: entry.title_sort.clone(),
            authors: json_list(&entry.authors, "authors")?,
            author_sort: entry.author_sort.clone(),
            dateadded: entry.dateadded.unix_timestamp(),
            size: size_to_row(entry.size)?,
            thumb_data: entry.thumbnail.clone(),
            uuid: entry.uuid.clone(),
        })
    }
}
impl TryFrom<MetadataRow> for CacheEntry {
    type Error = Error;
    fn try_from(row: MetadataRow) -> Result<Self, Self::Error> {
        Ok(Self {
            authors: parse_json_list(&row.authors, "authors")?,
            dateadded: timestamp(row.dateadded, "dateadded")?,
            size: size_from_row(row.size)?,
            filename: row.filename,
            title: row.title,
            title_sort: row.title_sort,
            author_sort: row.author_sort,
            thumbnail: row.thumb_data,
            uuid: row.uuid,
        })
    }
}
