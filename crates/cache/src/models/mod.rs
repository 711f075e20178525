mod booklist;
mod catalog;
mod metadata;

pub(crate) use self::booklist::BooklistRow;
pub(crate) use self::catalog::{CatalogRow, CollectionRow, SubjectRow, TitleRow};
pub(crate) use self::metadata::MetadataRow;

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use time::UtcDateTime;

pub(crate) fn json_list(values: &[String], field: &'static str) -> Result<String> {
    serde_json::to_string(values).or_raise(|| ErrorKind::InvalidData(field))
}

pub(crate) fn parse_json_list(text: &str, field: &'static str) -> Result<Vec<String>> {
    serde_json::from_str(text).or_raise(|| ErrorKind::InvalidData(field))
}

pub(crate) fn timestamp(value: i64, field: &'static str) -> Result<UtcDateTime> {
    UtcDateTime::from_unix_timestamp(value).or_raise(|| ErrorKind::InvalidData(field))
}

pub(crate) fn size_to_row(size: u64) -> Result<i64> {
    i64::try_from(size).or_raise(|| ErrorKind::InvalidData("size"))
}

pub(crate) fn size_from_row(size: i64) -> Result<u64> {
    u64::try_from(size).or_raise(|| ErrorKind::InvalidData("size"))
}
