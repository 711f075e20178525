use crate::flags::CollectionFlag;
use time::UtcDateTime;

/// One ebook known to a device session.
///
/// `path` is the book's location relative to the reader app's documents
/// folder and is the unique key within a [`BookList`](crate::BookList).
/// Every field here survives a snapshot round-trip.
#[derive(Debug, Clone, PartialEq)]
pub struct BookRecord {
    pub title: String,
    pub authors: Vec<String>,
    pub author_sort: String,
    pub title_sort: String,
    pub path: String,
    /// Absent for books that were never managed by the desktop library.
    pub uuid: Option<String>,
    pub size: u64,
    pub added: UtcDateTime,
    pub publisher: Option<String>,
    pub series: Option<String>,
    pub series_index: Option<f64>,
    pub pubdate: Option<UtcDateTime>,
    pub description: Option<String>,
    /// Subjects, sorted.
    pub tags: Vec<String>,
    /// Collection names assigned on the device, sorted. May contain
    /// reserved [`CollectionFlag`] names.
    pub device_collections: Vec<String>,
    pub cover_hash: Option<String>,
    pub thumbnail: Option<Vec<u8>>,
}

impl BookRecord {
    /// A record with only the mandatory fields set. Sort keys are derived
    /// from the title and authors.
    pub fn new(title: impl Into<String>, authors: Vec<String>, path: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            author_sort: crate::sort::authors_sort(&authors),
            title_sort: crate::sort::title_sort(&title),
            title,
            authors,
            path: path.into(),
            uuid: None,
            size: 0,
            added: UtcDateTime::UNIX_EPOCH,
            publisher: None,
            series: None,
            series_index: None,
            pubdate: None,
            description: None,
            tags: Vec::new(),
            device_collections: Vec::new(),
            cover_hash: None,
            thumbnail: None,
        }
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_added(mut self, added: UtcDateTime) -> Self {
        self.added = added;
        self
    }

    pub fn with_collections(mut self, collections: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.device_collections = collections.into_iter().map(Into::into).collect();
        self.device_collections.sort();
        self
    }

    /// Authors joined the way the companion app displays them.
    pub fn authors_joined(&self, separator: &str) -> String {
        self.authors.join(separator)
    }

    /// Reserved flags currently set on this book.
    pub fn active_flags(&self) -> Vec<String> {
        CollectionFlag::active_in(&self.device_collections)
    }

    /// Final component of `path`, used to recognise a book that was moved
    /// into another folder.
    pub fn basename(&self) -> &str {
        basename(&self.path)
    }
}

/// Final `/`-separated component of a device path.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_derives_sort_keys() {
        let book = BookRecord::new("The Hobbit", vec!["J. R. R. Tolkien".to_string()], "hobbit.epub");
        assert_eq!(book.title_sort, "Hobbit, The");
        assert_eq!(book.author_sort, "Tolkien, J. R. R.");
        assert!(book.uuid.is_none());
    }

    #[test]
    fn test_basename() {
        let book = BookRecord::new("Foo", vec![], "A/B/foo.pdf");
        assert_eq!(book.basename(), "foo.pdf");
        assert_eq!(basename("foo.pdf"), "foo.pdf");
    }

    #[test]
    fn test_collections_sorted_and_flags() {
        let book = BookRecord::new("Foo", vec![], "foo.epub").with_collections(["Sci-Fi", "READ", "Classics"]);
        assert_eq!(book.device_collections, vec!["Classics", "READ", "Sci-Fi"]);
        assert_eq!(book.active_flags(), vec!["READ"]);
    }
}
