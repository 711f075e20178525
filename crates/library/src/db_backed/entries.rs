//! Building manifest entries from book records.

use iosra_book::{BookRecord, CollectionFlag};
use iosra_protocol::{BookEntry, Cover, MetadataAttributes};

/// Title, joined authors and UUID, as the companion identifies a book.
pub(crate) fn identified(filename: &str, book: &BookRecord) -> BookEntry {
    BookEntry::new(filename).identified(&book.title, &book.authors_joined(", "), book.uuid.as_deref())
}

pub(crate) fn attributes(book: &BookRecord) -> MetadataAttributes {
    MetadataAttributes {
        author_sort: book.author_sort.clone(),
        title_sort: book.title_sort.clone(),
        pubdate: book.pubdate.map(|d| d.date()),
        publisher: book.publisher.clone().unwrap_or_default(),
        rating: None,
        series: book.series.clone().unwrap_or_default(),
        series_index: book.series_index,
    }
}

/// The full description of `book` sent with an upload or metadata update.
pub(crate) fn described(filename: &str, book: &BookRecord, collections: Vec<String>) -> BookEntry {
    let mut entry = identified(filename, book);
    entry.metadata = Some(attributes(book));
    entry.subjects = Some(book.tags.clone());
    entry.collections = Some(collections);
    entry.description = book.description.clone();
    entry
}

/// Attach cover bytes, with their hash.
pub(crate) fn with_cover(mut entry: BookEntry, cover: Option<&[u8]>) -> BookEntry {
    if let Some(data) = cover {
        let cover = Cover::new(data.to_vec());
        entry.cover_hash = Some(cover.hash());
        entry.cover = Some(cover);
    }
    entry
}

/// Collections a book ends up with on the device.
///
/// Merging keeps every device collection and adds the library's. Replacing
/// takes the library's, but active reserved flags on the device survive
/// either way.
pub(crate) fn merge_collections(device: &[String], library: &[String], merge: bool) -> Vec<String> {
    let mut merged: Vec<String> = match merge {
        true => device.iter().chain(library).cloned().collect(),
        false => CollectionFlag::active_in(device).into_iter().chain(library.iter().cloned()).collect(),
    };
    merged.sort();
    merged.dedup();
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[rstest]
    #[case(true, &["Classics", "Fantasy", "READ", "Sci-Fi"])]
    #[case(false, &["Fantasy", "READ", "Sci-Fi"])]
    fn test_merge_collections(#[case] merge: bool, #[case] expected: &[&str]) {
        let device = strings(&["Classics", "READ", "Sci-Fi"]);
        let library = strings(&["Fantasy", "Sci-Fi"]);
        assert_eq!(merge_collections(&device, &library, merge), strings(expected));
    }

    #[test]
    fn test_described_entry() {
        let mut book = BookRecord::new("Dune", vec!["Frank Herbert".to_string()], "").with_uuid("u1");
        book.series = Some("Dune".to_string());
        book.series_index = Some(1.0);
        book.tags = strings(&["SF"]);
        let entry = with_cover(described("u1.epub", &book, strings(&["Sci-Fi"])), Some(b"jpeg"));
        assert_eq!(entry.filename, "u1.epub");
        assert_eq!(entry.author.as_deref(), Some("Frank Herbert"));
        assert_eq!(entry.uuid.as_deref(), Some("u1"));
        assert_eq!(entry.metadata.as_ref().unwrap().series, "Dune");
        assert_eq!(entry.collections, Some(strings(&["Sci-Fi"])));
        assert_eq!(entry.cover_hash, Some(iosra_book::cover::cover_hash(b"jpeg")));
    }
}
