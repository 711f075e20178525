//! "Same book" matching between library metadata and device records.
//!
//! UUID wins when both sides have one. Otherwise an exact (title, authors)
//! match is accepted. Two distinct books sharing a title and author list
//! (different editions, say) are indistinguishable here and the first one
//! found is returned. The companion app matches the same way, so this is
//! kept rather than tightened.

use crate::record::BookRecord;

/// How a match was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Uuid,
    TitleAuthors,
}

/// Find the record describing the same book as (`uuid`, `title`, `authors`).
///
/// Every candidate is checked for a UUID match before any title+authors
/// comparison is made.
pub fn find_match<'a, I>(
    candidates: I,
    uuid: Option<&str>,
    title: &str,
    authors: &[String],
) -> Option<(&'a BookRecord, MatchKind)>
where
    I: IntoIterator<Item = &'a BookRecord>,
    I::IntoIter: Clone,
{
    let candidates = candidates.into_iter();
    if let Some(uuid) = uuid
        && let Some(book) = candidates.clone().find(|b| b.uuid.as_deref() == Some(uuid))
    {
        return Some((book, MatchKind::Uuid));
    }
    candidates
        .into_iter()
        .find(|b| b.title == title && b.authors == authors)
        .map(|b| (b, MatchKind::TitleAuthors))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn books() -> Vec<BookRecord> {
        vec![
            BookRecord::new("Dune", vec!["Frank Herbert".to_string()], "a.epub").with_uuid("u-a"),
            BookRecord::new("Dune", vec!["Frank Herbert".to_string()], "b.epub").with_uuid("u-b"),
            BookRecord::new("Emma", vec!["Jane Austen".to_string()], "c.epub"),
        ]
    }

    #[test]
    fn test_uuid_preferred_over_title() {
        let books = books();
        let (book, kind) = find_match(&books, Some("u-b"), "Dune", &["Frank Herbert".to_string()]).unwrap();
        assert_eq!(book.path, "b.epub");
        assert_eq!(kind, MatchKind::Uuid);
    }

    #[test]
    fn test_title_authors_fallback_takes_first() {
        let books = books();
        let (book, kind) = find_match(&books, Some("unknown"), "Dune", &["Frank Herbert".to_string()]).unwrap();
        assert_eq!(book.path, "a.epub");
        assert_eq!(kind, MatchKind::TitleAuthors);
    }

    #[test]
    fn test_no_match() {
        let books = books();
        assert!(find_match(&books, None, "Emma", &["Someone Else".to_string()]).is_none());
        assert!(find_match(&books, None, "Emma", &["Jane Austen".to_string()]).is_some());
    }
}
