use crate::matching::{MatchKind, find_match};
use crate::record::BookRecord;

/// The authoritative list of books for one device session.
///
/// Insertion order is preserved and `path` is unique: adding a record whose
/// path is already present replaces the old record in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookList {
    books: Vec<BookRecord>,
}

impl BookList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BookRecord> {
        self.books.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, BookRecord> {
        self.books.iter_mut()
    }

    pub fn get(&self, path: &str) -> Option<&BookRecord> {
        self.books.iter().find(|b| b.path == path)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut BookRecord> {
        self.books.iter_mut().find(|b| b.path == path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Add a book, returning the record it replaced (same path), if any.
    pub fn add(&mut self, book: BookRecord) -> Option<BookRecord> {
        match self.books.iter_mut().find(|b| b.path == book.path) {
            Some(existing) => Some(std::mem::replace(existing, book)),
            None => {
                self.books.push(book);
                None
            },
        }
    }

    pub fn remove(&mut self, path: &str) -> Option<BookRecord> {
        let index = self.books.iter().position(|b| b.path == path)?;
        Some(self.books.remove(index))
    }

    pub fn retain(&mut self, f: impl FnMut(&BookRecord) -> bool) {
        self.books.retain(f);
    }

    /// See [`find_match`].
    pub fn find_match(&self, uuid: Option<&str>, title: &str, authors: &[String]) -> Option<(&BookRecord, MatchKind)> {
        find_match(self.books.iter(), uuid, title, authors)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.books.iter().map(|b| b.path.as_str())
    }

    /// Order books by path. Two lists holding the same books compare equal
    /// once both are sorted.
    pub fn sort_by_path(&mut self) {
        self.books.sort_by(|a, b| a.path.cmp(&b.path));
    }

    pub fn into_vec(self) -> Vec<BookRecord> {
        self.books
    }
}

impl FromIterator<BookRecord> for BookList {
    fn from_iter<T: IntoIterator<Item = BookRecord>>(iter: T) -> Self {
        let mut list = Self::new();
        for book in iter {
            list.add(book);
        }
        list
    }
}

impl IntoIterator for BookList {
    type Item = BookRecord;
    type IntoIter = std::vec::IntoIter<BookRecord>;
    fn into_iter(self) -> Self::IntoIter {
        self.books.into_iter()
    }
}

impl<'a> IntoIterator for &'a BookList {
    type Item = &'a BookRecord;
    type IntoIter = std::slice::Iter<'a, BookRecord>;
    fn into_iter(self) -> Self::IntoIter {
        self.books.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(path: &str, title: &str) -> BookRecord {
        BookRecord::new(title, vec!["A".to_string()], path)
    }

    #[test]
    fn test_paths_are_unique() {
        let mut list = BookList::new();
        assert!(list.add(book("foo.pdf", "Foo")).is_none());
        let replaced = list.add(book("foo.pdf", "Foo v2")).unwrap();
        assert_eq!(replaced.title, "Foo");
        assert_eq!(list.len(), 1);
        assert_eq!(list.get("foo.pdf").unwrap().title, "Foo v2");
    }

    #[test]
    fn test_remove_and_order() {
        let mut list: BookList = [book("b.pdf", "B"), book("a.pdf", "A"), book("c.pdf", "C")].into_iter().collect();
        assert_eq!(list.paths().collect::<Vec<_>>(), vec!["b.pdf", "a.pdf", "c.pdf"]);
        assert_eq!(list.remove("a.pdf").unwrap().title, "A");
        assert!(list.remove("a.pdf").is_none());
        list.sort_by_path();
        assert_eq!(list.paths().collect::<Vec<_>>(), vec!["b.pdf", "c.pdf"]);
    }
}
