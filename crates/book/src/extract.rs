//! Format-native metadata extraction for books found on the device.
//!
//! Reading real ebook metadata is the host library's job; the
//! [`MetadataExtractor`] trait is the seam it plugs into. [`BasicExtractor`]
//! is the built-in fallback: it validates the container by its magic bytes
//! and pulls out whatever a header scan can find cheaply.

use crate::error::{ErrorKind, Result};
use exn::OptionExt;
use regex::bytes::Regex;
use std::path::Path;
use std::sync::LazyLock;

static PDF_TITLE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/Title\s*\(([^)]*)\)").unwrap());
static PDF_AUTHOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/Author\s*\(([^)]*)\)").unwrap());

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const PDF_MAGIC: &[u8] = b"%PDF-";
const MOBI_MAGIC: &[u8] = b"BOOKMOBI";
const MOBI_MAGIC_OFFSET: usize = 60;
const PDB_NAME_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookFormat {
    Epub,
    Pdf,
    Mobi,
}

impl BookFormat {
    /// Guess the format from a file extension (case-insensitive).
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "epub" => Some(Self::Epub),
            "pdf" => Some(Self::Pdf),
            "mobi" | "azw" | "azw3" | "prc" => Some(Self::Mobi),
            _ => None,
        }
    }

    /// Whether `data` starts like a valid container of this format.
    pub fn matches_magic(&self, data: &[u8]) -> bool {
        match self {
            Self::Epub => data.starts_with(ZIP_MAGIC),
            Self::Pdf => data.starts_with(PDF_MAGIC),
            Self::Mobi => data.get(MOBI_MAGIC_OFFSET..MOBI_MAGIC_OFFSET + MOBI_MAGIC.len()) == Some(MOBI_MAGIC),
        }
    }
}

/// What an extractor could learn about a book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedMetadata {
    pub title: String,
    pub authors: Vec<String>,
    pub cover: Option<Vec<u8>>,
}

/// Reads metadata from a book file's bytes.
///
/// Failures are per-book: callers record them and carry on with the batch.
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, path: &Path, data: &[u8]) -> Result<ExtractedMetadata>;
}

/// Header-scan extractor with filename fallbacks.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicExtractor;

impl BasicExtractor {
    fn fallback_title(path: &Path) -> String {
        path.file_stem().and_then(|s| s.to_str()).unwrap_or("Unknown").to_string()
    }

    fn pdf_string(re: &Regex, data: &[u8]) -> Option<String> {
        let captures = re.captures(data)?;
        let value = String::from_utf8_lossy(captures.get(1)?.as_bytes()).trim().to_string();
        (!value.is_empty()).then_some(value)
    }

    fn mobi_title(data: &[u8]) -> Option<String> {
        let name = data.get(..PDB_NAME_LEN)?;
        let end = name.iter().position(|b| *b == 0).unwrap_or(PDB_NAME_LEN);
        let title = String::from_utf8_lossy(&name[..end]).replace('_', " ").trim().to_string();
        (!title.is_empty()).then_some(title)
    }
}

impl MetadataExtractor for BasicExtractor {
    fn extract(&self, path: &Path, data: &[u8]) -> Result<ExtractedMetadata> {
        let format = BookFormat::from_path(path).ok_or_raise(|| ErrorKind::UnsupportedFormat(path.to_path_buf()))?;
        if !format.matches_magic(data) {
            exn::bail!(ErrorKind::InvalidSourceFile(path.to_path_buf()));
        }
        let (title, author) = match format {
            BookFormat::Pdf => (Self::pdf_string(&PDF_TITLE, data), Self::pdf_string(&PDF_AUTHOR, data)),
            BookFormat::Mobi => (Self::mobi_title(data), None),
            BookFormat::Epub => (None, None),
        };
        Ok(ExtractedMetadata {
            title: title.unwrap_or_else(|| Self::fallback_title(path)),
            authors: vec![author.unwrap_or_else(|| "Unknown".to_string())],
            cover: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("a.EPUB", Some(BookFormat::Epub))]
    #[case("dir/b.pdf", Some(BookFormat::Pdf))]
    #[case("c.azw3", Some(BookFormat::Mobi))]
    #[case("d.txt", None)]
    #[case("noext", None)]
    fn test_format_from_path(#[case] path: &str, #[case] expected: Option<BookFormat>) {
        assert_eq!(BookFormat::from_path(path), expected);
    }

    #[test]
    fn test_pdf_info_dictionary() {
        let data = b"%PDF-1.4\n1 0 obj << /Title (Foo Bar) /Author (Jane Doe) >> endobj";
        let meta = BasicExtractor.extract(Path::new("x.pdf"), data).unwrap();
        assert_eq!(meta.title, "Foo Bar");
        assert_eq!(meta.authors, vec!["Jane Doe"]);
    }

    #[test]
    fn test_pdf_fallback_to_filename() {
        let meta = BasicExtractor.extract(Path::new("sub/bar.pdf"), b"%PDF-1.7\n").unwrap();
        assert_eq!(meta.title, "bar");
        assert_eq!(meta.authors, vec!["Unknown"]);
    }

    #[test]
    fn test_mobi_pdb_name() {
        let mut data = vec![0u8; 80];
        data[..13].copy_from_slice(b"The_Odyssey\0\0");
        data[60..68].copy_from_slice(b"BOOKMOBI");
        let meta = BasicExtractor.extract(Path::new("odyssey.mobi"), &data).unwrap();
        assert_eq!(meta.title, "The Odyssey");
    }

    #[test]
    fn test_invalid_container() {
        let err = BasicExtractor.extract(Path::new("broken.epub"), b"not a zip").unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidSourceFile(_)));
        let err = BasicExtractor.extract(Path::new("notes.txt"), b"hello").unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnsupportedFormat(_)));
    }
}
