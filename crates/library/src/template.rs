//! Upload filename templating.
//!
//! Each reader app names uploaded files its own way. The names are rendered
//! from the book's metadata with [upon] templates, extended with two
//! library-specific helpers:
//!
//! - **`filename`** replaces characters that are not allowed in device
//!   filenames and trims the result.
//! - **`truncate`** truncates strings to a maximum byte length at a character
//!   boundary, usable as either `truncate(value, n)` or `{{ value|truncate: n }}`.
//!
//! # Template Variables
//!
//! | Variable  | Type     | Description                                   |
//! |-----------|----------|-----------------------------------------------|
//! | `title`   | `String` | Book title                                    |
//! | `author`  | `String` | First author, or `Unknown`                    |
//! | `authors` | `String` | All authors joined with `, `                  |
//! | `uuid`    | `String` | Library UUID, empty when the book has none    |
//! | `ext`     | `String` | Lowercase extension of the source file        |
//!
//! # Example
//!
//! ```
//! use iosra_book::BookRecord;
//! use iosra_library::FilenameGenerator;
//!
//! let book = BookRecord::new("Dune: Messiah", vec!["Frank Herbert".to_string()], "");
//! let generator: FilenameGenerator = "{{ title|filename }}-{{ author|filename }}.{{ ext }}".parse().unwrap();
//! assert_eq!(generator.generate(&book, "MOBI").unwrap(), "Dune_ Messiah-Frank Herbert.mobi");
//! ```

use crate::error::{Error, ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use iosra_book::BookRecord;
use iosra_transport::validate_path;
use std::str::FromStr;
use tracing::instrument;
use upon::{Engine, Template};

/// Renders device filenames for uploaded books.
///
/// Constructed via [`FromStr`], which compiles the template eagerly so that
/// syntax errors surface at creation time rather than at render time.
pub struct FilenameGenerator {
    engine: Engine<'static>,
    template: Template<'static>,
}
impl FromStr for FilenameGenerator {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut engine = Engine::new();
        addons::configure(&mut engine);
        let template = engine.compile(s.to_string()).or_raise(|| ErrorKind::Template)?;
        Ok(Self { engine, template })
    }
}
impl FilenameGenerator {
    /// Render the filename for `book`, whose source file has extension `ext`.
    ///
    /// The result is validated to stay inside the documents folder.
    #[instrument(skip_all, fields(title = %book.title))]
    pub fn generate(&self, book: &BookRecord, ext: &str) -> Result<String> {
        let name =
            self.template.render(&self.engine, Self::parameters(book, ext)).to_string().or_raise(|| ErrorKind::Template)?;
        Self::normalize(name)
    }

    fn normalize(s: String) -> Result<String> {
        let name = s.trim().split('/').map(str::trim).collect::<Vec<_>>().join("/");
        let path = validate_path(&name).or_raise(|| ErrorKind::Template)?;
        path.to_str().map(str::to_string).ok_or_raise(|| ErrorKind::Template)
    }

    fn parameters(book: &BookRecord, ext: &str) -> upon::Value {
        upon::value! {
            title: book.title.as_str(),
            author: book.authors.first().map(String::as_str).unwrap_or("Unknown"),
            authors: book.authors_joined(", "),
            uuid: book.uuid.clone().unwrap_or_default(),
            ext: ext.trim().trim_matches('.').to_ascii_lowercase(),
        }
    }
}

/// Custom [`upon`] extensions for filename-safe string manipulation.
mod addons {
    use std::fmt::Write;
    use upon::{Engine, Value, fmt as upon_fmt};

    const RESERVED: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

    fn filename_formatter(f: &mut upon_fmt::Formatter<'_>, value: &Value) -> upon_fmt::Result {
        match value {
            Value::String(s) => {
                let safe: String = s
                    .chars()
                    .map(|c| if RESERVED.contains(&c) || c.is_control() { '_' } else { c })
                    .collect();
                write!(f, "{}", safe.trim().trim_matches('.'))?
            },
            v => upon_fmt::default(f, v)?,
        };
        Ok(())
    }

    fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> String {
        s[..s.floor_char_boundary(max_bytes)].to_string()
    }

    pub(crate) fn configure(engine: &mut Engine<'_>) {
        engine.add_formatter("filename", filename_formatter);
        engine.add_function("truncate", truncate_to_char_boundary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReaderApp;
    use rstest::rstest;

    fn book(title: &str, authors: &[&str], uuid: Option<&str>) -> BookRecord {
        let mut book = BookRecord::new(title, authors.iter().map(|a| a.to_string()).collect(), "");
        book.uuid = uuid.map(str::to_string);
        book
    }

    #[rstest]
    #[case(ReaderApp::Marvin, "epub", "9b1c-77.epub")]
    #[case(ReaderApp::GoodReader, "pdf", "A Tale_ Of Two.pdf")]
    #[case(ReaderApp::Kindle, ".MOBI", "A Tale_ Of Two-Charles Dickens.mobi")]
    fn test_app_templates(#[case] app: ReaderApp, #[case] ext: &str, #[case] expected: &str) {
        let generator: FilenameGenerator = app.upload_template().parse().unwrap();
        let book = book("A Tale: Of Two", &["Charles Dickens", "Someone Else"], Some("9b1c-77"));
        assert_eq!(generator.generate(&book, ext).unwrap(), expected);
    }

    #[test]
    fn test_filename_strips_separators() {
        let generator: FilenameGenerator = "{{ title|filename }}.pdf".parse().unwrap();
        let name = generator.generate(&book("../../etc/passwd", &[], None), "pdf").unwrap();
        assert!(!name.contains('/'));
        assert_eq!(name, "_.._etc_passwd.pdf");
    }

    #[test]
    fn test_missing_author_and_truncate() {
        let generator: FilenameGenerator = "{{ truncate(title, 6) }}-{{ author }}".parse().unwrap();
        assert_eq!(generator.generate(&book("Middlemarch", &[], None), "epub").unwrap(), "Middle-Unknown");
    }

    #[test]
    fn test_invalid_template() {
        assert!("{{ title".parse::<FilenameGenerator>().is_err());
    }
}
