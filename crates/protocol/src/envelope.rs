//! Command envelopes: the files staged for the companion app to execute.
//!
//! An envelope serializes to
//!
//! ```xml
//! <?xml version='1.0' encoding='utf-8'?>
//! <deletebooks timestamp='1700000000'><manifest><book .../></manifest></deletebooks>
//! ```
//!
//! preceded by a UTF-8 byte order mark. The companion app is strict about
//! this shape, so it is produced by a fixed serializer rather than a DOM.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use time::Date;
use time::macros::format_description;

const PROLOG: &[u8] = b"\xef\xbb\xbf<?xml version='1.0' encoding='utf-8'?>\n";

/// The commands understood by the companion app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    DeleteBooks,
    UploadBooks,
    UpdateMetadata,
    RebuildCollections,
}

impl CommandKind {
    /// Base name of the staged file (`<name>.xml`).
    pub fn name(&self) -> &'static str {
        match self {
            Self::DeleteBooks => "delete_books",
            Self::UploadBooks => "upload_books",
            Self::UpdateMetadata => "update_metadata",
            Self::RebuildCollections => "rebuild_collections",
        }
    }

    /// Root element of the envelope.
    pub fn element(&self) -> &'static str {
        match self {
            Self::DeleteBooks => "deletebooks",
            Self::UploadBooks => "uploadbooks",
            Self::UpdateMetadata => "updatemetadata",
            Self::RebuildCollections => "rebuildcollections",
        }
    }
}

/// A cover embedded in a book entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cover {
    pub data: Vec<u8>,
}

impl Cover {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn hash(&self) -> String {
        iosra_book::cover::cover_hash(&self.data)
    }
}

/// Descriptive attributes sent with metadata updates. Empty values are
/// still sent, because the companion app treats an absent attribute as
/// "unchanged" and an empty one as "cleared".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataAttributes {
    pub author_sort: String,
    pub title_sort: String,
    pub pubdate: Option<Date>,
    pub publisher: String,
    /// On the companion's five-star scale.
    pub rating: Option<f64>,
    pub series: String,
    pub series_index: Option<f64>,
}

/// One `<book>` element of a manifest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookEntry {
    pub filename: String,
    pub title: Option<String>,
    /// Authors, already joined for display.
    pub author: Option<String>,
    pub uuid: Option<String>,
    pub metadata: Option<MetadataAttributes>,
    /// Hash of the cover inside the uploaded file, when the app may use it.
    pub cover_hash: Option<String>,
    pub locked: Option<bool>,
    pub word_count: Option<u64>,
    pub overwrite: bool,
    pub cover: Option<Cover>,
    pub subjects: Option<Vec<String>>,
    pub collections: Option<Vec<String>>,
    pub description: Option<String>,
}

impl BookEntry {
    pub fn new(filename: impl Into<String>) -> Self {
        Self { filename: filename.into(), ..Self::default() }
    }

    /// Title, author and UUID: how the companion identifies a book.
    pub fn identified(mut self, title: &str, author: &str, uuid: Option<&str>) -> Self {
        self.title = Some(title.to_string());
        self.author = Some(author.to_string());
        self.uuid = uuid.map(str::to_string);
        self
    }

    fn attributes(&self) -> Vec<(&'static str, String)> {
        let mut attributes = vec![("filename", self.filename.clone())];
        if let Some(author) = &self.author {
            attributes.push(("author", author.clone()));
        }
        if let Some(title) = &self.title {
            attributes.push(("title", title.clone()));
        }
        if let Some(uuid) = &self.uuid {
            attributes.push(("uuid", uuid.clone()));
        }
        if let Some(meta) = &self.metadata {
            attributes.push(("authorsort", meta.author_sort.clone()));
            attributes.push(("titlesort", meta.title_sort.clone()));
            if let Some(pubdate) = meta.pubdate
                && let Ok(formatted) = pubdate.format(format_description!("[year]-[month]-[day]"))
            {
                attributes.push(("pubdate", formatted));
            }
            attributes.push(("publisher", meta.publisher.clone()));
            if let Some(rating) = meta.rating {
                attributes.push(("rating", format_number(rating)));
            }
            attributes.push(("series", meta.series.clone()));
            attributes.push(("seriesindex", meta.series_index.map(format_number).unwrap_or_default()));
        }
        if let Some(hash) = &self.cover_hash {
            attributes.push(("coverhash", hash.clone()));
        }
        if let Some(locked) = self.locked {
            attributes.push(("locked", locked.to_string()));
        }
        if let Some(count) = self.word_count {
            attributes.push(("wordcount", count.to_string()));
        }
        if self.overwrite {
            attributes.push(("overwrite", "yes".to_string()));
        }
        attributes
    }
}

/// Whole numbers keep one decimal (`2.0`), as the companion app expects.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 { format!("{value:.1}") } else { value.to_string() }
}

/// A command ready to be staged.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEnvelope {
    pub kind: CommandKind,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    /// Ask the companion to drop collections left empty by the command.
    pub cleanup_collections: bool,
    pub books: Vec<BookEntry>,
}

impl CommandEnvelope {
    pub fn new(kind: CommandKind) -> Self {
        Self { kind, timestamp: time::UtcDateTime::now().unix_timestamp(), cleanup_collections: false, books: Vec::new() }
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_cleanup_collections(mut self) -> Self {
        self.cleanup_collections = true;
        self
    }

    pub fn push(&mut self, book: BookEntry) {
        self.books.push(book);
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    /// Serialize to the exact bytes staged on the device.
    pub fn to_xml(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new(PROLOG.to_vec());
        let timestamp = self.timestamp.to_string();
        let mut root = BytesStart::new(self.kind.element());
        root.push_attribute(("timestamp", timestamp.as_str()));
        if self.cleanup_collections {
            root.push_attribute(("cleanupcollections", "yes"));
        }
        write(&mut writer, Event::Start(root))?;
        write(&mut writer, Event::Start(BytesStart::new("manifest")))?;
        for book in &self.books {
            write_book(&mut writer, book)?;
        }
        write(&mut writer, Event::End(BytesEnd::new("manifest")))?;
        write(&mut writer, Event::End(BytesEnd::new(self.kind.element())))?;
        Ok(writer.into_inner())
    }
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    writer.write_event(event).or_raise(|| ErrorKind::Serialize)
}

fn write_text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<()> {
    write(writer, Event::Start(BytesStart::new(name)))?;
    write(writer, Event::Text(BytesText::new(text)))?;
    write(writer, Event::End(BytesEnd::new(name)))
}

fn write_list(writer: &mut Writer<Vec<u8>>, outer: &str, inner: &str, items: &[String]) -> Result<()> {
    write(writer, Event::Start(BytesStart::new(outer)))?;
    for item in items {
        write_text_element(writer, inner, item)?;
    }
    write(writer, Event::End(BytesEnd::new(outer)))
}

fn write_book(writer: &mut Writer<Vec<u8>>, book: &BookEntry) -> Result<()> {
    let attributes = book.attributes();
    let mut start = BytesStart::new("book");
    for (key, value) in &attributes {
        start.push_attribute((*key, value.as_str()));
    }
    let has_children = book.description.is_some()
        || book.collections.is_some()
        || book.subjects.is_some()
        || book.cover.is_some();
    if !has_children {
        return write(writer, Event::Empty(start));
    }
    write(writer, Event::Start(start))?;
    if let Some(description) = &book.description {
        write_text_element(writer, "description", description)?;
    }
    if let Some(collections) = &book.collections {
        write_list(writer, "collections", "collection", collections)?;
    }
    if let Some(subjects) = &book.subjects {
        write_list(writer, "subjects", "subject", subjects)?;
    }
    if let Some(cover) = &book.cover {
        let hash = cover.hash();
        let mut start = BytesStart::new("cover");
        start.push_attribute(("hash", hash.as_str()));
        start.push_attribute(("encoding", "base64"));
        write(writer, Event::Start(start))?;
        write(writer, Event::Text(BytesText::new(&iosra_book::cover::encode(&cover.data))))?;
        write(writer, Event::End(BytesEnd::new("cover")))?;
    }
    write(writer, Event::End(BytesEnd::new("book")))
}
