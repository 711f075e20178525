//! Domain model shared by every part of iosra.
//!
//! A [`BookRecord`] is one ebook as seen on a device during a session, and a
//! [`BookList`] is the authoritative set of them (unique by device path). The
//! [`ContentProfile`] fingerprints a reader app's catalog so a stored booklist
//! can be trusted without rescanning the device.

mod booklist;
pub mod cover;
pub mod error;
mod extract;
mod flags;
mod matching;
mod profile;
mod record;
pub mod sort;

pub use crate::booklist::BookList;
pub use crate::extract::{BasicExtractor, BookFormat, ExtractedMetadata, MetadataExtractor};
pub use crate::flags::CollectionFlag;
pub use crate::matching::{MatchKind, find_match};
pub use crate::profile::{ContentProfile, ProfileComparison, ProfileKeyStatus};
pub use crate::record::{BookRecord, basename};
