//! The reader apps iosra knows how to sync, and where each keeps its files.

use crate::error::{Error, ErrorKind};
use iosra_connection::{ConnectionConfig, ProbeOverlap};
use iosra_protocol::{AppVersion, CONNECTION_FILE, STAGING_FOLDER};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub const DOCUMENTS_FOLDER: &str = "/Documents";
/// The DB-backed companion's own catalog.
pub const CATALOG_DB: &str = "/Library/mainDb.sqlite";
/// Device-side copy of the booklist snapshot.
pub const REMOTE_SNAPSHOT: &str = "/Library/calibre.mm/booklist.db";
/// Metadata cache kept on the device by flat-file apps.
pub const FLAT_METADATA_DB: &str = "/Library/calibre_metadata.sqlite";

const COVERS: &str = "/Library/Application Support/com.appstafarian.marvin.covers";
const LEGACY_COVERS: &str = "/Library/Caches/com.appstafarian.marvin.covers";
/// Last companion release that kept covers under `Library/Caches`.
const LEGACY_COVERS_UNTIL: AppVersion = AppVersion::new(2, 5, 64);

/// How an app's booklist is assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Read straight from the companion's catalog database.
    DbBacked,
    /// List the documents folder and keep metadata in a local cache.
    FlatFile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReaderApp {
    Marvin,
    GoodReader,
    Kindle,
}

impl ReaderApp {
    pub const ALL: [ReaderApp; 3] = [Self::Marvin, Self::GoodReader, Self::Kindle];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Marvin => "Marvin",
            Self::GoodReader => "GoodReader",
            Self::Kindle => "Kindle",
        }
    }

    /// Sandbox bundle ids, in the order mounting tries them.
    pub fn app_ids(&self) -> &'static [&'static str] {
        match self {
            Self::Marvin => &["com.appstafarian.MarvinIP", "com.appstafarian.MarvinIP-free", "com.appstafarian.Marvin"],
            Self::GoodReader => &["com.goodiware.GoodReaderIPad", "com.goodiware.GoodReader", "com.goodiware.goodreader4"],
            Self::Kindle => &["com.amazon.Lassen"],
        }
    }

    pub fn strategy(&self) -> Strategy {
        match self {
            Self::Marvin => Strategy::DbBacked,
            Self::GoodReader | Self::Kindle => Strategy::FlatFile,
        }
    }

    /// Upload filename template, rendered by
    /// [`FilenameGenerator`](crate::FilenameGenerator).
    pub fn upload_template(&self) -> &'static str {
        match self {
            Self::Marvin => "{{ uuid }}.epub",
            Self::GoodReader => "{{ title|filename }}.pdf",
            Self::Kindle => "{{ title|filename }}-{{ author|filename }}.{{ ext }}",
        }
    }

    /// Whether sub-folders of the documents folder hold books too.
    pub fn recursive_listing(&self) -> bool {
        matches!(self, Self::Kindle)
    }

    /// Extensions considered books when the user configured none.
    pub fn default_formats(&self) -> &'static [&'static str] {
        match self {
            Self::Marvin => &["epub"],
            Self::GoodReader => &["pdf"],
            Self::Kindle => &["mobi", "pdf"],
        }
    }

    /// Whether the documents listing is filtered by the enabled formats.
    pub fn filters_formats(&self) -> bool {
        matches!(self, Self::Kindle)
    }

    /// Connection tracking for this app. `app_id` replaces the alias list.
    pub fn connection_config(&self, app_id: Option<&str>) -> ConnectionConfig {
        let app_ids = match app_id {
            Some(id) => vec![id.to_string()],
            None => self.app_ids().iter().map(|id| id.to_string()).collect(),
        };
        match self.strategy() {
            Strategy::DbBacked => ConnectionConfig {
                app_ids,
                connection_artifact: Some(PathBuf::from(STAGING_FOLDER).join(CONNECTION_FILE)),
                overlap: ProbeOverlap::AssumeConnected,
            },
            Strategy::FlatFile => ConnectionConfig { app_ids, connection_artifact: None, overlap: ProbeOverlap::Wait },
        }
    }
}

impl fmt::Display for ReaderApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReaderApp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        match Self::ALL.into_iter().find(|app| app.name().eq_ignore_ascii_case(name)) {
            Some(app) => Ok(app),
            None => exn::bail!(ErrorKind::UnknownApp(name.to_string())),
        }
    }
}

/// Folder holding the companion's small cover images, `<Hash>.jpg`.
pub fn cover_folder(version: AppVersion) -> &'static str {
    if version > LEGACY_COVERS_UNTIL { COVERS } else { LEGACY_COVERS }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(AppVersion::new(1, 0, 0), LEGACY_COVERS)]
    #[case(AppVersion::new(2, 5, 64), LEGACY_COVERS)]
    #[case(AppVersion::new(2, 5, 65), COVERS)]
    #[case(AppVersion::new(3, 0, 0), COVERS)]
    fn test_cover_folder_by_version(#[case] version: AppVersion, #[case] expected: &str) {
        assert_eq!(cover_folder(version), expected);
    }

    #[rstest]
    #[case("marvin", ReaderApp::Marvin)]
    #[case("GoodReader", ReaderApp::GoodReader)]
    #[case(" kindle ", ReaderApp::Kindle)]
    fn test_parse(#[case] input: &str, #[case] expected: ReaderApp) {
        assert_eq!(input.parse::<ReaderApp>().unwrap(), expected);
    }

    #[test]
    fn test_connection_config() {
        let marvin = ReaderApp::Marvin.connection_config(None);
        assert_eq!(marvin.app_ids.len(), 3);
        assert_eq!(marvin.connection_artifact, Some(PathBuf::from("/Library/calibre/connected.xml")));
        let kindle = ReaderApp::Kindle.connection_config(Some("com.example.Kindle"));
        assert_eq!(kindle.app_ids, vec!["com.example.Kindle"]);
        assert!(kindle.connection_artifact.is_none());
        let err = "kobo".parse::<ReaderApp>().unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnknownApp(name) if name == "kobo"));
    }
}
