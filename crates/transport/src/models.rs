use derive_more::Display;
use std::path::{Path, PathBuf};
use time::UtcDateTime;

/// Stable identifier of one physical device (its UDID) across reconnections.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("{_0}")]
pub struct DeviceIdentity(String);
impl DeviceIdentity {
    pub fn new(udid: impl Into<String>) -> Self {
        Self(udid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl From<&str> for DeviceIdentity {
    fn from(udid: &str) -> Self {
        Self::new(udid)
    }
}

/// Kind of a directory entry returned by
/// [`list_dir`](crate::DeviceTransport::list_dir).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// Result of stat-ing a file inside the mounted sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    /// Path relative to the sandbox root.
    pub path: PathBuf,
    pub size: u64,
    pub modified: UtcDateTime,
    /// Birth time when the platform records it, otherwise the modification time.
    pub created: UtcDateTime,
}
impl FileStat {
    pub fn new(path: impl AsRef<Path>, size: u64, modified: UtcDateTime, created: UtcDateTime) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            size,
            modified,
            created,
        }
    }

    /// Final path component as a string, if it is valid UTF-8.
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}
