use iosra_protocol::StagingConfig;
use std::path::PathBuf;

/// What an upload does with a book already on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExistingBooks {
    /// Leave the device copy alone and report the book as skipped.
    #[default]
    Protect,
    /// Delete the device copy and upload again.
    Replace,
    /// Keep the device copy and send the library's metadata for it.
    UpdateMetadata,
}

/// Behaviour switches for one sync session.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    /// Per-device working files live in `<cache_dir>/<udid>/`.
    pub cache_dir: PathBuf,
    pub booklist_caching: bool,
    pub device_booklist_caching: bool,
    /// Share of free device space the device snapshot may take, in percent.
    pub device_booklist_cache_limit: f64,
    pub existing_books: ExistingBooks,
    /// Merge library collections into the device's, rather than replacing
    /// them. Reserved flags survive either way.
    pub merge_collections: bool,
    /// Lowercase extensions considered books. Empty means the app's
    /// defaults.
    pub enabled_formats: Vec<String>,
    pub staging: StagingConfig,
}

impl SyncOptions {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            booklist_caching: true,
            device_booklist_caching: false,
            device_booklist_cache_limit: 10.0,
            existing_books: ExistingBooks::default(),
            merge_collections: true,
            enabled_formats: Vec::new(),
            staging: StagingConfig::default(),
        }
    }
}
