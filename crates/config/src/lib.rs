//! Layered configuration for iosra.
//!
//! Sources, lowest precedence first:
//! 1. compiled defaults;
//! 2. `config.toml`, `config.yaml` and `config.json` in the platform config
//!    directory;
//! 3. a file named on the command line;
//! 4. `IOSRA_` environment variables, nested with `__`
//!    (`IOSRA_STAGING__POLL_INTERVAL_SECS=0.5`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "IOSRA_";
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// The reader app a session syncs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReaderAppName {
    #[default]
    Marvin,
    GoodReader,
    Kindle,
}

/// Upload policy for books already on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistingBooks {
    #[default]
    Protect,
    Replace,
    UpdateMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    /// No subscriber at all.
    Off,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingSettings {
    pub watchdog_timeout_secs: f64,
    pub poll_interval_secs: f64,
}

impl Default for StagingSettings {
    fn default() -> Self {
        Self { watchdog_timeout_secs: 15.0, poll_interval_secs: 1.0 }
    }
}

impl StagingSettings {
    pub fn watchdog(&self) -> Duration {
        Duration::from_secs_f64(self.watchdog_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlatFileSettings {
    /// Extensions treated as books. Empty means the app's defaults.
    pub enabled_formats: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub format: LogFormat,
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { format: LogFormat::default(), level: "info".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub reader_app: ReaderAppName,
    /// Mount this sandbox bundle id instead of trying the app's aliases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    /// Holds the localized files and booklist snapshots, per device.
    pub cache_dir: PathBuf,
    pub booklist_caching: bool,
    pub device_booklist_caching: bool,
    /// Percent of free device space the device snapshot may use.
    pub device_booklist_cache_limit: f64,
    pub existing_books: ExistingBooks,
    pub merge_collections: bool,
    pub staging: StagingSettings,
    pub flat_file: FlatFileSettings,
    pub logging: LoggingSettings,
    /// Log every connection probe decision.
    pub debug_can_handle: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reader_app: ReaderAppName::default(),
            app_id: None,
            cache_dir: default_cache_dir(),
            booklist_caching: true,
            device_booklist_caching: false,
            device_booklist_cache_limit: 10.0,
            existing_books: ExistingBooks::default(),
            merge_collections: true,
            staging: StagingSettings::default(),
            flat_file: FlatFileSettings::default(),
            logging: LoggingSettings::default(),
            debug_can_handle: false,
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "iosra")
}

fn default_cache_dir() -> PathBuf {
    match project_dirs() {
        Some(dirs) => dirs.cache_dir().to_path_buf(),
        None => std::env::temp_dir().join("iosra"),
    }
}

impl Config {
    /// Load from every source, with `explicit` as the command-line file.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_dir = project_dirs().map(|dirs| dirs.config_dir().to_path_buf());
        Self::from_figment(Self::figment(config_dir.as_deref(), explicit)?)
    }

    /// The merged sources, before extraction.
    pub fn figment(config_dir: Option<&Path>, explicit: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(dir) = config_dir {
            tracing::debug!(dir = %dir.display(), "Looking for config files");
            figment = figment
                .merge(Toml::file(dir.join("config.toml")))
                .merge(Yaml::file(dir.join("config.yaml")))
                .merge(Json::file(dir.join("config.json")));
        }
        if let Some(path) = explicit {
            if !path.is_file() {
                exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
            }
            tracing::debug!(path = %path.display(), "Loading config file");
            figment = match path.extension().and_then(|e| e.to_str()) {
                Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Toml::file(path)),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let mut config: Self = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    /// Check ranges and normalize the format list to bare lowercase
    /// extensions.
    fn validate(&mut self) -> Result<()> {
        if !(1.0..=10.0).contains(&self.device_booklist_cache_limit) {
            exn::bail!(ErrorKind::Invalid("device_booklist_cache_limit"));
        }
        if !(self.staging.watchdog_timeout_secs.is_finite() && self.staging.watchdog_timeout_secs > 0.0) {
            exn::bail!(ErrorKind::Invalid("staging.watchdog_timeout_secs"));
        }
        if !(self.staging.poll_interval_secs.is_finite() && self.staging.poll_interval_secs > 0.0) {
            exn::bail!(ErrorKind::Invalid("staging.poll_interval_secs"));
        }
        self.logging.level = self.logging.level.trim().to_ascii_lowercase();
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            exn::bail!(ErrorKind::Invalid("logging.level"));
        }
        if self.app_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            self.app_id = None;
        }
        let mut formats = Vec::new();
        for format in &self.flat_file.enabled_formats {
            let format = format.trim().trim_start_matches('.').to_ascii_lowercase();
            if format.is_empty() {
                exn::bail!(ErrorKind::Invalid("flat_file.enabled_formats"));
            }
            if !formats.contains(&format) {
                formats.push(format);
            }
        }
        self.flat_file.enabled_formats = formats;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    fn load(jail: &Jail, explicit: Option<&str>) -> Result<Config> {
        let explicit = explicit.map(|name| jail.directory().join(name));
        Config::from_figment(Config::figment(Some(jail.directory()), explicit.as_deref())?)
    }

    #[test]
    fn test_defaults() {
        Jail::expect_with(|jail| {
            let config = load(jail, None).unwrap();
            assert_eq!(config.reader_app, ReaderAppName::Marvin);
            assert_eq!(config.existing_books, ExistingBooks::Protect);
            assert!(config.booklist_caching);
            assert!(!config.device_booklist_caching);
            assert_eq!(config.staging.watchdog(), Duration::from_secs(15));
            assert_eq!(config.logging.format, LogFormat::Pretty);
            assert!(config.app_id.is_none());
            Ok(())
        });
    }

    #[test]
    fn test_layers_in_order() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", "reader_app = \"goodreader\"\nmerge_collections = false\n")?;
            jail.create_file("override.yaml", "reader_app: kindle\nexisting_books: update_metadata\n")?;
            jail.set_env("IOSRA_STAGING__POLL_INTERVAL_SECS", "0.25");
            jail.set_env("IOSRA_FLAT_FILE__ENABLED_FORMATS", "[\".PDF\", \"mobi\", \"pdf\"]");

            let config = load(jail, Some("override.yaml")).unwrap();
            assert_eq!(config.reader_app, ReaderAppName::Kindle);
            assert_eq!(config.existing_books, ExistingBooks::UpdateMetadata);
            assert!(!config.merge_collections);
            assert_eq!(config.staging.poll_interval(), Duration::from_millis(250));
            assert_eq!(config.flat_file.enabled_formats, vec!["pdf", "mobi"]);
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file() {
        Jail::expect_with(|jail| {
            let err = load(jail, Some("nope.toml")).unwrap_err();
            assert!(matches!(&*err, ErrorKind::NotFound(_)));
            Ok(())
        });
    }

    #[rstest]
    #[case("device_booklist_cache_limit = 25.0", "device_booklist_cache_limit")]
    #[case("device_booklist_cache_limit = 0.5", "device_booklist_cache_limit")]
    #[case("[staging]\nwatchdog_timeout_secs = 0.0", "staging.watchdog_timeout_secs")]
    #[case("[logging]\nlevel = \"chatty\"", "logging.level")]
    #[case("[flat_file]\nenabled_formats = [\" \"]", "flat_file.enabled_formats")]
    fn test_invalid_values(#[case] toml: &str, #[case] key: &str) {
        Jail::expect_with(|jail| {
            jail.create_file("bad.toml", toml)?;
            let err = load(jail, Some("bad.toml")).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Invalid(k) if *k == key), "{err:?}");
            Ok(())
        });
    }

    #[test]
    fn test_unknown_app_fails_to_load() {
        Jail::expect_with(|jail| {
            jail.set_env("IOSRA_READER_APP", "kobo");
            let err = load(jail, None).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Load));
            Ok(())
        });
    }
}
