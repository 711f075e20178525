//! `iosra`: drive a reader app's sandbox mounted on the host.

mod logging;

use clap::{Parser, Subcommand};
use iosra_book::{BasicExtractor, BookList, BookRecord, MetadataExtractor};
use iosra_config::{Config, ExistingBooks as ConfiguredPolicy, ReaderAppName};
use iosra_connection::ConnectionMachine;
use iosra_library::{
    BatchSummary, ExistingBooks, ReaderApp, ReaderAppAdapter, SessionContext, SyncOptions, UploadRequest, adapter_for,
};
use iosra_protocol::StagingConfig;
use iosra_transport::transport::MountedTransport;
use iosra_transport::{DeviceIdentity, TransportHandle};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "iosra", version, about = "Sync ebooks with reader apps on an iOS device")]
struct Cli {
    /// Directory holding one mounted sandbox per app bundle id.
    #[arg(long, env = "IOSRA_MOUNT")]
    mount: PathBuf,
    /// Identity reported for the mounted device.
    #[arg(long, default_value = "mounted")]
    udid: String,
    /// Extra configuration file (TOML, YAML or JSON).
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run connection probes and print the phase after each.
    Probe {
        #[arg(long, default_value_t = 1)]
        ticks: u32,
    },
    /// List the books on the device.
    Books,
    /// Delete books by their path below the documents folder.
    Delete {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Upload book files. Titles and authors are read from the files.
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Library UUIDs, assigned to the files in order.
        #[arg(long)]
        uuid: Vec<String>,
    },
    /// Re-send collection assignments listed in a JSON file.
    RebuildCollections { file: PathBuf },
}

/// One entry of the `rebuild-collections` input.
#[derive(Debug, Deserialize)]
struct LibraryBook {
    title: String,
    authors: Vec<String>,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    collections: Vec<String>,
}

fn fail(err: impl fmt::Display + fmt::Debug) -> miette::Report {
    miette::miette!(help = format!("{err:?}"), "{err}")
}

fn reader_app(name: ReaderAppName) -> ReaderApp {
    match name {
        ReaderAppName::Marvin => ReaderApp::Marvin,
        ReaderAppName::GoodReader => ReaderApp::GoodReader,
        ReaderAppName::Kindle => ReaderApp::Kindle,
    }
}

fn sync_options(config: &Config) -> SyncOptions {
    let mut options = SyncOptions::new(&config.cache_dir);
    options.booklist_caching = config.booklist_caching;
    options.device_booklist_caching = config.device_booklist_caching;
    options.device_booklist_cache_limit = config.device_booklist_cache_limit;
    options.existing_books = match config.existing_books {
        ConfiguredPolicy::Protect => ExistingBooks::Protect,
        ConfiguredPolicy::Replace => ExistingBooks::Replace,
        ConfiguredPolicy::UpdateMetadata => ExistingBooks::UpdateMetadata,
    };
    options.merge_collections = config.merge_collections;
    options.enabled_formats = config.flat_file.enabled_formats.clone();
    options.staging = StagingConfig {
        watchdog: config.staging.watchdog(),
        poll_interval: config.staging.poll_interval(),
        ..StagingConfig::default()
    };
    options
}

fn library_books(json: &str) -> serde_json::Result<BookList> {
    let books: Vec<LibraryBook> = serde_json::from_str(json)?;
    Ok(books
        .into_iter()
        .enumerate()
        .map(|(index, book)| {
            let mut record = BookRecord::new(book.title, book.authors, format!("library/{index}"))
                .with_collections(book.collections);
            record.uuid = book.uuid;
            record
        })
        .collect())
}

/// Library metadata for a file about to be uploaded.
fn upload_request(file: &Path, uuid: Option<&String>) -> miette::Result<UploadRequest> {
    let data = std::fs::read(file).map_err(|e| miette::miette!("cannot read {}: {e}", file.display()))?;
    let mut record = match BasicExtractor.extract(file, &data) {
        Ok(meta) => BookRecord::new(meta.title, meta.authors, ""),
        Err(err) => {
            tracing::warn!(file = %file.display(), error = %err, "No metadata in file, using its name");
            let stem = file.file_stem().and_then(|s| s.to_str()).unwrap_or("Unknown");
            BookRecord::new(stem, vec!["Unknown".to_string()], "")
        },
    };
    record.uuid = uuid.cloned();
    Ok(UploadRequest::new(file, record))
}

fn print_summary(summary: &BatchSummary, fallback: &str) {
    match summary.report() {
        Some(report) => println!("{report}"),
        None => println!("{fallback}"),
    }
}

/// Probe once and insist on a live connection.
async fn connect(adapter: &dyn ReaderAppAdapter) -> miette::Result<()> {
    if adapter.probe_connection().await {
        return Ok(());
    }
    let phase = adapter.context().machine().phase().await;
    Err(miette::miette!(help = "open the companion app and start its sync mode", "device not ready: {phase}"))
}

async fn run(cli: Cli, config: Config) -> miette::Result<()> {
    let app = reader_app(config.reader_app);
    let transport = MountedTransport::new("mounted", &cli.mount, DeviceIdentity::new(cli.udid.as_str())).map_err(fail)?;
    let transport: TransportHandle = Arc::new(transport);
    let machine = Arc::new(ConnectionMachine::new(transport, app.connection_config(config.app_id.as_deref())));
    let context = SessionContext::new(app, machine.clone(), sync_options(&config), Arc::new(BasicExtractor))
        .map_err(fail)?
        .with_progress(Arc::new(|fraction: f64, label: &str| {
            tracing::debug!(progress = fraction, label, "Progress");
        }));
    let adapter = adapter_for(context);

    match cli.command {
        Command::Probe { ticks } => {
            for tick in 1..=ticks {
                let handled = adapter.probe_connection().await;
                println!("{tick}: {} (ready: {handled})", machine.phase().await);
                if tick < ticks {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        },
        Command::Books => {
            connect(adapter.as_ref()).await?;
            let books = adapter.list_books().await.map_err(fail)?;
            for book in &books {
                println!("{}\t{}\t{}", book.path, book.title, book.authors_joined(" & "));
            }
            println!("{} books", books.len());
        },
        Command::Delete { paths } => {
            connect(adapter.as_ref()).await?;
            let mut books = adapter.list_books().await.map_err(fail)?;
            let summary = adapter.delete_books(&paths).await.map_err(fail)?;
            adapter.remove_books_from_metadata(&summary.deleted, &mut books).await;
            print_summary(&summary, &format!("Deleted {} books", summary.deleted.len()));
            println!("{} books on device", books.len());
        },
        Command::Upload { files, uuid } => {
            let requests = files
                .iter()
                .enumerate()
                .map(|(index, file)| upload_request(file, uuid.get(index)))
                .collect::<miette::Result<Vec<_>>>()?;
            connect(adapter.as_ref()).await?;
            let mut books = adapter.list_books().await.map_err(fail)?;
            let (uploaded, summary) = adapter.upload_books(requests).await.map_err(fail)?;
            adapter.add_books_to_metadata(&uploaded, &mut books).await;
            print_summary(&summary, &format!("Uploaded {} books", uploaded.len()));
            println!("{} books on device", books.len());
        },
        Command::RebuildCollections { file } => {
            let json = std::fs::read_to_string(&file).map_err(|e| miette::miette!("cannot read {}: {e}", file.display()))?;
            let library = library_books(&json).map_err(fail)?;
            connect(adapter.as_ref()).await?;
            adapter.list_books().await.map_err(fail)?;
            let changed = adapter.rebuild_collections(&library).await.map_err(fail)?;
            println!("Collections changed for {changed} books");
        },
    }
    Ok(())
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).map_err(fail)?;
    logging::init(&config.logging, config.debug_can_handle).map_err(fail)?;
    tracing::debug!(app = ?config.reader_app, mount = %cli.mount.display(), "Starting");
    run(cli, config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_parse_upload() {
        let cli = Cli::try_parse_from(["iosra", "--mount", "/mnt/ipad", "upload", "a.epub", "b.epub", "--uuid", "u1"])
            .unwrap();
        assert_eq!(cli.udid, "mounted");
        match cli.command {
            Command::Upload { files, uuid } => {
                assert_eq!(files.len(), 2);
                assert_eq!(uuid, vec!["u1"]);
            },
            _ => panic!("expected upload"),
        }
        assert!(Cli::try_parse_from(["iosra", "--mount", "/mnt/ipad", "delete"]).is_err());
    }

    #[rstest]
    #[case(ConfiguredPolicy::Protect, ExistingBooks::Protect)]
    #[case(ConfiguredPolicy::UpdateMetadata, ExistingBooks::UpdateMetadata)]
    fn test_sync_options(#[case] configured: ConfiguredPolicy, #[case] expected: ExistingBooks) {
        let config = Config {
            existing_books: configured,
            device_booklist_caching: true,
            ..Config::default()
        };
        let options = sync_options(&config);
        assert_eq!(options.existing_books, expected);
        assert!(options.device_booklist_caching);
        assert_eq!(options.staging.watchdog, Duration::from_secs(15));
    }

    #[test]
    fn test_library_books() {
        let json = r#"[
            {"title": "Emma", "authors": ["Jane Austen"], "uuid": "u1", "collections": ["Romance"]},
            {"title": "Emma", "authors": ["Jane Austen"]}
        ]"#;
        let books = library_books(json).unwrap();
        assert_eq!(books.len(), 2);
        let first = books.get("library/0").unwrap();
        assert_eq!(first.uuid.as_deref(), Some("u1"));
        assert_eq!(first.device_collections, vec!["Romance"]);
        assert!(library_books("{}").is_err());
    }
}
