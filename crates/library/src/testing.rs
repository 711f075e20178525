//! Shared setup for adapter tests: a live session on a mock device and a
//! stand-in for the companion app.

use crate::adapter::SessionContext;
use crate::options::SyncOptions;
use crate::registry::{CATALOG_DB, ReaderApp};
use iosra_book::BasicExtractor;
use iosra_cache::fixtures::CatalogFixture;
use iosra_connection::ConnectionMachine;
use iosra_protocol::{CommandKind, StagingConfig};
use iosra_transport::DeviceTransport;
use iosra_transport::transport::MockTransport;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub(crate) const UDID: &str = "udid-1";
pub(crate) const CONNECTED: &str = "<connection timestamp='1' marvin='2.6.0'><state>online</state></connection>";

pub(crate) fn options(cache_dir: &Path) -> SyncOptions {
    let mut options = SyncOptions::new(cache_dir);
    options.staging =
        StagingConfig { watchdog: Duration::from_secs(5), poll_interval: Duration::from_millis(10), ..StagingConfig::default() };
    options
}

/// A session whose connection is already live.
pub(crate) async fn live_session(app: ReaderApp, mock: Arc<MockTransport>, options: SyncOptions) -> SessionContext {
    mock.set_devices([UDID]).await;
    mock.install_app(app.app_ids()[0]).await;
    if app == ReaderApp::Marvin {
        mock.write(Path::new("/Library/calibre/connected.xml"), CONNECTED.as_bytes()).await.unwrap();
    }
    let machine = Arc::new(ConnectionMachine::new(mock, app.connection_config(None)));
    assert!(machine.probe().await, "session should be live");
    SessionContext::new(app, machine, options, Arc::new(BasicExtractor)).unwrap()
}

/// Write a companion catalog holding `fixture` onto the device.
pub(crate) async fn put_catalog(mock: &MockTransport, fixture: CatalogFixture) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mainDb.sqlite");
    fixture.write(&path).await.unwrap();
    mock.write(Path::new(CATALOG_DB), &std::fs::read(&path).unwrap()).await.unwrap();
}

pub(crate) fn epub() -> Vec<u8> {
    b"PK\x03\x04 epub container".to_vec()
}

/// Write a local book file for upload.
pub(crate) fn local_book(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

/// Answers staged commands the way the companion app does: picks up the
/// command file, records it, and writes a terminal status.
pub(crate) struct Companion {
    received: Arc<Mutex<Vec<(CommandKind, String)>>>,
    handle: JoinHandle<()>,
}

impl Companion {
    /// Reject any filename in `reject` with a warning status.
    pub(crate) fn spawn(mock: Arc<MockTransport>, reject: Vec<String>) -> Self {
        let kinds =
            vec![CommandKind::DeleteBooks, CommandKind::UploadBooks, CommandKind::UpdateMetadata, CommandKind::RebuildCollections];
        Self::answering(mock, reject, kinds)
    }

    /// Only pick up commands of the given kinds; the rest are left staged
    /// and never answered.
    pub(crate) fn answering(mock: Arc<MockTransport>, reject: Vec<String>, kinds: Vec<CommandKind>) -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = received.clone();
        let handle = tokio::spawn(async move {
            loop {
                for &kind in &kinds {
                    let command = PathBuf::from(format!("/Library/calibre/{}.xml", kind.name()));
                    let Ok(bytes) = mock.read(&command).await else {
                        continue;
                    };
                    let _ = mock.delete(&command).await;
                    let xml = String::from_utf8_lossy(&bytes).into_owned();
                    let rejected: Vec<&String> = reject.iter().filter(|f| xml.contains(f.as_str())).collect();
                    let status = match rejected.is_empty() {
                        true => "<status code='0' timestamp='2'><progress>1.0</progress></status>".to_string(),
                        false => {
                            let messages: String =
                                rejected.iter().map(|f| format!("<message>Rejected [{f}]: DRM</message>")).collect();
                            format!("<status code='1' timestamp='2'><progress>1.0</progress><messages>{messages}</messages></status>")
                        },
                    };
                    log.lock().await.push((kind, xml));
                    let _ = mock.write(Path::new("/Library/calibre/status.xml"), status.as_bytes()).await;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });
        Self { received, handle }
    }

    pub(crate) async fn commands(&self) -> Vec<(CommandKind, String)> {
        self.received.lock().await.clone()
    }
}

impl Drop for Companion {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
