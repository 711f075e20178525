//! Staging commands for the companion app and waiting for them to finish.
//!
//! A command is written as `<name>.tmp` in the staging folder and renamed to
//! `<name>.xml`; the rename is what the companion app watches for. It then
//! writes `status.xml`, rewriting it with a fresh timestamp as it makes
//! progress, until the code turns terminal.
//!
//! Only one command may be in flight at a time. Nothing here enforces that;
//! staging a second command before the first completes is a caller bug.

use crate::envelope::{CommandEnvelope, CommandKind};
use crate::error::{ErrorKind, Result};
use crate::progress::ProgressReporter;
use crate::status::{StatusCode, StatusReport};
use exn::ResultExt;
use iosra_transport::TransportHandle;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::instrument;

pub const STAGING_FOLDER: &str = "/Library/calibre";
pub const STATUS_FILE: &str = "status.xml";
pub const CONNECTION_FILE: &str = "connected.xml";

#[derive(Debug, Clone, PartialEq)]
pub struct StagingConfig {
    pub folder: PathBuf,
    /// How long the companion may stay silent before the command is
    /// declared timed out.
    pub watchdog: Duration,
    pub poll_interval: Duration,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            folder: PathBuf::from(STAGING_FOLDER),
            watchdog: Duration::from_secs(15),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// How a command ended, as reported by the companion.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub kind: CommandKind,
    pub code: StatusCode,
    pub messages: Vec<String>,
    /// Filenames the companion refused to process.
    pub rejected: Vec<String>,
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        self.code == StatusCode::Success
    }
}

#[derive(Clone)]
pub struct StagingClient {
    transport: TransportHandle,
    config: StagingConfig,
}

impl StagingClient {
    pub fn new(transport: TransportHandle, config: StagingConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &StagingConfig {
        &self.config
    }

    pub fn status_path(&self) -> PathBuf {
        self.config.folder.join(STATUS_FILE)
    }

    pub fn connection_path(&self) -> PathBuf {
        self.config.folder.join(CONNECTION_FILE)
    }

    pub fn command_path(&self, kind: CommandKind) -> PathBuf {
        self.config.folder.join(format!("{}.xml", kind.name()))
    }

    /// Remove the status artifact if there is one.
    async fn remove_status(&self) -> Result<()> {
        let status = self.status_path();
        if self.transport.exists(&status).await.or_raise(|| ErrorKind::Transport)? {
            self.transport.delete(&status).await.or_raise(|| ErrorKind::Transport)?;
        }
        Ok(())
    }

    /// Write the envelope into the staging folder and publish it.
    #[instrument("staging command", skip_all, fields(command = envelope.kind.name(), books = envelope.len()))]
    pub async fn stage(&self, envelope: &CommandEnvelope) -> Result<()> {
        let bytes = envelope.to_xml()?;
        // A status left over from an earlier command would be taken as this
        // command's acknowledgement.
        self.remove_status().await?;
        let tmp = self.config.folder.join(format!("{}.tmp", envelope.kind.name()));
        self.transport.write(&tmp, &bytes).await.or_raise(|| ErrorKind::Transport)?;
        self.transport.rename(&tmp, &self.command_path(envelope.kind)).await.or_raise(|| ErrorKind::Transport)?;
        tracing::info!(command = envelope.kind.name(), bytes = bytes.len(), "Staged command");
        Ok(())
    }

    /// Write a book file into the staging folder, where an `uploadbooks`
    /// command expects to find it. Transport errors are returned untouched so
    /// the caller can tell a refused file from a lost device.
    pub async fn stage_file(&self, data: &[u8], filename: &str) -> iosra_transport::error::Result<()> {
        let destination = self.config.folder.join(filename);
        self.transport.write(&destination, data).await?;
        tracing::debug!(remote = %destination.display(), bytes = data.len(), "Staged book file");
        Ok(())
    }

    /// Remove staged book files whose `uploadbooks` command will not run.
    pub async fn unstage_files(&self, filenames: &[String]) {
        for filename in filenames {
            let path = self.config.folder.join(filename);
            if let Err(err) = self.transport.delete(&path).await {
                tracing::warn!(path = %path.display(), error = %err, "Could not remove staged book file");
            }
        }
    }

    /// Block until the companion reports a terminal status for `kind`.
    ///
    /// Progress is forwarded as `0.5 + progress / 2`: the first half of the
    /// bar belongs to whatever the caller did before staging.
    #[instrument("waiting for command completion", skip(self, progress), fields(command = kind.name()))]
    pub async fn wait(&self, kind: CommandKind, progress: &dyn ProgressReporter) -> Result<CommandOutcome> {
        let status = self.status_path();
        let mut deadline = Instant::now() + self.config.watchdog;

        // Acknowledgement: the status artifact appears.
        loop {
            match self.transport.exists(&status).await {
                Ok(true) => break,
                Ok(false) => {},
                Err(err) => tracing::debug!(error = %err, "Status probe failed, retrying"),
            }
            if Instant::now() >= deadline {
                return self.timed_out(kind).await;
            }
            sleep(self.config.poll_interval).await;
        }
        tracing::debug!("Companion acknowledged command, monitoring progress");

        // Progress: each new timestamp re-arms the watchdog. Unreadable
        // reads are retried but do not re-arm it.
        deadline = Instant::now() + self.config.watchdog;
        let mut last_timestamp: Option<String> = None;
        let report = loop {
            if Instant::now() >= deadline {
                return self.timed_out(kind).await;
            }
            let read = match self.transport.read(&status).await {
                Ok(bytes) => StatusReport::parse(&bytes).map_err(|e| e.to_string()),
                Err(err) => Err(err.to_string()),
            };
            match read {
                Ok(report) => {
                    if last_timestamp.as_deref() != Some(report.timestamp.as_str()) {
                        last_timestamp = Some(report.timestamp.clone());
                        deadline = Instant::now() + self.config.watchdog;
                        tracing::debug!(code = ?report.code, progress = report.progress, "Command progress");
                        progress.report(0.5 + report.progress / 2.0, "");
                    }
                    if report.code.is_terminal() {
                        break report;
                    }
                },
                Err(error) => tracing::debug!(%error, "Status unreadable, retrying"),
            }
            sleep(self.config.poll_interval).await;
        };

        let rejected = if report.code == StatusCode::Success { Vec::new() } else { report.rejected() };
        if !rejected.is_empty() || report.code != StatusCode::Success {
            tracing::warn!(
                command = kind.name(),
                code = ?report.code,
                messages = ?report.messages,
                "Command finished with problems"
            );
        }
        // The command has finished either way; a leftover status is removed
        // again before the next command is staged.
        if let Err(err) = self.remove_status().await {
            tracing::warn!(command = kind.name(), error = %err, "Could not remove status artifact");
        }
        tracing::info!(command = kind.name(), "Command complete");
        progress.report(1.0, "finished");
        Ok(CommandOutcome { kind, code: report.code, messages: report.messages, rejected })
    }

    async fn timed_out(&self, kind: CommandKind) -> Result<CommandOutcome> {
        tracing::warn!(command = kind.name(), "Companion app did not respond in time");
        if let Err(err) = self.remove_status().await {
            tracing::warn!(error = %err, "Could not remove status artifact after timeout");
        }
        exn::bail!(ErrorKind::OperationTimedOut(kind.name().to_string()))
    }

    /// [`stage`](Self::stage) followed by [`wait`](Self::wait).
    pub async fn send(&self, envelope: &CommandEnvelope, progress: &dyn ProgressReporter) -> Result<CommandOutcome> {
        self.stage(envelope).await?;
        self.wait(envelope.kind, progress).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::BookEntry;
    use crate::progress::NoProgress;
    use iosra_transport::DeviceTransport;
    use iosra_transport::transport::MockTransport;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    fn status(code: &str, timestamp: u32, progress: f64, messages: &[&str]) -> Vec<u8> {
        let messages: String = messages.iter().map(|m| format!("<message>{m}</message>")).collect();
        format!(
            "<status code='{code}' timestamp='{timestamp}'><progress>{progress}</progress>\
             <messages>{messages}</messages></status>"
        )
        .into_bytes()
    }

    /// Stand-in for the companion app: waits for the command file, consumes
    /// it, then writes each scripted status one poll apart.
    fn companion(mock: Arc<MockTransport>, command: &'static str, script: Vec<Vec<u8>>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let command = Path::new(STAGING_FOLDER).join(command);
            let status = Path::new(STAGING_FOLDER).join(STATUS_FILE);
            while !mock.exists(&command).await.unwrap() {
                sleep(Duration::from_millis(250)).await;
            }
            mock.delete(&command).await.unwrap();
            for bytes in script {
                mock.write(&status, &bytes).await.unwrap();
                sleep(Duration::from_secs(2)).await;
            }
        })
    }

    fn delete_envelope() -> CommandEnvelope {
        let mut envelope = CommandEnvelope::new(CommandKind::DeleteBooks);
        envelope.push(BookEntry::new("F1.epub").identified("F1", "A", Some("u1")));
        envelope.push(BookEntry::new("F2.epub").identified("F2", "A", Some("u2")));
        envelope
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_round_trip() {
        let mock = Arc::new(MockTransport::default());
        let task = companion(
            mock.clone(),
            "delete_books.xml",
            vec![status("-1", 1, 0.0, &[]), status("-1", 2, 0.5, &[]), status("0", 3, 1.0, &[])],
        );
        let client = StagingClient::new(mock.clone(), StagingConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let reporter = {
            let seen = seen.clone();
            move |fraction: f64, _: &str| seen.lock().unwrap().push(fraction)
        };
        let outcome = client.send(&delete_envelope(), &reporter).await.unwrap();
        task.await.unwrap();

        assert!(outcome.is_success());
        assert!(outcome.rejected.is_empty());
        assert!(!mock.exists(&client.status_path()).await.unwrap());
        assert_eq!(*seen.lock().unwrap(), vec![0.5, 0.75, 1.0, 1.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_without_acknowledgement() {
        let mock = Arc::new(MockTransport::default());
        let client = StagingClient::new(mock.clone(), StagingConfig::default());
        let started = Instant::now();
        let err = client.send(&delete_envelope(), &NoProgress).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::OperationTimedOut(name) if name == "delete_books"));
        assert!(started.elapsed() >= Duration::from_secs(15));
        assert!(!mock.exists(&client.status_path()).await.unwrap());
        // The command itself stays staged; nothing consumed it.
        assert!(mock.exists(&client.command_path(CommandKind::DeleteBooks)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_when_progress_stalls() {
        let mock = Arc::new(MockTransport::default());
        let task = companion(mock.clone(), "upload_books.xml", vec![status("-1", 1, 0.1, &[])]);
        let client = StagingClient::new(mock.clone(), StagingConfig::default());
        let envelope = CommandEnvelope::new(CommandKind::UploadBooks);
        let err = client.send(&envelope, &NoProgress).await.unwrap_err();
        task.await.unwrap();
        assert!(matches!(&*err, ErrorKind::OperationTimedOut(_)));
        assert!(!mock.exists(&client.status_path()).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejections_and_garbled_reads() {
        let mock = Arc::new(MockTransport::default());
        let task = companion(
            mock.clone(),
            "upload_books.xml",
            vec![
                b"<status code='-1'".to_vec(),
                status("2", 9, 1.0, &["Unable to add [u-1.epub]", "Disk full"]),
            ],
        );
        let client = StagingClient::new(mock.clone(), StagingConfig::default());
        let outcome = client.send(&CommandEnvelope::new(CommandKind::UploadBooks), &NoProgress).await.unwrap();
        task.await.unwrap();
        assert_eq!(outcome.code, StatusCode::Errors);
        assert_eq!(outcome.rejected, vec!["u-1.epub"]);
        assert_eq!(outcome.messages.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outcome_survives_stuck_status() {
        let mock = Arc::new(MockTransport::default());
        let client = StagingClient::new(mock.clone(), StagingConfig::default());
        client.stage(&delete_envelope()).await.unwrap();
        mock.refuse_delete(client.status_path()).await;
        let task = companion(mock.clone(), "delete_books.xml", vec![status("0", 1, 1.0, &[])]);
        let outcome = client.wait(CommandKind::DeleteBooks, &NoProgress).await.unwrap();
        task.await.unwrap();
        assert!(outcome.is_success());
        assert!(mock.exists(&client.status_path()).await.unwrap());
    }

    #[tokio::test]
    async fn test_stage_clears_orphan_status() {
        let mock = Arc::new(MockTransport::with_files([("Library/calibre/status.xml", status("0", 1, 1.0, &[]))]));
        let client = StagingClient::new(mock.clone(), StagingConfig::default());
        client.stage(&delete_envelope()).await.unwrap();
        let paths = mock.paths().await;
        assert_eq!(paths, vec![PathBuf::from("Library/calibre/delete_books.xml")]);
        let staged = mock.read(&client.command_path(CommandKind::DeleteBooks)).await.unwrap();
        assert!(staged.starts_with(b"\xef\xbb\xbf<?xml"));
    }
}
