//! The per-tick presence probe.
//!
//! The host calls [`ConnectionMachine::probe`] about once a second. Each
//! call moves the state forward by whatever the device shows right now and
//! answers one question: may a session catalog and sync books? Failures
//! never escape a probe; the state resets and the next tick starts over.

use crate::busy::{BusyGuard, BusyToken};
use crate::error::{ErrorKind, Result};
use crate::state::{ConnectionPhase, ConnectionState};
use exn::ResultExt;
use iosra_protocol::ConnectionArtifact;
use iosra_transport::TransportHandle;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::instrument;

/// What a probe reports when another operation holds the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeOverlap {
    /// Report "connected" without touching the device. Used for companion
    /// apps that run staged commands, where a probe must not interleave
    /// with a command in flight.
    #[default]
    AssumeConnected,
    /// Wait for the device, then probe.
    Wait,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Sandbox bundle ids to try, in order.
    pub app_ids: Vec<String>,
    /// Artifact the companion stages when it enters sync mode. Without one
    /// the connection is live as soon as the sandbox mounts.
    pub connection_artifact: Option<PathBuf>,
    pub overlap: ProbeOverlap,
}

pub struct ConnectionMachine {
    transport: TransportHandle,
    config: ConnectionConfig,
    state: RwLock<ConnectionState>,
    busy: BusyToken,
}

impl ConnectionMachine {
    pub fn new(transport: TransportHandle, config: ConnectionConfig) -> Self {
        Self { transport, config, state: RwLock::new(ConnectionState::default()), busy: BusyToken::new() }
    }

    /// Token guarding the transport. Anything else that talks to the device
    /// must hold it.
    pub fn busy(&self) -> &BusyToken {
        &self.busy
    }

    pub fn transport(&self) -> &TransportHandle {
        &self.transport
    }

    pub async fn state(&self) -> ConnectionState {
        self.state.read().await.clone()
    }

    pub async fn phase(&self) -> ConnectionPhase {
        self.state.read().await.phase()
    }

    /// Advance the state machine by one tick and report whether books may be
    /// handled.
    #[instrument("probing device", skip(self), level = "debug")]
    pub async fn probe(&self) -> bool {
        let _guard = match self.busy.try_acquire() {
            Some(guard) => guard,
            None => match self.config.overlap {
                ProbeOverlap::AssumeConnected => {
                    tracing::debug!("Device busy, assuming still connected");
                    return true;
                },
                ProbeOverlap::Wait => self.busy.acquire().await,
            },
        };
        let mut state = self.state.read().await.clone();
        let before = state.phase();
        let handled = match self.advance(&mut state).await {
            Ok(handled) => handled,
            Err(err) => {
                tracing::warn!(error = %err, "Probe failed, resetting connection");
                self.release(&mut state).await;
                false
            },
        };
        let after = state.phase();
        if before != after {
            tracing::info!(from = %before, to = %after, device = ?state.device_name, "Connection changed");
        }
        tracing::debug!(phase = %after, ejected = state.ejected, handled, "Probe complete");
        *self.state.write().await = state;
        handled
    }

    async fn advance(&self, state: &mut ConnectionState) -> Result<bool> {
        let devices = self.transport.list_devices().await.or_raise(|| ErrorKind::Transport)?;
        let device = match devices.as_slice() {
            [device] => device.clone(),
            [] => {
                if state.identity.is_some() {
                    tracing::info!("No connected devices");
                }
                self.release(state).await;
                return Ok(false);
            },
            many => {
                tracing::warn!(count = many.len(), "Multiple devices attached, only one is supported");
                self.release(state).await;
                return Ok(false);
            },
        };
        if state.identity.as_ref() != Some(&device) {
            *state = ConnectionState::for_device(device.clone());
        }
        if state.ejected {
            return Ok(false);
        }

        match state.app_installed {
            Some(false) => return Ok(false),
            Some(true) => {},
            None => {
                let mut mounted = None;
                for app_id in &self.config.app_ids {
                    if self.transport.mount_app(&device, app_id).await.or_raise(|| ErrorKind::Transport)? {
                        mounted = Some(app_id.clone());
                        break;
                    }
                }
                state.app_installed = Some(mounted.is_some());
                state.app_id = mounted;
                state.device_name = self.transport.device_name(&device).await.ok().flatten();
                if state.app_id.is_none() {
                    tracing::info!(device = %device, "Companion app not installed");
                    return Ok(false);
                }
            },
        }

        let Some(artifact) = &self.config.connection_artifact else {
            state.connected = true;
            return Ok(true);
        };
        if !self.transport.exists(artifact).await.or_raise(|| ErrorKind::Transport)? {
            state.artifact_seen = false;
            state.connected = false;
            return Ok(false);
        }
        state.artifact_seen = true;
        let bytes = self.transport.read(artifact).await.or_raise(|| ErrorKind::Transport)?;
        match ConnectionArtifact::parse(&bytes) {
            Ok(connection) => {
                state.connected = connection.online;
                state.artifact_seen = connection.online;
                state.app_version = connection.version;
                tracing::debug!(
                    online = connection.online,
                    version = %connection.version,
                    timestamp = connection.timestamp.as_deref().unwrap_or(""),
                    "Read connection artifact"
                );
            },
            Err(err) => {
                tracing::warn!(error = %err, "Unreadable connection artifact");
                state.artifact_seen = false;
                state.connected = false;
            },
        }
        Ok(state.connected)
    }

    /// Forget the device and drop the low-level connection.
    async fn release(&self, state: &mut ConnectionState) {
        *state = ConnectionState::default();
        if let Err(err) = self.transport.disconnect().await {
            tracing::debug!(error = %err, "Disconnect failed");
        }
    }

    /// Presence check used while ejected: the device stays ignored until it
    /// is physically gone, after which the state resets. Otherwise a normal
    /// [`probe`](Self::probe).
    pub async fn is_usb_connected(&self) -> bool {
        let (ejected, identity) = {
            let state = self.state.read().await;
            (state.ejected, state.identity.clone())
        };
        if !ejected {
            return self.probe().await;
        }
        let Some(_guard) = self.busy.try_acquire() else {
            tracing::debug!("Device busy, still ejected");
            return false;
        };
        // Only a successful enumeration without the device proves it is gone.
        let present = match self.transport.list_devices().await {
            Ok(devices) => identity.is_some_and(|id| devices.contains(&id)),
            Err(err) => {
                tracing::debug!(error = %err, "Enumeration failed, still ejected");
                return false;
            },
        };
        if present {
            tracing::debug!("Device physically connected, but ejected");
        } else {
            tracing::info!("Ejected device physically disconnected, resetting");
            let mut state = self.state.read().await.clone();
            self.release(&mut state).await;
            *self.state.write().await = state;
        }
        false
    }

    /// Hold the device for one operation. Waits for any operation in
    /// progress, then fails unless the connection is live.
    pub async fn session(&self) -> Result<BusyGuard> {
        let guard = self.busy.acquire().await;
        if !self.state.read().await.is_handleable() {
            exn::bail!(ErrorKind::NotConnected);
        }
        Ok(guard)
    }

    /// Stop handling the device. Waits for any operation in progress.
    pub async fn eject(&self) {
        let _guard = self.busy.acquire().await;
        self.state.write().await.ejected = true;
        tracing::info!("Device ejected");
    }

    /// The device went away without an eject.
    pub async fn post_yank_cleanup(&self) {
        self.state.write().await.connected = false;
        tracing::info!("Device yanked");
    }
}
