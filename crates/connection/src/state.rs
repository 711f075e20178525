use iosra_protocol::AppVersion;
use iosra_transport::DeviceIdentity;
use std::fmt;

/// Where a device session stands. `ejected` is tracked separately on
/// [`ConnectionState`] and overlays any of the app-present phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionPhase {
    NoDevice,
    DeviceSeenAppUnknown,
    AppAbsent,
    AppPresentDisconnected,
    /// The companion staged a connection artifact that has not been read
    /// yet. Offline artifacts leave the app merely present.
    ConnectionRequested,
    ConnectionLive,
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoDevice => "no device",
            Self::DeviceSeenAppUnknown => "device seen",
            Self::AppAbsent => "app absent",
            Self::AppPresentDisconnected => "app present",
            Self::ConnectionRequested => "connection requested",
            Self::ConnectionLive => "connection live",
        };
        f.write_str(name)
    }
}

/// Everything known about the one attached device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub identity: Option<DeviceIdentity>,
    /// `None` until a mount was attempted. Once `Some(false)` the identity
    /// is not probed again until the state resets.
    pub app_installed: Option<bool>,
    /// Bundle id of the sandbox that mounted.
    pub app_id: Option<String>,
    /// A connection artifact was found and is not yet confirmed online.
    /// An offline or unreadable artifact clears it again.
    pub artifact_seen: bool,
    pub connected: bool,
    pub ejected: bool,
    pub device_name: Option<String>,
    pub app_version: AppVersion,
}

impl ConnectionState {
    /// Fresh state for a newly seen identity.
    pub(crate) fn for_device(identity: DeviceIdentity) -> Self {
        Self { identity: Some(identity), ..Self::default() }
    }

    pub fn phase(&self) -> ConnectionPhase {
        match (&self.identity, self.app_installed) {
            (None, _) => ConnectionPhase::NoDevice,
            (Some(_), None) => ConnectionPhase::DeviceSeenAppUnknown,
            (Some(_), Some(false)) => ConnectionPhase::AppAbsent,
            (Some(_), Some(true)) if self.connected => ConnectionPhase::ConnectionLive,
            (Some(_), Some(true)) if self.artifact_seen => ConnectionPhase::ConnectionRequested,
            (Some(_), Some(true)) => ConnectionPhase::AppPresentDisconnected,
        }
    }

    /// Whether a session may catalog and sync books right now.
    pub fn is_handleable(&self) -> bool {
        self.phase() == ConnectionPhase::ConnectionLive && !self.ejected
    }
}
