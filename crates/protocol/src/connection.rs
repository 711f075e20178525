//! The connection artifact (`connected.xml`) the companion app stages when
//! the user puts it into sync mode.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use quick_xml::Reader;
use quick_xml::events::Event;

/// Companion app version, as advertised in the connection artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AppVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl AppVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Parse `1`, `1.2` or `1.2.3`. Missing components are zero.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.trim().split('.').map(|p| p.parse::<u32>());
        let major = parts.next()?.ok()?;
        let minor = parts.next().transpose().ok()?.unwrap_or(0);
        let patch = parts.next().transpose().ok()?.unwrap_or(0);
        if parts.next().is_some() {
            return None;
        }
        Some(Self { major, minor, patch })
    }
}

impl Default for AppVersion {
    fn default() -> Self {
        Self::new(1, 0, 0)
    }
}

impl std::fmt::Display for AppVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionArtifact {
    /// `<state>` reads `online`.
    pub online: bool,
    pub timestamp: Option<String>,
    pub version: AppVersion,
}

impl ConnectionArtifact {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes).or_raise(|| ErrorKind::Malformed("connection"))?;
        let mut reader = Reader::from_str(text.trim_start_matches('\u{feff}'));
        reader.config_mut().trim_text(true);

        let mut seen_root = false;
        let mut in_state = false;
        let mut state = String::new();
        let mut timestamp = None;
        let mut version = AppVersion::default();
        loop {
            match reader.read_event().or_raise(|| ErrorKind::Malformed("connection"))? {
                Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"connection" => {
                    seen_root = true;
                    for attr in e.attributes() {
                        let attr = attr.or_raise(|| ErrorKind::Malformed("connection"))?;
                        let value = attr.unescape_value().or_raise(|| ErrorKind::Malformed("connection"))?;
                        match attr.key.as_ref() {
                            b"timestamp" => timestamp = Some(value.into_owned()),
                            b"marvin" => version = AppVersion::parse(&value).unwrap_or_default(),
                            _ => {},
                        }
                    }
                },
                Event::Start(e) if e.name().as_ref() == b"state" => in_state = true,
                Event::End(e) if e.name().as_ref() == b"state" => in_state = false,
                Event::Text(t) if in_state => {
                    state = t.unescape().or_raise(|| ErrorKind::Malformed("connection"))?.trim().to_string();
                },
                Event::Eof => break,
                _ => {},
            }
        }
        if !seen_root {
            exn::bail!(ErrorKind::Malformed("connection"));
        }
        Ok(Self { online: state == "online", timestamp, version })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("2", Some(AppVersion::new(2, 0, 0)))]
    #[case("2.5", Some(AppVersion::new(2, 5, 0)))]
    #[case("2.5.64", Some(AppVersion::new(2, 5, 64)))]
    #[case("2.x", None)]
    #[case("1.2.3.4", None)]
    #[case("", None)]
    fn test_version_parse(#[case] text: &str, #[case] expected: Option<AppVersion>) {
        assert_eq!(AppVersion::parse(text), expected);
    }

    #[test]
    fn test_version_ordering() {
        assert!(AppVersion::new(2, 5, 65) > AppVersion::new(2, 5, 64));
        assert!(AppVersion::new(2, 6, 0) > AppVersion::new(2, 5, 64));
    }

    #[test]
    fn test_online() {
        let xml = b"<connection timestamp='1700000000' marvin='2.6.1'><state>online</state></connection>";
        let artifact = ConnectionArtifact::parse(xml).unwrap();
        assert!(artifact.online);
        assert_eq!(artifact.version, AppVersion::new(2, 6, 1));
        assert_eq!(artifact.timestamp.as_deref(), Some("1700000000"));
    }

    #[test]
    fn test_offline_and_default_version() {
        let artifact = ConnectionArtifact::parse(b"<connection><state> offline </state></connection>").unwrap();
        assert!(!artifact.online);
        assert_eq!(artifact.version, AppVersion::default());
    }

    #[test]
    fn test_not_a_connection() {
        let err = ConnectionArtifact::parse(b"<status code='0'/>").unwrap_err();
        assert!(matches!(&*err, ErrorKind::Malformed("connection")));
    }
}
