//! The status artifact the companion app writes while executing a command.
//!
//! ```xml
//! <status code="-1" timestamp="1700000001.5">
//!   <progress>0.25</progress>
//!   <messages><message>Rejected [u-1.epub]: DRM</message></messages>
//! </status>
//! ```

use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use quick_xml::Reader;
use quick_xml::events::Event;
use regex::Regex;
use std::sync::LazyLock;

static REJECTED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[(.+)\]").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    InProgress,
    Success,
    Warnings,
    Errors,
}

impl StatusCode {
    pub fn parse(code: &str) -> Option<Self> {
        match code.trim() {
            "-1" => Some(Self::InProgress),
            "0" => Some(Self::Success),
            "1" => Some(Self::Warnings),
            "2" => Some(Self::Errors),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self != Self::InProgress
    }
}

/// One parsed read of the status artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub code: StatusCode,
    /// Kept as written; only ever compared for change.
    pub timestamp: String,
    /// Fraction of the command completed, `0.0..=1.0`.
    pub progress: f64,
    pub messages: Vec<String>,
}

impl StatusReport {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes).or_raise(|| ErrorKind::Malformed("status"))?;
        let mut reader = Reader::from_str(text.trim_start_matches('\u{feff}'));
        reader.config_mut().trim_text(true);

        let mut code = None;
        let mut timestamp = None;
        let mut progress = None;
        let mut messages = Vec::new();
        let mut current: Option<Vec<u8>> = None;
        loop {
            match reader.read_event().or_raise(|| ErrorKind::Malformed("status"))? {
                Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"status" => {
                    for attr in e.attributes() {
                        let attr = attr.or_raise(|| ErrorKind::Malformed("status"))?;
                        let value = attr.unescape_value().or_raise(|| ErrorKind::Malformed("status"))?;
                        match attr.key.as_ref() {
                            b"code" => code = StatusCode::parse(&value),
                            b"timestamp" => timestamp = Some(value.trim().to_string()),
                            _ => {},
                        }
                    }
                },
                Event::Start(e) => current = Some(e.name().as_ref().to_vec()),
                Event::End(_) => current = None,
                Event::Text(t) => {
                    let value = t.unescape().or_raise(|| ErrorKind::Malformed("status"))?;
                    match current.as_deref() {
                        Some(b"progress") => progress = value.trim().parse::<f64>().ok(),
                        Some(b"message") => messages.push(value.into_owned()),
                        _ => {},
                    }
                },
                Event::Eof => break,
                _ => {},
            }
        }
        Ok(Self {
            code: code.ok_or_raise(|| ErrorKind::Malformed("status"))?,
            timestamp: timestamp.ok_or_raise(|| ErrorKind::Malformed("status"))?,
            progress: progress.unwrap_or(0.0),
            messages,
        })
    }

    /// Filenames the companion refused, taken from `[...]` in the messages.
    pub fn rejected(&self) -> Vec<String> {
        self.messages
            .iter()
            .filter_map(|m| REJECTED.captures(m))
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_in_progress() {
        let report =
            StatusReport::parse(b"<status code='-1' timestamp='17.5'><progress>0.25</progress></status>").unwrap();
        assert_eq!(report.code, StatusCode::InProgress);
        assert_eq!(report.timestamp, "17.5");
        assert_eq!(report.progress, 0.25);
        assert!(report.messages.is_empty());
    }

    #[test]
    fn test_errors_with_rejections() {
        let xml = "\u{feff}<?xml version='1.0' encoding='utf-8'?>\n\
            <status code='2' timestamp='18'>\n  <progress>1.0</progress>\n  <messages>\n\
            <message>Unable to import [u-1.epub]</message>\n\
            <message>General failure</message>\n\
            <message>Unable to import [u-2.epub]</message>\n  </messages>\n</status>";
        let report = StatusReport::parse(xml.as_bytes()).unwrap();
        assert_eq!(report.code, StatusCode::Errors);
        assert_eq!(report.messages.len(), 3);
        assert_eq!(report.rejected(), vec!["u-1.epub", "u-2.epub"]);
    }

    #[rstest]
    #[case(b"".as_slice())]
    #[case(b"<status timestamp='1'/>".as_slice())]
    #[case(b"<status code='7' timestamp='1'/>".as_slice())]
    #[case(b"<status code='0' timestamp='1'></progress></status>".as_slice())]
    fn test_malformed(#[case] bytes: &[u8]) {
        let err = StatusReport::parse(bytes).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Malformed("status")));
    }
}
