//! Sandbox path validation.
//!
//! Companion apps address files with absolute, iOS-style paths
//! (`/Library/calibre/status.xml`). Transports resolve those against the
//! root of the mounted sandbox, so every path is normalised to a relative
//! form first and rejected if it would escape the sandbox.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates a sandbox path and returns its normalised, relative form.
///
/// > **Note:** A leading `/` is the sandbox root, not the host root. Null
/// >           bytes and empty paths are rejected.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use iosra_transport::validate_path;
/// assert_eq!(validate_path("/Documents/book.epub").unwrap(), Path::new("Documents/book.epub"));
/// assert_eq!(
///     validate_path("/Library/calibre/./../calibre/status.xml").unwrap(),
///     Path::new("Library/calibre/status.xml")
/// );
/// assert!(validate_path("/Library/../../etc/passwd").is_err());
/// assert!(validate_path("/").is_err());
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let original = path.as_ref();
    let mut components = Vec::new();
    for component in original.components() {
        match component {
            Component::Normal(s) => {
                // Null bytes survive Path::components() on Unix but truncate
                // paths in C-based syscalls (libimobiledevice, FUSE).
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(original.to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(original.to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(original.to_path_buf()));
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(original.to_path_buf())),
        false => Ok(components.into_iter().collect()),
    }
}

/// Like [`validate`], but the sandbox root itself is allowed (returned as an
/// empty path). Used for directory listings.
pub(crate) fn validate_dir(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let is_root = path.components().all(|c| matches!(c, Component::RootDir | Component::CurDir));
    match is_root {
        true => Ok(PathBuf::new()),
        false => validate(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_sandbox_paths_become_relative() {
        assert_eq!(validate("/Library/mainDb.sqlite").unwrap(), Path::new("Library/mainDb.sqlite"));
        assert_eq!(validate("Documents/a.epub").unwrap(), Path::new("Documents/a.epub"));
        assert_eq!(
            validate("/Library/Application Support/com.appstafarian.marvin.covers/ab.jpg").unwrap(),
            Path::new("Library/Application Support/com.appstafarian.marvin.covers/ab.jpg")
        );
    }

    #[test]
    fn test_escape_rejected() {
        let err = validate("/Documents/../../private").unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
        assert!(validate("..").is_err());
    }

    #[test]
    fn test_parent_within_sandbox_allowed() {
        assert_eq!(validate("/Documents/sub/../book.pdf").unwrap(), Path::new("Documents/book.pdf"));
    }

    #[test]
    fn test_null_byte_rejected() {
        assert!(validate("Documents/bo\0ok.pdf").is_err());
    }

    #[test]
    fn test_empty_rejected() {
        assert!(validate("").is_err());
        assert!(validate("/").is_err());
        assert!(validate("./.").is_err());
    }

    #[test]
    fn test_dir_allows_root() {
        assert_eq!(validate_dir("/").unwrap(), PathBuf::new());
        assert_eq!(validate_dir("").unwrap(), PathBuf::new());
        assert_eq!(validate_dir("/Documents").unwrap(), Path::new("Documents"));
        assert!(validate_dir("/..").is_err());
    }
}
