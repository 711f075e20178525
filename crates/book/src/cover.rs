//! Cover fingerprints and the wire encoding of cover bytes.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Hex MD5 of the cover bytes. The companion app compares this against the
/// hash it stored for the book to decide whether the cover changed.
pub fn cover_hash(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// Base64 (standard alphabet, padded) as embedded in command envelopes.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Inverse of [`encode`]; `None` for invalid input.
pub fn decode(text: &str) -> Option<Vec<u8>> {
    STANDARD.decode(text.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cover_hash_is_md5_hex() {
        assert_eq!(cover_hash(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(cover_hash(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_encode_decode() {
        assert_eq!(encode(b"\xff\xd8\xff"), "/9j/");
        assert_eq!(decode(" /9j/\n").unwrap(), b"\xff\xd8\xff");
        assert!(decode("not base64!").is_none());
    }
}
