//! Public key fingerprints (§3).
//!
//! A `PublicKeyFingerprint` is a stable, hex-encoded SHA-256 digest of a
//! public key's wire-format bytes. It is the primary key for identities
//! and (via the room's first host key) for room ownership.

use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A SHA-256 digest of a public key's wire-format bytes, hex-encoded.
///
/// `#[derive(Hash, Eq, PartialEq)]` lets this be used as a `HashMap` key,
/// which is how the identity registry is keyed (§3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKeyFingerprint(String);

impl PublicKeyFingerprint {
    /// Compute the fingerprint of a public key's wire-format bytes.
    pub fn from_wire_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    /// Parse a fingerprint that was already hex-encoded (e.g. loaded from
    /// the `users`/`rooms` persistence files). Does not re-validate that
    /// the string is a valid SHA-256 hex digest — permissive loads (§6)
    /// skip malformed lines earlier, at the line-parsing stage.
    pub fn from_hex(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PublicKeyFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encode a public key's wire-format bytes as a `public_keys[]` wire
/// string (§3, §4.6) — base64, the same alphabet `authorized_keys`
/// entries use for the same bytes.
pub fn encode_wire_key(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode a `public_keys[]` wire string back into wire-format bytes.
/// Returns `None` if the string is not valid base64 — callers should
/// treat that as "no usable fingerprint," not a protocol error.
pub fn decode_wire_key(s: &str) -> Option<Vec<u8>> {
    base64::engine::general_purpose::STANDARD.decode(s).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_bytes_same_fingerprint() {
        let a = PublicKeyFingerprint::from_wire_bytes(b"ssh-ed25519 AAAA...");
        let b = PublicKeyFingerprint::from_wire_bytes(b"ssh-ed25519 AAAA...");
        assert_eq!(a, b);
    }

    #[test]
    fn different_bytes_different_fingerprint() {
        let a = PublicKeyFingerprint::from_wire_bytes(b"key-one");
        let b = PublicKeyFingerprint::from_wire_bytes(b"key-two");
        assert_ne!(a, b);
    }

    #[test]
    fn hex_encoded_sha256_is_64_chars() {
        let fp = PublicKeyFingerprint::from_wire_bytes(b"anything");
        assert_eq!(fp.as_str().len(), 64);
    }

    #[test]
    fn wire_key_round_trips_through_base64() {
        let bytes = b"ssh-ed25519 wire format bytes go here".to_vec();
        let encoded = encode_wire_key(&bytes);
        assert_eq!(decode_wire_key(&encoded), Some(bytes));
    }

    #[test]
    fn decode_wire_key_rejects_non_base64() {
        assert_eq!(decode_wire_key("not valid base64!!"), None);
    }
}
