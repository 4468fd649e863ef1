//! Peer identifiers. Opaque UTF-8 tokens at the API surface; the envelope's
//! fixed-width recipient field truncates/pads them to 8 bytes on the wire
//! (spec.md §4.1), the same kind of wire-level truncation spec.md §9 notes
//! for `file_id` (preserved for wire compatibility, not "fixed").

use crate::constants::TOKEN_LEN;

/// Broadcast sentinel for the envelope's fixed-width recipient field.
pub const RECIPIENT_BROADCAST: [u8; 8] = [0xFF; 8];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Truncate/pad to the envelope's fixed 8-byte recipient field.
    pub fn to_recipient_field(&self) -> [u8; 8] {
        let bytes = self.0.as_bytes();
        let mut out = [0u8; 8];
        let n = bytes.len().min(8);
        out[..n].copy_from_slice(&bytes[..n]);
        out
    }

    /// Decode the fixed 8-byte recipient field. Returns `None` for the
    /// broadcast sentinel or an all-zero field (absent recipient).
    pub fn from_recipient_field(field: &[u8; 8]) -> Option<Self> {
        if *field == RECIPIENT_BROADCAST || *field == [0u8; 8] {
            return None;
        }
        let end = field.iter().position(|&b| b == 0).unwrap_or(8);
        Some(Self(String::from_utf8_lossy(&field[..end]).into_owned()))
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 16-byte token identifying a transfer (`file_id`) or an ACK
/// (`ack_id`). Null-padded UTF-8 on the wire; trailing zero bytes are
/// stripped on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token([u8; TOKEN_LEN]);

impl Token {
    pub fn from_str_truncated(s: &str) -> Self {
        let bytes = s.as_bytes();
        let mut out = [0u8; TOKEN_LEN];
        let n = bytes.len().min(TOKEN_LEN);
        out[..n].copy_from_slice(&bytes[..n]);
        Self(out)
    }

    pub fn from_bytes(bytes: [u8; TOKEN_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; TOKEN_LEN] {
        &self.0
    }

    pub fn as_trimmed_str(&self) -> String {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(TOKEN_LEN);
        String::from_utf8_lossy(&self.0[..end]).into_owned()
    }

    /// Generate a random 16-character hex-safe token (8 random bytes hex
    /// encoded to exactly 16 characters).
    pub fn random() -> Self {
        use rand::RngCore;
        let mut raw = [0u8; TOKEN_LEN / 2];
        rand::rng().fill_bytes(&mut raw);
        Self::from_str_truncated(&hex::encode(raw))
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_trimmed_str())
    }
}
