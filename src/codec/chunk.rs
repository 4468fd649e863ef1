//! CHUNK message (spec.md §3, §4.1).
//!
//! The source this protocol was distilled from stores a `chunkMAC` field but
//! its decode path never validates it or re-exposes it to callers (spec.md
//! §9). We do not reproduce that: `mac` is always decoded and `verify_mac`
//! always re-exposed, so the reassembly layer (spec.md §4.2) can verify
//! every chunk and apply its own consecutive-failure policy. `decode` itself
//! stays a structural parse — it never silently drops a frame whose bytes
//! parse correctly just because the MAC happens to be wrong; that decision
//! belongs to reassembly, which tracks state across multiple chunks.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use super::Cursor;
use crate::error::DecodeError;
use crate::peer::Token;

const MAC_LEN: usize = 32;
const FLAG_IS_LAST_CHUNK: u8 = 0b01;
const FLAG_COMPRESSION_APPLIED: u8 = 0b10;

/// Derive the per-file HMAC key: SHA-256 of the 16 raw `file_id` bytes
/// (including null padding), so sender and receiver always agree on the key
/// regardless of how the token's trimmed string representation is handled.
pub fn derive_mac_key(file_id: &Token) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(file_id.as_bytes());
    hasher.finalize().into()
}

fn compute_mac(file_id: &Token, payload: &[u8]) -> [u8; MAC_LEN] {
    let key = derive_mac_key(file_id);
    let mut mac = Hmac::<Sha256>::new_from_slice(&key).expect("HMAC accepts any key length");
    mac.update(payload);
    mac.finalize().into_bytes().into()
}

/// One ordered data frame (spec.md §3). Constructed only via `new`, which
/// computes `mac`, so a `Chunk` in memory is always internally consistent;
/// `decode` re-verifies the MAC against the wire bytes since those came from
/// an untrusted peer.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub file_id: Token,
    pub chunk_index: u32,
    pub chunk_sequence: u32,
    pub timestamp_ms: u64,
    pub mac: [u8; MAC_LEN],
    pub is_last_chunk: bool,
    pub compression_applied: bool,
    pub retry_count: u8,
    pub payload: Vec<u8>,
}

impl Chunk {
    /// Build a chunk, computing its MAC from `payload` and `file_id`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        file_id: Token,
        chunk_index: u32,
        chunk_sequence: u32,
        timestamp_ms: u64,
        is_last_chunk: bool,
        compression_applied: bool,
        retry_count: u8,
        payload: Vec<u8>,
    ) -> Self {
        let mac = compute_mac(&file_id, &payload);
        Self {
            file_id,
            chunk_index,
            chunk_sequence,
            timestamp_ms,
            mac,
            is_last_chunk,
            compression_applied,
            retry_count,
            payload,
        }
    }

    /// Hex SHA-256 of `payload`, held in memory only — never written to the
    /// wire (the MAC carries integrity there).
    pub fn chunk_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.payload);
        hex::encode(hasher.finalize())
    }

    /// Verify `mac` under the key derived from `file_id`. Returns `false`
    /// on mismatch without caring why — a tampered payload and a forged mac
    /// look the same to the receiver.
    pub fn verify_mac(&self) -> bool {
        compute_mac(&self.file_id, &self.payload) == self.mac
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(74 + self.payload.len());

        buf.extend_from_slice(self.file_id.as_bytes());
        buf.extend_from_slice(&self.chunk_index.to_be_bytes());
        buf.extend_from_slice(&self.chunk_sequence.to_be_bytes());
        buf.extend_from_slice(&self.timestamp_ms.to_be_bytes());
        buf.extend_from_slice(&self.mac);

        let mut flags = 0u8;
        if self.is_last_chunk {
            flags |= FLAG_IS_LAST_CHUNK;
        }
        if self.compression_applied {
            flags |= FLAG_COMPRESSION_APPLIED;
        }
        buf.push(flags);
        buf.push(self.retry_count);
        buf.extend_from_slice(&[0u8; 6]);

        buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.payload);

        buf
    }

    /// Structural parse only — does not verify `mac`. Callers that need a
    /// verified chunk must call `verify_mac()` themselves (the reassembly
    /// layer does, and tracks consecutive failures per spec.md §4.2).
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut c = Cursor::new(bytes);

        let file_id = Token::from_bytes(c.read_array::<16>()?);
        let chunk_index = c.read_u32()?;
        let chunk_sequence = c.read_u32()?;
        let timestamp_ms = c.read_u64()?;
        let mac = c.read_array::<MAC_LEN>()?;

        let flags = c.read_u8()?;
        let retry_count = c.read_u8()?;
        let _reserved = c.read_bytes(6)?;

        let payload_length = c.read_u16()? as usize;
        let payload = c.read_bytes(payload_length)?.to_vec();

        Ok(Chunk {
            file_id,
            chunk_index,
            chunk_sequence,
            timestamp_ms,
            mac,
            is_last_chunk: flags & FLAG_IS_LAST_CHUNK != 0,
            compression_applied: flags & FLAG_COMPRESSION_APPLIED != 0,
            retry_count,
            payload,
        })
    }
}
