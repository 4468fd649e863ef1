//! ACK message (spec.md §3, §4.1).
//!
//! The source this protocol was distilled from has a `FILE_ACK` decoder that
//! never actually reconstructs `acknowledged_chunks`/`total_chunks` from the
//! decoded bitmap — it returns a zero-filled placeholder (spec.md §9). This
//! decoder does the reconstruction for real: `chunks_from_bitmap` is the
//! exact inverse of `bitmap_of`, which is what spec.md §8 property 3 checks.

use std::collections::BTreeSet;

use super::Cursor;
use crate::error::DecodeError;
use crate::peer::Token;

const FLAG_PAUSE: u8 = 0b001;
const FLAG_CANCEL: u8 = 0b010;
const FLAG_COMPLETE: u8 = 0b100;

/// Pack a set of chunk indices into a bit vector of `⌈n/8⌉` bytes, bit `i`
/// (little-endian within its byte) set iff `i ∈ set`.
pub fn bitmap_of(set: &BTreeSet<u32>, n: u32) -> Vec<u8> {
    let len = (n as usize).div_ceil(8);
    let mut bitmap = vec![0u8; len];
    for &i in set {
        if i < n {
            bitmap[(i / 8) as usize] |= 1 << (i % 8);
        }
    }
    bitmap
}

/// Inverse of `bitmap_of`: the set of indices below `n` whose bit is set.
/// Bits at or beyond `n` are ignored even if present in `bitmap` (a
/// malformed or stale bitmap longer than `n` bits never grows the set).
pub fn chunks_from_bitmap(bitmap: &[u8], n: u32) -> BTreeSet<u32> {
    let mut set = BTreeSet::new();
    for i in 0..n {
        let byte = bitmap.get((i / 8) as usize).copied().unwrap_or(0);
        if byte & (1 << (i % 8)) != 0 {
            set.insert(i);
        }
    }
    set
}

/// Cumulative receipt state (spec.md §3).
#[derive(Debug, Clone, PartialEq)]
pub struct Ack {
    pub file_id: Token,
    pub ack_id: Token,
    pub receiver_id: Token,
    pub total_received: u32,
    pub window_size: u16,
    pub timestamp_ms: u64,
    pub pause_transfer: bool,
    pub cancel_transfer: bool,
    pub transfer_complete: bool,
    pub error_code: u8,
    pub bitmap: Vec<u8>,
}

impl Ack {
    /// Build an ACK from an acknowledged-chunk set over `total_chunks`,
    /// filling in `total_received` and `bitmap` consistently.
    #[allow(clippy::too_many_arguments)]
    pub fn from_acknowledged(
        file_id: Token,
        ack_id: Token,
        receiver_id: Token,
        acknowledged: &BTreeSet<u32>,
        total_chunks: u32,
        window_size: u16,
        timestamp_ms: u64,
        pause_transfer: bool,
        cancel_transfer: bool,
        transfer_complete: bool,
        error_code: u8,
    ) -> Self {
        Self {
            file_id,
            ack_id,
            receiver_id,
            total_received: acknowledged.len() as u32,
            window_size,
            timestamp_ms,
            pause_transfer,
            cancel_transfer,
            transfer_complete,
            error_code,
            bitmap: bitmap_of(acknowledged, total_chunks),
        }
    }

    /// Reconstruct the acknowledged chunk set, given the total chunk count
    /// the caller already knows from its own MANIFEST (spec.md §3: "sender
    /// infers `total_chunks` from its own MANIFEST").
    pub fn acknowledged_chunks(&self, total_chunks: u32) -> BTreeSet<u32> {
        chunks_from_bitmap(&self.bitmap, total_chunks)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(66 + self.bitmap.len());

        buf.extend_from_slice(self.file_id.as_bytes());
        buf.extend_from_slice(self.ack_id.as_bytes());
        buf.extend_from_slice(self.receiver_id.as_bytes());
        buf.extend_from_slice(&self.total_received.to_be_bytes());
        buf.extend_from_slice(&self.window_size.to_be_bytes());
        buf.extend_from_slice(&self.timestamp_ms.to_be_bytes());

        let mut flags = 0u8;
        if self.pause_transfer {
            flags |= FLAG_PAUSE;
        }
        if self.cancel_transfer {
            flags |= FLAG_CANCEL;
        }
        if self.transfer_complete {
            flags |= FLAG_COMPLETE;
        }
        buf.push(flags);
        buf.push(self.error_code);

        buf.extend_from_slice(&(self.bitmap.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.bitmap);

        buf
    }

    /// `max_bitmap_len` bounds the bitmap against the caller's own
    /// understanding of `total_chunks` for this transfer (spec.md §4.1:
    /// `BitmapOverflow`). Pass `None` to skip the check (e.g. when decoding
    /// before a transfer is known).
    pub fn decode(bytes: &[u8], max_bitmap_len: Option<usize>) -> Result<Self, DecodeError> {
        let mut c = Cursor::new(bytes);

        let file_id = Token::from_bytes(c.read_array::<16>()?);
        let ack_id = Token::from_bytes(c.read_array::<16>()?);
        let receiver_id = Token::from_bytes(c.read_array::<16>()?);
        let total_received = c.read_u32()?;
        let window_size = c.read_u16()?;
        let timestamp_ms = c.read_u64()?;

        let flags = c.read_u8()?;
        let error_code = c.read_u8()?;

        let bitmap_length = c.read_u16()? as usize;
        if let Some(max) = max_bitmap_len {
            if bitmap_length > max {
                return Err(DecodeError::BitmapOverflow {
                    bitmap_len: bitmap_length,
                    expected_max: max,
                });
            }
        }
        let bitmap = c.read_bytes(bitmap_length)?.to_vec();

        Ok(Ack {
            file_id,
            ack_id,
            receiver_id,
            total_received,
            window_size,
            timestamp_ms,
            pause_transfer: flags & FLAG_PAUSE != 0,
            cancel_transfer: flags & FLAG_CANCEL != 0,
            transfer_complete: flags & FLAG_COMPLETE != 0,
            error_code,
            bitmap,
        })
    }
}
