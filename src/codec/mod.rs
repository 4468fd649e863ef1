//! Bit-exact wire codec for the envelope and the three control messages
//! (spec.md §4.1). Big-endian for all multi-byte integers. A decode
//! failure never partially applies a frame — `Cursor::read_*` bails out
//! with a `DecodeError` at the first short read.

pub mod ack;
pub mod chunk;
pub mod envelope;
pub mod manifest;

pub use ack::Ack;
pub use chunk::Chunk;
pub use envelope::{Envelope, MessageType};
pub use manifest::Manifest;

use crate::error::DecodeError;

/// A read cursor over a decode buffer. Every read either succeeds or
/// returns `DecodeError::TruncatedPayload`, so callers don't have to
/// check remaining length before each field.
pub(crate) struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn need(&self, n: usize) -> Result<(), DecodeError> {
        if self.remaining() < n {
            Err(DecodeError::TruncatedPayload {
                needed: n,
                available: self.remaining(),
            })
        } else {
            Ok(())
        }
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        self.need(n)?;
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes(self.read_array::<2>()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_be_bytes(self.read_array::<4>()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_be_bytes(self.read_array::<8>()?))
    }

    /// `(2 B length, bytes)`-prefixed UTF-8 string.
    pub fn read_len_str(&mut self, field: &'static str) -> Result<String, DecodeError> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8 { field })
    }

    /// Remaining, unparsed bytes — used for forward-compatible trailers.
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

/// Write a `(2 B length, bytes)`-prefixed UTF-8 string.
pub(crate) fn write_len_str(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    buf.extend_from_slice(bytes);
}

/// Write a null-padded fixed-width token field (spec.md §9: `file_id` and
/// similar tokens are truncated to their fixed width, not length-prefixed).
pub(crate) fn write_fixed<const N: usize>(buf: &mut Vec<u8>, field: &[u8; N]) {
    buf.extend_from_slice(field);
}
