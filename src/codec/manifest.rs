//! MANIFEST message (spec.md §3, §4.1).
//!
//! The fixed wire format in spec.md §4.1 does not allocate bytes for
//! `timestamp_ms`, even though §3 lists it as a MANIFEST field. We treat it
//! as a trailing extension written after the three presence-prefixed
//! optionals: the format's own "unknown trailing bytes are ignored"
//! forward-compatibility clause is exactly the mechanism that makes this
//! safe — a decoder built against a MANIFEST without the trailer still
//! decodes everything it understands, and ours reads the trailer when
//! present, defaulting to 0 otherwise. See DESIGN.md for the full note.
//!
//! A handful of §3's optional MANIFEST keys (`resume_token`, per-chunk hash
//! list, `estimated_transfer_time_s`, network requirements,
//! `manifest_signature`) have no byte allocation anywhere in §4.1's closed
//! wire enumeration. They are carried as `ManifestExtras`, an in-memory-only
//! side channel that does not participate in `encode`/`decode` — see
//! DESIGN.md.

use super::{write_len_str, Cursor};
use crate::error::DecodeError;
use crate::peer::{PeerId, Token};

/// Transfer priority (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Priority {
    Low = 1,
    Normal = 2,
    High = 3,
    Urgent = 4,
}

impl TryFrom<u8> for Priority {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Priority::Low),
            2 => Ok(Priority::Normal),
            3 => Ok(Priority::High),
            4 => Ok(Priority::Urgent),
            other => Err(DecodeError::InvalidEnumValue {
                field: "priority",
                value: other,
            }),
        }
    }
}

/// Chunk compression codec (spec.md §3). `Gzip` decodes without error but
/// the engine never selects it for production (spec.md §4.2: "vestigial
/// path").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionType {
    None = 0,
    Lz4 = 1,
    Gzip = 2,
}

impl TryFrom<u8> for CompressionType {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Lz4),
            2 => Ok(CompressionType::Gzip),
            other => Err(DecodeError::InvalidEnumValue {
                field: "compression_type",
                value: other,
            }),
        }
    }
}

/// App-level MANIFEST metadata with no wire allocation in spec.md §4.1.
/// Never serialized; carried alongside a `Manifest` for callers that need
/// it (e.g. a future resumption flow keyed on `resume_token`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestExtras {
    pub resume_token: Option<String>,
    pub chunk_hashes: Option<Vec<String>>,
    pub estimated_transfer_time_s: Option<u32>,
    pub network_requirements: Option<String>,
    pub manifest_signature: Option<Vec<u8>>,
}

/// Declares a transfer (spec.md §3).
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub file_id: Token,
    pub file_name: String,
    pub file_size: u64,
    pub total_chunks: u32,
    pub sha256_hash: String,
    pub sender_id: PeerId,
    pub timestamp_ms: u64,
    pub priority: Priority,
    pub mime_type: Option<String>,
    pub file_permissions: Option<u16>,
    pub compression_type: Option<CompressionType>,
}

impl Manifest {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + self.file_name.len() + self.sha256_hash.len());

        buf.extend_from_slice(self.file_id.as_bytes());
        buf.extend_from_slice(&self.file_size.to_be_bytes());
        buf.extend_from_slice(&self.total_chunks.to_be_bytes());
        buf.push(self.priority as u8);
        buf.extend_from_slice(&[0u8; 3]);

        write_len_str(&mut buf, &self.file_name);
        write_len_str(&mut buf, &self.sha256_hash);
        write_len_str(&mut buf, self.sender_id.as_str());

        match &self.mime_type {
            Some(m) => {
                buf.push(1);
                write_len_str(&mut buf, m);
            }
            None => buf.push(0),
        }

        match self.file_permissions {
            Some(p) => {
                buf.push(1);
                buf.extend_from_slice(&p.to_be_bytes());
            }
            None => buf.push(0),
        }

        match self.compression_type {
            Some(c) => {
                buf.push(1);
                buf.push(c as u8);
            }
            None => buf.push(0),
        }

        buf.extend_from_slice(&self.timestamp_ms.to_be_bytes());

        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut c = Cursor::new(bytes);

        let file_id = Token::from_bytes(c.read_array::<16>()?);
        let file_size = c.read_u64()?;
        let total_chunks = c.read_u32()?;
        let priority = Priority::try_from(c.read_u8()?)?;
        let _reserved = c.read_bytes(3)?;

        let file_name = c.read_len_str("file_name")?;
        let sha256_hash = c.read_len_str("sha256_hash")?;
        let sender_id = PeerId::new(c.read_len_str("sender_id")?);

        let mime_type = if c.read_u8()? == 1 {
            Some(c.read_len_str("mime_type")?)
        } else {
            None
        };

        let file_permissions = if c.read_u8()? == 1 {
            Some(c.read_u16()?)
        } else {
            None
        };

        let compression_type = if c.read_u8()? == 1 {
            Some(CompressionType::try_from(c.read_u8()?)?)
        } else {
            None
        };

        let timestamp_ms = if c.remaining() >= 8 { c.read_u64()? } else { 0 };
        // Any further trailing bytes are unknown extensions — ignored.

        Ok(Manifest {
            file_id,
            file_name,
            file_size,
            total_chunks,
            sha256_hash,
            sender_id,
            timestamp_ms,
            priority,
            mime_type,
            file_permissions,
            compression_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Manifest {
        Manifest {
            file_id: Token::from_str_truncated("aaaaaaaaaaaaaaaa"),
            file_name: "report.pdf".into(),
            file_size: 1024,
            total_chunks: 3,
            sha256_hash: "a".repeat(64),
            sender_id: PeerId::new("alice"),
            timestamp_ms: 1_700_000_000_000,
            priority: Priority::High,
            mime_type: Some("application/pdf".into()),
            file_permissions: Some(0o644),
            compression_type: Some(CompressionType::None),
        }
    }

    #[test]
    fn round_trip_full() {
        let m = sample();
        assert_eq!(Manifest::decode(&m.encode()).unwrap(), m);
    }

    #[test]
    fn round_trip_no_optionals() {
        let mut m = sample();
        m.mime_type = None;
        m.file_permissions = None;
        m.compression_type = None;
        assert_eq!(Manifest::decode(&m.encode()).unwrap(), m);
    }

    #[test]
    fn file_id_truncated_to_16_bytes() {
        let token = Token::from_str_truncated("this-is-way-more-than-sixteen-bytes");
        assert_eq!(token.as_trimmed_str().len(), 16);
    }

    #[test]
    fn old_frame_without_timestamp_trailer_decodes() {
        let m = sample();
        let mut bytes = m.encode();
        let without_trailer_len = bytes.len() - 8;
        bytes.truncate(without_trailer_len);
        let decoded = Manifest::decode(&bytes).unwrap();
        assert_eq!(decoded.timestamp_ms, 0);
        assert_eq!(decoded.file_name, m.file_name);
    }

    #[test]
    fn unknown_trailing_bytes_ignored() {
        let m = sample();
        let mut bytes = m.encode();
        bytes.extend_from_slice(&[0xAB; 12]);
        let decoded = Manifest::decode(&bytes).unwrap();
        assert_eq!(decoded, m);
    }
}
