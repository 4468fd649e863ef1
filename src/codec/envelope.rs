//! Envelope packet (spec.md §3, §4.1, §6). The file-transfer core only
//! produces and consumes this to the extent it carries MANIFEST/CHUNK/ACK;
//! the mesh's other message types decode structurally but route elsewhere.

use super::Cursor;
use crate::error::DecodeError;
use crate::peer::PeerId;

/// Current and only supported envelope wire version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Message type tags this crate recognizes on the envelope (spec.md §6).
/// The mesh uses other tag values for non-file-transfer traffic; those
/// decode as a structurally valid `Envelope` but fail `MessageType::try_from`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Manifest,
    Chunk,
    Ack,
}

impl MessageType {
    pub fn tag(self) -> u8 {
        match self {
            MessageType::Manifest => 0x0E,
            MessageType::Chunk => 0x0F,
            MessageType::Ack => 0x10,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = DecodeError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0x0E => Ok(MessageType::Manifest),
            0x0F => Ok(MessageType::Chunk),
            0x10 => Ok(MessageType::Ack),
            other => Err(DecodeError::UnknownType(other)),
        }
    }
}

const FLAG_HAS_RECIPIENT: u8 = 0b01;
const FLAG_HAS_SIGNATURE: u8 = 0b10;
const SIGNATURE_LEN: usize = 64;

/// The mesh envelope packet. Carries an opaque payload (MANIFEST, CHUNK,
/// ACK, or some other mesh message this crate does not interpret).
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub version: u8,
    pub msg_type: u8,
    pub ttl: u8,
    pub timestamp_ms: u64,
    pub sender_id: PeerId,
    pub recipient_id: Option<PeerId>,
    pub payload: Vec<u8>,
    pub signature: Option<Vec<u8>>,
}

impl Envelope {
    /// Construct a new outbound envelope. TTL is initialized to
    /// `constants::MAX_HOPS` per spec.md §6.
    pub fn new(
        msg_type: MessageType,
        sender_id: PeerId,
        recipient_id: Option<PeerId>,
        timestamp_ms: u64,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            msg_type: msg_type.tag(),
            ttl: crate::constants::MAX_HOPS,
            timestamp_ms,
            sender_id,
            recipient_id,
            payload,
            signature: None,
        }
    }

    pub fn message_type(&self) -> Result<MessageType, DecodeError> {
        MessageType::try_from(self.msg_type)
    }

    pub fn encode(&self) -> Vec<u8> {
        let sender_bytes = self.sender_id.as_str().as_bytes();
        assert!(sender_bytes.len() <= u8::MAX as usize, "sender_id too long");

        let mut flags = 0u8;
        if self.recipient_id.is_some() {
            flags |= FLAG_HAS_RECIPIENT;
        }
        if self.signature.is_some() {
            flags |= FLAG_HAS_SIGNATURE;
        }

        let mut buf = Vec::with_capacity(16 + sender_bytes.len() + self.payload.len());
        buf.push(self.version);
        buf.push(self.msg_type);
        buf.push(flags);
        buf.push(self.ttl);
        buf.extend_from_slice(&self.timestamp_ms.to_be_bytes());
        buf.push(sender_bytes.len() as u8);
        buf.extend_from_slice(sender_bytes);

        if let Some(ref recipient) = self.recipient_id {
            buf.extend_from_slice(&recipient.to_recipient_field());
        }

        buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.payload);

        if let Some(ref sig) = self.signature {
            let mut fixed = [0u8; SIGNATURE_LEN];
            let n = sig.len().min(SIGNATURE_LEN);
            fixed[..n].copy_from_slice(&sig[..n]);
            buf.extend_from_slice(&fixed);
        }

        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut c = Cursor::new(bytes);
        let version = c.read_u8()?;
        if version != PROTOCOL_VERSION {
            return Err(DecodeError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: version,
            });
        }
        let msg_type = c.read_u8()?;
        let flags = c.read_u8()?;
        let ttl = c.read_u8()?;
        let timestamp_ms = c.read_u64()?;

        let sender_len = c.read_u8()? as usize;
        let sender_bytes = c.read_bytes(sender_len)?;
        let sender_id = PeerId::new(
            String::from_utf8(sender_bytes.to_vec())
                .map_err(|_| DecodeError::InvalidUtf8 { field: "sender_id" })?,
        );

        let recipient_id = if flags & FLAG_HAS_RECIPIENT != 0 {
            let field = c.read_array::<8>()?;
            PeerId::from_recipient_field(&field)
        } else {
            None
        };

        let payload_len = c.read_u16()? as usize;
        let payload = c.read_bytes(payload_len)?.to_vec();

        let signature = if flags & FLAG_HAS_SIGNATURE != 0 {
            Some(c.read_bytes(SIGNATURE_LEN)?.to_vec())
        } else {
            None
        };

        Ok(Envelope {
            version,
            msg_type,
            ttl,
            timestamp_ms,
            sender_id,
            recipient_id,
            payload,
            signature,
        })
    }

    /// Decrement TTL on relay. Returns `None` once it reaches zero (drop).
    pub fn relayed(mut self) -> Option<Self> {
        self.ttl = self.ttl.saturating_sub(1);
        if self.ttl == 0 {
            None
        } else {
            Some(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(payload: Vec<u8>) -> Envelope {
        Envelope::new(
            MessageType::Chunk,
            PeerId::new("alice"),
            Some(PeerId::new("bob")),
            1_700_000_000_000,
            payload,
        )
    }

    #[test]
    fn round_trip_with_recipient() {
        let env = sample(vec![1, 2, 3, 4]);
        let decoded = Envelope::decode(&env.encode()).unwrap();
        assert_eq!(decoded, env);
        assert_eq!(decoded.message_type().unwrap(), MessageType::Chunk);
    }

    #[test]
    fn round_trip_broadcast() {
        let mut env = sample(vec![9, 9]);
        env.recipient_id = None;
        let decoded = Envelope::decode(&env.encode()).unwrap();
        assert_eq!(decoded.recipient_id, None);
    }

    #[test]
    fn version_mismatch_rejected() {
        let mut bytes = sample(vec![]).encode();
        bytes[0] = 2;
        assert_eq!(
            Envelope::decode(&bytes),
            Err(DecodeError::VersionMismatch { expected: 1, got: 2 })
        );
    }

    #[test]
    fn truncated_payload_rejected() {
        let bytes = sample(vec![1, 2, 3]).encode();
        let short = &bytes[..bytes.len() - 1];
        assert!(matches!(
            Envelope::decode(short),
            Err(DecodeError::TruncatedPayload { .. })
        ));
    }

    #[test]
    fn unknown_type_on_route() {
        let mut env = sample(vec![]);
        env.msg_type = 0x42;
        let bytes = env.encode();
        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(
            decoded.message_type(),
            Err(DecodeError::UnknownType(0x42))
        );
    }

    #[test]
    fn ttl_relay_drops_at_zero() {
        let mut env = sample(vec![]);
        env.ttl = 1;
        assert!(env.relayed().is_none());
    }
}
