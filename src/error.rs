//! Error taxonomy (spec.md §7). Wire decode errors are typed and never
//! escape the codec as a panic; transfer-level failures carry a short
//! `Display` reason plus a `can_retry` flag surfaced to the caller.

use thiserror::Error;

/// Errors returned by the codec's `decode_*` functions. A decode failure
/// means the frame is dropped whole — never partially applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated payload: needed {needed} bytes, had {available}")]
    TruncatedPayload { needed: usize, available: usize },

    #[error("unknown message type 0x{0:02x}")]
    UnknownType(u8),

    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u8, got: u8 },

    #[error("bitmap length {bitmap_len} exceeds expected maximum {expected_max}")]
    BitmapOverflow {
        bitmap_len: usize,
        expected_max: usize,
    },

    #[error("invalid UTF-8 in field {field}")]
    InvalidUtf8 { field: &'static str },

    #[error("invalid value {value} for field {field}")]
    InvalidEnumValue { field: &'static str, value: u8 },
}

/// Reasons a transfer can land in `TransferStatus::Failed`. Stored as the
/// rendered `Display` string inside the status (spec.md keeps `reason` as a
/// short string so it can be surfaced to history/UI without re-exporting an
/// enum across the collaborator boundary), but kept typed here so the
/// state machine itself builds the string in one place.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferFailure {
    #[error("integrity")]
    Integrity,
    #[error("checksum")]
    Checksum,
    #[error("retry_exhausted")]
    RetryExhausted,
    #[error("stalled")]
    Stalled,
    #[error("abandoned")]
    Abandoned,
    #[error("peer:{0}")]
    Peer(u8),
    #[error("conflict")]
    Conflict,
}

impl TransferFailure {
    /// Whether the manager should allow re-enqueuing a transfer that failed
    /// for this reason (spec.md §7).
    pub fn can_retry(&self) -> bool {
        !matches!(self, TransferFailure::Peer(_) | TransferFailure::Conflict)
    }
}

/// Admission-time failure surfaced synchronously to `TransferManager::queue`
/// callers (spec.md §7: "Surfaced to caller as `None` from `queue`" — kept
/// as a typed error internally so the reason is not lost before it becomes
/// `None`, useful for logging).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("source unreadable: {0}")]
    Unreadable(String),
    #[error("source size {size} exceeds configured maximum {max}")]
    Oversize { size: u64, max: u64 },
}
