//! Per-transfer state machines (spec.md §4.3). `sender` drives the sending
//! side of a transfer (windowed emission, retransmission, pause/cancel);
//! `receiver` drives the receiving side (chunk acceptance, reassembly,
//! coalesced ACK emission). Both share the `TransferStatus`/`TransferRecord`
//! vocabulary defined here so `TransferManager` can treat them uniformly for
//! progress aggregation and history.

pub mod receiver;
pub mod sender;

use std::collections::BTreeSet;

use crate::codec::manifest::{Manifest, Priority};
use crate::peer::{PeerId, Token};

/// Which side of a transfer this record tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

/// Lifecycle status of a transfer (spec.md §3, §4.3). `Queued` and
/// `Preparing` only apply on the send side; a receive-side record starts
/// directly at `Preparing` once a MANIFEST arrives.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferStatus {
    Queued,
    Preparing,
    Transferring { received: u32, total: u32 },
    Paused { at: u32 },
    Completed,
    Failed { reason: String, can_retry: bool },
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed { .. } | TransferStatus::Cancelled
        )
    }

    pub fn progress_fraction(&self) -> f32 {
        match self {
            TransferStatus::Transferring { received, total } if *total > 0 => {
                *received as f32 / *total as f32
            }
            TransferStatus::Completed => 1.0,
            _ => 0.0,
        }
    }
}

/// A read-only view of a `TransferRecord`, cheap to clone for subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferSnapshot {
    pub file_id: Token,
    pub file_name: String,
    pub direction: Direction,
    pub peer_id: PeerId,
    pub peer_nickname: Option<String>,
    pub priority: Priority,
    pub status: TransferStatus,
    pub progress_percent: f32,
    pub last_activity_ms: u64,
}

/// Per-transfer state shared by both sub-state-machines (spec.md §3).
/// Owned exclusively by whichever `SenderState`/`ReceiverState` wraps it;
/// the manager only ever sees `TransferSnapshot`s.
#[derive(Debug, Clone)]
pub struct TransferRecord {
    pub manifest: Manifest,
    pub direction: Direction,
    pub peer_id: PeerId,
    pub peer_nickname: Option<String>,
    pub status: TransferStatus,
    /// Indices verified complete, sender or receiver side.
    pub bitmap: BTreeSet<u32>,
    pub last_activity_ms: u64,
    pub retry_counts: std::collections::HashMap<u32, u8>,
    pub enqueue_time_ms: u64,
}

impl TransferRecord {
    pub fn file_id(&self) -> &Token {
        &self.manifest.file_id
    }

    pub fn total_chunks(&self) -> u32 {
        self.manifest.total_chunks
    }

    pub fn progress_percent(&self) -> f32 {
        let total = self.total_chunks();
        if total == 0 {
            if self.status.is_terminal() {
                100.0
            } else {
                0.0
            }
        } else {
            100.0 * self.bitmap.len() as f32 / total as f32
        }
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        TransferSnapshot {
            file_id: *self.file_id(),
            file_name: self.manifest.file_name.clone(),
            direction: self.direction,
            peer_id: self.peer_id.clone(),
            peer_nickname: self.peer_nickname.clone(),
            priority: self.manifest.priority,
            status: self.status.clone(),
            progress_percent: self.progress_percent(),
            last_activity_ms: self.last_activity_ms,
        }
    }
}

/// A chunk the sender has transmitted and is awaiting acknowledgment for.
#[derive(Debug, Clone, Copy)]
pub struct InFlightChunk {
    pub chunk_index: u32,
    pub sent_at_ms: u64,
    pub retry_count: u8,
}
