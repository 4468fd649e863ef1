//! Sender-side transfer state machine (spec.md §4.3). Chunks are produced
//! up front by `ChunkEngine` before the transfer leaves `Preparing`; this
//! state machine only tracks which of them are acknowledged, in flight, or
//! still owed a first transmission.

use std::collections::{BTreeSet, HashMap};

use crate::codec::ack::Ack;
use crate::codec::chunk::Chunk;
use crate::constants::{MAX_RETRIES_PER_CHUNK, RETX_TIMEOUT_MS, STALL_TIMEOUT_MS};
use crate::error::TransferFailure;
use crate::transfer::{Direction, InFlightChunk, TransferRecord, TransferStatus};

/// What happened to the transfer as a result of applying an ACK or a
/// timeout check — the caller (manager) uses this to decide whether to log
/// a state change or emit a best-effort cancel ACK.
#[derive(Debug, Clone, PartialEq)]
pub enum SenderOutcome {
    Unchanged,
    Progressed,
    TransitionedTo(TransferStatus),
}

pub struct SenderState {
    pub record: TransferRecord,
    chunks: Vec<Chunk>,
    in_flight: HashMap<u32, InFlightChunk>,
    window_size: u16,
}

impl SenderState {
    pub fn new(record: TransferRecord, chunks: Vec<Chunk>, window_size: u16) -> Self {
        debug_assert_eq!(record.direction, Direction::Send);
        Self {
            record,
            chunks,
            in_flight: HashMap::new(),
            window_size,
        }
    }

    /// `Preparing` -> `Transferring(0, n)`, called once the MANIFEST has
    /// been emitted.
    pub fn start_transferring(&mut self, now_ms: u64) {
        let total = self.record.total_chunks();
        self.record.status = TransferStatus::Transferring { received: 0, total };
        self.record.last_activity_ms = now_ms;
        if total == 0 {
            // Empty file: MANIFEST alone completes the transfer (spec.md §8).
            self.record.status = TransferStatus::Completed;
        }
    }

    /// Lowest chunk index not yet acknowledged and not currently in flight,
    /// provided the window has room. `None` means either the window is
    /// full or every remaining chunk is already in flight.
    pub fn next_sendable(&self) -> Option<&Chunk> {
        if self.in_flight.len() >= self.window_size as usize {
            return None;
        }
        self.chunks
            .iter()
            .find(|c| !self.record.bitmap.contains(&c.chunk_index) && !self.in_flight.contains_key(&c.chunk_index))
    }

    pub fn mark_sent(&mut self, chunk_index: u32, now_ms: u64) {
        let retry_count = self
            .record
            .retry_counts
            .get(&chunk_index)
            .copied()
            .unwrap_or(0);
        self.in_flight.insert(
            chunk_index,
            InFlightChunk {
                chunk_index,
                sent_at_ms: now_ms,
                retry_count,
            },
        );
        self.record.last_activity_ms = now_ms;
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Apply an incoming ACK: union its bitmap into the local one, retire
    /// acknowledged chunks from flight, and act on pause/cancel/complete
    /// flags (spec.md §4.3, §5 — ACK application is commutative and
    /// monotonic, so reordered or duplicate ACKs are always safe to apply).
    pub fn apply_ack(&mut self, ack: &Ack, now_ms: u64) -> SenderOutcome {
        if self.record.status.is_terminal() {
            return SenderOutcome::Unchanged;
        }

        let total = self.record.total_chunks();
        let acknowledged = ack.acknowledged_chunks(total);
        let before = self.record.bitmap.len();
        self.record.bitmap.extend(&acknowledged);
        for idx in &acknowledged {
            self.in_flight.remove(idx);
        }
        self.record.last_activity_ms = now_ms;

        if ack.cancel_transfer {
            self.record.status = TransferStatus::Cancelled;
            self.in_flight.clear();
            return SenderOutcome::TransitionedTo(self.record.status.clone());
        }

        if ack.pause_transfer {
            let at = self.record.bitmap.len() as u32;
            self.record.status = TransferStatus::Paused { at };
            return SenderOutcome::TransitionedTo(self.record.status.clone());
        }

        let k = self.record.bitmap.len() as u32;
        if k == total && ack.transfer_complete {
            self.record.status = TransferStatus::Completed;
            return SenderOutcome::TransitionedTo(self.record.status.clone());
        }

        self.record.status = TransferStatus::Transferring { received: k, total };
        if self.record.bitmap.len() > before {
            SenderOutcome::Progressed
        } else {
            SenderOutcome::Unchanged
        }
    }

    /// Resume from `Paused` — the manager calls this explicitly (spec.md
    /// §4.3: "`Paused` -> `Transferring` on explicit resume by the manager").
    pub fn resume(&mut self) {
        if let TransferStatus::Paused { at } = self.record.status {
            self.record.status = TransferStatus::Transferring {
                received: at,
                total: self.record.total_chunks(),
            };
        }
    }

    pub fn cancel(&mut self) {
        self.record.status = TransferStatus::Cancelled;
        self.in_flight.clear();
    }

    /// Chunks whose retransmit timeout has elapsed: bump their retry count
    /// and return them for re-emission. A chunk exceeding
    /// `MAX_RETRIES_PER_CHUNK` fails the whole transfer instead.
    pub fn check_retransmits(&mut self, now_ms: u64) -> Vec<&Chunk> {
        if self.record.status.is_terminal() {
            return Vec::new();
        }

        let mut expired: Vec<u32> = self
            .in_flight
            .values()
            .filter(|c| now_ms.saturating_sub(c.sent_at_ms) >= RETX_TIMEOUT_MS)
            .map(|c| c.chunk_index)
            .collect();
        expired.sort_unstable();

        let mut to_resend = Vec::new();
        for idx in expired {
            let retry_count = self.record.retry_counts.entry(idx).or_insert(0);
            *retry_count += 1;
            if *retry_count > MAX_RETRIES_PER_CHUNK {
                self.record.status = TransferStatus::Failed {
                    reason: TransferFailure::RetryExhausted.to_string(),
                    can_retry: true,
                };
                self.in_flight.clear();
                return Vec::new();
            }
            if let Some(in_flight) = self.in_flight.get_mut(&idx) {
                in_flight.sent_at_ms = now_ms;
                in_flight.retry_count = *retry_count;
            }
            to_resend.push(idx);
        }

        to_resend
            .into_iter()
            .filter_map(|idx| self.chunks.iter().find(|c| c.chunk_index == idx))
            .collect()
    }

    /// No ACK for `STALL_TIMEOUT_MS` while chunks remain in flight (spec.md
    /// §4.3).
    pub fn check_stall(&mut self, now_ms: u64) -> bool {
        if self.record.status.is_terminal() || self.in_flight.is_empty() {
            return false;
        }
        if now_ms.saturating_sub(self.record.last_activity_ms) >= STALL_TIMEOUT_MS {
            self.record.status = TransferStatus::Failed {
                reason: TransferFailure::Stalled.to_string(),
                can_retry: true,
            };
            self.in_flight.clear();
            true
        } else {
            false
        }
    }

    pub fn acknowledged(&self) -> &BTreeSet<u32> {
        &self.record.bitmap
    }
}
