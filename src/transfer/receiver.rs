//! Receiver-side transfer state machine (spec.md §4.3). Verifies and
//! reassembles incoming CHUNKs into a preallocated buffer, tracks ACK
//! coalescing, and enforces the integrity-failure and abandonment policies.
//!
//! The source this protocol was distilled from never actually validated a
//! chunk's MAC on the receive path (spec.md §9). Here, `accept_chunk` always
//! calls `Chunk::verify_mac` before anything is written to the reassembly
//! buffer or the bitmap.

use sha2::{Digest, Sha256};

use crate::chunk_engine::engine::{adaptive_chunk_size, ChunkEngine};
use crate::codec::ack::Ack;
use crate::codec::chunk::Chunk;
use crate::constants::{ABANDON_TIMEOUT_MS, ACK_COALESCE_CHUNKS, ACK_COALESCE_MS, MAX_RETRIES_PER_CHUNK};
use crate::error::TransferFailure;
use crate::peer::Token;
use crate::transfer::{Direction, TransferRecord, TransferStatus};

/// Why `accept_chunk` did not mark a chunk received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    UnknownTransfer,
    IndexOutOfRange,
    LengthMismatch,
    IntegrityFailure,
    DecompressionFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    Accepted,
    DuplicateAccepted,
    Rejected(RejectReason),
}

pub struct ReceiverState {
    pub record: TransferRecord,
    buffer: Vec<u8>,
    chunk_size: usize,
    chunks_since_last_ack: u32,
    last_ack_at_ms: u64,
}

impl ReceiverState {
    /// Create receive state on MANIFEST arrival (spec.md §4.3).
    pub fn new(record: TransferRecord, now_ms: u64) -> Self {
        debug_assert_eq!(record.direction, Direction::Receive);
        let file_size = record.manifest.file_size;
        let chunk_size = adaptive_chunk_size(file_size);
        let total = record.total_chunks();

        let mut state = Self {
            buffer: vec![0u8; file_size as usize],
            chunk_size,
            chunks_since_last_ack: 0,
            last_ack_at_ms: now_ms,
            record,
        };

        state.record.status = if total == 0 {
            TransferStatus::Completed
        } else {
            TransferStatus::Transferring { received: 0, total }
        };
        state
    }

    /// Verify, decompress, and store one CHUNK (spec.md §4.2 reassembly).
    pub fn accept_chunk(&mut self, engine: &ChunkEngine, chunk: &Chunk, now_ms: u64) -> AcceptOutcome {
        if self.record.status.is_terminal() {
            return AcceptOutcome::Rejected(RejectReason::UnknownTransfer);
        }

        let total = self.record.total_chunks();
        if chunk.chunk_index >= total {
            return AcceptOutcome::Rejected(RejectReason::IndexOutOfRange);
        }

        if self.record.bitmap.contains(&chunk.chunk_index) {
            // Idempotent duplicate: already verified and stored once.
            return AcceptOutcome::DuplicateAccepted;
        }

        if !chunk.verify_mac() {
            let failures = self.record.retry_counts.entry(chunk.chunk_index).or_insert(0);
            *failures += 1;
            if *failures >= MAX_RETRIES_PER_CHUNK {
                self.record.status = TransferStatus::Failed {
                    reason: TransferFailure::Integrity.to_string(),
                    can_retry: true,
                };
            }
            return AcceptOutcome::Rejected(RejectReason::IntegrityFailure);
        }

        let decompressed = match engine.decompress_chunk(chunk) {
            Ok(bytes) => bytes,
            Err(_) => return AcceptOutcome::Rejected(RejectReason::DecompressionFailure),
        };

        if decompressed.len() != self.expected_len(chunk.chunk_index) {
            return AcceptOutcome::Rejected(RejectReason::LengthMismatch);
        }
        let offset = chunk.chunk_index as usize * self.chunk_size;

        self.buffer[offset..offset + decompressed.len()].copy_from_slice(&decompressed);
        self.record.bitmap.insert(chunk.chunk_index);
        self.record.retry_counts.remove(&chunk.chunk_index);
        self.chunks_since_last_ack += 1;
        self.record.last_activity_ms = now_ms;

        let received = self.record.bitmap.len() as u32;
        self.record.status = TransferStatus::Transferring { received, total };

        if chunk.is_last_chunk && received == total {
            if self.whole_file_hash() == self.record.manifest.sha256_hash {
                self.record.status = TransferStatus::Completed;
            } else {
                self.record.status = TransferStatus::Failed {
                    reason: TransferFailure::Checksum.to_string(),
                    can_retry: true,
                };
            }
        }

        AcceptOutcome::Accepted
    }

    fn expected_len(&self, index: u32) -> usize {
        let offset = index as u64 * self.chunk_size as u64;
        (self.chunk_size as u64).min(self.record.manifest.file_size - offset) as usize
    }

    fn whole_file_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.buffer);
        hex::encode(hasher.finalize())
    }

    /// Whether an ACK should be emitted now (spec.md §4.3 coalescing rule:
    /// 16 new chunks, 500 ms since last ACK with new chunks, last chunk
    /// arrived, or the transfer just reached a terminal state).
    pub fn should_emit_ack(&self, now_ms: u64) -> bool {
        if self.record.status.is_terminal() {
            return true;
        }
        self.chunks_since_last_ack >= ACK_COALESCE_CHUNKS
            || (self.chunks_since_last_ack > 0
                && now_ms.saturating_sub(self.last_ack_at_ms) >= ACK_COALESCE_MS)
    }

    /// Build the ACK to emit and reset coalescing bookkeeping.
    pub fn build_ack(&mut self, receiver_id: Token, window_size: u16, now_ms: u64) -> Ack {
        let total = self.record.total_chunks();
        let transfer_complete = matches!(self.record.status, TransferStatus::Completed);
        let ack = Ack::from_acknowledged(
            *self.record.file_id(),
            Token::random(),
            receiver_id,
            &self.record.bitmap,
            total,
            window_size,
            now_ms,
            false,
            matches!(self.record.status, TransferStatus::Cancelled),
            transfer_complete,
            0,
        );
        self.chunks_since_last_ack = 0;
        self.last_ack_at_ms = now_ms;
        ack
    }

    pub fn cancel(&mut self) {
        self.record.status = TransferStatus::Cancelled;
    }

    /// No CHUNK for `ABANDON_TIMEOUT_MS` while incomplete (spec.md §4.3).
    pub fn check_abandonment(&mut self, now_ms: u64) -> bool {
        if self.record.status.is_terminal() {
            return false;
        }
        if now_ms.saturating_sub(self.record.last_activity_ms) >= ABANDON_TIMEOUT_MS {
            self.record.status = TransferStatus::Failed {
                reason: TransferFailure::Abandoned.to_string(),
                can_retry: true,
            };
            true
        } else {
            false
        }
    }

    /// The reconstructed bytes, available once `status == Completed`.
    pub fn reconstructed(&self) -> &[u8] {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_engine::ChunkCache;
    use crate::codec::manifest::{Manifest, Priority};
    use crate::peer::PeerId;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn fixture(data: &[u8]) -> (ReceiverState, ChunkEngine, Token) {
        let file_id = Token::from_str_truncated("receiver-test");
        let chunk_size = adaptive_chunk_size(data.len() as u64);
        let total = crate::chunk_engine::engine::total_chunks(data.len() as u64, chunk_size);
        let mut hasher = Sha256::new();
        hasher.update(data);
        let sha256_hash = hex::encode(hasher.finalize());

        let manifest = Manifest {
            file_id,
            file_name: "f".into(),
            file_size: data.len() as u64,
            total_chunks: total,
            sha256_hash,
            sender_id: PeerId::new("sender"),
            timestamp_ms: 0,
            priority: Priority::Normal,
            mime_type: None,
            file_permissions: None,
            compression_type: None,
        };
        let record = TransferRecord {
            manifest,
            direction: Direction::Receive,
            peer_id: PeerId::new("sender"),
            peer_nickname: None,
            status: TransferStatus::Preparing,
            bitmap: BTreeSet::new(),
            last_activity_ms: 0,
            retry_counts: Default::default(),
            enqueue_time_ms: 0,
        };
        let engine = ChunkEngine::new(Arc::new(ChunkCache::new(10)));
        (ReceiverState::new(record, 0), engine, file_id)
    }

    fn mk_chunk(file_id: Token, index: u32, total: u32, bytes: &[u8]) -> Chunk {
        Chunk::new(file_id, index, index, 0, index == total - 1, false, 0, bytes.to_vec())
    }

    #[test]
    fn accepts_in_order_chunks_and_completes() {
        let data = b"Hello, World!".to_vec();
        let (mut state, engine, file_id) = fixture(&data);
        let outcome = state.accept_chunk(&engine, &mk_chunk(file_id, 0, 1, &data), 10);
        assert_eq!(outcome, AcceptOutcome::Accepted);
        assert_eq!(state.record.status, TransferStatus::Completed);
        assert_eq!(state.reconstructed(), data.as_slice());
    }

    #[test]
    fn duplicate_chunk_is_idempotent() {
        let data = vec![0xAAu8; 10];
        let (mut state, engine, file_id) = fixture(&data);
        let c = mk_chunk(file_id, 0, 1, &data);
        assert_eq!(state.accept_chunk(&engine, &c, 10), AcceptOutcome::Accepted);
        assert_eq!(
            state.accept_chunk(&engine, &c, 20),
            AcceptOutcome::DuplicateAccepted
        );
        assert_eq!(state.record.bitmap.len(), 1);
    }

    #[test]
    fn out_of_range_index_rejected() {
        let data = vec![1u8; 10];
        let (mut state, engine, file_id) = fixture(&data);
        let mut c = mk_chunk(file_id, 0, 1, &data);
        c.chunk_index = 99;
        assert_eq!(
            state.accept_chunk(&engine, &c, 10),
            AcceptOutcome::Rejected(RejectReason::IndexOutOfRange)
        );
    }

    #[test]
    fn tampered_chunk_rejected_and_counted_to_integrity_failure() {
        let data = vec![7u8; 10];
        let (mut state, engine, file_id) = fixture(&data);
        let mut c = mk_chunk(file_id, 0, 1, &data);
        c.payload[0] ^= 0xFF;
        for attempt in 1..MAX_RETRIES_PER_CHUNK {
            let outcome = state.accept_chunk(&engine, &c, 10 * attempt as u64);
            assert_eq!(outcome, AcceptOutcome::Rejected(RejectReason::IntegrityFailure));
            assert_ne!(state.record.status, TransferStatus::Failed {
                reason: TransferFailure::Integrity.to_string(),
                can_retry: true,
            });
        }
        state.accept_chunk(&engine, &c, 1000);
        assert!(matches!(
            state.record.status,
            TransferStatus::Failed { ref reason, can_retry: true } if reason == "integrity"
        ));
        assert!(!state.record.bitmap.contains(&0));
    }

    #[test]
    fn checksum_mismatch_fails_transfer() {
        let data = vec![3u8; 10];
        let (mut state, engine, file_id) = fixture(&data);
        state.record.manifest.sha256_hash = "0".repeat(64);
        let outcome = state.accept_chunk(&engine, &mk_chunk(file_id, 0, 1, &data), 10);
        assert_eq!(outcome, AcceptOutcome::Accepted);
        assert!(matches!(
            state.record.status,
            TransferStatus::Failed { ref reason, .. } if reason == "checksum"
        ));
    }

    #[test]
    fn ack_coalesces_on_chunk_count_and_time() {
        let data = vec![0u8; 20 * 480];
        let (mut state, engine, file_id) = fixture(&data);
        let chunk_size = adaptive_chunk_size(data.len() as u64);
        for i in 0..ACK_COALESCE_CHUNKS - 1 {
            let start = i as usize * chunk_size;
            let end = (start + chunk_size).min(data.len());
            state.accept_chunk(&engine, &mk_chunk(file_id, i, 20, &data[start..end]), 10);
        }
        assert!(!state.should_emit_ack(10));
        assert!(state.should_emit_ack(10 + ACK_COALESCE_MS));

        let start = (ACK_COALESCE_CHUNKS - 1) as usize * chunk_size;
        let end = (start + chunk_size).min(data.len());
        state.accept_chunk(
            &engine,
            &mk_chunk(file_id, ACK_COALESCE_CHUNKS - 1, 20, &data[start..end]),
            10,
        );
        assert!(state.should_emit_ack(10));
    }

    #[test]
    fn abandonment_after_timeout_with_incomplete_transfer() {
        let data = vec![0u8; 1000];
        let (mut state, _engine, _file_id) = fixture(&data);
        assert!(!state.check_abandonment(ABANDON_TIMEOUT_MS - 1));
        assert!(state.check_abandonment(ABANDON_TIMEOUT_MS));
        assert!(matches!(
            state.record.status,
            TransferStatus::Failed { ref reason, .. } if reason == "abandoned"
        ));
    }

    #[test]
    fn empty_file_completes_on_manifest_alone() {
        let (state, _engine, _file_id) = fixture(&[]);
        assert_eq!(state.record.status, TransferStatus::Completed);
    }
}
