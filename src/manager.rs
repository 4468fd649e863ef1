//! `TransferManager` (spec.md §4.4): admission, priority scheduling, the
//! concurrency bound, progress aggregation, and the inbound envelope demux.
//! Generalizes the teacher's `Dispatcher` — an owned value holding
//! `Arc<Inner>`-style shared state, fanning state changes out to
//! subscribers over channels rather than a global broadcast — into a
//! synchronous, thread-based equivalent of its `tokio::broadcast` usage,
//! matching the rest of this crate's thread-and-channel concurrency model.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::chunk_engine::{ChunkCache, ChunkEngine};
use crate::codec::ack::Ack;
use crate::codec::chunk::Chunk;
use crate::codec::envelope::{Envelope, MessageType};
use crate::codec::manifest::{CompressionType, Manifest, Priority};
use crate::constants::{
    MANAGER_TICK_MS, MAX_ACTIVE_TRANSFERS, WINDOW_SIZE_DEFAULT,
};
use crate::error::AdmissionError;
use crate::logging::{TransferEvent, TransferLog, TransferLogger};
use crate::peer::{PeerId, Token};
use crate::traits::{ByteSink, ByteSource, Clock, Transport};
use crate::transfer::receiver::{AcceptOutcome, ReceiverState, RejectReason};
use crate::transfer::sender::{SenderOutcome, SenderState};
use crate::transfer::{Direction, TransferRecord, TransferSnapshot, TransferStatus};

/// Tunable knobs. The wire format itself is never configurable — only
/// local scheduling behavior.
#[derive(Clone)]
pub struct ManagerConfig {
    pub max_active: usize,
    pub window_size: u16,
    pub max_source_size: Option<u64>,
    pub compression: CompressionType,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_active: MAX_ACTIVE_TRANSFERS,
            window_size: WINDOW_SIZE_DEFAULT,
            max_source_size: None,
            compression: CompressionType::None,
        }
    }
}

/// Published to every subscriber on any state change worth observing.
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    Queued(TransferSnapshot),
    Admitted(TransferSnapshot),
    Progress(TransferSnapshot),
    Terminal(TransferSnapshot),
    GlobalProgress(f32),
}

/// A terminal transfer's retained record (spec.md §7: "bounded ring,
/// default 100 entries").
#[derive(Clone)]
pub struct HistoryEntry {
    pub snapshot: TransferSnapshot,
    pub can_retry: bool,
    retry_source: Option<Arc<dyn ByteSource>>,
}

struct QueuedSend {
    file_id: Token,
    source: Arc<dyn ByteSource>,
    manifest: Manifest,
    peer_id: PeerId,
    peer_nickname: Option<String>,
    enqueue_time_ms: u64,
}

struct Inner {
    queued: Vec<QueuedSend>,
    active_senders: HashMap<Token, SenderState>,
    /// The original source behind each active send, kept around so a
    /// retryable failure can be re-queued without asking the caller to
    /// resupply it (spec.md §4.4: "retry re-enqueues the original
    /// admission").
    sender_sources: HashMap<Token, Arc<dyn ByteSource>>,
    active_receivers: HashMap<(PeerId, Token), ReceiverState>,
    history: VecDeque<HistoryEntry>,
    history_capacity: usize,
}

/// Queue admission, scheduling, and progress aggregation for every transfer
/// this peer is a party to, plus the inbound envelope demux (spec.md §6:
/// "one entry point `on_envelope(bytes)`").
pub struct TransferManager<T: Transport, C: Clock> {
    config: ManagerConfig,
    transport: Arc<T>,
    clock: Arc<C>,
    cache: Arc<ChunkCache>,
    engine: ChunkEngine,
    logger: Arc<dyn TransferLogger>,
    local_peer_id: PeerId,
    inner: Mutex<Inner>,
    subscribers: Mutex<Vec<Sender<ManagerEvent>>>,
    stop: AtomicBool,
}

impl<T: Transport, C: Clock> TransferManager<T, C> {
    /// `cache` is taken by `Arc` so a caller can share one `ChunkCache`
    /// across multiple managers — e.g. a sender-side and receiver-side
    /// manager in the same test harness (spec.md §5: "LRU chunk cache is
    /// shared across all transfers").
    pub fn new(
        local_peer_id: PeerId,
        transport: Arc<T>,
        clock: Arc<C>,
        logger: Arc<dyn TransferLogger>,
        cache: Arc<ChunkCache>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            engine: ChunkEngine::new(cache.clone()),
            cache,
            config,
            transport,
            clock,
            logger,
            local_peer_id,
            inner: Mutex::new(Inner {
                queued: Vec::new(),
                active_senders: HashMap::new(),
                sender_sources: HashMap::new(),
                active_receivers: HashMap::new(),
                history: VecDeque::new(),
                history_capacity: crate::constants::HISTORY_CAPACITY,
            }),
            subscribers: Mutex::new(Vec::new()),
            stop: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> Receiver<ManagerEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    fn publish(&self, event: ManagerEvent) {
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn publish_global_progress(&self, inner: &Inner) {
        let snapshots: Vec<f32> = inner
            .active_senders
            .values()
            .map(|s| s.record.progress_percent())
            .chain(inner.active_receivers.values().map(|r| r.record.progress_percent()))
            .collect();
        let mean = if snapshots.is_empty() {
            0.0
        } else {
            snapshots.iter().sum::<f32>() / snapshots.len() as f32
        };
        self.publish(ManagerEvent::GlobalProgress(mean));
    }

    /// Admit a new outbound transfer. `None` iff the source is unreadable
    /// or exceeds the configured maximum size (spec.md §4.4).
    pub fn queue(
        &self,
        source: Arc<dyn ByteSource>,
        peer_id: PeerId,
        peer_nickname: Option<String>,
        priority: Priority,
    ) -> Option<Token> {
        let size = source.len();
        if let Some(max) = self.config.max_source_size {
            if size > max {
                self.logger.log(TransferLog {
                    component: "manager",
                    file_id: Token::from_str_truncated(""),
                    event: TransferEvent::Error {
                        message: AdmissionError::Oversize { size, max }.to_string(),
                    },
                });
                return None;
            }
        }

        let sha256_hash = match Self::hash_source_streaming(source.as_ref()) {
            Ok(h) => h,
            Err(e) => {
                self.logger.log(TransferLog {
                    component: "manager",
                    file_id: Token::from_str_truncated(""),
                    event: TransferEvent::Error {
                        message: AdmissionError::Unreadable(e).to_string(),
                    },
                });
                return None;
            }
        };

        let file_id = Token::random();
        let chunk_size = crate::chunk_engine::adaptive_chunk_size(size);
        let total_chunks = crate::chunk_engine::total_chunks(size, chunk_size);
        let now = self.clock.now_ms();

        let manifest = Manifest {
            file_id,
            file_name: String::new(),
            file_size: size,
            total_chunks,
            sha256_hash,
            sender_id: self.local_peer_id.clone(),
            timestamp_ms: now,
            priority,
            mime_type: None,
            file_permissions: None,
            compression_type: Some(self.config.compression),
        };

        let snapshot;
        {
            let mut inner = self.inner.lock().unwrap();
            inner.queued.push(QueuedSend {
                file_id,
                source,
                manifest: manifest.clone(),
                peer_id: peer_id.clone(),
                peer_nickname,
                enqueue_time_ms: now,
            });
            inner.queued.sort_by(|a, b| {
                b.manifest
                    .priority
                    .cmp(&a.manifest.priority)
                    .then(a.enqueue_time_ms.cmp(&b.enqueue_time_ms))
            });
            snapshot = TransferSnapshot {
                file_id,
                file_name: manifest.file_name.clone(),
                direction: Direction::Send,
                peer_id,
                peer_nickname: None,
                priority,
                status: TransferStatus::Queued,
                progress_percent: 0.0,
                last_activity_ms: now,
            };
        }
        self.publish(ManagerEvent::Queued(snapshot));
        self.try_promote();
        Some(file_id)
    }

    fn hash_source_streaming(source: &dyn ByteSource) -> Result<String, String> {
        use sha2::{Digest, Sha256};
        const READ_WINDOW: usize = 64 * 1024;
        let len = source.len();
        let mut hasher = Sha256::new();
        let mut offset = 0u64;
        while offset < len {
            let window = READ_WINDOW.min((len - offset) as usize);
            let bytes = source
                .read_range(offset, window)
                .map_err(|e| e.to_string())?;
            hasher.update(&bytes);
            offset += window as u64;
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Promote queued sends into active slots while the concurrency bound
    /// allows (spec.md §4.4).
    fn try_promote(&self) {
        loop {
            let ticket = {
                let mut inner = self.inner.lock().unwrap();
                if inner.active_senders.len() >= self.config.max_active || inner.queued.is_empty() {
                    return;
                }
                inner.queued.remove(0)
            };

            let now = self.clock.now_ms();
            let chunks = self.engine.chunk_source(
                &ticket.file_id,
                ticket.source.as_ref(),
                self.config.compression,
                self.clock.as_ref(),
                |_frac| {},
            );
            let source = ticket.source.clone();

            let record = TransferRecord {
                manifest: ticket.manifest.clone(),
                direction: Direction::Send,
                peer_id: ticket.peer_id.clone(),
                peer_nickname: ticket.peer_nickname.clone(),
                status: TransferStatus::Preparing,
                bitmap: Default::default(),
                last_activity_ms: now,
                retry_counts: HashMap::new(),
                enqueue_time_ms: ticket.enqueue_time_ms,
            };

            let envelope = Envelope::new(
                MessageType::Manifest,
                self.local_peer_id.clone(),
                Some(ticket.peer_id.clone()),
                now,
                ticket.manifest.encode(),
            );
            self.transport.send(&envelope.encode(), &ticket.peer_id);
            self.logger.log(TransferLog {
                component: "manager",
                file_id: ticket.file_id,
                event: TransferEvent::ManifestSent {
                    total_chunks: ticket.manifest.total_chunks,
                },
            });

            let mut sender = SenderState::new(record, chunks, self.config.window_size);
            sender.start_transferring(now);
            let snapshot = sender.record.snapshot();

            let mut inner = self.inner.lock().unwrap();
            inner.active_senders.insert(ticket.file_id, sender);
            inner.sender_sources.insert(ticket.file_id, source);
            drop(inner);
            self.publish(ManagerEvent::Admitted(snapshot));
        }
    }

    /// Route one inbound envelope (spec.md §6).
    pub fn on_envelope(&self, bytes: &[u8]) {
        let envelope = match Envelope::decode(bytes) {
            Ok(e) => e,
            Err(_) => return,
        };
        let Ok(msg_type) = envelope.message_type() else {
            return;
        };

        match msg_type {
            MessageType::Manifest => self.handle_manifest(&envelope),
            MessageType::Chunk => self.handle_chunk(&envelope),
            MessageType::Ack => self.handle_ack(&envelope),
        }
    }

    fn handle_manifest(&self, envelope: &Envelope) {
        let Ok(manifest) = Manifest::decode(&envelope.payload) else {
            return;
        };
        let now = self.clock.now_ms();
        let key = (envelope.sender_id.clone(), manifest.file_id);

        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.active_receivers.get(&key) {
            if existing.record.manifest == manifest {
                return; // idempotent duplicate
            }
            drop(inner);
            self.send_ack_with_error(envelope.sender_id.clone(), manifest.file_id, 1 /* CONFLICT */, false);
            return;
        }

        let record = TransferRecord {
            manifest: manifest.clone(),
            direction: Direction::Receive,
            peer_id: envelope.sender_id.clone(),
            peer_nickname: None,
            status: TransferStatus::Preparing,
            bitmap: Default::default(),
            last_activity_ms: now,
            retry_counts: HashMap::new(),
            enqueue_time_ms: now,
        };
        self.logger.log(TransferLog {
            component: "manager",
            file_id: manifest.file_id,
            event: TransferEvent::ManifestReceived {
                total_chunks: manifest.total_chunks,
            },
        });
        let receiver = ReceiverState::new(record, now);
        let terminal = receiver.record.status.is_terminal();
        let snapshot = receiver.record.snapshot();
        inner.active_receivers.insert(key, receiver);
        drop(inner);

        self.publish(ManagerEvent::Admitted(snapshot.clone()));
        if terminal {
            // An empty file completes on the MANIFEST alone. Emit the final
            // ACK and tell subscribers, but leave the receiver in place —
            // the collaborator hands off the (empty) reconstructed bytes via
            // `finalize_receiver_into`.
            self.maybe_emit_ack_for(envelope.sender_id.clone(), manifest.file_id, now);
            self.publish(ManagerEvent::Terminal(snapshot));
        }
    }

    fn handle_chunk(&self, envelope: &Envelope) {
        let Ok(chunk) = Chunk::decode(&envelope.payload) else {
            return;
        };
        let now = self.clock.now_ms();
        let key = (envelope.sender_id.clone(), chunk.file_id);

        let (outcome, snapshot) = {
            let mut inner = self.inner.lock().unwrap();
            let Some(receiver) = inner.active_receivers.get_mut(&key) else {
                return;
            };
            let outcome = receiver.accept_chunk(&self.engine, &chunk, now);
            (outcome, receiver.record.snapshot())
        };

        match outcome {
            AcceptOutcome::Accepted => self.logger.log(TransferLog {
                component: "manager",
                file_id: chunk.file_id,
                event: TransferEvent::ChunkAccepted { chunk_index: chunk.chunk_index },
            }),
            AcceptOutcome::Rejected(reason) => self.logger.log(TransferLog {
                component: "manager",
                file_id: chunk.file_id,
                event: TransferEvent::ChunkRejected {
                    chunk_index: chunk.chunk_index,
                    reason: reason_str(reason),
                },
            }),
            AcceptOutcome::DuplicateAccepted => {}
        }

        self.maybe_emit_ack_for(envelope.sender_id.clone(), chunk.file_id, now);

        // `UnknownTransfer` means the receiver was already terminal before
        // this call — not a fresh transition, so it was already handled.
        let just_finished = snapshot.status.is_terminal()
            && outcome != AcceptOutcome::Rejected(RejectReason::UnknownTransfer);
        if !just_finished {
            self.publish(ManagerEvent::Progress(snapshot));
            return;
        }
        if matches!(snapshot.status, TransferStatus::Completed) {
            // Leave the receiver in place — the collaborator hands off the
            // reconstructed bytes via `finalize_receiver_into`.
            self.publish(ManagerEvent::Terminal(snapshot));
        } else {
            self.finalize_receiver(envelope.sender_id.clone(), chunk.file_id);
        }
    }

    /// Route an inbound ACK. Ordinarily this peer is the sender the ACK
    /// acknowledges chunks to. But a sender-initiated `cancel` (spec.md §4.4)
    /// notifies its peer with an ACK-shaped `cancel_transfer` message too —
    /// the only wire vehicle the protocol defines for cancellation — so an
    /// ACK with no matching sender falls back to cancelling the matching
    /// receiver instead (spec.md §8 S5: "receiver sees an ACK with
    /// cancel_transfer=true; receiver's transfer also -> Cancelled").
    fn handle_ack(&self, envelope: &Envelope) {
        let Ok(ack) = Ack::decode(&envelope.payload, None) else {
            return;
        };
        let now = self.clock.now_ms();

        let mut inner = self.inner.lock().unwrap();
        if let Some(sender) = inner.active_senders.get_mut(&ack.file_id) {
            let outcome = sender.apply_ack(&ack, now);
            let snapshot = sender.record.snapshot();
            let terminal = sender.record.status.is_terminal();
            drop(inner);

            match &outcome {
                SenderOutcome::TransitionedTo(_) if terminal => self.publish(ManagerEvent::Terminal(snapshot)),
                _ => self.publish(ManagerEvent::Progress(snapshot)),
            }

            if terminal {
                self.finalize_sender(ack.file_id);
            }
            return;
        }

        if ack.cancel_transfer {
            let key = (envelope.sender_id.clone(), ack.file_id);
            if let Some(receiver) = inner.active_receivers.get_mut(&key) {
                receiver.cancel();
                drop(inner);
                self.finalize_receiver(envelope.sender_id.clone(), ack.file_id);
            }
        }
    }

    fn maybe_emit_ack_for(&self, peer_id: PeerId, file_id: Token, now: u64) {
        let mut inner = self.inner.lock().unwrap();
        let key = (peer_id.clone(), file_id);
        let Some(receiver) = inner.active_receivers.get_mut(&key) else {
            return;
        };
        if !receiver.should_emit_ack(now) {
            return;
        }
        let ack = receiver.build_ack(
            Token::from_str_truncated(self.local_peer_id.as_str()),
            self.config.window_size,
            now,
        );
        let acknowledged = ack.total_received;
        let total = receiver.record.total_chunks();
        drop(inner);

        let envelope = Envelope::new(
            MessageType::Ack,
            self.local_peer_id.clone(),
            Some(peer_id.clone()),
            now,
            ack.encode(),
        );
        self.transport.send(&envelope.encode(), &peer_id);
        self.logger.log(TransferLog {
            component: "manager",
            file_id,
            event: TransferEvent::AckEmitted { acknowledged, total },
        });
    }

    fn send_ack_with_error(&self, peer_id: PeerId, file_id: Token, error_code: u8, cancel_transfer: bool) {
        let now = self.clock.now_ms();
        let ack = Ack::from_acknowledged(
            file_id,
            Token::random(),
            Token::from_str_truncated(self.local_peer_id.as_str()),
            &Default::default(),
            0,
            self.config.window_size,
            now,
            false,
            cancel_transfer,
            false,
            error_code,
        );
        let envelope = Envelope::new(
            MessageType::Ack,
            self.local_peer_id.clone(),
            Some(peer_id.clone()),
            now,
            ack.encode(),
        );
        self.transport.send(&envelope.encode(), &peer_id);
    }

    /// Move a receiver to history if it has reached a terminal state, and
    /// hand its reconstructed bytes to `sink` (spec.md §3: "a completed
    /// transfer's reconstructed byte output is handed to the collaborator
    /// layer as a byte span plus filename").
    pub fn finalize_receiver_into(&self, peer_id: PeerId, file_id: Token, sink: &dyn ByteSink) {
        let mut inner = self.inner.lock().unwrap();
        let key = (peer_id, file_id);
        if !inner
            .active_receivers
            .get(&key)
            .map(|r| r.record.status.is_terminal())
            .unwrap_or(false)
        {
            return;
        }
        let receiver = inner.active_receivers.remove(&key).unwrap();
        if matches!(receiver.record.status, TransferStatus::Completed) {
            let _ = sink.write(
                &receiver.record.manifest.file_name,
                receiver.record.manifest.mime_type.as_deref(),
                receiver.reconstructed(),
            );
        }
        Self::push_history(&mut inner, receiver.record.snapshot(), None);
    }

    fn finalize_receiver(&self, peer_id: PeerId, file_id: Token) {
        let mut inner = self.inner.lock().unwrap();
        let key = (peer_id, file_id);
        let terminal = inner
            .active_receivers
            .get(&key)
            .map(|r| r.record.status.is_terminal())
            .unwrap_or(false);
        if !terminal {
            return;
        }
        if let Some(receiver) = inner.active_receivers.remove(&key) {
            let snapshot = receiver.record.snapshot();
            drop(inner);
            self.publish(ManagerEvent::Terminal(snapshot.clone()));
            let mut inner = self.inner.lock().unwrap();
            Self::push_history(&mut inner, snapshot, None);
        }
    }

    fn finalize_sender(&self, file_id: Token) {
        let mut inner = self.inner.lock().unwrap();
        let Some(sender) = inner.active_senders.remove(&file_id) else {
            return;
        };
        let source = inner.sender_sources.remove(&file_id);
        let can_retry = matches!(
            &sender.record.status,
            TransferStatus::Failed { can_retry, .. } if *can_retry
        );
        let retry_source = if can_retry { source } else { None };
        Self::push_history(&mut inner, sender.record.snapshot(), retry_source);
        drop(inner);
        self.try_promote();
    }

    fn push_history(inner: &mut Inner, snapshot: TransferSnapshot, retry_source: Option<Arc<dyn ByteSource>>) {
        let can_retry = matches!(&snapshot.status, TransferStatus::Failed { can_retry, .. } if *can_retry);
        if inner.history.len() >= inner.history_capacity {
            inner.history.pop_front();
        }
        inner.history.push_back(HistoryEntry {
            snapshot,
            can_retry,
            retry_source,
        });
    }

    pub fn cancel(&self, file_id: Token) {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock().unwrap();

        if let Some(sender) = inner.active_senders.get_mut(&file_id) {
            sender.cancel();
            let peer_id = sender.record.peer_id.clone();
            let snapshot = sender.record.snapshot();
            drop(inner);
            self.send_ack_with_error(peer_id, file_id, 0, true);
            self.publish(ManagerEvent::Terminal(snapshot));
            self.finalize_sender(file_id);
            return;
        }

        let key = inner
            .active_receivers
            .keys()
            .find(|(_, fid)| *fid == file_id)
            .cloned();
        if let Some(key) = key {
            if let Some(receiver) = inner.active_receivers.get_mut(&key) {
                receiver.cancel();
                let ack = receiver.build_ack(
                    Token::from_str_truncated(self.local_peer_id.as_str()),
                    self.config.window_size,
                    now,
                );
                let peer_id = key.0.clone();
                drop(inner);
                let envelope = Envelope::new(
                    MessageType::Ack,
                    self.local_peer_id.clone(),
                    Some(peer_id.clone()),
                    now,
                    ack.encode(),
                );
                self.transport.send(&envelope.encode(), &peer_id);
                self.finalize_receiver(peer_id, file_id);
            }
        }
    }

    pub fn pause(&self, file_id: Token) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(sender) = inner.active_senders.get_mut(&file_id) {
            let at = sender.acknowledged().len() as u32;
            sender.record.status = TransferStatus::Paused { at };
        }
    }

    pub fn resume(&self, file_id: Token) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(sender) = inner.active_senders.get_mut(&file_id) {
            sender.resume();
        }
    }

    /// Re-enqueue a transfer from history, if it permits retry (spec.md
    /// §4.4).
    pub fn retry(&self, file_id: Token) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(pos) = inner.history.iter().position(|h| h.snapshot.file_id == file_id && h.can_retry) else {
            return false;
        };
        let entry = inner.history.remove(pos).unwrap();
        let Some(source) = entry.retry_source else {
            return false;
        };
        drop(inner);
        self.queue(
            source,
            entry.snapshot.peer_id,
            entry.snapshot.peer_nickname,
            entry.snapshot.priority,
        )
        .is_some()
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.inner.lock().unwrap().history.iter().cloned().collect()
    }

    pub fn active_snapshots(&self) -> Vec<TransferSnapshot> {
        let inner = self.inner.lock().unwrap();
        inner
            .active_senders
            .values()
            .map(|s| s.record.snapshot())
            .chain(inner.active_receivers.values().map(|r| r.record.snapshot()))
            .collect()
    }

    pub fn queued_snapshots(&self) -> Vec<Token> {
        self.inner.lock().unwrap().queued.iter().map(|q| q.file_id).collect()
    }

    /// One tick of the background timer: emit sendable chunks, retransmit
    /// expired ones, check stall/abandonment, and recompute global
    /// progress (spec.md §5).
    pub fn tick(&self, now_ms: u64) {
        let mut to_finalize_senders = Vec::new();
        let mut to_finalize_receivers = Vec::new();

        {
            let mut inner = self.inner.lock().unwrap();
            let local_peer_id = self.local_peer_id.clone();
            let transport = self.transport.clone();

            for (file_id, sender) in inner.active_senders.iter_mut() {
                // Paused suspends emission entirely (spec.md §4.3/§4.4:
                // "Paused -> Transferring on explicit resume") — no fresh
                // chunks, no retransmits, no stall checks while paused.
                if matches!(sender.record.status, TransferStatus::Paused { .. }) {
                    continue;
                }

                let peer_id = sender.record.peer_id.clone();

                while let Some(chunk) = sender.next_sendable() {
                    let envelope = Envelope::new(
                        MessageType::Chunk,
                        local_peer_id.clone(),
                        Some(peer_id.clone()),
                        now_ms,
                        chunk.encode(),
                    );
                    let index = chunk.chunk_index;
                    transport.send(&envelope.encode(), &peer_id);
                    sender.mark_sent(index, now_ms);
                }

                for chunk in sender.check_retransmits(now_ms) {
                    let envelope = Envelope::new(
                        MessageType::Chunk,
                        local_peer_id.clone(),
                        Some(peer_id.clone()),
                        now_ms,
                        chunk.encode(),
                    );
                    transport.send(&envelope.encode(), &peer_id);
                }
                sender.check_stall(now_ms);

                if sender.record.status.is_terminal() {
                    to_finalize_senders.push(*file_id);
                }
            }

            for ((peer_id, file_id), receiver) in inner.active_receivers.iter_mut() {
                receiver.check_abandonment(now_ms);
                // A `Completed` receiver is left in `active_receivers` on
                // purpose until `finalize_receiver_into` hands its bytes to
                // the collaborator — never auto-finalize it here, or the
                // reconstructed payload is lost the next tick after it
                // finishes. `check_abandonment` only ever produces `Failed`,
                // so this can't newly observe `Completed`.
                if receiver.record.status.is_terminal()
                    && !matches!(receiver.record.status, TransferStatus::Completed)
                {
                    to_finalize_receivers.push((peer_id.clone(), *file_id));
                }
            }

            self.publish_global_progress(&inner);
        }

        for file_id in to_finalize_senders {
            self.finalize_sender(file_id);
        }
        for (peer_id, file_id) in to_finalize_receivers {
            self.maybe_emit_ack_for(peer_id.clone(), file_id, now_ms);
            self.finalize_receiver(peer_id, file_id);
        }
    }

    /// Run `tick` in a loop on the calling thread until `stop_background`
    /// is called — the manager's single background timer thread (spec.md
    /// §5: "a timer source for retransmission and ACK pacing").
    pub fn run_background_loop(&self) {
        while !self.stop.load(Ordering::Relaxed) {
            self.tick(self.clock.now_ms());
            std::thread::sleep(std::time::Duration::from_millis(MANAGER_TICK_MS));
        }
    }

    pub fn stop_background(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn reason_str(reason: crate::transfer::receiver::RejectReason) -> &'static str {
    use crate::transfer::receiver::RejectReason::*;
    match reason {
        UnknownTransfer => "unknown_transfer",
        IndexOutOfRange => "index_out_of_range",
        LengthMismatch => "length_mismatch",
        IntegrityFailure => "integrity_failure",
        DecompressionFailure => "decompression_failure",
    }
}
