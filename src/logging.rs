//! Structured transfer logging, generalized from the teacher's
//! `TransferLogger`/`TracingLogger`/`NullLogger` split: lifecycle events go
//! through `tracing::info!`, per-chunk churn through `tracing::debug!`.

use std::fmt;

use crate::peer::Token;

/// One structured log entry for a transfer.
#[derive(Debug, Clone)]
pub struct TransferLog {
    pub component: &'static str,
    pub file_id: Token,
    pub event: TransferEvent,
}

/// Events worth logging over the lifetime of a transfer.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    ManifestSent { total_chunks: u32 },
    ManifestReceived { total_chunks: u32 },
    ChunkSent { chunk_index: u32, retry_count: u8 },
    ChunkAccepted { chunk_index: u32 },
    ChunkRejected { chunk_index: u32, reason: &'static str },
    AckEmitted { acknowledged: u32, total: u32 },
    AckReceived { acknowledged: u32, total: u32 },
    Retransmit { chunk_index: u32, retry_count: u8 },
    StateChanged { from: &'static str, to: &'static str },
    TransferComplete { duration_ms: u64 },
    Error { message: String },
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ManifestSent { total_chunks } => {
                write!(f, "manifest_sent total_chunks={total_chunks}")
            }
            Self::ManifestReceived { total_chunks } => {
                write!(f, "manifest_received total_chunks={total_chunks}")
            }
            Self::ChunkSent { chunk_index, retry_count } => {
                write!(f, "chunk_sent index={chunk_index} retry={retry_count}")
            }
            Self::ChunkAccepted { chunk_index } => {
                write!(f, "chunk_accepted index={chunk_index}")
            }
            Self::ChunkRejected { chunk_index, reason } => {
                write!(f, "chunk_rejected index={chunk_index} reason={reason}")
            }
            Self::AckEmitted { acknowledged, total } => {
                write!(f, "ack_emitted acknowledged={acknowledged} total={total}")
            }
            Self::AckReceived { acknowledged, total } => {
                write!(f, "ack_received acknowledged={acknowledged} total={total}")
            }
            Self::Retransmit { chunk_index, retry_count } => {
                write!(f, "retransmit index={chunk_index} retry={retry_count}")
            }
            Self::StateChanged { from, to } => {
                write!(f, "state_changed from={from} to={to}")
            }
            Self::TransferComplete { duration_ms } => {
                write!(f, "transfer_complete duration_ms={duration_ms}")
            }
            Self::Error { message } => write!(f, "error: {message}"),
        }
    }
}

/// Implementations can forward to `tracing`, a remote collector, or discard.
pub trait TransferLogger: Send + Sync {
    fn log(&self, entry: TransferLog);
}

/// Logger backed by `tracing`. Lifecycle events (manifests, state changes,
/// completion, errors) log at `info`; per-chunk and per-ACK churn logs at
/// `debug` to avoid drowning out the former on a busy mesh.
pub struct TracingLogger;

impl TransferLogger for TracingLogger {
    fn log(&self, entry: TransferLog) {
        let file_id = entry.file_id.as_trimmed_str();
        match &entry.event {
            TransferEvent::ManifestSent { .. }
            | TransferEvent::ManifestReceived { .. }
            | TransferEvent::StateChanged { .. }
            | TransferEvent::TransferComplete { .. }
            | TransferEvent::Error { .. } => {
                tracing::info!(
                    component = entry.component,
                    file_id = %file_id,
                    "{}",
                    entry.event,
                );
            }
            _ => {
                tracing::debug!(
                    component = entry.component,
                    file_id = %file_id,
                    "{}",
                    entry.event,
                );
            }
        }
    }
}

/// Discards every entry. Used where a caller has no interest in transfer
/// telemetry (e.g. unit tests exercising state transitions directly).
pub struct NullLogger;

impl TransferLogger for NullLogger {
    fn log(&self, _entry: TransferLog) {}
}
