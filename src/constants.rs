//! Canonical protocol constants (spec.md §6). These are the wire-level
//! defaults; `ManagerConfig` (see `manager.rs`) lets a caller override the
//! tunable ones without touching the wire format itself.

/// Default chunk size before adaptive sizing is applied.
pub const CHUNK_SIZE: usize = 480;

/// Envelope TTL the core initializes; relays (external) decrement it.
pub const MAX_HOPS: u8 = 7;

/// Maximum number of transfers in a non-terminal state at once.
pub const MAX_ACTIVE_TRANSFERS: usize = 3;

/// Suggested sender window, in unacknowledged chunks.
pub const WINDOW_SIZE_DEFAULT: u16 = 10;

/// Per-chunk retransmit timeout.
pub const RETX_TIMEOUT_MS: u64 = 3_000;

/// Per-transfer stall timeout (sender side, no ACK while chunks in flight).
pub const STALL_TIMEOUT_MS: u64 = 30_000;

/// Receiver abandonment timeout (no CHUNK while incomplete).
pub const ABANDON_TIMEOUT_MS: u64 = 60_000;

/// Receiver ACK coalescing: emit after this many newly accepted chunks.
pub const ACK_COALESCE_CHUNKS: u32 = 16;

/// Receiver ACK coalescing: emit after this many milliseconds since last ACK.
pub const ACK_COALESCE_MS: u64 = 500;

/// Sender gives up on a chunk after this many retransmit attempts.
pub const MAX_RETRIES_PER_CHUNK: u8 = 5;

/// Chunks larger than this are candidates for compression.
pub const COMPRESSION_THRESHOLD_BYTES: usize = 10_240;

/// Minimum percentage size reduction required to keep a compressed chunk.
pub const COMPRESSION_MIN_SAVINGS_PCT: u8 = 10;

/// Default LRU chunk cache capacity, in entries.
pub const CACHE_CAPACITY: usize = 50;

/// Fraction of capacity at which the cache reports memory pressure.
pub const CACHE_PRESSURE_FRACTION: f64 = 0.9;

/// Worker pool size used by the chunk engine for per-chunk hashing/compression.
pub const CONCURRENT_CHUNK_WORKERS: usize = 10;

/// Number of chunks processed per parallel batch.
pub const CHUNK_BATCH_SIZE: usize = 10;

/// Yield between batches, giving other work a chance to run.
pub const BATCH_YIELD: std::time::Duration = std::time::Duration::from_millis(1);

/// Bounded history ring size (spec.md §7).
pub const HISTORY_CAPACITY: usize = 100;

/// Fixed width of `file_id` / `ack_id` / peer-id wire fields, in bytes.
pub const TOKEN_LEN: usize = 16;

/// Tick interval for the manager's retransmit/ACK-pacing background thread.
pub const MANAGER_TICK_MS: u64 = 100;
