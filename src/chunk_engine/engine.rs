//! Adaptive chunk sizing and batch-parallel chunk production (spec.md
//! §4.2). The batch pipeline is a sync-threads generalization of the
//! teacher's reader→encryptor pipeline: rather than one long-lived encryptor
//! thread, chunks within a batch of up to `CHUNK_BATCH_SIZE` are computed
//! concurrently across a fixed pool of at most `CONCURRENT_CHUNK_WORKERS`
//! threads via `std::thread::scope`, and the engine yields briefly between
//! batches the way the source pacing loop does between sends.

use std::sync::Arc;

use crate::chunk_engine::cache::ChunkCache;
use crate::chunk_engine::compression::{compress_if_worthwhile, decompress};
use crate::codec::chunk::Chunk;
use crate::codec::manifest::CompressionType;
use crate::constants::{CHUNK_BATCH_SIZE, CHUNK_SIZE, CONCURRENT_CHUNK_WORKERS};
use crate::error::DecodeError;
use crate::peer::Token;
use crate::traits::{ByteSource, Clock};

/// Adaptive chunk size for a source of `file_size` bytes (spec.md §4.2).
pub fn adaptive_chunk_size(file_size: u64) -> usize {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;

    if file_size < 10 * KIB {
        (CHUNK_SIZE / 2).min(file_size.max(1) as usize)
    } else if file_size <= 10 * MIB {
        CHUNK_SIZE
    } else {
        (CHUNK_SIZE + 32).min(512)
    }
}

/// Number of chunks a source of `file_size` bytes splits into, given
/// `chunk_size`. `0` iff `file_size == 0` (spec.md §3 invariant).
pub fn total_chunks(file_size: u64, chunk_size: usize) -> u32 {
    if file_size == 0 {
        0
    } else {
        file_size.div_ceil(chunk_size as u64) as u32
    }
}

/// Splits byte sources into CHUNKs and reverses the compression step on
/// receipt. Shares a `ChunkCache` with the rest of the transfer stack so
/// chunks it produces are immediately available for retransmit serving.
pub struct ChunkEngine {
    cache: Arc<ChunkCache>,
}

impl ChunkEngine {
    pub fn new(cache: Arc<ChunkCache>) -> Self {
        Self { cache }
    }

    /// Produce every chunk for `source` under `file_id`, calling
    /// `progress_cb` with a fraction in `[0, 1]` after each batch.
    pub fn chunk_source(
        &self,
        file_id: &Token,
        source: &dyn ByteSource,
        compression: CompressionType,
        clock: &dyn Clock,
        mut progress_cb: impl FnMut(f32),
    ) -> Vec<Chunk> {
        let file_size = source.len();
        let chunk_size = adaptive_chunk_size(file_size);
        let n = total_chunks(file_size, chunk_size);
        if n == 0 {
            progress_cb(1.0);
            return Vec::new();
        }

        let mut chunks = Vec::with_capacity(n as usize);
        let mut batch_start = 0u32;

        while batch_start < n {
            let batch_end = (batch_start + CHUNK_BATCH_SIZE as u32).min(n);
            let now = clock.now_ms();

            // Bounded by `CONCURRENT_CHUNK_WORKERS`, not by the batch size:
            // a batch larger than the pool is split into near-equal, disjoint
            // index ranges so no more than `CONCURRENT_CHUNK_WORKERS` threads
            // are ever alive at once, the way the teacher's sender pipeline
            // keeps a fixed thread count regardless of how much work a given
            // run has to push through it.
            let batch_len = batch_end - batch_start;
            let worker_count = (CONCURRENT_CHUNK_WORKERS as u32).min(batch_len).max(1);

            let batch: Vec<Chunk> = std::thread::scope(|scope| {
                let handles: Vec<_> = (0..worker_count)
                    .map(|worker| {
                        let lo = batch_start + worker * batch_len / worker_count;
                        let hi = batch_start + (worker + 1) * batch_len / worker_count;
                        scope.spawn(move || {
                            (lo..hi)
                                .map(|index| {
                                    let offset = index as u64 * chunk_size as u64;
                                    let len = (chunk_size as u64).min(file_size - offset) as usize;
                                    let raw = source
                                        .read_range(offset, len)
                                        .expect("admission already validated source is readable");
                                    let (payload, compressed) =
                                        compress_if_worthwhile(&raw, compression);
                                    Chunk::new(
                                        *file_id,
                                        index,
                                        index,
                                        now,
                                        index == n - 1,
                                        compressed,
                                        0,
                                        payload,
                                    )
                                })
                                .collect::<Vec<Chunk>>()
                        })
                    })
                    .collect();
                let mut out: Vec<Chunk> = handles
                    .into_iter()
                    .flat_map(|h| h.join().unwrap())
                    .collect();
                out.sort_unstable_by_key(|c| c.chunk_index);
                out
            });

            for chunk in &batch {
                self.cache.put(
                    ChunkCache::key(&file_id.as_trimmed_str(), chunk.chunk_index),
                    chunk.payload.clone(),
                );
            }
            chunks.extend(batch);

            batch_start = batch_end;
            progress_cb(batch_start as f32 / n as f32);
            if batch_start < n {
                std::thread::sleep(crate::constants::BATCH_YIELD);
            }
        }

        chunks
    }

    /// Recover the original (post-decompression) bytes of an already
    /// MAC-verified chunk.
    pub fn decompress_chunk(&self, chunk: &Chunk) -> Result<Vec<u8>, DecodeError> {
        if chunk.compression_applied {
            decompress(&chunk.payload)
        } else {
            Ok(chunk.payload.clone())
        }
    }

    pub fn cache(&self) -> &Arc<ChunkCache> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{MemorySource, SystemClock};

    #[test]
    fn adaptive_size_brackets() {
        assert_eq!(adaptive_chunk_size(100), 100);
        assert_eq!(adaptive_chunk_size(5_000), 240);
        assert_eq!(adaptive_chunk_size(20_000), 480);
        assert_eq!(adaptive_chunk_size(5 * 1024 * 1024), 480);
        assert_eq!(adaptive_chunk_size(20 * 1024 * 1024), 512);
    }

    #[test]
    fn total_chunks_zero_iff_empty() {
        assert_eq!(total_chunks(0, 480), 0);
        assert_eq!(total_chunks(1, 480), 1);
        assert_eq!(total_chunks(960, 480), 2);
        assert_eq!(total_chunks(961, 480), 3);
    }

    #[test]
    fn chunk_source_reconstructs_exact_bytes() {
        let data: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
        let source = MemorySource::new(data.clone());
        let engine = ChunkEngine::new(Arc::new(ChunkCache::new(10)));
        let file_id = Token::from_str_truncated("engine-test-file");

        let mut last_progress = 0.0;
        let chunks = engine.chunk_source(
            &file_id,
            &source,
            CompressionType::None,
            &SystemClock,
            |p| last_progress = p,
        );

        assert_eq!(last_progress, 1.0);
        let n = total_chunks(data.len() as u64, adaptive_chunk_size(data.len() as u64));
        assert_eq!(chunks.len(), n as usize);

        let mut reassembled = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i as u32);
            assert!(chunk.verify_mac());
            reassembled.extend(engine.decompress_chunk(chunk).unwrap());
        }
        assert_eq!(reassembled, data);
        assert!(chunks.last().unwrap().is_last_chunk);
    }

    #[test]
    fn empty_source_produces_no_chunks() {
        let source = MemorySource::new(Vec::new());
        let engine = ChunkEngine::new(Arc::new(ChunkCache::new(10)));
        let chunks = engine.chunk_source(
            &Token::from_str_truncated("empty"),
            &source,
            CompressionType::None,
            &SystemClock,
            |_| {},
        );
        assert!(chunks.is_empty());
    }

    #[test]
    fn single_byte_source_is_one_last_chunk() {
        let source = MemorySource::new(vec![0x42]);
        let engine = ChunkEngine::new(Arc::new(ChunkCache::new(10)));
        let chunks = engine.chunk_source(
            &Token::from_str_truncated("one-byte"),
            &source,
            CompressionType::None,
            &SystemClock,
            |_| {},
        );
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_last_chunk);
        assert_eq!(chunks[0].payload, vec![0x42]);
    }
}
