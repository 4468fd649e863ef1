//! Splitting byte sources into CHUNKs, reassembling them, and the shared
//! LRU retransmit/prefetch cache (spec.md §4.2).

pub mod cache;
pub mod compression;
pub mod engine;

pub use cache::ChunkCache;
pub use engine::{adaptive_chunk_size, total_chunks, ChunkEngine};
