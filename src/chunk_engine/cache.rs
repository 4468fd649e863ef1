//! Bounded LRU chunk cache (spec.md §4.2). Shared across every transfer;
//! never authoritative — used for retransmit serving on the sender and
//! speculative prefetch on the receiver. The eviction bookkeeping mirrors
//! the sender-side retransmit cache's `cache`/`cache_order` pair (a map
//! plus a separate recency-ordered `Vec` of keys, trimmed from the front),
//! generalized here to also refresh recency on `get`.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::constants::{CACHE_CAPACITY, CACHE_PRESSURE_FRACTION};

struct Inner {
    map: HashMap<String, Vec<u8>>,
    /// Keys ordered from least to most recently used. The front is always
    /// the next eviction candidate.
    order: Vec<String>,
    capacity: usize,
}

impl Inner {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos);
            self.order.push(k);
        }
    }

    fn evict_to_capacity(&mut self) {
        while self.map.len() > self.capacity && !self.order.is_empty() {
            let oldest = self.order.remove(0);
            self.map.remove(&oldest);
        }
    }
}

/// `put`/`get`/`clear`/`stats` all serialize on a single mutex, held only
/// for the duration of the call (spec.md §5: "never hold the cache lock
/// across a network emission").
pub struct ChunkCache {
    inner: Mutex<Inner>,
}

impl ChunkCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: Vec::new(),
                capacity,
            }),
        }
    }

    /// Conventional key for a cache entry: `"{file_id}_{chunk_index}"`.
    pub fn key(file_id: &str, chunk_index: u32) -> String {
        format!("{file_id}_{chunk_index}")
    }

    pub fn put(&self, key: String, bytes: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.map.insert(key.clone(), bytes).is_some() {
            inner.touch(&key);
        } else {
            inner.order.push(key);
        }
        inner.evict_to_capacity();
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        let found = inner.map.get(key).cloned();
        if found.is_some() {
            inner.touch(key);
        }
        found
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.map.clear();
        inner.order.clear();
    }

    /// `(size, capacity)`.
    pub fn stats(&self) -> (usize, usize) {
        let inner = self.inner.lock().unwrap();
        (inner.map.len(), inner.capacity)
    }

    /// Clear the cache under memory pressure.
    pub fn handle_memory_pressure(&self) {
        self.clear();
    }

    pub fn is_under_pressure(&self) -> bool {
        let (size, capacity) = self.stats();
        size as f64 >= CACHE_PRESSURE_FRACTION * capacity as f64
    }
}

impl Default for ChunkCache {
    fn default() -> Self {
        Self::new(CACHE_CAPACITY)
    }
}
