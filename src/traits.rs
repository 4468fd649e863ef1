//! Capability interfaces the core consumes from its collaborators
//! (spec.md §6). These are deliberately small: the core never assumes a
//! specific transport, clock, or storage backend.

use crate::peer::PeerId;

/// Fire-and-forget envelope transport. No delivery guarantee.
pub trait Transport: Send + Sync {
    fn send(&self, envelope_bytes: &[u8], to: &PeerId);
}

/// Wall-clock source, injected so tests can control time.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Random-access read over a byte range. The engine never materializes the
/// whole file unless the source chooses to.
pub trait ByteSource: Send + Sync {
    fn len(&self) -> u64;
    fn read_range(&self, offset: u64, len: usize) -> std::io::Result<Vec<u8>>;
}

/// Sink for a completed receive: reconstructed bytes plus filename and MIME
/// type.
pub trait ByteSink: Send + Sync {
    fn write(&self, file_name: &str, mime_type: Option<&str>, bytes: &[u8]) -> std::io::Result<()>;
}

/// `ByteSource` backed by an in-memory buffer. Useful for tests and for
/// small files where eager materialization is cheap.
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl ByteSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_range(&self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
        let start = offset as usize;
        let end = (start + len).min(self.data.len());
        Ok(self.data[start.min(end)..end].to_vec())
    }
}

/// `ByteSink` that collects the reconstructed file into memory. Useful for
/// tests and for callers that want the bytes handed back directly.
pub struct MemorySink {
    pub inner: std::sync::Mutex<Option<(String, Option<String>, Vec<u8>)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            inner: std::sync::Mutex::new(None),
        }
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteSink for MemorySink {
    fn write(&self, file_name: &str, mime_type: Option<&str>, bytes: &[u8]) -> std::io::Result<()> {
        *self.inner.lock().unwrap() = Some((file_name.to_string(), mime_type.map(str::to_string), bytes.to_vec()));
        Ok(())
    }
}

/// `Clock` backed by `SystemTime`.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}
