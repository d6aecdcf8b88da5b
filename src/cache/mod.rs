//! Audio cache.
//!
//! Generated clips are stored by [`Fingerprint`] in one of two bounded
//! backends, chosen once per configuration:
//!
//! - [`MemoryCache`]: in-process map, evicts the oldest *inserted* clip
//!   when full. Access does not refresh an entry; this is insertion-order
//!   eviction, not LRU.
//! - [`FileCache`]: one `{fingerprint}.wav` per clip under a directory,
//!   evicts the files with the oldest modification time.
//!
//! Both backends fail open: an unreadable entry is a miss and a failed write
//! is logged and skipped, so a broken disk never fails a synthesis request.
//! File operations are blocking; callers should not assume sub-millisecond
//! latency from the file backend.

pub mod file;
pub mod memory;

use bytes::Bytes;

pub use file::FileCache;
pub use memory::MemoryCache;

use crate::config::{CacheConfig, CacheKind};
use crate::fingerprint::Fingerprint;

/// A configured audio cache backend.
#[derive(Debug)]
pub enum AudioCache {
    Memory(MemoryCache),
    File(FileCache),
}

impl AudioCache {
    /// Build the backend selected by `config.kind`.
    ///
    /// The file backend (re)creates its directory here, so pointing the
    /// cache at a deleted directory heals on the next reconfiguration.
    pub fn from_config(config: &CacheConfig) -> Self {
        match config.kind {
            CacheKind::Memory => AudioCache::Memory(MemoryCache::new(config.max_entries)),
            CacheKind::File => {
                AudioCache::File(FileCache::new(&config.directory, config.max_entries))
            }
        }
    }

    /// Look up a clip. Returns `None` on miss or on read failure.
    pub fn get(&self, key: &Fingerprint) -> Option<Bytes> {
        match self {
            AudioCache::Memory(cache) => cache.get(key),
            AudioCache::File(cache) => cache.get(key),
        }
    }

    /// Store a clip, evicting the oldest entries if the cache is full.
    pub fn put(&self, key: Fingerprint, audio: Bytes) {
        match self {
            AudioCache::Memory(cache) => cache.put(key, audio),
            AudioCache::File(cache) => cache.put(&key, &audio),
        }
    }

    /// Remove every cached clip.
    pub fn clear(&self) {
        match self {
            AudioCache::Memory(cache) => cache.clear(),
            AudioCache::File(cache) => cache.clear(),
        }
    }

    /// Number of cached clips.
    pub fn len(&self) -> usize {
        match self {
            AudioCache::Memory(cache) => cache.len(),
            AudioCache::File(cache) => cache.len(),
        }
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
