//! Bounded in-memory audio cache with insertion-order eviction.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;

use crate::fingerprint::Fingerprint;

#[derive(Debug, Default)]
struct Entries {
    clips: HashMap<Fingerprint, Bytes>,
    /// Keys in insertion order; front is the oldest.
    order: VecDeque<Fingerprint>,
}

/// Thread-safe in-memory clip store.
///
/// Holds at most `max_entries` clips. A capacity of zero disables caching.
#[derive(Debug)]
pub struct MemoryCache {
    entries: Mutex<Entries>,
    max_entries: usize,
}

impl MemoryCache {
    /// Create an empty cache holding at most `max_entries` clips.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            max_entries,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Look up a clip. Does not affect eviction order.
    pub fn get(&self, key: &Fingerprint) -> Option<Bytes> {
        self.lock().clips.get(key).cloned()
    }

    /// Insert a clip, first evicting the oldest inserted clips while full.
    ///
    /// Re-inserting an existing key keeps the stored clip and its position.
    pub fn put(&self, key: Fingerprint, audio: Bytes) {
        if self.max_entries == 0 {
            return;
        }
        let mut entries = self.lock();
        if entries.clips.contains_key(&key) {
            return;
        }
        while entries.clips.len() >= self.max_entries {
            let Some(oldest) = entries.order.pop_front() else {
                break;
            };
            entries.clips.remove(&oldest);
        }
        entries.clips.insert(key, audio);
        entries.order.push_back(key);
    }

    /// Evict everything.
    pub fn clear(&self) {
        let mut entries = self.lock();
        entries.clips.clear();
        entries.order.clear();
    }

    /// Number of cached clips.
    pub fn len(&self) -> usize {
        self.lock().clips.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(text: &str) -> Fingerprint {
        Fingerprint::new("v", "s", text)
    }

    #[test]
    fn miss_then_hit() {
        let cache = MemoryCache::new(4);
        assert!(cache.get(&fp("a")).is_none());
        cache.put(fp("a"), Bytes::from_static(b"aa"));
        assert_eq!(cache.get(&fp("a")).unwrap(), Bytes::from_static(b"aa"));
    }

    #[test]
    fn evicts_oldest_insertion_not_least_recently_used() {
        let cache = MemoryCache::new(2);
        cache.put(fp("a"), Bytes::from_static(b"a"));
        cache.put(fp("b"), Bytes::from_static(b"b"));
        // Reading "a" does not protect it.
        assert!(cache.get(&fp("a")).is_some());
        cache.put(fp("c"), Bytes::from_static(b"c"));

        assert!(cache.get(&fp("a")).is_none());
        assert!(cache.get(&fp("b")).is_some());
        assert!(cache.get(&fp("c")).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn reinsert_keeps_first_value() {
        let cache = MemoryCache::new(2);
        cache.put(fp("a"), Bytes::from_static(b"first"));
        cache.put(fp("a"), Bytes::from_static(b"second"));
        assert_eq!(cache.get(&fp("a")).unwrap(), Bytes::from_static(b"first"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn zero_capacity_disables_caching() {
        let cache = MemoryCache::new(0);
        cache.put(fp("a"), Bytes::from_static(b"a"));
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_empties() {
        let cache = MemoryCache::new(3);
        cache.put(fp("a"), Bytes::from_static(b"a"));
        cache.put(fp("b"), Bytes::from_static(b"b"));
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get(&fp("a")).is_none());
    }
}
