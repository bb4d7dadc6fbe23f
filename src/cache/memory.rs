//! Short-TTL in-process cache.
//!
//! Entries carry their write epoch; expiry is lazy: an expired entry is
//! treated as absent on read, never proactively evicted. The LRU bound keeps
//! long sessions from accumulating entries for every chat ever opened.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::utils::now_ms;

const DEFAULT_CAPACITY: usize = 64;

/// A cached value plus its write epoch.
#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    written_at_ms: i64,
}

/// TTL cache over an LRU-bounded map. Reads honoring the TTL, writes always
/// replace the whole value for a key (no partial patching).
pub struct MemoryCache<T> {
    entries: Mutex<LruCache<String, CacheEntry<T>>>,
    ttl_ms: i64,
}

impl<T: Clone> MemoryCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to >= 1");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl_ms: ttl.as_millis() as i64,
        }
    }

    /// Read a value, honoring the TTL against the wall clock.
    pub fn get(&self, key: &str) -> Option<T> {
        self.get_at(key, now_ms())
    }

    /// Read a value, honoring the TTL against the supplied epoch. Time is a
    /// parameter so TTL boundaries are testable without sleeping.
    pub(crate) fn get_at(&self, key: &str, now_ms: i64) -> Option<T> {
        let Ok(mut entries) = self.entries.lock() else {
            return None;
        };
        let entry = entries.get(key)?;
        if now_ms - entry.written_at_ms < self.ttl_ms {
            Some(entry.value.clone())
        } else {
            debug!("Cache entry '{}' expired, treating as absent", key);
            None
        }
    }

    pub fn insert(&self, key: impl Into<String>, value: T) {
        self.insert_at(key, value, now_ms());
    }

    pub(crate) fn insert_at(&self, key: impl Into<String>, value: T, now_ms: i64) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.put(
                key.into(),
                CacheEntry {
                    value,
                    written_at_ms: now_ms,
                },
            );
        }
    }

    pub fn invalidate(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.pop(key);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}
