//! Bounded cache of files retrieved from a backend.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use lru::LruCache;
use tracing::debug;

use crate::config::CacheConfig;

type CacheKey = (String, String);

struct CacheState {
    entries: LruCache<CacheKey, Arc<[u8]>>,
    bytes: usize,
    hits: u64,
    misses: u64,
}

/// Hit and miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that went to the backend.
    pub misses: u64,
    /// Cached files.
    pub entries: usize,
    /// Cached bytes.
    pub bytes: usize,
}

/// LRU cache keyed by `(entity_id, path)`, bounded by entry count and total
/// bytes, whichever is reached first.
pub struct FileCache {
    state: Mutex<CacheState>,
    max_bytes: usize,
}

impl std::fmt::Debug for FileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCache")
            .field("max_bytes", &self.max_bytes)
            .field("stats", &self.stats())
            .finish()
    }
}

impl FileCache {
    /// Cache with the given bounds.
    pub fn new(config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                bytes: 0,
                hits: 0,
                misses: 0,
            }),
            max_bytes: config.max_bytes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cached content of `path` for `entity_id`.
    pub fn get(&self, entity_id: &str, path: &str) -> Option<Arc<[u8]>> {
        let mut state = self.lock();
        let key = (entity_id.to_string(), path.to_string());
        match state.entries.get(&key).cloned() {
            Some(bytes) => {
                state.hits += 1;
                Some(bytes)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// Stores content. Files larger than the byte bound are not cached.
    pub fn insert(&self, entity_id: &str, path: &str, content: Arc<[u8]>) {
        if content.len() > self.max_bytes {
            return;
        }
        let mut state = self.lock();
        state.bytes += content.len();
        if let Some((_, evicted)) = state
            .entries
            .push((entity_id.to_string(), path.to_string()), content)
        {
            state.bytes -= evicted.len();
        }
        while state.bytes > self.max_bytes {
            match state.entries.pop_lru() {
                Some((_, evicted)) => state.bytes -= evicted.len(),
                None => break,
            }
        }
    }

    /// Drops every entry of `entity_id`.
    pub fn invalidate(&self, entity_id: &str) {
        let mut state = self.lock();
        let keys: Vec<CacheKey> = state
            .entries
            .iter()
            .filter(|((id, _), _)| id == entity_id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            if let Some(evicted) = state.entries.pop(key) {
                state.bytes -= evicted.len();
            }
        }
        if !keys.is_empty() {
            debug!(entity = entity_id, dropped = keys.len(), "file cache invalidated");
        }
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            entries: state.entries.len(),
            bytes: state.bytes,
        }
    }
}
