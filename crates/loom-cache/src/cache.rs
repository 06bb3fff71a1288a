use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use crate::key::cache_key;

pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub hit_rate: f64,
}

struct CacheState<V> {
    entries: LruCache<String, V>,
    hits: u64,
    misses: u64,
}

/// Keyed LRU, shared by every mode-compiled workflow plan. Generic over
/// the cached value so the crate carries no dependency on the concrete
/// `Workflow` type built elsewhere — `loom-orchestrator` instantiates it
/// as `WorkflowCache<Arc<Workflow>>`.
///
/// `lru::LruCache` already evicts the least-recently-used entry and bumps
/// recency on `get`, which is exactly "remove the entry with minimum
/// access_time" / "update access_time to now on hit" — we only layer hit
/// and miss counters on top, both behind the same mutex as the map so the
/// whole operation is atomic.
pub struct WorkflowCache<V> {
    state: Mutex<CacheState<V>>,
}

impl<V: Clone> WorkflowCache<V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity must be nonzero");
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
            }),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    #[instrument(skip(self))]
    pub fn get(&self, key: &str) -> Option<V> {
        let mut state = self.state.lock().expect("workflow cache poisoned");
        match state.entries.get(key) {
            Some(value) => {
                let value = value.clone();
                state.hits += 1;
                Some(value)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    #[instrument(skip(self, value))]
    pub fn put(&self, key: String, value: V) {
        let mut state = self.state.lock().expect("workflow cache poisoned");
        state.entries.put(key, value);
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().expect("workflow cache poisoned");
        state.entries.clear();
        state.hits = 0;
        state.misses = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock().expect("workflow cache poisoned");
        let total = state.hits + state.misses;
        let hit_rate = if total == 0 { 0.0 } else { state.hits as f64 / total as f64 };
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            size: state.entries.len(),
            hit_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("workflow cache poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Convenience wrapper binding `WorkflowCache` to the (provider, mode,
/// config) key derivation so callers never hand-roll the digest.
pub struct KeyedWorkflowCache<V> {
    cache: WorkflowCache<V>,
}

impl<V: Clone> KeyedWorkflowCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self { cache: WorkflowCache::new(capacity) }
    }

    pub fn with_default_capacity() -> Self {
        Self { cache: WorkflowCache::with_default_capacity() }
    }

    pub fn get(&self, provider: &str, mode: &str, config: &Value) -> Option<V> {
        self.cache.get(&cache_key(provider, mode, config))
    }

    pub fn put(&self, provider: &str, mode: &str, config: &Value, value: V) {
        self.cache.put(cache_key(provider, mode, config), value);
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
