//! Bounded in-process cache of ranked results.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use tracing::warn;

use rag_core::{RetrievalConfig, SearchResults};

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, SearchResults>,
    order: VecDeque<String>,
}

/// Query results keyed by the normalized query and the resolved
/// [`RetrievalConfig`], evicted oldest-first.
pub struct QueryCache {
    capacity: usize,
    inner: RwLock<CacheInner>,
}

impl QueryCache {
    /// Create a cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: RwLock::new(CacheInner::default()),
        }
    }

    /// Cache key: blake3 digest of the normalized query and the config.
    pub fn key(normalized_query: &str, config: &RetrievalConfig) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(normalized_query.as_bytes());
        hasher.update(&[0]);
        match serde_json::to_vec(config) {
            Ok(bytes) => {
                hasher.update(&bytes);
            }
            Err(e) => warn!("Failed to serialize retrieval config for cache key: {}", e),
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Look up a cached result.
    pub fn get(&self, key: &str) -> Option<SearchResults> {
        let inner = self.inner.read().ok()?;
        inner.entries.get(key).cloned()
    }

    /// Store a result, evicting the oldest entry when full.
    pub fn put(&self, key: String, results: SearchResults) {
        if self.capacity == 0 {
            return;
        }
        let Ok(mut inner) = self.inner.write() else {
            warn!("Query cache lock poisoned; skipping insert");
            return;
        };

        if inner.entries.insert(key.clone(), results).is_none() {
            inner.order.push_back(key);
        }
        while inner.entries.len() > self.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.entries.remove(&oldest);
        }
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.inner.read().map(|i| i.entries.len()).unwrap_or(0)
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
