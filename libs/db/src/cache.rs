//! Bounded latest-version cache.
//!
//! Maps package name to the latest version string the writer has committed.
//! The cache is consulted before the store on every write; it is populated
//! only from committed writes (never from query-time reads, which could
//! capture a pointer mid-flight) and evicts by recency.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

/// Configuration for the latest-version cache.
#[derive(Debug, Clone)]
pub struct LatestCacheConfig {
    /// Maximum number of (name → version) entries.
    pub capacity: usize,

    /// Number of latest-version pointers to load from the store when the
    /// database opens. Zero disables prewarming.
    pub prewarm_limit: usize,
}

impl Default for LatestCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            prewarm_limit: 0,
        }
    }
}

/// Process-wide name → latest-version mapping with LRU eviction.
///
/// Interior mutability behind a `Mutex` keeps the handle shareable from the
/// processor; a lookup refreshes the entry's recency.
#[derive(Debug)]
pub struct LatestVersionCache {
    inner: Mutex<LruCache<String, String>>,
}

impl LatestVersionCache {
    pub fn new(config: &LatestCacheConfig) -> Self {
        Self::with_capacity(config.capacity)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Look up the cached latest version, refreshing recency on hit.
    pub fn get(&self, name: &str) -> Option<String> {
        let mut guard = self.inner.lock().ok()?;
        guard.get(name).cloned()
    }

    /// Record a committed latest version.
    pub fn insert(&self, name: String, version: String) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.put(name, version);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
