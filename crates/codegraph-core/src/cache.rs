//! Content-hash keyed cache of parse results.
//!
//! Keyed by the file's own content hash rather than its path, so a file that
//! reverts to previously-seen content (a common case when toggling feature
//! branches or after `git stash pop`) still hits. Thread-safe via
//! `parking_lot::Mutex` so it can be shared across the rayon pool that does
//! the actual parsing.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::model::ParseResult;

const DEFAULT_CAPACITY: usize = 4096;

/// Hit/miss counters for observability; exposed via `get_metrics`-style tool
/// calls upstream.
#[derive(Debug, Clone, Default)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct State {
    entries: LruCache<String, ParseResult>,
    metrics: CacheMetrics,
}

/// LRU cache of `content_hash -> ParseResult`.
pub struct ParseCache {
    state: Mutex<State>,
}

impl ParseCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            state: Mutex::new(State {
                entries: LruCache::new(capacity),
                metrics: CacheMetrics::default(),
            }),
        }
    }

    /// Look up a previously parsed result by content hash. Marks the
    /// returned result `from_cache = true`.
    pub fn get(&self, content_hash: &str) -> Option<ParseResult> {
        let mut state = self.state.lock();
        let hit = state.entries.get(content_hash).cloned();
        match &hit {
            Some(_) => state.metrics.hits += 1,
            None => state.metrics.misses += 1,
        }
        hit.map(|mut r| {
            r.from_cache = true;
            r
        })
    }

    /// Insert (or refresh) a parse result under its own content hash.
    pub fn put(&self, result: ParseResult) {
        let mut state = self.state.lock();
        let hash = result.content_hash.clone();
        if state.entries.len() == state.entries.cap().get() && !state.entries.contains(&hash) {
            state.metrics.evictions += 1;
        }
        state.entries.put(hash, result);
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.state.lock().metrics.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
    }
}

impl Default for ParseCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(hash: &str) -> ParseResult {
        ParseResult {
            file_path: "src/lib.rs".into(),
            language: "rust".into(),
            content_hash: hash.into(),
            entities: Vec::new(),
            relationships: Vec::new(),
            parse_time_ms: 1,
            from_cache: false,
            errors: Vec::new(),
        }
    }

    #[test]
    fn put_then_get_is_a_hit_and_marks_from_cache() {
        let cache = ParseCache::new(8);
        cache.put(sample("abc123"));
        let hit = cache.get("abc123").expect("cache hit");
        assert!(hit.from_cache);
        assert_eq!(cache.metrics().hits, 1);
    }

    #[test]
    fn miss_is_counted() {
        let cache = ParseCache::new(8);
        assert!(cache.get("missing").is_none());
        assert_eq!(cache.metrics().misses, 1);
    }

    #[test]
    fn eviction_counted_when_capacity_exceeded() {
        let cache = ParseCache::new(1);
        cache.put(sample("first"));
        cache.put(sample("second"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.metrics().evictions, 1);
        assert!(cache.get("first").is_none());
        assert!(cache.get("second").is_some());
    }

    #[test]
    fn hit_rate_reflects_hits_over_total_lookups() {
        let cache = ParseCache::new(8);
        cache.put(sample("x"));
        cache.get("x");
        cache.get("y");
        assert!((cache.metrics().hit_rate() - 0.5).abs() < f64::EPSILON);
    }
}
