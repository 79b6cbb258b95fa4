//! Query -> ranked-results cache.
//!
//! Keyed by normalized query string plus a digest of the filter, so two
//! semantically identical requests with different filters don't collide.
//! Entries expire by TTL (checked lazily on lookup, matching the spec's
//! "default 10 min") and are bounded by an LRU capacity on entry count.

use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::hybrid::HybridHit;

const DEFAULT_CAPACITY: usize = 512;
const DEFAULT_TTL: Duration = Duration::from_secs(600);

struct Entry {
    hits: Vec<HybridHit>,
    inserted_at: Instant,
}

pub struct SemanticCache {
    state: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
}

impl SemanticCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = std::num::NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            state: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Builds the cache key: normalized query text + a short digest of the
    /// filter payload, so `query="foo", filter=None` and
    /// `query="foo", filter={lang:"rust"}` land in different slots.
    pub fn key(query: &str, filter_digest: &str) -> String {
        let normalized = query.trim().to_lowercase();
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hasher.update(filter_digest.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<Vec<HybridHit>> {
        let mut state = self.state.lock();
        let expired = state.peek(key).map(|e| e.inserted_at.elapsed() > self.ttl).unwrap_or(false);
        if expired {
            state.pop(key);
            return None;
        }
        state.get(key).map(|e| e.hits.clone())
    }

    pub fn put(&self, key: String, hits: Vec<HybridHit>) {
        let mut state = self.state.lock();
        state.put(
            key,
            Entry {
                hits,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.state.lock().clear();
    }
}

impl Default for SemanticCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hybrid::HybridHit;

    fn hit(entity_id: &str) -> HybridHit {
        HybridHit {
            entity_id: entity_id.to_string(),
            semantic_score: 0.9,
            structural_boost: 0.0,
            final_score: 0.9,
            path: "a.rs".to_string(),
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let cache = SemanticCache::new(8, Duration::from_secs(60));
        let key = SemanticCache::key("how are errors handled", "{}");
        cache.put(key.clone(), vec![hit("a")]);
        let hits = cache.get(&key).unwrap();
        assert_eq!(hits[0].entity_id, "a");
    }

    #[test]
    fn different_filter_digest_is_a_different_key() {
        let a = SemanticCache::key("foo", "{}");
        let b = SemanticCache::key("foo", "{\"language\":\"rust\"}");
        assert_ne!(a, b);
    }

    #[test]
    fn expired_entry_is_evicted_on_lookup() {
        let cache = SemanticCache::new(8, Duration::from_millis(1));
        let key = SemanticCache::key("foo", "{}");
        cache.put(key.clone(), vec![hit("a")]);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }
}
