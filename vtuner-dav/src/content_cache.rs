//! Partial content cache
//!
//! Keeps the first N bytes of recently streamed files so directory browsing
//! and media probes (which routinely open a file, read a header and close it)
//! do not hit the upstream every time. LRU within a total byte budget.

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;

pub struct ContentCache {
    /// Bytes cached per file (the "first N bytes").
    entry_limit: usize,
    /// Total byte budget across entries.
    budget: usize,
    inner: Mutex<Inner>,
}

struct Inner {
    lru: LruCache<String, Bytes>,
    total: usize,
}

impl ContentCache {
    #[must_use]
    pub fn new(entry_limit: usize, budget: usize) -> Self {
        Self {
            entry_limit,
            budget,
            inner: Mutex::new(Inner {
                lru: LruCache::unbounded(),
                total: 0,
            }),
        }
    }

    #[must_use]
    pub const fn entry_limit(&self) -> usize {
        self.entry_limit
    }

    /// Cached prefix for a URL, refreshing its recency.
    #[must_use]
    pub fn get(&self, url: &str) -> Option<Bytes> {
        self.inner.lock().lru.get(url).cloned()
    }

    /// Store a file prefix, truncated to the entry limit. Oldest entries are
    /// evicted until the budget holds.
    pub fn insert(&self, url: &str, prefix: Bytes) {
        let prefix = if prefix.len() > self.entry_limit {
            prefix.slice(..self.entry_limit)
        } else {
            prefix
        };

        let mut inner = self.inner.lock();
        if let Some(old) = inner.lru.put(url.to_string(), prefix.clone()) {
            inner.total -= old.len();
        }
        inner.total += prefix.len();
        while inner.total > self.budget {
            match inner.lru.pop_lru() {
                Some((_, evicted)) => inner.total -= evicted.len(),
                None => break,
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().lru.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().lru.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_and_truncate() {
        let cache = ContentCache::new(4, 1024);
        cache.insert("u1", Bytes::from_static(b"abcdefgh"));
        assert_eq!(cache.get("u1").unwrap().as_ref(), b"abcd");
        assert!(cache.get("u2").is_none());
    }

    #[test]
    fn test_budget_evicts_lru() {
        let cache = ContentCache::new(10, 20);
        cache.insert("a", Bytes::from_static(b"0123456789"));
        cache.insert("b", Bytes::from_static(b"0123456789"));
        // Touch "a" so "b" is the eviction candidate.
        let _ = cache.get("a");
        cache.insert("c", Bytes::from_static(b"0123456789"));

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_replacing_entry_adjusts_budget() {
        let cache = ContentCache::new(10, 20);
        cache.insert("a", Bytes::from_static(b"0123456789"));
        cache.insert("a", Bytes::from_static(b"01234"));
        cache.insert("b", Bytes::from_static(b"0123456789"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_some());
    }
}
