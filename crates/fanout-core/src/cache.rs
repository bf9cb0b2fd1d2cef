//! Bounded least-recently-used cache with count and size limits.
//!
//! Call sites own or borrow a cache explicitly; nothing is memoized implicitly.

use serde::{Deserialize, Serialize};
use std::hash::Hash;

/// Limits applied after every insert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheLimits {
    /// Maximum number of entries
    pub max_count: Option<usize>,
    /// Maximum summed size as reported by the size function
    pub max_size: Option<usize>,
}

impl CacheLimits {
    pub fn count(max_count: usize) -> Self {
        CacheLimits {
            max_count: Some(max_count),
            max_size: None,
        }
    }

    pub fn size(max_size: usize) -> Self {
        CacheLimits {
            max_count: None,
            max_size: Some(max_size),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
    pub size: usize,
}

type SizeFn<V> = Box<dyn Fn(&V) -> usize + Send + Sync>;

pub struct LruCache<K: Hash + Eq, V> {
    entries: lru::LruCache<K, V>,
    limits: CacheLimits,
    size: usize,
    size_of: SizeFn<V>,
    hits: u64,
    misses: u64,
}

impl<K: Hash + Eq, V: 'static> LruCache<K, V> {
    /// Cache whose entries are sized by their in-memory footprint
    pub fn new(limits: CacheLimits) -> Self {
        Self::with_size_fn(limits, |v: &V| std::mem::size_of_val(v))
    }

    /// Cache with a custom size function (e.g. byte length of a buffer)
    pub fn with_size_fn(limits: CacheLimits, size_of: impl Fn(&V) -> usize + Send + Sync + 'static) -> Self {
        LruCache {
            entries: lru::LruCache::unbounded(),
            limits,
            size: 0,
            size_of: Box::new(size_of),
            hits: 0,
            misses: 0,
        }
    }

    /// Look up an entry, marking it most recently used
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains(key)
    }

    /// Insert or replace an entry, then evict until the limits hold
    pub fn insert(&mut self, key: K, value: V) {
        let added = (self.size_of)(&value);
        if let Some(old) = self.entries.put(key, value) {
            self.size -= (self.size_of)(&old);
        }
        self.size += added;
        self.enforce_limits();
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let value = self.entries.pop(key)?;
        self.size -= (self.size_of)(&value);
        Some(value)
    }

    /// Return the cached value or compute, store and return it
    pub fn get_or_try_insert_with<E>(
        &mut self,
        key: K,
        compute: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E>
    where
        V: Clone,
    {
        if let Some(value) = self.entries.get(&key) {
            let value = value.clone();
            self.hits += 1;
            return Ok(value);
        }
        self.misses += 1;
        let value = compute()?;
        self.insert(key, value.clone());
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Summed size of all entries
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            len: self.entries.len(),
            size: self.size,
        }
    }

    fn over_limits(&self) -> bool {
        let count_over = self.limits.max_count.map_or(false, |max| self.entries.len() > max);
        let size_over = self.limits.max_size.map_or(false, |max| self.size > max);
        count_over || size_over
    }

    fn enforce_limits(&mut self) {
        while self.over_limits() {
            match self.entries.pop_lru() {
                Some((_, evicted)) => {
                    self.size -= (self.size_of)(&evicted);
                    tracing::trace!(size = self.size, len = self.entries.len(), "cache eviction");
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_count_limit_evicts_least_recent() {
        let mut cache = LruCache::new(CacheLimits::count(2));
        cache.insert("a", 1);
        cache.insert("b", 2);
        // Touch "a" so "b" becomes the eviction candidate.
        assert_eq!(cache.get(&"a"), Some(&1));
        cache.insert("c", 3);

        assert!(cache.contains(&"a"));
        assert!(!cache.contains(&"b"));
        assert!(cache.contains(&"c"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_size_limit_with_custom_size_fn() {
        let mut cache = LruCache::with_size_fn(CacheLimits::size(10), |v: &Vec<u8>| v.len());
        cache.insert(1, vec![0; 4]);
        cache.insert(2, vec![0; 4]);
        assert_eq!(cache.size(), 8);

        cache.insert(3, vec![0; 4]);
        assert_eq!(cache.size(), 8);
        assert!(!cache.contains(&1));
    }

    #[test]
    fn test_replacing_key_updates_size() {
        let mut cache = LruCache::with_size_fn(CacheLimits::default(), |v: &String| v.len());
        cache.insert("k", "abc".to_string());
        cache.insert("k", "abcdef".to_string());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size(), 6);
        assert_eq!(cache.remove(&"k").as_deref(), Some("abcdef"));
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_oversized_entry_is_not_retained() {
        let mut cache = LruCache::with_size_fn(CacheLimits::size(3), |v: &Vec<u8>| v.len());
        cache.insert(1, vec![0; 8]);
        assert!(cache.is_empty());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_memoization_counts_hits_and_misses() {
        let mut cache = LruCache::new(CacheLimits::count(8));
        let mut calls = 0;
        for _ in 0..3 {
            let v: Result<u64, ()> = cache.get_or_try_insert_with("x", || {
                calls += 1;
                Ok(42)
            });
            assert_eq!(v, Ok(42));
        }
        assert_eq!(calls, 1);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (2, 1));
    }

    #[test]
    fn test_failed_compute_is_not_cached() {
        let mut cache: LruCache<&str, u64> = LruCache::new(CacheLimits::count(8));
        let r: Result<u64, &str> = cache.get_or_try_insert_with("x", || Err("nope"));
        assert_eq!(r, Err("nope"));
        assert!(cache.is_empty());
    }

    proptest! {
        #[test]
        fn prop_limits_always_hold(
            ops in proptest::collection::vec((0u8..32, 0usize..16), 1..200),
            max_count in 1usize..10,
            max_size in 1usize..64,
        ) {
            let limits = CacheLimits { max_count: Some(max_count), max_size: Some(max_size) };
            let mut cache = LruCache::with_size_fn(limits, |v: &usize| *v);
            for (key, size) in ops {
                cache.insert(key, size);
                prop_assert!(cache.len() <= max_count);
                prop_assert!(cache.size() <= max_size);
            }
        }
    }
}
