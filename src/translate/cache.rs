//! In-memory LRU translation cache with TTL.
//! Expired entries are reclaimed lazily on `get` or pushed out by LRU pressure;
//! there is no background sweeper.

use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::warn;

/// Default capacity of the memory tier.
pub const DEFAULT_CACHE_SIZE: usize = 500;

/// Cache seam used by the client. Implemented by the memory-only cache and by the
/// hybrid memory + durable cache.
pub trait TranslationCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn clear(&self);
    fn size(&self) -> usize;
    fn capacity(&self) -> usize;

    /// Whether entries survive a process restart.
    fn is_persistent(&self) -> bool {
        false
    }
}

struct CacheEntry {
    value: String,
    stored_at: Instant,
}

pub struct BoundedTtlCache {
    inner: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl BoundedTtlCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or_else(|| {
            warn!("cache capacity of 0 requested, using 1");
            NonZeroUsize::MIN
        });
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn with_ttl_hours(capacity: usize, ttl_hours: u64) -> Self {
        Self::new(capacity, Duration::from_secs(ttl_hours * 3600))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a cached translation. Returns None if absent or expired.
    /// A hit moves the entry to the most-recently-used position.
    pub fn get(&self, key: &str) -> Option<String> {
        let mut cache = self.inner.lock();
        if let Some(entry) = cache.get(key) {
            if entry.stored_at.elapsed() < self.ttl {
                return Some(entry.value.clone());
            }
            // Expired — remove it
            cache.pop(key);
        }
        None
    }

    /// Insert or overwrite `key`. When the cache is full and `key` is new, the
    /// least-recently-used entry is dropped first and its key returned.
    pub fn insert(&self, key: &str, value: String) -> Option<String> {
        self.insert_aged(key, value, Duration::ZERO)
    }

    /// Like [`insert`](Self::insert) for a value that was stored `age` ago elsewhere,
    /// so it expires when the original would have.
    pub fn insert_aged(&self, key: &str, value: String, age: Duration) -> Option<String> {
        let now = Instant::now();
        let stored_at = now.checked_sub(age).unwrap_or(now);
        let mut cache = self.inner.lock();
        match cache.push(key.to_owned(), CacheEntry { value, stored_at }) {
            Some((old_key, _)) if old_key != key => Some(old_key),
            _ => None,
        }
    }

    /// Insert and report the evicted key, if any, to `on_evicted` before returning.
    pub fn insert_with(&self, key: &str, value: String, on_evicted: impl FnOnce(&str)) {
        if let Some(evicted) = self.insert(key, value) {
            on_evicted(&evicted);
        }
    }

    /// Drop a single entry. Returns whether it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.inner.lock().pop(key).is_some()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().cap().get()
    }
}

impl TranslationCache for BoundedTtlCache {
    fn get(&self, key: &str) -> Option<String> {
        BoundedTtlCache::get(self, key)
    }

    fn set(&self, key: &str, value: String) {
        self.insert(key, value);
    }

    fn clear(&self) {
        BoundedTtlCache::clear(self);
    }

    fn size(&self) -> usize {
        self.len()
    }

    fn capacity(&self) -> usize {
        BoundedTtlCache::capacity(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn overflow_evicts_least_recently_used() {
        let cache = BoundedTtlCache::new(3, HOUR);
        for key in ["a", "b", "c"] {
            assert_eq!(cache.insert(key, key.to_uppercase()), None);
        }
        assert_eq!(cache.insert("d", "D".into()), Some("a".to_string()));
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("d").as_deref(), Some("D"));
    }

    #[test]
    fn get_refreshes_recency() {
        let cache = BoundedTtlCache::new(2, HOUR);
        cache.insert("a", "1".into());
        cache.insert("b", "2".into());
        assert!(cache.get("a").is_some());
        assert_eq!(cache.insert("c", "3".into()), Some("b".to_string()));
        assert_eq!(cache.get("a").as_deref(), Some("1"));
    }

    #[test]
    fn overwrite_at_capacity_does_not_evict() {
        let cache = BoundedTtlCache::new(2, HOUR);
        cache.insert("a", "1".into());
        cache.insert("b", "2".into());
        assert_eq!(cache.insert("a", "updated".into()), None);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a").as_deref(), Some("updated"));
        assert_eq!(cache.get("b").as_deref(), Some("2"));
    }

    #[test]
    fn eviction_hook_receives_evicted_key() {
        let cache = BoundedTtlCache::new(1, HOUR);
        let mut evicted = Vec::new();
        cache.insert_with("a", "1".into(), |k| evicted.push(k.to_string()));
        cache.insert_with("b", "2".into(), |k| evicted.push(k.to_string()));
        cache.insert_with("b", "3".into(), |k| evicted.push(k.to_string()));
        assert_eq!(evicted, vec!["a".to_string()]);
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let cache = BoundedTtlCache::new(10, HOUR);
        for i in 0..=10 {
            cache.insert(&format!("key-{i}"), format!("value-{i}"));
            assert!(cache.len() <= 10);
        }
        assert_eq!(cache.get("key-0"), None);
        assert_eq!(cache.capacity(), 10);
    }

    #[test]
    fn clear_empties_cache() {
        let cache = BoundedTtlCache::new(4, HOUR);
        cache.insert("a", "1".into());
        cache.insert("b", "2".into());
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let cache = BoundedTtlCache::new(0, HOUR);
        assert_eq!(cache.capacity(), 1);
        cache.insert("a", "1".into());
        assert_eq!(cache.get("a").as_deref(), Some("1"));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_removed_on_get() {
        let cache = BoundedTtlCache::new(4, Duration::from_secs(60));
        cache.insert("a", "1".into());
        cache.insert("b", "2".into());

        tokio::time::advance(Duration::from_secs(61)).await;

        assert_eq!(cache.len(), 2, "expired entries are not swept eagerly");
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn aged_insert_expires_with_original_timestamp() {
        let cache = BoundedTtlCache::new(4, Duration::from_secs(60));
        tokio::time::advance(Duration::from_secs(120)).await;
        cache.insert_aged("a", "1".into(), Duration::from_secs(50));
        assert_eq!(cache.get("a").as_deref(), Some("1"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get("a"), None);
    }
}
