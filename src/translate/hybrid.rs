//! Two-tier translation cache: the in-memory LRU answers every lookup synchronously,
//! an optional durable store keeps entries across sessions.
//!
//! Durable-tier work is fire-and-forget on the runtime captured at construction.
//! A memory miss schedules a background read that warms the memory tier for the
//! *next* lookup; the current lookup still reports a miss. Store failures are logged
//! and otherwise behave like "not found".

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use super::cache::{BoundedTtlCache, TranslationCache};
use super::durable::DurableStore;
use super::TranslateError;

/// Namespace for cache records inside a shared durable store.
pub const STORAGE_PREFIX: &str = "relaytext_cache_";
/// Default number of records pulled in by [`HybridCache::preload`].
pub const DEFAULT_PRELOAD_ITEMS: usize = 50;

/// Persisted record layout: `{"value": ..., "timestamp": <unix millis>}`.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    value: String,
    timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HybridCacheStats {
    pub memory: usize,
    pub persistent: bool,
}

pub struct HybridCache {
    memory: Arc<BoundedTtlCache>,
    durable: Option<DurableTier>,
}

/// Handle to the durable store plus the runtime its background work runs on.
#[derive(Clone)]
struct DurableTier {
    store: Arc<dyn DurableStore>,
    runtime: Handle,
    ttl: Duration,
}

impl HybridCache {
    /// Build the cache. The durable tier is enabled only when a store is supplied
    /// and a tokio runtime is available; this is decided once, here.
    pub fn new(max_entries: usize, ttl: Duration, store: Option<Arc<dyn DurableStore>>) -> Self {
        let durable = match store {
            None => {
                info!("no durable store supplied, using memory-only cache");
                None
            }
            Some(store) => match Handle::try_current() {
                Ok(runtime) => {
                    info!("persistent cache tier initialized");
                    Some(DurableTier { store, runtime, ttl })
                }
                Err(_) => {
                    warn!("durable store supplied outside a tokio runtime, falling back to memory-only cache");
                    None
                }
            },
        };

        Self {
            memory: Arc::new(BoundedTtlCache::new(max_entries, ttl)),
            durable,
        }
    }

    pub fn with_ttl_hours(max_entries: usize, ttl_hours: u64, store: Option<Arc<dyn DurableStore>>) -> Self {
        Self::new(max_entries, Duration::from_secs(ttl_hours * 3600), store)
    }

    pub fn memory_only(max_entries: usize, ttl: Duration) -> Self {
        Self::new(max_entries, ttl, None)
    }

    pub fn ttl(&self) -> Duration {
        self.memory.ttl()
    }

    pub fn is_persistent(&self) -> bool {
        self.durable.is_some()
    }

    pub fn stats(&self) -> HybridCacheStats {
        HybridCacheStats {
            memory: self.memory.len(),
            persistent: self.is_persistent(),
        }
    }

    /// Memory-tier lookup. On a miss, schedules a background durable read.
    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.memory.get(key) {
            return Some(value);
        }

        if let Some(tier) = &self.durable {
            let tier = tier.clone();
            let memory = Arc::clone(&self.memory);
            let key = key.to_owned();
            tier.runtime.clone().spawn(async move {
                tier.load_into(&memory, &key).await;
            });
        }
        None
    }

    pub fn set(&self, key: &str, value: String) {
        let Some(tier) = &self.durable else {
            self.memory.insert(key, value);
            return;
        };

        if let Some(evicted) = self.memory.insert(key, value.clone()) {
            tier.spawn_remove(evicted);
        }

        let tier_bg = tier.clone();
        let key = key.to_owned();
        tier.runtime.spawn(async move {
            tier_bg.save(&key, value).await;
        });
    }

    /// Clear memory now; delete every namespaced durable record in the background.
    pub fn clear(&self) {
        self.memory.clear();

        if let Some(tier) = &self.durable {
            let tier_bg = tier.clone();
            tier.runtime.spawn(async move {
                tier_bg.clear_all().await;
            });
        }
    }

    /// Warm the memory tier from the durable store. Expired or malformed records are
    /// deleted along the way. Returns the number of entries loaded.
    pub async fn preload(&self, max_items: usize) -> usize {
        let Some(tier) = &self.durable else {
            return 0;
        };

        match tier.preload_into(&self.memory, max_items).await {
            Ok(loaded) => {
                if loaded > 0 {
                    info!(loaded, "preloaded cache entries from durable store");
                }
                loaded
            }
            Err(e) => {
                warn!(error = %e, "error preloading cache from durable store");
                0
            }
        }
    }
}

impl DurableTier {
    fn storage_key(key: &str) -> String {
        format!("{STORAGE_PREFIX}{key}")
    }

    /// Age of a record, or None once it has outlived the TTL.
    fn fresh_age(&self, entry: &StoredEntry) -> Option<Duration> {
        let age_ms = (now_unix_ms() - entry.timestamp).max(0) as u64;
        let age = Duration::from_millis(age_ms);
        (age <= self.ttl).then_some(age)
    }

    /// Insert into memory, keeping the durable tier in step with any eviction.
    async fn insert_memory(&self, memory: &BoundedTtlCache, key: &str, value: String, age: Duration) {
        if let Some(evicted) = memory.insert_aged(key, value, age) {
            self.remove(&evicted).await;
        }
    }

    async fn load_into(&self, memory: &BoundedTtlCache, key: &str) {
        let storage_key = Self::storage_key(key);
        let raw = match self.store.get_item(&storage_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "error reading from durable cache");
                return;
            }
        };

        let entry: StoredEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, key = %storage_key, "malformed durable cache record");
                return;
            }
        };

        match self.fresh_age(&entry) {
            Some(age) => {
                debug!(key, "durable cache hit, warming memory tier");
                self.insert_memory(memory, key, entry.value, age).await;
            }
            None => self.remove(key).await,
        }
    }

    async fn save(&self, key: &str, value: String) {
        let entry = StoredEntry {
            value,
            timestamp: now_unix_ms(),
        };
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "error encoding durable cache record");
                return;
            }
        };
        if let Err(e) = self.store.set_item(&Self::storage_key(key), &raw).await {
            warn!(error = %e, "error writing to durable cache");
        }
    }

    async fn remove(&self, key: &str) {
        if let Err(e) = self.store.remove_item(&Self::storage_key(key)).await {
            warn!(error = %e, "error removing from durable cache");
        }
    }

    fn spawn_remove(&self, key: String) {
        let tier = self.clone();
        self.runtime.spawn(async move {
            tier.remove(&key).await;
        });
    }

    async fn namespaced_keys(&self) -> Result<Vec<String>, TranslateError> {
        let keys = self.store.get_all_keys().await?;
        Ok(keys.into_iter().filter(|k| k.starts_with(STORAGE_PREFIX)).collect())
    }

    async fn clear_all(&self) {
        let result = async {
            let keys = self.namespaced_keys().await?;
            if !keys.is_empty() {
                self.store.multi_remove(&keys).await?;
            }
            Ok::<_, TranslateError>(keys.len())
        }
        .await;

        match result {
            Ok(removed) => debug!(removed, "durable cache cleared"),
            Err(e) => warn!(error = %e, "error clearing durable cache"),
        }
    }

    async fn preload_into(&self, memory: &BoundedTtlCache, max_items: usize) -> Result<usize, TranslateError> {
        let mut keys = self.namespaced_keys().await?;
        keys.truncate(max_items);
        if keys.is_empty() {
            return Ok(0);
        }

        let mut loaded = 0;
        let mut stale = Vec::new();
        for (storage_key, raw) in self.store.multi_get(&keys).await? {
            let Some(raw) = raw else { continue };
            let Some(key) = storage_key.strip_prefix(STORAGE_PREFIX) else {
                warn!(%storage_key, "durable store returned a key outside the cache namespace");
                continue;
            };
            let fresh = serde_json::from_str::<StoredEntry>(&raw)
                .ok()
                .and_then(|entry| self.fresh_age(&entry).map(|age| (entry.value, age)));
            match fresh {
                Some((value, age)) => {
                    self.insert_memory(memory, key, value, age).await;
                    loaded += 1;
                }
                None => stale.push(storage_key),
            }
        }

        if !stale.is_empty() {
            debug!(removed = stale.len(), "dropping expired or malformed durable records");
            self.store.multi_remove(&stale).await?;
        }
        Ok(loaded)
    }
}

impl TranslationCache for HybridCache {
    fn get(&self, key: &str) -> Option<String> {
        HybridCache::get(self, key)
    }

    fn set(&self, key: &str, value: String) {
        HybridCache::set(self, key, value);
    }

    fn clear(&self) {
        HybridCache::clear(self);
    }

    fn size(&self) -> usize {
        self.memory.len()
    }

    fn capacity(&self) -> usize {
        self.memory.capacity()
    }

    fn is_persistent(&self) -> bool {
        HybridCache::is_persistent(self)
    }
}

fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
