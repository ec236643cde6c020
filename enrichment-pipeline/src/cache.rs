use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::debug;

use common::metadata::MetadataRecord;
use common::utils::config::{AppConfig, EvictionKind};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub ttl: Duration,
    pub cleanup_interval: Duration,
    pub eviction: EvictionKind,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            ttl: Duration::from_secs(900),
            cleanup_interval: Duration::from_secs(60),
            eviction: EvictionKind::Lru,
        }
    }
}

impl CacheConfig {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self {
            max_entries: cfg.provider_cache_max_entries,
            ttl: Duration::from_secs(cfg.provider_cache_ttl_secs),
            cleanup_interval: Duration::from_secs(cfg.provider_cache_cleanup_secs),
            eviction: cfg.provider_cache_eviction,
        }
    }
}

struct CacheEntry {
    data: Vec<MetadataRecord>,
    inserted_at: Instant,
    ttl: Duration,
    access_count: u64,
    last_accessed: Instant,
    /// Monotonic insertion order, for FIFO eviction.
    sequence: u64,
}

impl CacheEntry {
    fn expired_at(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) >= self.ttl
    }

    fn estimated_bytes(&self, key: &str) -> usize {
        key.len() + self.data.len() * mem::size_of::<MetadataRecord>()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub evictions: u64,
    pub est_bytes: usize,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    config: CacheConfig,
    hits: u64,
    misses: u64,
    evictions: u64,
    next_sequence: u64,
}

impl CacheInner {
    /// Removes one entry under the configured strategy to make room.
    fn evict_one(&mut self) {
        let victim = match self.config.eviction {
            EvictionKind::Lru => self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed),
            EvictionKind::Lfu => self
                .entries
                .iter()
                .min_by_key(|(_, entry)| (entry.access_count, entry.last_accessed)),
            EvictionKind::Fifo => self.entries.iter().min_by_key(|(_, entry)| entry.sequence),
            EvictionKind::Ttl => self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at + entry.ttl),
        };
        if let Some(key) = victim.map(|(key, _)| key.clone()) {
            self.entries.remove(&key);
            self.evictions += 1;
            debug!(key = %key, strategy = ?self.config.eviction, "evicted cache entry");
        }
    }

    fn remove_expired(&mut self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.expired_at(now));
        before - self.entries.len()
    }
}

/// Keyed in-memory cache of provider responses with TTL and a pluggable
/// eviction strategy.
pub struct ProviderCache {
    inner: Arc<Mutex<CacheInner>>,
    cleanup: Option<JoinHandle<()>>,
}

impl ProviderCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner {
                entries: HashMap::new(),
                config,
                hits: 0,
                misses: 0,
                evictions: 0,
                next_sequence: 0,
            })),
            cleanup: None,
        }
    }

    /// A cache with a background sweep that eagerly drops expired entries.
    /// The task is aborted when the cache is dropped and never keeps the
    /// process alive on its own.
    pub fn with_cleanup_task(config: CacheConfig) -> Self {
        let interval = config.cleanup_interval;
        let mut cache = Self::new(config);
        let inner = Arc::clone(&cache.inner);
        cache.cleanup = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = inner.lock().await.remove_expired();
                if removed > 0 {
                    debug!(removed, "cache cleanup sweep removed expired entries");
                }
            }
        }));
        cache
    }

    pub async fn get(&self, key: &str) -> Option<Vec<MetadataRecord>> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let now = Instant::now();
        match inner.entries.get_mut(key) {
            Some(entry) if !entry.expired_at(now) => {
                entry.access_count += 1;
                entry.last_accessed = now;
                let data = entry.data.clone();
                inner.hits += 1;
                Some(data)
            }
            Some(_) => {
                inner.entries.remove(key);
                inner.misses += 1;
                None
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    pub async fn set(&self, key: &str, records: Vec<MetadataRecord>) {
        let ttl = self.inner.lock().await.config.ttl;
        self.set_with_ttl(key, records, ttl).await;
    }

    pub async fn set_with_ttl(&self, key: &str, records: Vec<MetadataRecord>, ttl: Duration) {
        let mut inner = self.inner.lock().await;
        if !inner.entries.contains_key(key) && inner.entries.len() >= inner.config.max_entries {
            inner.evict_one();
        }
        let now = Instant::now();
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                data: records,
                inserted_at: now,
                ttl,
                access_count: 0,
                last_accessed: now,
                sequence,
            },
        );
    }

    /// Presence check that leaves access statistics untouched, so probing
    /// does not bias LRU or the hit ratio.
    pub async fn has(&self, key: &str) -> bool {
        let inner = self.inner.lock().await;
        inner
            .entries
            .get(key)
            .is_some_and(|entry| !entry.expired_at(Instant::now()))
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.inner.lock().await.entries.remove(key).is_some()
    }

    pub async fn clear(&self) {
        self.inner.lock().await.entries.clear();
    }

    /// Drops expired entries now; returns how many were removed.
    pub async fn cleanup_expired(&self) -> usize {
        self.inner.lock().await.remove_expired()
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        let lookups = inner.hits + inner.misses;
        let est_bytes = inner
            .entries
            .iter()
            .map(|(key, entry)| entry.estimated_bytes(key))
            .sum();
        CacheStats {
            size: inner.entries.len(),
            max_size: inner.config.max_entries,
            hits: inner.hits,
            misses: inner.misses,
            hit_ratio: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
            evictions: inner.evictions,
            est_bytes,
        }
    }
}

impl Drop for ProviderCache {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(source: &str) -> MetadataRecord {
        MetadataRecord::new(source, 0.8)
    }

    fn config(max_entries: usize, eviction: EvictionKind) -> CacheConfig {
        CacheConfig {
            max_entries,
            ttl: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(5),
            eviction,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_boundary() {
        let cache = ProviderCache::new(config(10, EvictionKind::Lru));
        cache
            .set_with_ttl("k", vec![record("a")], Duration::from_secs(30))
            .await;

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(cache.get("k").await.is_some(), "t < ttl must hit");

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get("k").await.is_none(), "t >= ttl must miss");
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_evicts_least_recently_used() {
        let cache = ProviderCache::new(config(2, EvictionKind::Lru));
        cache.set("first", vec![record("a")]).await;
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.set("second", vec![record("b")]).await;
        tokio::time::advance(Duration::from_millis(10)).await;

        // Touch "first" so "second" becomes the LRU victim.
        assert!(cache.get("first").await.is_some());
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.set("third", vec![record("c")]).await;

        assert!(cache.has("first").await);
        assert!(!cache.has("second").await);
        assert!(cache.has("third").await);
        assert_eq!(cache.stats().await.evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lfu_evicts_least_frequently_used() {
        let cache = ProviderCache::new(config(2, EvictionKind::Lfu));
        cache.set("hot", vec![record("a")]).await;
        cache.set("cold", vec![record("b")]).await;
        for _ in 0..3 {
            assert!(cache.get("hot").await.is_some());
        }
        cache.set("new", vec![record("c")]).await;

        assert!(cache.has("hot").await);
        assert!(!cache.has("cold").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_evicts_oldest_insert() {
        let cache = ProviderCache::new(config(2, EvictionKind::Fifo));
        cache.set("oldest", vec![record("a")]).await;
        cache.set("middle", vec![record("b")]).await;
        // Access does not save a FIFO victim.
        assert!(cache.get("oldest").await.is_some());
        cache.set("newest", vec![record("c")]).await;

        assert!(!cache.has("oldest").await);
        assert!(cache.has("middle").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_strategy_evicts_soonest_to_expire() {
        let cache = ProviderCache::new(config(2, EvictionKind::Ttl));
        cache
            .set_with_ttl("long", vec![record("a")], Duration::from_secs(300))
            .await;
        cache
            .set_with_ttl("short", vec![record("b")], Duration::from_secs(5))
            .await;
        cache.set("incoming", vec![record("c")]).await;

        assert!(cache.has("long").await);
        assert!(!cache.has("short").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_has_does_not_touch_stats_or_recency() {
        let cache = ProviderCache::new(config(2, EvictionKind::Lru));
        cache.set("a", vec![record("a")]).await;
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.set("b", vec![record("b")]).await;
        tokio::time::advance(Duration::from_millis(10)).await;

        // Probe "a" with has(); it must NOT refresh recency, so "a" is
        // still the LRU victim.
        assert!(cache.has("a").await);
        cache.set("c", vec![record("c")]).await;
        assert!(!cache.has("a").await);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_and_overwrite() {
        let cache = ProviderCache::new(config(5, EvictionKind::Lru));
        cache.set("k", vec![record("a"), record("b")]).await;
        assert!(cache.get("k").await.is_some());
        assert!(cache.get("missing").await.is_none());

        let stats = cache.stats().await;
        assert_eq!(stats.size, 1);
        assert_eq!(stats.max_size, 5);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_ratio - 0.5).abs() < f64::EPSILON);
        assert!(stats.est_bytes > 0);

        // Overwriting the same key is not an eviction.
        cache.set("k", vec![record("c")]).await;
        assert_eq!(cache.stats().await.evictions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_sweep_removes_expired_entries_eagerly() {
        let cache = ProviderCache::with_cleanup_task(CacheConfig {
            max_entries: 10,
            ttl: Duration::from_secs(10),
            cleanup_interval: Duration::from_secs(5),
            eviction: EvictionKind::Lru,
        });
        cache.set("k", vec![record("a")]).await;
        tokio::time::advance(Duration::from_secs(11)).await;
        // Give the sweep task a chance to run after the tick fires.
        tokio::task::yield_now().await;

        let stats = cache.stats().await;
        assert_eq!(stats.size, 0, "sweep should remove the expired entry");
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_and_clear() {
        let cache = ProviderCache::new(config(5, EvictionKind::Lru));
        cache.set("k", vec![record("a")]).await;
        assert!(cache.delete("k").await);
        assert!(!cache.delete("k").await);

        cache.set("x", vec![record("a")]).await;
        cache.set("y", vec![record("b")]).await;
        cache.clear().await;
        assert_eq!(cache.stats().await.size, 0);
    }
}
