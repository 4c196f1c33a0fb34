use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

/// Default lifetime of a cached row set
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Statistics for cache operations
#[derive(Debug, Default)]
pub struct CacheStatistics {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

impl CacheStatistics {
    /// Get the number of cache hits
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get the number of cache misses
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get the number of expired entries removed
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Get the number of explicitly invalidated entries
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Calculate the cache hit rate (hits / (hits + misses))
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_evictions(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    fn record_invalidations(&self, count: usize) {
        self.invalidations.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Last-fetched rows for one key
#[derive(Debug, Clone)]
struct CacheEntry {
    rows: Vec<Value>,
    fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    fn new(rows: Vec<Value>) -> Self {
        Self {
            rows,
            fetched_at: Utc::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        let elapsed = Utc::now().signed_duration_since(self.fetched_at);
        elapsed.to_std().ok().is_some_and(|d| d > ttl)
    }
}

/// Configuration for QueryCache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied when a lookup does not pass its own
    pub ttl: Duration,
}

impl CacheConfig {
    pub fn new() -> Self {
        Self { ttl: DEFAULT_TTL }
    }

    /// Set the TTL for cache entries
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Keyed store of raw row sets with TTL expiry.
///
/// Entries are only dropped by explicit invalidation, by [`QueryCache::evict_expired`], or
/// lazily when a lookup finds them expired. Share one instance through an `Arc` with every
/// query that should see the same entries.
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    config: CacheConfig,
    statistics: CacheStatistics,
}

impl QueryCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
            statistics: CacheStatistics::default(),
        }
    }

    /// Gets the rows for a key if they were fetched within the configured TTL
    pub fn get(&self, key: &str) -> Option<Vec<Value>> {
        self.get_with_ttl(key, self.config.ttl)
    }

    /// Gets the rows for a key if they were fetched within `ttl`
    pub fn get_with_ttl(&self, key: &str, ttl: Duration) -> Option<Vec<Value>> {
        let expired = match self.entries.read().get(key) {
            Some(entry) if !entry.is_expired(ttl) => {
                self.statistics.record_hit();
                return Some(entry.rows.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            let mut entries = self.entries.write();
            // Another caller may have refreshed the key since the read lock was released.
            if entries.get(key).is_some_and(|entry| entry.is_expired(ttl)) {
                entries.remove(key);
                self.statistics.record_evictions(1);
                debug!("Cache entry '{}' expired", key);
            }
        }
        self.statistics.record_miss();
        None
    }

    /// Stores rows under a key, replacing any previous entry
    pub fn insert(&self, key: impl Into<String>, rows: Vec<Value>) {
        let key = key.into();
        debug!("Caching {} rows under '{}'", rows.len(), key);
        self.entries.write().insert(key, CacheEntry::new(rows));
    }

    /// Removes one entry. Returns true if it existed.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.entries.write().remove(key).is_some();
        if removed {
            self.statistics.record_invalidations(1);
            debug!("Invalidated cache entry '{}'", key);
        }
        removed
    }

    /// Removes every entry whose key starts with `prefix`
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - entries.len();
        self.statistics.record_invalidations(removed);
        debug!("Invalidated {} cache entries with prefix '{}'", removed, prefix);
        removed
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Clears all entries from the cache
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        self.statistics.record_invalidations(entries.len());
        entries.clear();
    }

    /// Removes entries older than the configured TTL
    pub fn evict_expired(&self) -> usize {
        let ttl = self.config.ttl;
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(ttl));
        let count = before - entries.len();
        self.statistics.record_evictions(count);
        count
    }

    pub fn statistics(&self) -> &CacheStatistics {
        &self.statistics
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_and_get() {
        let cache = QueryCache::new(CacheConfig::new());
        cache.insert("products:featured", vec![json!({"id": 1})]);

        assert_eq!(cache.get("products:featured"), Some(vec![json!({"id": 1})]));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let cache = QueryCache::new(CacheConfig::new().with_ttl(Duration::from_millis(10)));
        cache.insert("experts", vec![json!({"id": 1})]);

        std::thread::sleep(Duration::from_millis(30));

        assert!(cache.get("experts").is_none());
        assert!(!cache.contains("experts"));
        assert_eq!(cache.statistics().misses(), 1);
        assert_eq!(cache.statistics().evictions(), 1);
    }

    #[test]
    fn test_per_call_ttl_overrides_config() {
        let cache = QueryCache::new(CacheConfig::new());
        cache.insert("tags", vec![]);
        std::thread::sleep(Duration::from_millis(20));

        assert!(cache.get_with_ttl("tags", Duration::from_secs(60)).is_some());
        assert!(cache.get_with_ttl("tags", Duration::from_millis(1)).is_none());
    }

    #[test]
    fn test_invalidate_prefix_only_touches_matching_keys() {
        let cache = QueryCache::new(CacheConfig::new());
        cache.insert("products:featured", vec![]);
        cache.insert("products:all", vec![]);
        cache.insert("experts:all", vec![]);

        assert_eq!(cache.invalidate_prefix("products:"), 2);
        assert!(cache.contains("experts:all"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.statistics().invalidations(), 2);
    }

    #[test]
    fn test_evict_expired() {
        let cache = QueryCache::new(CacheConfig::new().with_ttl(Duration::from_millis(10)));
        cache.insert("old", vec![]);
        std::thread::sleep(Duration::from_millis(30));
        cache.insert("fresh", vec![]);

        assert_eq!(cache.evict_expired(), 1);
        assert!(cache.contains("fresh"));
    }

    #[test]
    fn test_statistics() {
        let cache = QueryCache::new(CacheConfig::new());
        cache.insert("currencies", vec![]);

        cache.get("currencies");
        cache.get("missing");

        assert_eq!(cache.statistics().hits(), 1);
        assert_eq!(cache.statistics().misses(), 1);
        assert_eq!(cache.statistics().hit_rate(), 0.5);
    }
}
