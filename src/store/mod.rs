//! Per-Node Cache Store
//!
//! Concurrent key → [`CacheItem`] map with lazy TTL expiry. Items are never
//! swept in the background; expired entries are purged when a read,
//! snapshot or bulk delete touches them.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use ringcache::store::CacheStore;
//! use serde_json::json;
//!
//! let store = CacheStore::new();
//! store.set("user:42", json!("hello"), Some(Duration::from_secs(60)));
//! assert_eq!(store.get("user:42"), Some(json!("hello")));
//! ```

mod entry;
mod shard;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::trace;

pub use entry::{CacheItem, Clock, ManualClock, SystemClock};
pub use shard::{ShardedMap, ShardedMapStats};

/// Store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Number of shards (rounded up to a power of two)
    pub shard_count: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { shard_count: 64 }
    }
}

/// Outcome of a single-key lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Present and live
    Hit(CacheItem),
    /// Was present but its TTL had elapsed; it has now been removed
    Expired,
    /// Never present (or already purged)
    Missing,
}

/// Result of a bulk delete. Each distinct key appears once, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    pub deleted: Vec<String>,
    /// Absent or already expired
    pub not_found: Vec<String>,
}

/// Concurrent in-memory cache store for one node
pub struct CacheStore {
    items: ShardedMap<CacheItem>,
    clock: Arc<dyn Clock>,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore {
    /// Create a store on the system clock with default configuration
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default(), Arc::new(SystemClock))
    }

    /// Create a store reading time from `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(StoreConfig::default(), clock)
    }

    pub fn with_config(config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            items: ShardedMap::new(config.shard_count),
            clock,
        }
    }

    /// Look a key up, distinguishing expired from missing.
    ///
    /// A hit refreshes `last_accessed`; an expired item is removed.
    pub fn lookup(&self, key: &str) -> Lookup {
        let now = self.clock.now();
        let outcome = self.items.update_or_remove(key, |item| {
            if item.is_expired_at(now) {
                (Lookup::Expired, true)
            } else {
                item.last_accessed = now;
                (Lookup::Hit(item.clone()), false)
            }
        });

        match outcome {
            Some(Lookup::Expired) => {
                trace!(key, "Purged expired item on read");
                Lookup::Expired
            }
            Some(hit) => hit,
            None => Lookup::Missing,
        }
    }

    /// Get a live value
    pub fn get(&self, key: &str) -> Option<Value> {
        match self.lookup(key) {
            Lookup::Hit(item) => Some(item.value),
            Lookup::Expired | Lookup::Missing => None,
        }
    }

    /// Insert or overwrite unconditionally; the expiry window restarts now
    pub fn set(&self, key: impl Into<String>, value: Value, ttl: Option<Duration>) {
        let item = CacheItem::new(key, value, ttl, self.clock.now());
        self.items.insert(item.key.clone(), item);
    }

    /// Apply a batch of writes, each one independently
    pub fn set_many<I>(&self, items: I) -> usize
    where
        I: IntoIterator<Item = (String, Value, Option<Duration>)>,
    {
        let mut written = 0;
        for (key, value, ttl) in items {
            self.set(key, value, ttl);
            written += 1;
        }
        written
    }

    /// Delete keys in one pass, splitting them into deleted and not found
    pub fn delete_many<S: AsRef<str>>(&self, keys: &[S]) -> DeleteSummary {
        let now = self.clock.now();
        let mut seen = HashSet::with_capacity(keys.len());
        let mut summary = DeleteSummary::default();

        for key in keys.iter().map(AsRef::as_ref) {
            if !seen.insert(key) {
                continue;
            }
            let live = self
                .items
                .update_or_remove(key, |item| (!item.is_expired_at(now), true));
            if live == Some(true) {
                summary.deleted.push(key.to_string());
            } else {
                summary.not_found.push(key.to_string());
            }
        }
        summary
    }

    /// All live items ordered by key; expired ones are purged on the way
    pub fn snapshot(&self) -> Vec<CacheItem> {
        let now = self.clock.now();
        let mut items = self.items.purge_and_collect(|item| item.is_expired_at(now));
        items.sort_by(|a, b| a.key.cmp(&b.key));
        items
    }

    /// Number of stored items, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&self) {
        self.items.clear();
    }

    pub fn stats(&self) -> ShardedMapStats {
        self.items.stats()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("items", &self.items.len())
            .field("shards", &self.items.shard_count())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_with_clock() -> (CacheStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (CacheStore::with_clock(clock.clone()), clock)
    }

    #[test]
    fn test_set_and_get() {
        let store = CacheStore::new();
        store.set("a", json!({"n": 1}), None);

        assert_eq!(store.get("a"), Some(json!({"n": 1})));
        assert_eq!(store.get("b"), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_overwrite_is_last_writer_wins() {
        let store = CacheStore::new();
        store.set("a", json!(1), None);
        store.set("a", json!(2), Some(Duration::from_secs(5)));

        match store.lookup("a") {
            Lookup::Hit(item) => {
                assert_eq!(item.value, json!(2));
                assert_eq!(item.ttl, Some(Duration::from_secs(5)));
            }
            other => panic!("expected hit, got {:?}", other),
        }
    }

    #[test]
    fn test_expired_item_is_removed_on_read() {
        let (store, clock) = store_with_clock();
        store.set("a", json!("v"), Some(Duration::from_secs(10)));

        clock.advance(Duration::from_secs(11));
        assert_eq!(store.lookup("a"), Lookup::Expired);
        assert_eq!(store.len(), 0);
        assert_eq!(store.lookup("a"), Lookup::Missing);
    }

    #[test]
    fn test_ttl_resets_on_rewrite() {
        let (store, clock) = store_with_clock();
        let ttl = Some(Duration::from_secs(10));

        store.set("a", json!(1), ttl);
        clock.advance(Duration::from_secs(8));
        store.set("a", json!(1), ttl);
        clock.advance(Duration::from_secs(8));

        // 16s after the first write, 8s after the latest one
        assert_eq!(store.get("a"), Some(json!(1)));

        clock.advance(Duration::from_secs(3));
        assert_eq!(store.get("a"), None);
    }

    #[test]
    fn test_read_updates_last_accessed() {
        let (store, clock) = store_with_clock();
        store.set("a", json!(1), None);
        let written = clock.now();

        clock.advance(Duration::from_secs(5));
        match store.lookup("a") {
            Lookup::Hit(item) => {
                assert_eq!(item.created_at, written);
                assert_eq!(item.last_accessed, clock.now());
            }
            other => panic!("expected hit, got {:?}", other),
        }
    }

    #[test]
    fn test_set_many() {
        let store = CacheStore::new();
        let written = store.set_many(vec![
            ("a".to_string(), json!(1), None),
            ("b".to_string(), json!(2), Some(Duration::from_secs(1))),
        ]);

        assert_eq!(written, 2);
        assert_eq!(store.get("b"), Some(json!(2)));
    }

    #[test]
    fn test_delete_many_reports_missing_and_expired() {
        let (store, clock) = store_with_clock();
        store.set("live", json!(1), None);
        store.set("stale", json!(2), Some(Duration::from_secs(1)));
        clock.advance(Duration::from_secs(2));

        let summary = store.delete_many(&["live", "stale", "ghost"]);
        assert_eq!(summary.deleted, vec!["live"]);
        assert_eq!(summary.not_found, vec!["stale", "ghost"]);
        assert!(store.is_empty());
    }

    #[test]
    fn test_delete_many_reports_repeated_key_once() {
        let (store, _) = store_with_clock();
        store.set("k", json!(1), None);

        let summary = store.delete_many(&["k", "k", "ghost", "ghost"]);
        assert_eq!(summary.deleted, vec!["k"]);
        assert_eq!(summary.not_found, vec!["ghost"]);
    }

    #[test]
    fn test_snapshot_is_sorted_and_purges_expired() {
        let (store, clock) = store_with_clock();
        store.set("c", json!(3), None);
        store.set("a", json!(1), None);
        store.set("b", json!(2), Some(Duration::from_secs(1)));
        clock.advance(Duration::from_secs(5));

        let keys: Vec<String> = store.snapshot().into_iter().map(|i| i.key).collect();
        assert_eq!(keys, vec!["a", "c"]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_concurrent_writers() {
        let store = Arc::new(CacheStore::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        store.set(format!("{}-{}", t, i), json!(i), None);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.snapshot().len(), 2000);
    }
}
