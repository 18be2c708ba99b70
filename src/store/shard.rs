//! Sharded Map
//!
//! Concurrent string-keyed hashmap split into power-of-two shards, each behind
//! its own `RwLock`, so unrelated keys never contend on a global lock.

use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

/// Single shard containing a hashmap and access counters
pub struct Shard<V> {
    map: RwLock<HashMap<String, V>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl<V> Default for Shard<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Shard<V> {
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

/// Sharded map with a runtime shard count
pub struct ShardedMap<V> {
    shards: Box<[Shard<V>]>,
    mask: usize,
}

impl<V> ShardedMap<V> {
    /// Create a map with `shard_count` shards, rounded up to a power of two
    pub fn new(shard_count: usize) -> Self {
        let count = shard_count.max(1).next_power_of_two();
        let shards: Vec<Shard<V>> = (0..count).map(|_| Shard::new()).collect();
        Self {
            shards: shards.into_boxed_slice(),
            mask: count - 1,
        }
    }

    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Total number of entries across all shards
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.is_empty())
    }

    #[inline]
    fn shard_for(&self, key: &str) -> &Shard<V> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) & self.mask]
    }

    /// Insert a value, returning the previous one
    pub fn insert(&self, key: String, value: V) -> Option<V> {
        let shard = self.shard_for(&key);
        shard.writes.fetch_add(1, Ordering::Relaxed);
        shard.map.write().insert(key, value)
    }

    /// Remove a value, returning it if present
    pub fn remove(&self, key: &str) -> Option<V> {
        let shard = self.shard_for(key);
        shard.writes.fetch_add(1, Ordering::Relaxed);
        shard.map.write().remove(key)
    }

    /// Clone a value out without touching it
    pub fn get_cloned(&self, key: &str) -> Option<V>
    where
        V: Clone,
    {
        let shard = self.shard_for(key);
        shard.reads.fetch_add(1, Ordering::Relaxed);
        shard.map.read().get(key).cloned()
    }

    /// Run `f` on the entry under the shard's write lock.
    ///
    /// `f` returns its result and whether the entry must be removed afterwards.
    /// Returns `None` when the key is absent.
    pub fn update_or_remove<R, F>(&self, key: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut V) -> (R, bool),
    {
        let shard = self.shard_for(key);
        shard.reads.fetch_add(1, Ordering::Relaxed);
        let mut guard = shard.map.write();

        let (result, remove) = f(guard.get_mut(key)?);
        if remove {
            shard.writes.fetch_add(1, Ordering::Relaxed);
            guard.remove(key);
        }
        Some(result)
    }

    /// Drop entries matching `is_stale` and clone out the rest, one shard at a time
    pub fn purge_and_collect<F>(&self, is_stale: F) -> Vec<V>
    where
        V: Clone,
        F: Fn(&V) -> bool,
    {
        let mut out = Vec::new();
        for shard in self.shards.iter() {
            let mut guard = shard.map.write();
            let before = guard.len();
            guard.retain(|_, v| !is_stale(v));
            if guard.len() != before {
                shard.writes.fetch_add(1, Ordering::Relaxed);
            }
            out.extend(guard.values().cloned());
        }
        out
    }

    /// Clear all shards
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.map.write().clear();
        }
    }

    pub fn stats(&self) -> ShardedMapStats {
        let shard_entry_counts: Vec<usize> = self.shards.iter().map(|s| s.len()).collect();
        ShardedMapStats {
            total_entries: shard_entry_counts.iter().sum(),
            total_reads: self.shards.iter().map(|s| s.read_count()).sum(),
            total_writes: self.shards.iter().map(|s| s.write_count()).sum(),
            shard_entry_counts,
        }
    }
}

/// Statistics for a sharded map
#[derive(Debug, Clone)]
pub struct ShardedMapStats {
    pub total_entries: usize,
    pub total_reads: u64,
    pub total_writes: u64,
    pub shard_entry_counts: Vec<usize>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_shard_count_rounds_to_power_of_two() {
        assert_eq!(ShardedMap::<i32>::new(0).shard_count(), 1);
        assert_eq!(ShardedMap::<i32>::new(16).shard_count(), 16);
        assert_eq!(ShardedMap::<i32>::new(20).shard_count(), 32);
    }

    #[test]
    fn test_insert_get_remove() {
        let map: ShardedMap<i32> = ShardedMap::new(16);

        assert!(map.insert("key1".to_string(), 42).is_none());
        assert_eq!(map.insert("key1".to_string(), 43), Some(42));
        assert_eq!(map.get_cloned("key1"), Some(43));
        assert_eq!(map.len(), 1);

        assert_eq!(map.remove("key1"), Some(43));
        assert!(map.is_empty());
        assert_eq!(map.remove("key1"), None);
    }

    #[test]
    fn test_update_or_remove() {
        let map: ShardedMap<i32> = ShardedMap::new(4);
        map.insert("a".to_string(), 1);

        let r = map.update_or_remove("a", |v| {
            *v += 10;
            (*v, false)
        });
        assert_eq!(r, Some(11));
        assert_eq!(map.get_cloned("a"), Some(11));

        let r = map.update_or_remove("a", |v| (*v, true));
        assert_eq!(r, Some(11));
        assert!(map.get_cloned("a").is_none());

        let r: Option<()> = map.update_or_remove("missing", |_| ((), false));
        assert!(r.is_none());
    }

    #[test]
    fn test_purge_and_collect() {
        let map: ShardedMap<i32> = ShardedMap::new(8);
        for i in 0..100 {
            map.insert(format!("key{}", i), i);
        }

        let mut kept = map.purge_and_collect(|v| v % 2 == 1);
        kept.sort();
        assert_eq!(kept.len(), 50);
        assert!(kept.iter().all(|v| v % 2 == 0));
        assert_eq!(map.len(), 50);
    }

    #[test]
    fn test_distribution() {
        let map: ShardedMap<i32> = ShardedMap::new(16);
        for i in 0..1000 {
            map.insert(format!("key{}", i), i);
        }

        let stats = map.stats();
        let max_count = *stats.shard_entry_counts.iter().max().unwrap();
        assert!(max_count < 200, "Uneven distribution: max shard has {} entries", max_count);
        assert_eq!(stats.total_entries, 1000);
        assert_eq!(stats.total_writes, 1000);
    }

    #[test]
    fn test_concurrent_access() {
        let map: Arc<ShardedMap<i32>> = Arc::new(ShardedMap::new(16));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let map = Arc::clone(&map);
                thread::spawn(move || {
                    for i in 0..1000 {
                        let key = format!("key-{}-{}", t, i);
                        map.insert(key.clone(), i);
                        map.get_cloned(&key);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(map.len(), 8000);
    }
}
