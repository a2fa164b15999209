//! Sharded Map Implementation
//!
//! Concurrent hashmap split into `N` shards, each behind its own `RwLock`.
//!
//! # Design
//!
//! - Readers of different shards never contend
//! - Power-of-2 shard count enables fast modulo via bitwise AND
//! - Conditional insert/remove run under the shard write lock, so the
//!   check and the mutation are one atomic step

use parking_lot::RwLock;
use std::borrow::Borrow;
use std::collections::hash_map::{DefaultHasher, Entry};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default shard count for the object store
pub const DEFAULT_SHARDS: usize = 64;

/// Single shard containing a hashmap and its entry count
pub struct Shard<K, V> {
    map: RwLock<HashMap<K, V>>,
    count: AtomicUsize,
}

impl<K, V> Default for Shard<K, V> {
    fn default() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            count: AtomicUsize::new(0),
        }
    }
}

impl<K, V> Shard<K, V> {
    /// Get the number of entries in this shard
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Check if the shard is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash, V> Shard<K, V> {
    fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.map.read().get(key).cloned()
    }

    fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.read().contains_key(key)
    }

    fn insert_if_absent(&self, key: K, value: V) -> Result<(), V> {
        let mut guard = self.map.write();
        match guard.entry(key) {
            Entry::Occupied(_) => Err(value),
            Entry::Vacant(slot) => {
                slot.insert(value);
                self.count.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    fn remove_if<Q, F>(&self, key: &Q, predicate: F) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&V) -> bool,
    {
        let mut guard = self.map.write();
        if !guard.get(key).is_some_and(predicate) {
            return None;
        }
        let removed = guard.remove(key);
        if removed.is_some() {
            self.count.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    fn keys_where<F>(&self, predicate: &F) -> Vec<K>
    where
        K: Clone,
        F: Fn(&V) -> bool,
    {
        self.map
            .read()
            .iter()
            .filter(|(_, v)| predicate(*v))
            .map(|(k, _)| k.clone())
            .collect()
    }
}

/// Sharded map with a compile-time shard count
pub struct ShardedMap<K, V, const N: usize = DEFAULT_SHARDS> {
    shards: Box<[Shard<K, V>]>,
}

impl<K, V, const N: usize> Default for ShardedMap<K, V, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, const N: usize> ShardedMap<K, V, N> {
    /// Create a new sharded map
    pub fn new() -> Self {
        debug_assert!(N.is_power_of_two(), "shard count must be a power of two");
        let shards: Vec<Shard<K, V>> = (0..N).map(|_| Shard::default()).collect();
        Self {
            shards: shards.into_boxed_slice(),
        }
    }

    /// Get total number of entries across all shards
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    /// Check if the map is empty
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.is_empty())
    }

    #[cfg(test)]
    fn shard_entry_counts(&self) -> Vec<usize> {
        self.shards.iter().map(|s| s.len()).collect()
    }
}

impl<K: Eq + Hash, V, const N: usize> ShardedMap<K, V, N> {
    #[inline]
    fn shard_for<Q>(&self, key: &Q) -> &Shard<K, V>
    where
        Q: Hash + ?Sized,
    {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) & (N - 1)]
    }

    /// Get a clone of the value stored under `key`
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.shard_for(key).get(key)
    }

    /// Check if a key exists
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.shard_for(key).contains_key(key)
    }

    /// Insert only if `key` is vacant; hands the value back otherwise
    pub fn insert_if_absent(&self, key: K, value: V) -> Result<(), V> {
        self.shard_for(&key).insert_if_absent(key, value)
    }

    /// Remove a value only if `predicate` holds for it under the write lock
    pub fn remove_if<Q, F>(&self, key: &Q, predicate: F) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&V) -> bool,
    {
        self.shard_for(key).remove_if(key, predicate)
    }

    /// Snapshot the keys whose values match `predicate`.
    ///
    /// Each shard is read under its own lock; the result is not a global
    /// snapshot, so callers re-check with [`remove_if`](Self::remove_if).
    pub fn keys_where<F>(&self, predicate: F) -> Vec<K>
    where
        K: Clone,
        F: Fn(&V) -> bool,
    {
        self.shards
            .iter()
            .flat_map(|shard| shard.keys_where(&predicate))
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
