//! Expiring key/value store with least-recently-used eviction.
//!
//! Entries expire `ttl` after insertion. Expired entries are dropped lazily on
//! lookup and in bulk by [`TtlCache::sweep`]. When the cache is full, inserting
//! a new key evicts the least recently used entry first.
//!
//! The cache is not synchronized; owners wrap it in a lock.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    /// Position in the recency index; larger is more recent.
    stamp: u64,
}

/// TTL cache with LRU eviction at capacity.
pub struct TtlCache<K, V> {
    entries: HashMap<K, Entry<V>>,
    recency: BTreeMap<u64, K>,
    next_stamp: u64,
    capacity: usize,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates an empty cache. A capacity of zero is treated as one.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            next_stamp: 0,
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Returns a clone of the value if present and younger than the TTL.
    ///
    /// A hit marks the entry most recently used; an expired entry is removed.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let now = Instant::now();
        let expired = {
            let entry = self.entries.get(key)?;
            now.saturating_duration_since(entry.inserted_at) >= self.ttl
        };

        if expired {
            self.remove(key);
            return None;
        }

        let stamp = self.bump();
        let entry = self.entries.get_mut(key)?;
        self.recency.remove(&entry.stamp);
        entry.stamp = stamp;
        self.recency.insert(stamp, key.clone());
        Some(entry.value.clone())
    }

    /// Inserts or replaces `key`, marking it most recently used.
    ///
    /// Inserting a new key into a full cache first evicts the least recently
    /// used entry.
    pub fn set(&mut self, key: K, value: V) {
        let stamp = self.bump();
        let inserted_at = Instant::now();

        if let Some(entry) = self.entries.get_mut(&key) {
            self.recency.remove(&entry.stamp);
            entry.value = value;
            entry.inserted_at = inserted_at;
            entry.stamp = stamp;
            self.recency.insert(stamp, key);
            return;
        }

        if self.entries.len() >= self.capacity {
            if let Some((_, lru)) = self.recency.pop_first() {
                self.entries.remove(&lru);
                log::trace!("[Cache] Evicted least recently used entry");
            }
        }

        self.recency.insert(stamp, key.clone());
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at,
                stamp,
            },
        );
    }

    /// Removes every entry whose age has reached the TTL.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&mut self) -> usize {
        let now = Instant::now();
        let ttl = self.ttl;
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.inserted_at) >= ttl)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.stamp);
        Some(entry.value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn bump(&mut self) -> u64 {
        self.next_stamp += 1;
        self.next_stamp
    }
}
