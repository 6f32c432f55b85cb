use crate::traits::{CacheStats, EvictionPolicy, Expiring};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// Number of shards. Must be a power of two for fast modulo via bitmask.
const NUM_SHARDS: usize = 64;
const SHARD_MASK: u64 = (NUM_SHARDS as u64) - 1;

/// Thread-safe sharded store.
///
/// Keys are spread over 64 independent shards, each behind its own `RwLock`,
/// so concurrent requests for different keys rarely contend. Shard selection
/// uses `ahash` with fixed seeds, which keeps placement stable across runs.
pub struct ShardedCache<T: EvictionPolicy> {
    shards: Box<[RwLock<T>]>,
    name: &'static str,
}

impl<T: EvictionPolicy> ShardedCache<T> {
    /// `make_shard` is called once per shard with `total_capacity / 64` (at least 1).
    pub fn new<F>(total_capacity: usize, make_shard: F) -> Self
    where
        F: Fn(usize) -> T,
    {
        let per_shard = (total_capacity / NUM_SHARDS).max(1);
        let shards: Box<[RwLock<T>]> = (0..NUM_SHARDS)
            .map(|_| RwLock::new(make_shard(per_shard)))
            .collect();
        let name = shards[0].read().name();

        Self { shards, name }
    }

    #[inline]
    fn shard(&self, key: &str) -> &RwLock<T> {
        let hash = ahash::RandomState::with_seeds(1, 2, 3, 4).hash_one(key);
        &self.shards[(hash & SHARD_MASK) as usize]
    }

    /// Hits update the visited bit and counters, so this takes the write lock.
    pub fn get(&self, key: &str) -> Option<Arc<T::Value>> {
        self.shard(key).write().get(key)
    }

    /// Insert or overwrite `key`, expiring after `ttl`.
    pub fn insert(&self, key: String, value: T::Value, ttl: Duration) {
        let entry = Expiring::new(value, ttl);
        self.shard(&key).write().insert(key, entry);
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().is_empty())
    }

    pub fn capacity(&self) -> usize {
        self.shards.iter().map(|s| s.read().capacity()).sum()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Aggregate statistics across all shards.
    pub fn stats(&self) -> CacheStats {
        self.shards.iter().fold(CacheStats::default(), |mut total, shard| {
            let s = shard.read().stats();
            total.hits += s.hits;
            total.misses += s.misses;
            total.evictions += s.evictions;
            total.expirations += s.expirations;
            total.current_size += s.current_size;
            total.capacity += s.capacity;
            total
        })
    }
}
