use std::sync::Arc;
use std::time::{Duration, Instant};

/// A stored value plus the bookkeeping needed to expire it.
#[derive(Debug)]
pub struct Expiring<V> {
    pub value: Arc<V>,
    pub inserted_at: Instant,
    pub ttl: Duration,
}

impl<V> Expiring<V> {
    pub fn new(value: V, ttl: Duration) -> Self {
        Self {
            value: Arc::new(value),
            inserted_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }
}

/// Snapshot of store statistics.
#[derive(Clone, Debug, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub current_size: usize,
    pub capacity: usize,
}

/// Single-threaded bounded map with an eviction policy.
///
/// All methods take `&mut self`; thread safety is handled by [`crate::ShardedCache`].
pub trait EvictionPolicy: Send {
    type Value: Send + Sync;

    /// Look up a key. Expired entries are dropped and reported as misses.
    fn get(&mut self, key: &str) -> Option<Arc<Self::Value>>;

    /// Insert or overwrite a key. May evict another entry when at capacity.
    fn insert(&mut self, key: String, value: Expiring<Self::Value>);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> usize;

    /// Human-readable name of the eviction policy.
    fn name(&self) -> &'static str;

    fn stats(&self) -> CacheStats;
}
