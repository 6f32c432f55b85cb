use crate::entry::CacheEntry;
use async_trait::async_trait;
use respcache_store::{CacheStats, ShardedCache, SieveCache};
use std::time::Duration;

/// Key-value backend holding [`CacheEntry`] values.
///
/// Implementations handle their own concurrency; the middleware never locks.
/// There is no partial update: `set` always replaces the whole entry.
#[async_trait]
pub trait ResponseCacheStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Option<CacheEntry>;

    async fn set(&self, key: &str, entry: CacheEntry, valid_for: Duration);
}

/// In-process store backed by a sharded SIEVE cache.
pub struct MemoryResponseCache {
    inner: ShardedCache<SieveCache<CacheEntry>>,
}

impl MemoryResponseCache {
    /// `capacity` is the total number of entries across all shards.
    pub fn new(capacity: usize) -> Self {
        let inner = ShardedCache::new(capacity, SieveCache::new);
        tracing::info!(policy = inner.name(), capacity, "response cache store initialized");
        Self { inner }
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn policy_name(&self) -> &'static str {
        self.inner.name()
    }
}

#[async_trait]
impl ResponseCacheStore for MemoryResponseCache {
    async fn get(&self, key: &str) -> Option<CacheEntry> {
        self.inner.get(key).map(|entry| (*entry).clone())
    }

    async fn set(&self, key: &str, entry: CacheEntry, valid_for: Duration) {
        self.inner.insert(key.to_owned(), entry, valid_for);
    }
}

#[async_trait]
impl<T: ResponseCacheStore + ?Sized> ResponseCacheStore for std::sync::Arc<T> {
    async fn get(&self, key: &str) -> Option<CacheEntry> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, entry: CacheEntry, valid_for: Duration) {
        (**self).set(key, entry, valid_for).await
    }
}
