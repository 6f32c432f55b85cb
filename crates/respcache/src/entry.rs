use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use std::sync::Arc;
use std::time::SystemTime;

/// A response as persisted in the store.
///
/// Either `body` holds the bytes inline, or it is `None` and a
/// [`CachedResponseBody`] lives in the store under `body_key_prefix`.
#[derive(Clone, Debug)]
pub struct CachedResponse {
    pub created: SystemTime,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body_key_prefix: String,
    pub body: Option<Bytes>,
}

/// Body bytes stored apart from their [`CachedResponse`].
#[derive(Clone, Debug)]
pub struct CachedResponseBody {
    pub body: Bytes,
}

/// Stored under the base key when responses vary by request headers or query
/// parameters. Name lists are upper-cased and sorted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedVaryByRules {
    pub vary_by_key_prefix: String,
    pub headers: Vec<String>,
    pub query_keys: Vec<String>,
}

/// Everything the store can hold.
#[derive(Clone, Debug)]
pub enum CacheEntry {
    Response(Arc<CachedResponse>),
    Body(Arc<CachedResponseBody>),
    VaryByRules(Arc<CachedVaryByRules>),
}

impl From<CachedResponse> for CacheEntry {
    fn from(value: CachedResponse) -> Self {
        CacheEntry::Response(Arc::new(value))
    }
}

impl From<CachedResponseBody> for CacheEntry {
    fn from(value: CachedResponseBody) -> Self {
        CacheEntry::Body(Arc::new(value))
    }
}

impl From<CachedVaryByRules> for CacheEntry {
    fn from(value: CachedVaryByRules) -> Self {
        CacheEntry::VaryByRules(Arc::new(value))
    }
}
