//! Shared HTTP response caching as a [`tower`] middleware.
//!
//! ```ignore
//! let layer = ResponseCachingLayer::new(
//!     MemoryResponseCache::new(10_000),
//!     ResponseCachingOptions::default(),
//! )?;
//! let service = ServiceBuilder::new().layer(layer).service(app);
//! ```
//!
//! Responses are stored according to their `Cache-Control`, `Expires` and
//! `Vary` headers and served back with an `Age` header while fresh.

pub mod body;
pub mod capture;
pub mod conditional;
pub mod context;
pub mod entry;
pub mod error;
pub mod headers;
pub mod keys;
pub mod middleware;
pub mod options;
pub mod policy;
pub mod store;
pub mod vary;

pub use body::ResponseBody;
pub use context::ResponseCachingContext;
pub use entry::{CacheEntry, CachedResponse, CachedResponseBody, CachedVaryByRules};
pub use error::BuildError;
pub use keys::{DefaultKeyProvider, ResponseCacheKeyProvider};
pub use middleware::{ResponseCaching, ResponseCachingLayer, ResponseCachingLayerBuilder};
pub use options::ResponseCachingOptions;
pub use policy::{DefaultResponseCachingPolicy, ResponseCachingPolicy};
pub use store::{MemoryResponseCache, ResponseCacheStore};
pub use vary::VaryByQueryKeys;
