//! Sharded in-memory store used as the default backend of the response cache.
//!
//! Values are held behind `Arc` and carry their own time-to-live. Capacity is
//! bounded per shard; when a shard is full the SIEVE policy picks a victim.

pub mod arena;
pub mod sharded;
pub mod sieve;
pub mod traits;

pub use sharded::ShardedCache;
pub use sieve::SieveCache;
pub use traits::{CacheStats, EvictionPolicy, Expiring};
