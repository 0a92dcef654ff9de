//! Key-value caching used to avoid re-issuing identical generation requests.
//!
//! Two interchangeable implementations of the [`ContentCache`] contract:
//!
//! | Backend | Description |
//! |---------|-------------|
//! | [`MemoryCache`] | process-local, bounded, least-recently-used eviction |
//! | [`RedisCache`] | networked, server-side expiry, pipelined batches |
//!
//! Keys are namespaced (`namespace:key`); [`key::content_key`] derives short
//! deterministic keys from request content. The cache is a pure optimization:
//! networked per-operation failures degrade to misses rather than erroring,
//! so a dead backing store can never break the caller's generation path.

pub mod key;
pub mod memory;
pub mod redis;
pub mod store;

pub use key::{content_hash, content_key, KeyPurpose};
pub use memory::MemoryCache;
pub use redis::RedisCache;
pub use store::{CacheConfig, CacheStats, ContentCache};
