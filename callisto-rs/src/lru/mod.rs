//! Provides the LRU machinery underneath each cache namespace.
//!
//! An LRU cache drops the least recently used entry once it is about to grow beyond its limits.
//!
//! The [lru_cache](lru_cache) module contains the raw, single-threaded recency map with an
//! eviction callback. The [cache](cache) module wraps it with byte accounting, statistics and a
//! mutex - this wrapper is what a [Group](crate::group::Group) actually uses for its main and
//! hot sub-caches.
pub mod cache;
mod lru_cache;

pub use cache::Cache;
pub use cache::CacheStats;
pub use lru_cache::EvictionCallback;
pub use lru_cache::LruCache;
