//! Response caching for platform reads
//!
//! This module provides the [`CacheStore`] trait, an in-memory store, and the
//! [`CacheLayer`] that chooses TTLs by data volatility.

pub mod layer;
pub mod memory;
pub mod traits;

pub use layer::{CacheKey, CacheLayer, TtlPolicy};
pub use memory::MemoryCacheStore;
pub use traits::{CacheEntry, CacheMeta, CacheStats, CacheStore, Volatility};
