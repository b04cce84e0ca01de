//! Cache store trait and related types
//!
//! This module defines the CacheStore trait that backing stores implement,
//! as well as the associated types like CacheEntry, CacheMeta, and CacheStats.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::CacheError;
use crate::models::EntityType;

/// How quickly a kind of data goes stale; selects the TTL at insertion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Volatility {
    /// Inventory counts
    Realtime,
    /// Orders
    Short,
    /// Catalog data
    Medium,
    /// Reference data that rarely changes
    Long,
}

impl Volatility {
    /// Default category for listing an entity type
    pub fn for_entity(entity: EntityType) -> Self {
        match entity {
            EntityType::Inventory => Volatility::Realtime,
            EntityType::Orders => Volatility::Short,
            EntityType::Products | EntityType::Customers => Volatility::Medium,
        }
    }
}

/// A cached entry containing data and metadata
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached payload
    pub data: Bytes,
    /// Metadata about the cached entry
    pub meta: CacheMeta,
}

/// Metadata associated with a cache entry
#[derive(Debug, Clone, PartialEq)]
pub struct CacheMeta {
    /// Size of the cached data in bytes
    pub size: u64,
    /// Category that determined the TTL
    pub volatility: Volatility,
    /// When the entry was created
    pub created_at: Instant,
    /// First instant at which the entry is no longer served
    pub expires_at: Instant,
}

impl CacheMeta {
    /// Creates metadata for an entry inserted now
    pub fn new(size: u64, volatility: Volatility, ttl: Duration) -> Self {
        let created_at = Instant::now();
        Self {
            size,
            volatility,
            created_at,
            expires_at: created_at + ttl,
        }
    }

    /// Checks whether the entry has expired at `now`
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Checks whether the entry has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }
}

/// Statistics about cache usage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Total number of cached entries
    pub entries: u64,
    /// Total size of all cached data in bytes
    pub total_size_bytes: u64,
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses (including expired entries)
    pub misses: u64,
    /// Number of entries removed because they expired
    pub expirations: u64,
    /// Number of entries removed by explicit invalidation
    pub invalidations: u64,
}

impl CacheStats {
    /// Creates new empty cache statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Calculates the hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Trait for cache backing stores
///
/// Stores hold opaque payloads; TTL selection and (de)serialization live in
/// [`CacheLayer`](super::CacheLayer).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the name of this store
    fn name(&self) -> &str;

    /// Retrieves a live entry by key
    ///
    /// Returns `Ok(None)` for missing or expired entries.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Stores data under `key`, overwriting any existing entry
    async fn set(&self, key: &str, data: Bytes, meta: CacheMeta) -> Result<(), CacheError>;

    /// Deletes an entry; succeeds even if the key is absent
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Deletes every entry whose key starts with `prefix` and returns the count
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError>;

    /// Returns statistics about cache usage
    async fn stats(&self) -> CacheStats;

    /// Deletes all entries
    async fn purge(&self) -> Result<(), CacheError>;

    /// Deletes all expired entries and returns the count of deleted entries
    async fn purge_expired(&self) -> Result<u64, CacheError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: Volatility per entity type
    #[test]
    fn test_volatility_for_entity() {
        assert_eq!(
            Volatility::for_entity(EntityType::Inventory),
            Volatility::Realtime
        );
        assert_eq!(Volatility::for_entity(EntityType::Orders), Volatility::Short);
        assert_eq!(
            Volatility::for_entity(EntityType::Products),
            Volatility::Medium
        );
    }

    // Test 2: Expiry boundary is inclusive
    #[tokio::test(start_paused = true)]
    async fn test_cache_meta_expiry_boundary() {
        let meta = CacheMeta::new(16, Volatility::Realtime, Duration::from_secs(5));

        assert!(!meta.is_expired_at(meta.created_at + Duration::from_millis(4999)));
        assert!(meta.is_expired_at(meta.created_at + Duration::from_secs(5)));
        assert!(!meta.is_expired());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(meta.is_expired());
    }

    // Test 3: Zero TTL is expired immediately
    #[tokio::test(start_paused = true)]
    async fn test_cache_meta_zero_ttl() {
        let meta = CacheMeta::new(1, Volatility::Short, Duration::ZERO);
        assert!(meta.is_expired());
    }

    // Test 4: CacheStats hit rate
    #[test]
    fn test_cache_stats_hit_rate() {
        assert_eq!(CacheStats::new().hit_rate(), 0.0);

        let stats = CacheStats {
            hits: 75,
            misses: 25,
            ..Default::default()
        };
        assert_eq!(stats.hit_rate(), 75.0);
    }

    // Test 5: MockCacheStore can stand in for a store
    #[tokio::test]
    async fn test_mock_cache_store() {
        let mut mock = MockCacheStore::new();

        mock.expect_name().return_const("mock_cache".to_string());
        mock.expect_get()
            .with(mockall::predicate::eq("shop-a:products:list:00"))
            .returning(|_| Ok(None));
        mock.expect_delete_prefix().returning(|_| Ok(3));

        assert_eq!(mock.name(), "mock_cache");
        assert!(mock
            .get("shop-a:products:list:00")
            .await
            .unwrap()
            .is_none());
        assert_eq!(mock.delete_prefix("shop-a:").await.unwrap(), 3);
    }
}
