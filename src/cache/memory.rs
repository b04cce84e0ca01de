//! In-process cache store
//!
//! Entries live in a `HashMap` behind an async `RwLock`. Expired entries are
//! removed lazily on read and eagerly by [`CacheStore::purge_expired`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::CacheError;

use super::traits::{CacheEntry, CacheMeta, CacheStats, CacheStore};

#[derive(Default)]
struct StoreState {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
    expirations: u64,
    invalidations: u64,
}

/// Memory-backed cache store
#[derive(Clone, Default)]
pub struct MemoryCacheStore {
    state: Arc<RwLock<StoreState>>,
}

impl MemoryCacheStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let mut state = self.state.write().await;
        let now = Instant::now();

        let lookup = state
            .entries
            .get(key)
            .map(|e| (e.meta.is_expired_at(now), e.clone()));

        match lookup {
            Some((false, entry)) => {
                state.hits += 1;
                Ok(Some(entry))
            }
            Some((true, _)) => {
                state.entries.remove(key);
                state.expirations += 1;
                state.misses += 1;
                Ok(None)
            }
            None => {
                state.misses += 1;
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, data: Bytes, meta: CacheMeta) -> Result<(), CacheError> {
        let mut state = self.state.write().await;
        state
            .entries
            .insert(key.to_string(), CacheEntry { data, meta });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut state = self.state.write().await;
        if state.entries.remove(key).is_some() {
            state.invalidations += 1;
        }
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let mut state = self.state.write().await;
        let before = state.entries.len();
        state.entries.retain(|key, _| !key.starts_with(prefix));
        let removed = (before - state.entries.len()) as u64;
        state.invalidations += removed;
        Ok(removed)
    }

    async fn stats(&self) -> CacheStats {
        let state = self.state.read().await;
        CacheStats {
            entries: state.entries.len() as u64,
            total_size_bytes: state.entries.values().map(|e| e.meta.size).sum(),
            hits: state.hits,
            misses: state.misses,
            expirations: state.expirations,
            invalidations: state.invalidations,
        }
    }

    async fn purge(&self) -> Result<(), CacheError> {
        let mut state = self.state.write().await;
        state.entries.clear();
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        let mut state = self.state.write().await;
        let now = Instant::now();
        let before = state.entries.len();

        state.entries.retain(|_, entry| !entry.meta.is_expired_at(now));

        let removed = (before - state.entries.len()) as u64;
        state.expirations += removed;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Volatility;
    use std::time::Duration;

    fn meta(len: usize, ttl_secs: u64) -> CacheMeta {
        CacheMeta::new(len as u64, Volatility::Medium, Duration::from_secs(ttl_secs))
    }

    // Test 1: Set and get entry
    #[tokio::test]
    async fn test_set_and_get_entry() {
        let store = MemoryCacheStore::new();
        let data = Bytes::from("[1,2,3]");

        store.set("k", data.clone(), meta(7, 60)).await.unwrap();

        let entry = store.get("k").await.unwrap().unwrap();
        assert_eq!(entry.data, data);
        assert_eq!(entry.meta.volatility, Volatility::Medium);
    }

    // Test 2: Missing key is a miss
    #[tokio::test]
    async fn test_get_nonexistent_key() {
        let store = MemoryCacheStore::new();
        assert!(store.get("nope").await.unwrap().is_none());
        assert_eq!(store.stats().await.misses, 1);
    }

    // Test 3: Expired entries are removed on read
    #[tokio::test(start_paused = true)]
    async fn test_lazy_expiration() {
        let store = MemoryCacheStore::new();
        store.set("k", Bytes::from("x"), meta(1, 5)).await.unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;

        assert!(store.get("k").await.unwrap().is_none());
        let stats = store.stats().await;
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.expirations, 1);
    }

    // Test 4: Prefix deletion only touches matching keys
    #[tokio::test]
    async fn test_delete_prefix() {
        let store = MemoryCacheStore::new();
        for key in [
            "shop-a:products:list:1",
            "shop-a:products:list:2",
            "shop-a:inventory:list:1",
            "shop-b:products:list:1",
        ] {
            store.set(key, Bytes::from("x"), meta(1, 60)).await.unwrap();
        }

        let removed = store.delete_prefix("shop-a:products:").await.unwrap();
        assert_eq!(removed, 2);

        let stats = store.stats().await;
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.invalidations, 2);
        assert!(store.get("shop-b:products:list:1").await.unwrap().is_some());
    }

    // Test 5: Delete entry
    #[tokio::test]
    async fn test_delete_entry() {
        let store = MemoryCacheStore::new();
        store.set("k", Bytes::from("x"), meta(1, 60)).await.unwrap();

        store.delete("k").await.unwrap();
        store.delete("never-there").await.unwrap();

        assert!(store.get("k").await.unwrap().is_none());
        assert_eq!(store.stats().await.invalidations, 1);
    }

    // Test 6: Purge expired entries
    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = MemoryCacheStore::new();
        store.set("short", Bytes::from("a"), meta(1, 1)).await.unwrap();
        store.set("long", Bytes::from("bb"), meta(2, 600)).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        let stats = store.stats().await;
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.total_size_bytes, 2);
    }

    // Test 7: Purge all entries
    #[tokio::test]
    async fn test_purge() {
        let store = MemoryCacheStore::new();
        for i in 0..5 {
            store
                .set(&format!("k{}", i), Bytes::from("x"), meta(1, 60))
                .await
                .unwrap();
        }
        assert_eq!(store.stats().await.entries, 5);

        store.purge().await.unwrap();
        assert_eq!(store.stats().await.entries, 0);
    }
}
