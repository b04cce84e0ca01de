//! TTL-aware response cache in front of platform reads
//!
//! The layer never makes a read fail: a store error degrades to a miss and the
//! caller's fetch runs as if nothing was cached.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::memory::MemoryCacheStore;
use super::traits::{CacheMeta, CacheStats, CacheStore, Volatility};
use crate::config::CacheConfig;
use crate::error::CacheError;

/// Deterministic fingerprint of a read request
///
/// Format: `{platform}:{entity}:{operation}:{hash}` where `hash` is the first
/// 16 hex characters of SHA-256 over the JSON-encoded parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Fingerprint a request
    pub fn for_request<P: Serialize + ?Sized>(
        platform: &str,
        entity: &str,
        operation: &str,
        params: &P,
    ) -> Result<Self, CacheError> {
        let encoded = serde_json::to_vec(params)?;
        let digest = hex::encode(Sha256::digest(&encoded));
        Ok(Self(format!(
            "{}{}:{}",
            Self::entity_prefix(platform, entity),
            operation,
            &digest[..16]
        )))
    }

    /// Prefix shared by every key for one platform and entity type
    pub fn entity_prefix(platform: &str, entity: &str) -> String {
        format!("{}:{}:", platform, entity)
    }

    /// The key as stored
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// TTL per volatility category
#[derive(Debug, Clone, PartialEq)]
pub struct TtlPolicy {
    realtime: Duration,
    short: Duration,
    medium: Duration,
    long: Duration,
}

impl TtlPolicy {
    /// Build from cache settings
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            realtime: Duration::from_secs(config.realtime_ttl_secs),
            short: Duration::from_secs(config.short_ttl_secs),
            medium: Duration::from_secs(config.medium_ttl_secs),
            long: Duration::from_secs(config.long_ttl_secs),
        }
    }

    /// TTL for a category
    pub fn ttl_for(&self, volatility: Volatility) -> Duration {
        match volatility {
            Volatility::Realtime => self.realtime,
            Volatility::Short => self.short,
            Volatility::Medium => self.medium,
            Volatility::Long => self.long,
        }
    }
}

/// Response cache shared by the platform handles
#[derive(Clone)]
pub struct CacheLayer {
    store: Arc<dyn CacheStore>,
    ttl: TtlPolicy,
    enabled: bool,
}

impl CacheLayer {
    /// Create a layer over an arbitrary store
    pub fn new(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            ttl: TtlPolicy::from_config(config),
            enabled: config.enabled,
        }
    }

    /// Create a layer over a fresh in-memory store
    pub fn in_memory(config: &CacheConfig) -> Self {
        Self::new(Arc::new(MemoryCacheStore::new()), config)
    }

    /// A layer that never caches
    pub fn disabled() -> Self {
        Self::in_memory(&CacheConfig {
            enabled: false,
            ..Default::default()
        })
    }

    /// Whether reads are cached
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// TTL policy in use
    pub fn ttl_policy(&self) -> &TtlPolicy {
        &self.ttl
    }

    /// Look up a live value; any store or decoding failure is a miss
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        if !self.enabled {
            return None;
        }

        let entry = match self.store.get(key.as_str()).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, store = self.store.name(), error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_slice(&entry.data) {
            Ok(value) => {
                debug!(key = %key, "Cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                let _ = self.store.delete(key.as_str()).await;
                None
            }
        }
    }

    /// Store a value with the TTL of `volatility`; failures are logged only
    pub async fn put<T: Serialize + ?Sized>(&self, key: &CacheKey, value: &T, volatility: Volatility) {
        if !self.enabled {
            return;
        }

        let data = match serde_json::to_vec(value) {
            Ok(data) => Bytes::from(data),
            Err(e) => {
                warn!(key = %key, error = %e, "Value not cacheable");
                return;
            }
        };

        let meta = CacheMeta::new(data.len() as u64, volatility, self.ttl.ttl_for(volatility));
        if let Err(e) = self.store.set(key.as_str(), data, meta).await {
            warn!(key = %key, store = self.store.name(), error = %e, "Cache write failed");
        }
    }

    /// Return the cached value or run `fetch` and cache its result
    ///
    /// Concurrent misses for the same key may each fetch. Fetch errors are
    /// returned unchanged and nothing is cached.
    pub async fn get_or_fetch<T, E, F, Fut>(
        &self,
        key: &CacheKey,
        volatility: Volatility,
        fetch: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get(key).await {
            return Ok(hit);
        }

        let value = fetch().await?;
        self.put(key, &value, volatility).await;
        Ok(value)
    }

    /// Drop a single entry
    pub async fn invalidate(&self, key: &CacheKey) {
        if let Err(e) = self.store.delete(key.as_str()).await {
            warn!(key = %key, error = %e, "Cache invalidation failed");
        }
    }

    /// Drop every entry whose key starts with `prefix`
    pub async fn invalidate_prefix(&self, prefix: &str) -> u64 {
        match self.store.delete_prefix(prefix).await {
            Ok(removed) => {
                debug!(prefix, removed, "Invalidated cache entries");
                removed
            }
            Err(e) => {
                warn!(prefix, error = %e, "Cache prefix invalidation failed");
                0
            }
        }
    }

    /// Store statistics
    pub async fn stats(&self) -> CacheStats {
        self.store.stats().await
    }

    /// Periodically purge expired entries until `shutdown` is cancelled
    pub fn spawn_sweeper(&self, every: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let store = self.store.clone();
        let every = every.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Cache sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        match store.purge_expired().await {
                            Ok(0) => {}
                            Ok(removed) => debug!(removed, "Swept expired cache entries"),
                            Err(e) => warn!(error = %e, "Cache sweep failed"),
                        }
                    }
                }
            }
        })
    }
}
