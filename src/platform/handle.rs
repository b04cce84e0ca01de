//! Rate-limited, cached access to one platform
//!
//! A [`PlatformHandle`] bundles a client with its own limiter and the shared
//! cache layer. Every remote call goes through the limiter; reads go through
//! the cache and successful writes invalidate that entity's cached reads.

use std::sync::Arc;

use tracing::{debug, warn};

use super::traits::PlatformClient;
use crate::cache::{CacheKey, CacheLayer, Volatility};
use crate::error::PlatformError;
use crate::models::{Capabilities, CanonicalRecord, EntityFilter, EntityType, RateLimitState};
use crate::ratelimit::RateLimiter;

/// Handle to an initialized platform
#[derive(Clone)]
pub struct PlatformHandle {
    tag: String,
    client: Arc<dyn PlatformClient>,
    limiter: Arc<RateLimiter>,
    cache: CacheLayer,
}

impl std::fmt::Debug for PlatformHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformHandle")
            .field("tag", &self.tag)
            .field("cache_enabled", &self.cache.is_enabled())
            .finish()
    }
}

impl PlatformHandle {
    /// Bundle a client with its limiter and the cache layer
    pub fn new(
        tag: impl Into<String>,
        client: Arc<dyn PlatformClient>,
        limiter: Arc<RateLimiter>,
        cache: CacheLayer,
    ) -> Self {
        Self {
            tag: tag.into(),
            client,
            limiter,
            cache,
        }
    }

    /// Platform tag
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Underlying client
    pub fn client(&self) -> &Arc<dyn PlatformClient> {
        &self.client
    }

    /// This platform's limiter
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Capabilities reported by the client
    pub fn capabilities(&self) -> Capabilities {
        self.client.capabilities()
    }

    /// Limiter state snapshot
    pub fn rate_limit_state(&self) -> RateLimitState {
        self.limiter.state()
    }

    /// Whether the platform handles `entity` at all
    pub fn supports(&self, entity: EntityType) -> bool {
        self.capabilities().supports(entity.as_str())
    }

    fn ensure_supported(&self, entity: EntityType) -> Result<(), PlatformError> {
        if self.supports(entity) {
            Ok(())
        } else {
            Err(PlatformError::Unsupported(format!(
                "{} does not support {}",
                self.tag, entity
            )))
        }
    }

    /// Authenticate through the limiter
    pub async fn authenticate(&self) -> Result<(), PlatformError> {
        self.limiter.retry(|| self.client.authenticate()).await
    }

    /// Health probe; consumes one request slot
    pub async fn check_connection(&self) -> bool {
        self.limiter.acquire().await;
        self.client.check_connection().await
    }

    /// List records, served from cache when fresh
    pub async fn fetch_entities(
        &self,
        entity: EntityType,
        filter: &EntityFilter,
    ) -> Result<Vec<CanonicalRecord>, PlatformError> {
        self.ensure_supported(entity)?;

        let fetch = || self.limiter.retry(|| self.client.get_entities(entity, filter));

        match CacheKey::for_request(&self.tag, entity.as_str(), "list", filter) {
            Ok(key) => {
                self.cache
                    .get_or_fetch(&key, Volatility::for_entity(entity), fetch)
                    .await
            }
            Err(e) => {
                warn!(platform = %self.tag, entity = %entity, error = %e, "Bypassing cache for uncacheable request");
                fetch().await
            }
        }
    }

    /// Fetch one record, served from cache when fresh
    pub async fn fetch_entity(
        &self,
        entity: EntityType,
        id: &str,
    ) -> Result<CanonicalRecord, PlatformError> {
        self.ensure_supported(entity)?;

        let fetch = || self.limiter.retry(|| self.client.get_entity(entity, id));

        match CacheKey::for_request(&self.tag, entity.as_str(), "get", id) {
            Ok(key) => {
                self.cache
                    .get_or_fetch(&key, Volatility::for_entity(entity), fetch)
                    .await
            }
            Err(_) => fetch().await,
        }
    }

    /// Create a record and invalidate cached reads of that entity type
    pub async fn create_entity(
        &self,
        entity: EntityType,
        record: &CanonicalRecord,
    ) -> Result<CanonicalRecord, PlatformError> {
        self.ensure_supported(entity)?;

        let created = self
            .limiter
            .retry(|| self.client.create_entity(entity, record))
            .await?;

        debug!(platform = %self.tag, entity = %entity, key = %record.key, "Created record");
        self.invalidate(entity).await;
        Ok(created)
    }

    /// Update a record and invalidate cached reads of that entity type
    pub async fn update_entity(
        &self,
        entity: EntityType,
        id: &str,
        record: &CanonicalRecord,
    ) -> Result<CanonicalRecord, PlatformError> {
        self.ensure_supported(entity)?;

        let updated = self
            .limiter
            .retry(|| self.client.update_entity(entity, id, record))
            .await?;

        debug!(platform = %self.tag, entity = %entity, key = %record.key, "Updated record");
        self.invalidate(entity).await;
        Ok(updated)
    }

    /// Set a stock level and invalidate cached inventory reads
    pub async fn update_inventory(
        &self,
        sku: &str,
        quantity: i64,
        location_id: Option<&str>,
    ) -> Result<bool, PlatformError> {
        self.ensure_supported(EntityType::Inventory)?;

        let location = location_id.map(str::to_string);
        let applied = self
            .limiter
            .retry(|| self.client.update_inventory(sku, quantity, location.clone()))
            .await?;

        debug!(platform = %self.tag, sku, quantity, applied, "Updated inventory");
        self.invalidate(EntityType::Inventory).await;
        Ok(applied)
    }

    /// Drop cached reads of `entity` for this platform
    pub async fn invalidate(&self, entity: EntityType) -> u64 {
        self.cache
            .invalidate_prefix(&CacheKey::entity_prefix(&self.tag, entity.as_str()))
            .await
    }
}
