//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use storefront_sync::cache::CacheLayer;
use storefront_sync::config::{CacheConfig, SyncConfig};
use storefront_sync::engine::SyncEngine;
use storefront_sync::models::{Credentials, PlatformIdentity};
use storefront_sync::platform::InMemoryPlatform;
use storefront_sync::registry::{fixed_client, PlatformRegistry};

pub const SOURCE: &str = "shop-a";
pub const TARGET: &str = "shop-b";

/// Fixed timestamp on a test day
pub fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, hour, 0, 0)
        .single()
        .expect("valid timestamp")
}

/// Identity with no credentials
pub fn identity(tag: &str) -> PlatformIdentity {
    PlatformIdentity::new(tag, Credentials::new())
}

/// Empty in-memory source and target platforms
pub fn create_test_platforms() -> (Arc<InMemoryPlatform>, Arc<InMemoryPlatform>) {
    (
        Arc::new(InMemoryPlatform::new(SOURCE)),
        Arc::new(InMemoryPlatform::new(TARGET)),
    )
}

/// Registry with both platforms registered but not yet initialized
pub fn create_test_registry(
    cache: CacheLayer,
    a: &Arc<InMemoryPlatform>,
    b: &Arc<InMemoryPlatform>,
) -> Arc<PlatformRegistry> {
    let registry = Arc::new(PlatformRegistry::new(cache));
    registry.register(SOURCE, fixed_client(a.clone()));
    registry.register(TARGET, fixed_client(b.clone()));
    registry
}

/// Initialized engine over `a` and `b` without caching
pub async fn create_test_engine(
    config: SyncConfig,
    a: &Arc<InMemoryPlatform>,
    b: &Arc<InMemoryPlatform>,
) -> Arc<SyncEngine> {
    build_engine(CacheLayer::disabled(), config, a, b).await
}

/// Initialized engine over `a` and `b` sharing an in-memory cache
pub async fn create_cached_test_engine(
    config: SyncConfig,
    a: &Arc<InMemoryPlatform>,
    b: &Arc<InMemoryPlatform>,
) -> Arc<SyncEngine> {
    build_engine(CacheLayer::in_memory(&CacheConfig::default()), config, a, b).await
}

async fn build_engine(
    cache: CacheLayer,
    config: SyncConfig,
    a: &Arc<InMemoryPlatform>,
    b: &Arc<InMemoryPlatform>,
) -> Arc<SyncEngine> {
    let registry = create_test_registry(cache, a, b);
    let engine = Arc::new(SyncEngine::new(registry, config));
    assert!(
        engine.initialize(&identity(SOURCE), &identity(TARGET)).await,
        "Failed to initialize test engine"
    );
    engine
}
