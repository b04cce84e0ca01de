//! Platform registry
//!
//! Owns the registered client factories and the set of authenticated
//! platforms, and fans operations out to active platforms concurrently.
//! Each platform gets its own [`RateLimiter`] at initialization; all platforms
//! share one [`CacheLayer`] whose keys are namespaced by platform tag.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::CacheLayer;
use crate::config::{Config, PlatformConfig, RateLimitConfig, RetryConfig};
use crate::error::{ConfigError, PlatformError, RegistryError};
use crate::models::PlatformIdentity;
use crate::platform::{InMemoryPlatform, PlatformClient, PlatformHandle, RestPlatform};
use crate::ratelimit::RateLimiter;

/// Outcome of building a client
pub type BuildResult = Result<Arc<dyn PlatformClient>, PlatformError>;

/// Builds a client for a platform identity
///
/// The limiter passed in is the one the registry will route the client's calls
/// through; adapters that observe rate-limit headers should report to it.
pub type ClientFactory = Arc<dyn Fn(&PlatformIdentity, Arc<RateLimiter>) -> BuildResult + Send + Sync>;

/// Factory that always hands out the same client
pub fn fixed_client(client: Arc<dyn PlatformClient>) -> ClientFactory {
    Arc::new(move |_: &PlatformIdentity, _: Arc<RateLimiter>| -> BuildResult { Ok(client.clone()) })
}

/// Factory for one of the bundled adapter kinds
///
/// * `memory`: in-process platform, seeded from the `seed_file` option if set
/// * `rest`: canonical JSON over REST, see [`RestPlatform::from_options`]
pub fn builtin_factory(tag: &str, platform: &PlatformConfig) -> Result<ClientFactory, ConfigError> {
    let options = platform.options.clone();
    match platform.kind.as_str() {
        "memory" => {
            let seed = options.get("seed_file").cloned();
            Ok(Arc::new(
                move |identity: &PlatformIdentity, limiter: Arc<RateLimiter>| -> BuildResult {
                    let client = match &seed {
                        Some(path) => InMemoryPlatform::from_seed_file(identity.tag.as_str(), path)?,
                        None => InMemoryPlatform::new(identity.tag.as_str()),
                    };
                    Ok(Arc::new(client.with_limiter(limiter)))
                },
            ))
        }
        "rest" => Ok(Arc::new(
            move |identity: &PlatformIdentity, limiter: Arc<RateLimiter>| -> BuildResult {
                Ok(Arc::new(RestPlatform::from_options(identity, &options, limiter)?))
            },
        )),
        other => Err(ConfigError::InvalidValue(format!(
            "unknown platform kind '{}' for '{}'",
            other, tag
        ))),
    }
}

/// Per-platform fan-out results, ordered by tag
pub type FanOutResults<T> = BTreeMap<String, Result<T, PlatformError>>;

struct Registration {
    factory: ClientFactory,
    limits: RateLimitConfig,
    retry: RetryConfig,
}

/// Registry of platform factories and active platforms
pub struct PlatformRegistry {
    cache: CacheLayer,
    registrations: RwLock<HashMap<String, Registration>>,
    active: RwLock<BTreeMap<String, PlatformHandle>>,
}

impl std::fmt::Debug for PlatformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformRegistry")
            .field("registered", &self.registered_tags())
            .field("active", &self.active_tags())
            .finish()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl PlatformRegistry {
    /// Create an empty registry sharing `cache` across platforms
    pub fn new(cache: CacheLayer) -> Self {
        Self {
            cache,
            registrations: RwLock::new(HashMap::new()),
            active: RwLock::new(BTreeMap::new()),
        }
    }

    /// Build a registry with every enabled platform in `config` registered
    ///
    /// Sync endpoints with no platform entry get an empty in-memory platform.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let registry = Self::new(CacheLayer::in_memory(&config.cache));

        for (tag, platform) in &config.platforms {
            if !platform.enabled {
                info!(platform = %tag, "Platform disabled by configuration");
                continue;
            }
            registry.register_with_limits(
                tag.as_str(),
                builtin_factory(tag, platform)?,
                platform.rate_limit.clone(),
                platform.retry.clone(),
            );
        }

        for tag in [&config.sync.source, &config.sync.target] {
            if !config.platforms.contains_key(tag) {
                debug!(platform = %tag, "No platform configured, using an empty in-memory platform");
                registry.register(tag.as_str(), builtin_factory(tag, &PlatformConfig::default())?);
            }
        }

        Ok(registry)
    }

    /// Shared cache layer
    pub fn cache(&self) -> &CacheLayer {
        &self.cache
    }

    /// Associate `tag` with a factory using default limits
    ///
    /// Nothing is instantiated until [`PlatformRegistry::initialize`].
    pub fn register(&self, tag: impl Into<String>, factory: ClientFactory) {
        self.register_with_limits(tag, factory, RateLimitConfig::default(), RetryConfig::default());
    }

    /// Associate `tag` with a factory and its rate-limit and retry settings
    pub fn register_with_limits(
        &self,
        tag: impl Into<String>,
        factory: ClientFactory,
        limits: RateLimitConfig,
        retry: RetryConfig,
    ) {
        let tag = tag.into();
        debug!(platform = %tag, "Registered platform factory");
        write(&self.registrations).insert(
            tag,
            Registration {
                factory,
                limits,
                retry,
            },
        );
    }

    /// Tags with a registered factory
    pub fn registered_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = read(&self.registrations).keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Instantiate and authenticate the platform named by `identity.tag`
    ///
    /// Returns false if the tag is unknown, the factory fails or authentication
    /// fails. Nothing is added to the active set unless authentication succeeds.
    pub async fn initialize(&self, identity: &PlatformIdentity) -> bool {
        let tag = identity.tag.as_str();

        let built = {
            let registrations = read(&self.registrations);
            match registrations.get(tag) {
                Some(reg) => {
                    let limiter = Arc::new(RateLimiter::new(tag, reg.limits.clone(), reg.retry.clone()));
                    (reg.factory)(identity, limiter.clone()).map(|client| (client, limiter))
                }
                None => {
                    warn!(platform = %tag, "Cannot initialize unregistered platform");
                    return false;
                }
            }
        };

        let (client, limiter) = match built {
            Ok(parts) => parts,
            Err(e) => {
                warn!(platform = %tag, error = %e, "Failed to construct platform client");
                return false;
            }
        };

        let handle = PlatformHandle::new(tag, client, limiter, self.cache.clone());
        match handle.authenticate().await {
            Ok(()) => {
                write(&self.active).insert(tag.to_string(), handle);
                info!(platform = %tag, "Platform initialized");
                true
            }
            Err(e) => {
                warn!(platform = %tag, error = %e, "Platform authentication failed");
                false
            }
        }
    }

    /// Handle for an active platform
    pub fn handle(&self, tag: &str) -> Option<PlatformHandle> {
        read(&self.active).get(tag).cloned()
    }

    /// Handle for an active platform, or why there is none
    pub fn require(&self, tag: &str) -> Result<PlatformHandle, RegistryError> {
        if let Some(handle) = self.handle(tag) {
            return Ok(handle);
        }
        if read(&self.registrations).contains_key(tag) {
            Err(RegistryError::NotActive(tag.to_string()))
        } else {
            Err(RegistryError::NotRegistered(tag.to_string()))
        }
    }

    /// Tags of active platforms, sorted
    pub fn active_tags(&self) -> Vec<String> {
        read(&self.active).keys().cloned().collect()
    }

    /// Whether `tag` is in the active set
    pub fn is_active(&self, tag: &str) -> bool {
        read(&self.active).contains_key(tag)
    }

    /// Errors unless at least one platform is active
    pub fn ensure_any_active(&self) -> Result<(), RegistryError> {
        if read(&self.active).is_empty() {
            Err(RegistryError::NoActivePlatforms)
        } else {
            Ok(())
        }
    }

    /// Remove `tag` from the active set; it stays registered
    pub fn deactivate(&self, tag: &str) -> bool {
        let removed = write(&self.active).remove(tag).is_some();
        if removed {
            warn!(platform = %tag, "Platform deactivated");
        }
        removed
    }

    /// Probe every active platform concurrently
    ///
    /// A probe that fails or panics is reported as `false` for that platform.
    pub async fn check_all_connections(&self) -> BTreeMap<String, bool> {
        let tasks: Vec<(String, JoinHandle<bool>)> = self
            .snapshot(None)
            .into_iter()
            .map(|handle| {
                let tag = handle.tag().to_string();
                (tag, tokio::spawn(async move { handle.check_connection().await }))
            })
            .collect();

        let mut results = BTreeMap::new();
        for (tag, task) in tasks {
            let connected = task.await.unwrap_or(false);
            if !connected {
                warn!(platform = %tag, "Connection check failed");
            }
            results.insert(tag, connected);
        }
        results
    }

    /// Run `op` against every active platform concurrently
    pub async fn for_each_active<F, Fut, T>(&self, op: F) -> FanOutResults<T>
    where
        F: Fn(PlatformHandle) -> Fut,
        Fut: Future<Output = Result<T, PlatformError>> + Send + 'static,
        T: Send + 'static,
    {
        self.for_each_active_until(&CancellationToken::new(), op).await
    }

    /// Run `op` against every active platform until `cancel` fires
    ///
    /// Tasks observe the token before starting; a cancelled task reports
    /// [`PlatformError::Cancelled`]. Calls already in flight run to completion
    /// unless the returned future is dropped, which aborts them.
    pub async fn for_each_active_until<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        op: F,
    ) -> FanOutResults<T>
    where
        F: Fn(PlatformHandle) -> Fut,
        Fut: Future<Output = Result<T, PlatformError>> + Send + 'static,
        T: Send + 'static,
    {
        self.fan_out(self.snapshot(None), cancel, op).await
    }

    /// Run `op` against the named platforms that are active
    ///
    /// Inactive or unknown tags are absent from the result.
    pub async fn for_each_in<F, Fut, T>(
        &self,
        tags: &[&str],
        cancel: &CancellationToken,
        op: F,
    ) -> FanOutResults<T>
    where
        F: Fn(PlatformHandle) -> Fut,
        Fut: Future<Output = Result<T, PlatformError>> + Send + 'static,
        T: Send + 'static,
    {
        self.fan_out(self.snapshot(Some(tags)), cancel, op).await
    }

    fn snapshot(&self, only: Option<&[&str]>) -> Vec<PlatformHandle> {
        read(&self.active)
            .values()
            .filter(|h| only.map_or(true, |tags| tags.contains(&h.tag())))
            .cloned()
            .collect()
    }

    async fn fan_out<F, Fut, T>(
        &self,
        handles: Vec<PlatformHandle>,
        cancel: &CancellationToken,
        op: F,
    ) -> FanOutResults<T>
    where
        F: Fn(PlatformHandle) -> Fut,
        Fut: Future<Output = Result<T, PlatformError>> + Send + 'static,
        T: Send + 'static,
    {
        let tasks: Vec<(String, JoinHandle<Result<T, PlatformError>>)> = handles
            .into_iter()
            .map(|handle| {
                let tag = handle.tag().to_string();
                let token = cancel.clone();
                let work = op(handle);
                let task = tokio::spawn(async move {
                    if token.is_cancelled() {
                        return Err(PlatformError::Cancelled);
                    }
                    work.await
                });
                (tag, task)
            })
            .collect();
        let _abort = AbortOnDrop(tasks.iter().map(|(_, task)| task.abort_handle()).collect());

        let mut results = BTreeMap::new();
        for (tag, task) in tasks {
            let result = match task.await {
                Ok(result) => result,
                Err(e) => Err(PlatformError::Internal(format!(
                    "task for {} did not complete: {}",
                    tag, e
                ))),
            };

            if let Err(e) = &result {
                warn!(platform = %tag, error = %e, "Platform operation failed");
                if matches!(e, PlatformError::AuthenticationFailed(_)) {
                    self.deactivate(&tag);
                }
            }
            results.insert(tag, result);
        }
        results
    }
}

/// Aborts fan-out tasks still running when the fan-out future is dropped
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}
