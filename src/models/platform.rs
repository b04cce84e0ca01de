//! Platform identity, capability and rate-limit state models

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

/// Credential material handed to a platform adapter; never inspected by the engine
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(BTreeMap<String, String>);

impl Credentials {
    /// Creates an empty credential set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a credential entry
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Look up a credential entry
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

impl From<BTreeMap<String, String>> for Credentials {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.0.keys().map(|k| (k, "<redacted>")))
            .finish()
    }
}

/// Opaque platform tag plus credential material
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformIdentity {
    /// Unique tag for this platform instance (e.g. "shop-a")
    pub tag: String,
    /// Credential material for the adapter
    pub credentials: Credentials,
}

impl PlatformIdentity {
    /// Create a new identity
    pub fn new(tag: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            tag: tag.into(),
            credentials,
        }
    }
}

/// Feature flags a platform reports via `get_capabilities`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(BTreeMap<String, bool>);

impl Capabilities {
    /// Feature key for multi-currency pricing
    pub const MULTI_CURRENCY: &'static str = "multi_currency";
    /// Feature key for per-location stock
    pub const MULTI_LOCATION: &'static str = "multi_location";

    /// Creates an empty capability set (nothing supported)
    pub fn new() -> Self {
        Self::default()
    }

    /// Capability set supporting every entity type
    pub fn all_entities() -> Self {
        crate::models::EntityType::ALL
            .iter()
            .fold(Self::new(), |caps, entity| caps.with(entity.as_str(), true))
    }

    /// Set a feature flag
    pub fn with(mut self, feature: impl Into<String>, supported: bool) -> Self {
        self.0.insert(feature.into(), supported);
        self
    }

    /// Features absent from the map are unsupported
    pub fn supports(&self, feature: &str) -> bool {
        self.0.get(feature).copied().unwrap_or(false)
    }
}

/// Per-platform rate-limit bookkeeping
///
/// `requests_remaining` never exceeds `requests_limit` and is only replenished
/// at or after `reset_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitState {
    /// Calls still allowed in the current window
    pub requests_remaining: u32,
    /// Calls allowed per window
    pub requests_limit: u32,
    /// When the current window ends
    pub reset_at: Instant,
    /// Throttling multiplier, >= 1.0
    pub current_backoff_multiplier: f64,
    /// Calls admitted so far
    pub total_requests: u64,
    /// Calls the platform throttled
    pub throttled_requests: u64,
}

impl RateLimitState {
    /// Fresh state with a full budget
    pub fn new(limit: u32) -> Self {
        let limit = limit.max(1);
        Self {
            requests_remaining: limit,
            requests_limit: limit,
            reset_at: Instant::now(),
            current_backoff_multiplier: 1.0,
            total_requests: 0,
            throttled_requests: 0,
        }
    }

    /// Time until the window resets, zero if already past
    pub fn reset_in(&self) -> Duration {
        self.reset_at.saturating_duration_since(Instant::now())
    }
}
