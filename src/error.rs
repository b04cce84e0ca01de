//! Application error types for storefront-sync
//!
//! This module defines the error taxonomy shared by the rate limiter, cache,
//! platform registry and sync engine. All error types use `thiserror`.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::models::RateLimitState;

/// Coarse classification of a failure, stored in sync results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Credentials rejected by the platform
    Authentication,
    /// Platform throttled the request
    RateLimit,
    /// Network-level failure or 5xx
    Network,
    /// Payload rejected by the platform
    Validation,
    /// Platform does not support the entity or feature
    Unsupported,
    /// Entity not found
    NotFound,
    /// Work was cancelled before it started
    Cancelled,
    /// Work exceeded its time budget
    Timeout,
    /// Anything else
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Network => "network",
            ErrorKind::Validation => "validation",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Errors raised by a platform adapter or while calling one
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlatformError {
    /// Credentials rejected; fatal for the platform until re-initialized
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A single call was throttled by the platform
    #[error("Rate limited by platform{}", fmt_retry_after(.retry_after))]
    RateLimited {
        /// Platform-supplied retry-after hint
        retry_after: Option<Duration>,
    },

    /// Retries were exhausted while the platform kept throttling
    #[error("Rate limit exceeded for {platform} after retries ({} throttled)", throttled_count(.state))]
    RateLimitExceeded {
        /// Platform tag
        platform: String,
        /// Last observed limiter state
        state: RateLimitState,
    },

    /// Connection failure, timeout or 5xx response
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// Write payload rejected
    #[error("Validation error: {0}")]
    Validation(String),

    /// Entity type or feature not supported by the platform
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Entity not found on the platform
    #[error("Not found: {0}")]
    NotFound(String),

    /// Cancelled before the call started
    #[error("Operation cancelled")]
    Cancelled,

    /// Exceeded a configured time budget
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Unexpected failure
    #[error("Internal error: {0}")]
    Internal(String),
}

fn fmt_retry_after(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(", retry after {}ms", d.as_millis()),
        None => String::new(),
    }
}

fn throttled_count(state: &RateLimitState) -> u64 {
    state.throttled_requests
}

impl PlatformError {
    /// Returns the classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlatformError::AuthenticationFailed(_) => ErrorKind::Authentication,
            PlatformError::RateLimited { .. } | PlatformError::RateLimitExceeded { .. } => {
                ErrorKind::RateLimit
            }
            PlatformError::TransientNetwork(_) => ErrorKind::Network,
            PlatformError::Validation(_) => ErrorKind::Validation,
            PlatformError::Unsupported(_) => ErrorKind::Unsupported,
            PlatformError::NotFound(_) => ErrorKind::NotFound,
            PlatformError::Cancelled => ErrorKind::Cancelled,
            PlatformError::Timeout(_) => ErrorKind::Timeout,
            PlatformError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Cache-related errors
#[derive(Debug, Error)]
pub enum CacheError {
    /// Backing store could not be reached
    #[error("Cache store unavailable: {0}")]
    Unavailable(String),

    /// Serialization error
    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Registry-related errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryError {
    /// No factory registered under the tag
    #[error("Platform not registered: {0}")]
    NotRegistered(String),

    /// Platform is registered but not active
    #[error("Platform not active: {0}")]
    NotActive(String),

    /// No platform authenticated successfully
    #[error("No platforms could be initialized")]
    NoActivePlatforms,
}

/// Sync engine errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    /// `initialize` has not succeeded yet
    #[error("Sync engine not initialized")]
    NotInitialized,

    /// Registry could not provide any platform
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Configuration error types
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Application-level error type
///
/// Aggregates all domain-specific error types.
#[derive(Debug, Error)]
pub enum AppError {
    /// Platform error
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Cache error
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Registry error
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Engine error
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Logging setup error
    #[error("Telemetry error: {0}")]
    Telemetry(String),
}

/// Trait for determining if an error is retryable
pub trait RetryableError {
    /// Returns true if the error is retryable
    fn is_retryable(&self) -> bool;

    /// Returns true if the error is a rate-limit signal from the platform
    fn is_rate_limited(&self) -> bool;

    /// Platform-supplied delay before the next attempt, if any
    fn retry_after(&self) -> Option<Duration>;
}

impl RetryableError for PlatformError {
    fn is_retryable(&self) -> bool {
        match self {
            PlatformError::RateLimited { .. } => true,
            PlatformError::TransientNetwork(_) => true,
            PlatformError::Timeout(_) => true,

            PlatformError::AuthenticationFailed(_) => false,
            PlatformError::RateLimitExceeded { .. } => false,
            PlatformError::Validation(_) => false,
            PlatformError::Unsupported(_) => false,
            PlatformError::NotFound(_) => false,
            PlatformError::Cancelled => false,
            PlatformError::Internal(_) => false,
        }
    }

    fn is_rate_limited(&self) -> bool {
        matches!(self, PlatformError::RateLimited { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            PlatformError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}
