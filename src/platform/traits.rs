//! Platform client trait definition
//!
//! This module defines the `PlatformClient` trait that every platform adapter
//! implements. Adapters translate their native API into canonical records;
//! the engine only ever sees this interface.

use async_trait::async_trait;

use crate::error::PlatformError;
use crate::models::{Capabilities, CanonicalRecord, EntityFilter, EntityType, RateLimitState};

/// Capability interface implemented by each platform adapter
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Returns the platform tag
    fn tag(&self) -> &str;

    /// Authenticate with the platform
    ///
    /// `Err(PlatformError::AuthenticationFailed)` means the credentials were
    /// rejected; other errors mean authentication could not be attempted.
    async fn authenticate(&self) -> Result<(), PlatformError>;

    /// Lightweight health probe
    async fn check_connection(&self) -> bool;

    /// List records of one entity type
    async fn get_entities(
        &self,
        entity: EntityType,
        filter: &EntityFilter,
    ) -> Result<Vec<CanonicalRecord>, PlatformError>;

    /// Fetch a single record by its platform id
    async fn get_entity(&self, entity: EntityType, id: &str)
        -> Result<CanonicalRecord, PlatformError>;

    /// Create a record, returning it as stored by the platform
    async fn create_entity(
        &self,
        entity: EntityType,
        record: &CanonicalRecord,
    ) -> Result<CanonicalRecord, PlatformError>;

    /// Update the record addressed by `id`, returning it as stored
    async fn update_entity(
        &self,
        entity: EntityType,
        id: &str,
        record: &CanonicalRecord,
    ) -> Result<CanonicalRecord, PlatformError>;

    /// Set the stock quantity for `sku`, optionally at one location
    async fn update_inventory(
        &self,
        sku: &str,
        quantity: i64,
        location_id: Option<String>,
    ) -> Result<bool, PlatformError>;

    /// Feature flags; entity type names double as feature keys
    fn capabilities(&self) -> Capabilities;

    /// Snapshot of the platform's rate-limit state
    fn rate_limit_info(&self) -> RateLimitState;
}
