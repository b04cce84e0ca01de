//! In-memory platform adapter
//!
//! Holds canonical records in process. Used for local dry runs (`kind: memory`
//! with an optional `seed_file`) and as the platform double in tests, with
//! queued fault injection per operation and call counters.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::traits::PlatformClient;
use crate::error::PlatformError;
use crate::models::{Capabilities, CanonicalRecord, EntityFilter, EntityType, RateLimitState};
use crate::ratelimit::RateLimiter;

/// Operations that can be counted and made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `authenticate`
    Authenticate,
    /// `get_entities`
    List,
    /// `get_entity`
    Get,
    /// `create_entity`
    Create,
    /// `update_entity`
    Update,
    /// `update_inventory`
    UpdateInventory,
}

/// Seed document: records per entity type
#[derive(Debug, Default, Deserialize)]
pub struct SeedData {
    /// Product records
    #[serde(default)]
    pub products: Vec<CanonicalRecord>,
    /// Inventory levels
    #[serde(default)]
    pub inventory: Vec<CanonicalRecord>,
    /// Orders
    #[serde(default)]
    pub orders: Vec<CanonicalRecord>,
    /// Customers
    #[serde(default)]
    pub customers: Vec<CanonicalRecord>,
    /// Optional capability overrides
    #[serde(default)]
    pub capabilities: Option<Capabilities>,
}

#[derive(Default)]
struct MemoryState {
    records: HashMap<EntityType, BTreeMap<String, CanonicalRecord>>,
    faults: HashMap<Operation, VecDeque<PlatformError>>,
    calls: HashMap<Operation, usize>,
    rejected_credentials: Option<String>,
    connected: bool,
    next_id: u64,
}

/// Platform adapter backed by in-process maps
pub struct InMemoryPlatform {
    tag: String,
    capabilities: Mutex<Capabilities>,
    latency: Duration,
    limiter: Option<Arc<RateLimiter>>,
    state: Mutex<MemoryState>,
}

impl std::fmt::Debug for InMemoryPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryPlatform")
            .field("tag", &self.tag)
            .field("latency", &self.latency)
            .finish()
    }
}

impl InMemoryPlatform {
    /// Empty platform supporting every entity type
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            capabilities: Mutex::new(Capabilities::all_entities()),
            latency: Duration::ZERO,
            limiter: None,
            state: Mutex::new(MemoryState {
                connected: true,
                ..Default::default()
            }),
        }
    }

    /// Platform seeded from a JSON document
    pub fn from_seed_json(tag: impl Into<String>, json: &str) -> Result<Self, PlatformError> {
        let seed: SeedData = serde_json::from_str(json)
            .map_err(|e| PlatformError::Validation(format!("invalid seed data: {}", e)))?;

        let mut platform = Self::new(tag)
            .with_records(EntityType::Products, seed.products)
            .with_records(EntityType::Inventory, seed.inventory)
            .with_records(EntityType::Orders, seed.orders)
            .with_records(EntityType::Customers, seed.customers);
        if let Some(caps) = seed.capabilities {
            platform = platform.with_capabilities(caps);
        }
        Ok(platform)
    }

    /// Platform seeded from a JSON file
    pub fn from_seed_file<P: AsRef<Path>>(tag: impl Into<String>, path: P) -> Result<Self, PlatformError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            PlatformError::Internal(format!(
                "failed to read seed file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_seed_json(tag, &content)
    }

    /// Report this limiter's state from `rate_limit_info`
    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Replace the capability set
    pub fn with_capabilities(self, capabilities: Capabilities) -> Self {
        *lock(&self.capabilities) = capabilities;
        self
    }

    /// Delay every remote-style call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Seed records of one entity type
    pub fn with_records(self, entity: EntityType, records: Vec<CanonicalRecord>) -> Self {
        for record in records {
            self.insert(entity, record);
        }
        self
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        lock(&self.state)
    }

    /// Insert or replace a record by key
    pub fn insert(&self, entity: EntityType, record: CanonicalRecord) {
        self.state()
            .records
            .entry(entity)
            .or_default()
            .insert(record.key.clone(), record);
    }

    /// Remove a record by key
    pub fn remove(&self, entity: EntityType, key: &str) -> Option<CanonicalRecord> {
        self.state().records.get_mut(&entity)?.remove(key)
    }

    /// Current record for `key`
    pub fn record(&self, entity: EntityType, key: &str) -> Option<CanonicalRecord> {
        self.state().records.get(&entity)?.get(key).cloned()
    }

    /// All records of one entity type, ordered by key
    pub fn records(&self, entity: EntityType) -> Vec<CanonicalRecord> {
        self.state()
            .records
            .get(&entity)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Make the next call of `op` fail with `error`; queued errors fire in order
    pub fn fail_next(&self, op: Operation, error: PlatformError) {
        self.state().faults.entry(op).or_default().push_back(error);
    }

    /// Reject credentials on every `authenticate` call
    pub fn reject_credentials(&self, reason: impl Into<String>) {
        self.state().rejected_credentials = Some(reason.into());
    }

    /// Control the health probe result
    pub fn set_connected(&self, connected: bool) {
        self.state().connected = connected;
    }

    /// Toggle a capability flag
    pub fn set_capability(&self, feature: &str, supported: bool) {
        let mut caps = lock(&self.capabilities);
        *caps = caps.clone().with(feature, supported);
    }

    /// Number of calls made to `op`, including failed ones
    pub fn calls(&self, op: Operation) -> usize {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }

    /// Number of write calls (create, update and inventory updates)
    pub fn write_count(&self) -> usize {
        self.calls(Operation::Create) + self.calls(Operation::Update) + self.calls(Operation::UpdateInventory)
    }

    /// Count the call and pop a queued fault, after simulated latency
    async fn enter(&self, op: Operation) -> Result<(), PlatformError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut state = self.state();
        *state.calls.entry(op).or_default() += 1;
        match state.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn find_by_id<'a>(
    records: &'a mut BTreeMap<String, CanonicalRecord>,
    id: &str,
) -> Option<&'a mut CanonicalRecord> {
    if records.contains_key(id) {
        return records.get_mut(id);
    }
    records
        .values_mut()
        .find(|r| r.remote_id.as_deref() == Some(id))
}

#[async_trait]
impl PlatformClient for InMemoryPlatform {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn authenticate(&self) -> Result<(), PlatformError> {
        self.enter(Operation::Authenticate).await?;
        match &self.state().rejected_credentials {
            Some(reason) => Err(PlatformError::AuthenticationFailed(reason.clone())),
            None => Ok(()),
        }
    }

    async fn check_connection(&self) -> bool {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.state().connected
    }

    async fn get_entities(
        &self,
        entity: EntityType,
        filter: &EntityFilter,
    ) -> Result<Vec<CanonicalRecord>, PlatformError> {
        self.enter(Operation::List).await?;

        let state = self.state();
        let records = state
            .records
            .get(&entity)
            .map(|m| {
                m.values()
                    .filter(|r| match (filter.updated_since, r.updated_at) {
                        (Some(since), Some(at)) => at >= since,
                        (Some(_), None) => false,
                        (None, _) => true,
                    })
                    .take(filter.limit.unwrap_or(usize::MAX))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(records)
    }

    async fn get_entity(
        &self,
        entity: EntityType,
        id: &str,
    ) -> Result<CanonicalRecord, PlatformError> {
        self.enter(Operation::Get).await?;

        let mut state = self.state();
        state
            .records
            .get_mut(&entity)
            .and_then(|m| find_by_id(m, id))
            .map(|r| r.clone())
            .ok_or_else(|| PlatformError::NotFound(format!("{} {}", entity, id)))
    }

    async fn create_entity(
        &self,
        entity: EntityType,
        record: &CanonicalRecord,
    ) -> Result<CanonicalRecord, PlatformError> {
        self.enter(Operation::Create).await?;

        let mut state = self.state();
        state.next_id += 1;
        let remote_id = format!("{}-{}", self.tag, state.next_id);

        let records = state.records.entry(entity).or_default();
        if records.contains_key(&record.key) {
            return Err(PlatformError::Validation(format!(
                "{} {} already exists",
                entity, record.key
            )));
        }

        let stored = CanonicalRecord {
            remote_id: Some(remote_id),
            ..record.clone()
        };
        records.insert(stored.key.clone(), stored.clone());
        Ok(stored)
    }

    async fn update_entity(
        &self,
        entity: EntityType,
        id: &str,
        record: &CanonicalRecord,
    ) -> Result<CanonicalRecord, PlatformError> {
        self.enter(Operation::Update).await?;

        let mut state = self.state();
        let existing = state
            .records
            .get_mut(&entity)
            .and_then(|m| find_by_id(m, id))
            .ok_or_else(|| PlatformError::NotFound(format!("{} {}", entity, id)))?;

        existing.name = record.name.clone();
        existing.quantity = record.quantity;
        existing.price = record.price;
        existing.status = record.status.clone();
        existing.updated_at = record.updated_at;
        Ok(existing.clone())
    }

    async fn update_inventory(
        &self,
        sku: &str,
        quantity: i64,
        location_id: Option<String>,
    ) -> Result<bool, PlatformError> {
        self.enter(Operation::UpdateInventory).await?;

        let mut state = self.state();
        let level = state
            .records
            .get_mut(&EntityType::Inventory)
            .and_then(|m| m.get_mut(sku))
            .ok_or_else(|| PlatformError::NotFound(format!("inventory {}", sku)))?;

        level.quantity = Some(quantity);
        if location_id.is_some() {
            level.location_id = location_id;
        }
        Ok(true)
    }

    fn capabilities(&self) -> Capabilities {
        lock(&self.capabilities).clone()
    }

    fn rate_limit_info(&self) -> RateLimitState {
        match &self.limiter {
            Some(limiter) => limiter.state(),
            None => RateLimitState::new(u32::MAX),
        }
    }
}
