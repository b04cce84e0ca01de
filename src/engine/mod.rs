//! Sync engine
//!
//! Runs per-entity sync passes between the configured source and target
//! platforms: fetch both views through the registry, plan the writes with
//! [`resolve::plan_entity`], apply them in concurrent batches and record a
//! [`SyncResult`] in the bounded history. A background loop repeats the
//! enabled passes every `sync_interval` until stopped.

pub mod history;
pub mod resolve;

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::error::{EngineError, PlatformError, RegistryError};
use crate::models::{
    CanonicalRecord, EntityFilter, EntityType, PlatformIdentity, Side, SyncErrorRecord, SyncResult,
};
use crate::platform::PlatformHandle;
use crate::registry::PlatformRegistry;

pub use history::SyncHistory;
pub use resolve::{Action, Plan, Policy};

/// Lifecycle of the continuous loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// No loop running
    Idle,
    /// Loop running passes every interval
    Running,
    /// Stop requested; waiting for the in-flight pass to finish
    Stopping,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Running => write!(f, "running"),
            EngineState::Stopping => write!(f, "stopping"),
        }
    }
}

struct Runner {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct Tally {
    synced: u64,
    failed: u64,
    skipped: u64,
    errors: Vec<SyncErrorRecord>,
}

impl Tally {
    fn into_result(self, entity: EntityType, started: (chrono::DateTime<Utc>, Instant)) -> SyncResult {
        SyncResult {
            entity,
            success: self.failed == 0 && self.errors.is_empty(),
            synced_count: self.synced,
            failed_count: self.failed,
            skipped_count: self.skipped,
            errors: self.errors,
            duration: started.1.elapsed(),
            started_at: started.0,
            disabled: false,
        }
    }
}

type Fetched = Result<Vec<CanonicalRecord>, PlatformError>;

/// Orchestrates sync passes between the configured platform pair
pub struct SyncEngine {
    registry: Arc<PlatformRegistry>,
    config: SyncConfig,
    policy: Policy,
    history: SyncHistory,
    state: watch::Sender<EngineState>,
    runner: Mutex<Option<Runner>>,
    pass_locks: [Mutex<()>; 4],
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("source", &self.config.source)
            .field("target", &self.config.target)
            .field("state", &self.state())
            .finish()
    }
}

impl SyncEngine {
    /// Create an idle engine over `registry`
    pub fn new(registry: Arc<PlatformRegistry>, config: SyncConfig) -> Self {
        let (state, _) = watch::channel(EngineState::Idle);
        Self {
            registry,
            policy: Policy::from_config(&config),
            history: SyncHistory::new(config.history_capacity),
            config,
            state,
            runner: Mutex::new(None),
            pass_locks: Default::default(),
        }
    }

    /// Registry the engine fans out through
    pub fn registry(&self) -> &Arc<PlatformRegistry> {
        &self.registry
    }

    /// Session configuration
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change
    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    /// Initialize and authenticate both platforms
    ///
    /// Returns true when at least one side authenticated; a sync cycle cannot
    /// start only when neither did.
    pub async fn initialize(&self, source: &PlatformIdentity, target: &PlatformIdentity) -> bool {
        let (source_ok, target_ok) = tokio::join!(
            self.registry.initialize(source),
            self.registry.initialize(target)
        );

        match (source_ok, target_ok) {
            (true, true) => {
                info!(source = %source.tag, target = %target.tag, "Sync engine initialized");
                true
            }
            (false, false) => {
                error!(source = %source.tag, target = %target.tag, "No platform could be initialized");
                false
            }
            _ => {
                warn!(
                    source = %source.tag,
                    source_ok,
                    target = %target.tag,
                    target_ok,
                    "Sync engine initialized with one platform unavailable"
                );
                true
            }
        }
    }

    /// Run one product pass
    pub async fn sync_products(&self) -> SyncResult {
        self.sync_entity(EntityType::Products).await
    }

    /// Run one inventory pass
    pub async fn sync_inventory(&self) -> SyncResult {
        self.sync_entity(EntityType::Inventory).await
    }

    /// Run one order pass
    pub async fn sync_orders(&self) -> SyncResult {
        self.sync_entity(EntityType::Orders).await
    }

    /// Run one customer pass
    ///
    /// Customers are not synchronized: every key found is counted as skipped.
    pub async fn sync_customers(&self) -> SyncResult {
        self.sync_entity(EntityType::Customers).await
    }

    /// Run one pass for `entity`
    pub async fn sync_entity(&self, entity: EntityType) -> SyncResult {
        let _pass = self.pass_lock(entity).lock().await;
        self.record_pass(entity, &CancellationToken::new()).await
    }

    /// Run every enabled pass once, in entity order
    pub async fn run_cycle(&self) -> Result<Vec<SyncResult>, EngineError> {
        self.registry.ensure_any_active()?;
        Ok(self.cycle(&CancellationToken::new()).await)
    }

    /// Whether passes for `entity` are enabled
    pub fn is_enabled(&self, entity: EntityType) -> bool {
        match entity {
            EntityType::Products => self.config.sync_products,
            EntityType::Inventory => self.config.sync_inventory,
            EntityType::Orders => self.config.sync_orders,
            EntityType::Customers => self.config.sync_customers,
        }
    }

    /// The `limit` most recent results, oldest first
    pub fn get_history(&self, limit: usize) -> Vec<SyncResult> {
        self.history.recent(limit)
    }

    /// Start the continuous loop; a no-op while one is already running
    pub async fn start_sync(self: &Arc<Self>) -> Result<(), EngineError> {
        let mut runner = self.runner.lock().await;
        if runner.as_ref().is_some_and(|r| !r.task.is_finished()) {
            debug!("Sync loop already running");
            return Ok(());
        }
        self.registry.ensure_any_active()?;

        let cancel = CancellationToken::new();
        let engine = Arc::clone(self);
        let token = cancel.clone();
        self.state.send_replace(EngineState::Running);
        let task = tokio::spawn(async move { engine.run_loop(token).await });
        *runner = Some(Runner { cancel, task });

        info!(
            interval_secs = self.config.sync_interval_secs,
            "Sync loop started"
        );
        Ok(())
    }

    /// Stop the loop after the in-flight pass has been recorded
    pub async fn stop_sync(&self) {
        let mut runner = self.runner.lock().await;
        let Some(Runner { cancel, task }) = runner.take() else {
            return;
        };

        self.state.send_replace(EngineState::Stopping);
        cancel.cancel();
        if let Err(e) = task.await {
            error!(error = %e, "Sync loop terminated abnormally");
        }
        self.state.send_replace(EngineState::Idle);
        info!("Sync loop stopped");
    }

    async fn run_loop(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.sync_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let results = self.cycle(&cancel).await;
            debug!(passes = results.len(), "Sync cycle finished");
        }
    }

    async fn cycle(&self, cancel: &CancellationToken) -> Vec<SyncResult> {
        let mut results = Vec::new();
        for entity in EntityType::ALL {
            if cancel.is_cancelled() {
                break;
            }
            if !self.is_enabled(entity) {
                continue;
            }
            if let Some(result) = self.run_pass(entity, cancel).await {
                results.push(result);
            }
        }
        results
    }

    fn pass_lock(&self, entity: EntityType) -> &Mutex<()> {
        let index = match entity {
            EntityType::Products => 0,
            EntityType::Inventory => 1,
            EntityType::Orders => 2,
            EntityType::Customers => 3,
        };
        &self.pass_locks[index]
    }

    fn tag(&self, side: Side) -> &str {
        match side {
            Side::Source => &self.config.source,
            Side::Target => &self.config.target,
        }
    }

    /// Queue behind any running pass for `entity`; `None` if stopped meanwhile
    async fn run_pass(&self, entity: EntityType, cancel: &CancellationToken) -> Option<SyncResult> {
        let _pass = self.pass_lock(entity).lock().await;
        if cancel.is_cancelled() {
            debug!(entity = %entity, "Sync stopped while pass was queued");
            return None;
        }
        Some(self.record_pass(entity, cancel).await)
    }

    /// Run a pass and append it to history; the caller holds the pass lock
    async fn record_pass(&self, entity: EntityType, cancel: &CancellationToken) -> SyncResult {
        let started = (Utc::now(), Instant::now());

        let result = if self.is_enabled(entity) {
            self.execute(entity, cancel).await.into_result(entity, started)
        } else {
            debug!(entity = %entity, "Pass disabled by configuration");
            SyncResult {
                disabled: true,
                ..Tally::default().into_result(entity, started)
            }
        };

        self.history.push(result.clone());
        info!(
            entity = %entity,
            success = result.success,
            synced = result.synced_count,
            failed = result.failed_count,
            skipped = result.skipped_count,
            duration_ms = result.duration.as_millis() as u64,
            "Sync pass finished"
        );
        result
    }

    async fn execute(&self, entity: EntityType, cancel: &CancellationToken) -> Tally {
        let mut tally = Tally::default();
        let (source, target) = self.fetch(entity, cancel).await;

        let (source, target) = match (source, target) {
            (Ok(source), Ok(target)) => (source, target),
            (Ok(records), Err(e)) => {
                self.count_unpaired(entity, records, Side::Target, e, &mut tally);
                return tally;
            }
            (Err(e), Ok(records)) => {
                self.count_unpaired(entity, records, Side::Source, e, &mut tally);
                return tally;
            }
            (Err(source_err), Err(target_err)) => {
                for (side, e) in [(Side::Source, source_err), (Side::Target, target_err)] {
                    if !skips_side(entity, &e) {
                        tally.errors.push(SyncErrorRecord::for_platform(self.tag(side), &e));
                    }
                }
                return tally;
            }
        };

        let source = resolve::key_records(self.tag(Side::Source), entity, source);
        let target = resolve::key_records(self.tag(Side::Target), entity, target);
        let plan = resolve::plan_entity(entity, &source, &target, self.policy);
        debug!(
            entity = %entity,
            writes = plan.actions.len(),
            skipped = plan.skipped,
            "Planned sync pass"
        );

        tally.skipped = plan.skipped;
        self.apply(entity, plan.actions, &mut tally).await;
        tally
    }

    /// Fetch both sides; all reads finish before any write starts
    async fn fetch(&self, entity: EntityType, cancel: &CancellationToken) -> (Fetched, Fetched) {
        let filter = EntityFilter::paged(self.config.batch_size);
        let source_tag = self.tag(Side::Source);
        let target_tag = self.tag(Side::Target);

        let tags = [source_tag, target_tag];
        let fan_out = self.registry.for_each_in(&tags, cancel, move |handle| {
            let filter = filter.clone();
            async move { handle.fetch_entities(entity, &filter).await }
        });

        let mut results = match self.config.pass_timeout() {
            Some(limit) => match tokio::time::timeout(limit, fan_out).await {
                Ok(results) => results,
                Err(_) => {
                    warn!(entity = %entity, timeout_secs = limit.as_secs(), "Fetch timed out");
                    return (Err(PlatformError::Timeout(limit)), Err(PlatformError::Timeout(limit)));
                }
            },
            None => fan_out.await,
        };

        let mut take = |tag: &str| {
            results
                .remove(tag)
                .unwrap_or_else(|| Err(not_active(tag)))
        };
        (take(source_tag), take(target_tag))
    }

    /// One side could not be read: the other side's keys cannot be compared
    fn count_unpaired(
        &self,
        entity: EntityType,
        records: Vec<CanonicalRecord>,
        failed_side: Side,
        err: PlatformError,
        tally: &mut Tally,
    ) {
        let keys = resolve::key_records(self.tag(failed_side.other()), entity, records).len() as u64;

        if skips_side(entity, &err) {
            debug!(entity = %entity, platform = self.tag(failed_side), error = %err, "Side unavailable, skipping keys");
            tally.skipped += keys;
        } else {
            tally.failed += keys;
            tally
                .errors
                .push(SyncErrorRecord::for_platform(self.tag(failed_side), &err));
        }
    }

    async fn apply(&self, entity: EntityType, actions: Vec<Action>, tally: &mut Tally) {
        let batch_size = self.config.batch_size.max(1);

        for chunk in actions.chunks(batch_size) {
            let pending: Vec<_> = chunk
                .iter()
                .map(|action| {
                    let tag = self.tag(action.target());
                    let task = self
                        .registry
                        .handle(tag)
                        .map(|handle| tokio::spawn(write(handle, entity, action.clone())))
                        .ok_or_else(|| not_active(tag));
                    (action.key().to_string(), tag, task)
                })
                .collect();

            for (key, tag, task) in pending {
                let outcome = match task {
                    Ok(task) => task.await.unwrap_or_else(|e| {
                        Err(PlatformError::Internal(format!("write task did not complete: {}", e)))
                    }),
                    Err(e) => Err(e),
                };
                self.record_write(entity, key, tag, outcome, tally);
            }
        }
    }

    fn record_write(
        &self,
        entity: EntityType,
        key: String,
        tag: &str,
        outcome: Result<(), PlatformError>,
        tally: &mut Tally,
    ) {
        match outcome {
            Ok(()) => tally.synced += 1,
            Err(PlatformError::Unsupported(reason)) => {
                debug!(entity = %entity, platform = tag, key = %key, reason = %reason, "Write unsupported, skipping");
                tally.skipped += 1;
            }
            Err(e) => {
                warn!(entity = %entity, platform = tag, key = %key, error = %e, "Write failed");
                if matches!(e, PlatformError::AuthenticationFailed(_)) {
                    self.registry.deactivate(tag);
                }
                tally.failed += 1;
                tally.errors.push(SyncErrorRecord::for_key(key, tag, &e));
            }
        }
    }
}

/// Errors that leave a side out of the pass without failing it
fn skips_side(entity: EntityType, err: &PlatformError) -> bool {
    entity == EntityType::Customers
        || matches!(err, PlatformError::Unsupported(_) | PlatformError::Cancelled)
}

fn not_active(tag: &str) -> PlatformError {
    PlatformError::Internal(RegistryError::NotActive(tag.to_string()).to_string())
}

async fn write(handle: PlatformHandle, entity: EntityType, action: Action) -> Result<(), PlatformError> {
    match action {
        Action::Create { record, .. } => handle.create_entity(entity, &record).await.map(|_| ()),
        Action::Update { id, record, .. } => {
            handle.update_entity(entity, &id, &record).await.map(|_| ())
        }
        Action::SetQuantity {
            sku,
            quantity,
            location_id,
            ..
        } => {
            let applied = handle
                .update_inventory(&sku, quantity, location_id.as_deref())
                .await?;
            if applied {
                Ok(())
            } else {
                Err(PlatformError::Validation(format!(
                    "{} did not apply quantity {} for {}",
                    handle.tag(),
                    quantity,
                    sku
                )))
            }
        }
    }
}
