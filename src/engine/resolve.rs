//! Pass planning
//!
//! Turns the keyed views of both sides into a list of writes plus a count of
//! keys that need none. Planning is pure; the engine applies the plan.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::config::SyncConfig;
use crate::models::{
    CanonicalRecord, ConflictResolution, EntityType, InventoryStrategy, Side, SyncDirection,
};

/// Policies that drive planning
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Policy {
    /// Which way writes may flow
    pub direction: SyncDirection,
    /// Conflict rule for diverging records
    pub resolution: ConflictResolution,
    /// Rule for diverging stock quantities
    pub inventory: InventoryStrategy,
}

impl Policy {
    /// Policy from the sync configuration
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            direction: config.sync_direction,
            resolution: config.conflict_resolution,
            inventory: config.inventory_strategy,
        }
    }
}

/// A single write decided by the planner
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Create `record` on `to`
    Create {
        /// Side receiving the record
        to: Side,
        /// Record stripped of the other side's identity
        record: CanonicalRecord,
    },
    /// Overwrite the record addressed by `id` on `to`
    Update {
        /// Side receiving the write
        to: Side,
        /// Platform id of the record being overwritten
        id: String,
        /// Winning fields addressed at the losing record
        record: CanonicalRecord,
    },
    /// Set the stock level of `sku` on `to`
    SetQuantity {
        /// Side receiving the write
        to: Side,
        /// Stock keeping unit
        sku: String,
        /// Authoritative quantity
        quantity: i64,
        /// Location of the level being overwritten
        location_id: Option<String>,
    },
}

impl Action {
    /// Side the action writes to
    pub fn target(&self) -> Side {
        match self {
            Action::Create { to, .. } | Action::Update { to, .. } | Action::SetQuantity { to, .. } => {
                *to
            }
        }
    }

    /// Canonical key the action concerns
    pub fn key(&self) -> &str {
        match self {
            Action::Create { record, .. } | Action::Update { record, .. } => &record.key,
            Action::SetQuantity { sku, .. } => sku,
        }
    }
}

/// Writes to apply plus the number of keys that need none
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    /// Writes in key order
    pub actions: Vec<Action>,
    /// Keys evaluated that need no write or may not be written
    pub skipped: u64,
}

impl Plan {
    /// Keys evaluated by the plan
    pub fn candidates(&self) -> u64 {
        self.actions.len() as u64 + self.skipped
    }

    fn skip(&mut self) {
        self.skipped += 1;
    }
}

/// Index one side's records by canonical key
///
/// When a platform returns the same key twice, the later record wins.
pub fn key_records(
    platform: &str,
    entity: EntityType,
    records: Vec<CanonicalRecord>,
) -> BTreeMap<String, CanonicalRecord> {
    let mut keyed = BTreeMap::new();
    for record in records {
        if let Some(previous) = keyed.insert(record.key.clone(), record) {
            warn!(platform, entity = %entity, key = %previous.key, "Duplicate key in platform listing");
        }
    }
    keyed
}

/// Side whose version of a diverging record wins
pub fn pick_winner(
    source: &CanonicalRecord,
    target: &CanonicalRecord,
    resolution: ConflictResolution,
) -> Side {
    match resolution {
        ConflictResolution::SourceWins => Side::Source,
        ConflictResolution::TargetWins => Side::Target,
        ConflictResolution::Newest => match (source.updated_at, target.updated_at) {
            (Some(s), Some(t)) if t > s => Side::Target,
            (None, Some(_)) => Side::Target,
            _ => Side::Source,
        },
    }
}

/// Plan the writes for one entity type
pub fn plan_entity(
    entity: EntityType,
    source: &BTreeMap<String, CanonicalRecord>,
    target: &BTreeMap<String, CanonicalRecord>,
    policy: Policy,
) -> Plan {
    let keys: BTreeSet<&String> = source.keys().chain(target.keys()).collect();
    let mut plan = Plan::default();

    for key in keys {
        let pair = (source.get(key.as_str()), target.get(key.as_str()));
        let action = match entity {
            EntityType::Products => plan_record(pair, policy),
            EntityType::Inventory => plan_inventory(pair, policy),
            EntityType::Orders => plan_order(pair, policy),
            EntityType::Customers => None,
        };
        match action {
            Some(action) => plan.actions.push(action),
            None => plan.skip(),
        }
    }
    plan
}

fn pick<'a>(side: Side, source: &'a CanonicalRecord, target: &'a CanonicalRecord) -> &'a CanonicalRecord {
    match side {
        Side::Source => source,
        Side::Target => target,
    }
}

fn plan_record(
    pair: (Option<&CanonicalRecord>, Option<&CanonicalRecord>),
    policy: Policy,
) -> Option<Action> {
    match pair {
        (Some(only), None) => create_from(Side::Source, only, policy.direction),
        (None, Some(only)) => create_from(Side::Target, only, policy.direction),
        (Some(source), Some(target)) => {
            if source.same_fields(target) {
                return None;
            }
            let winner = pick_winner(source, target, policy.resolution);
            if !policy.direction.allows_write_from(winner) {
                return None;
            }
            let loser = pick(winner.other(), source, target);
            Some(Action::Update {
                to: winner.other(),
                id: loser.platform_id().to_string(),
                record: pick(winner, source, target).rebased_onto(loser),
            })
        }
        (None, None) => None,
    }
}

fn create_from(from: Side, record: &CanonicalRecord, direction: SyncDirection) -> Option<Action> {
    direction.allows_write_from(from).then(|| Action::Create {
        to: from.other(),
        record: record.detached(),
    })
}

fn plan_inventory(
    pair: (Option<&CanonicalRecord>, Option<&CanonicalRecord>),
    policy: Policy,
) -> Option<Action> {
    let (source, target) = match pair {
        (Some(source), Some(target)) => (source, target),
        _ => return None,
    };
    if source.quantity == target.quantity {
        return None;
    }

    let winner = match policy.inventory {
        InventoryStrategy::Larger => match (source.quantity, target.quantity) {
            (Some(s), Some(t)) if t > s => Side::Target,
            (None, Some(_)) => Side::Target,
            _ => Side::Source,
        },
        InventoryStrategy::FollowResolution => pick_winner(source, target, policy.resolution),
    };
    if !policy.direction.allows_write_from(winner) {
        return None;
    }

    let quantity = pick(winner, source, target).quantity?;
    let loser = pick(winner.other(), source, target);
    Some(Action::SetQuantity {
        to: winner.other(),
        sku: loser.key.clone(),
        quantity,
        location_id: loser.location_id.clone(),
    })
}

fn plan_order(
    pair: (Option<&CanonicalRecord>, Option<&CanonicalRecord>),
    policy: Policy,
) -> Option<Action> {
    let origin = policy.direction.origin();
    let only_on_origin = match (origin, pair) {
        (Side::Source, (Some(order), None)) | (Side::Target, (None, Some(order))) => order,
        _ => return None,
    };
    if only_on_origin.is_excluded_order() {
        return None;
    }
    Some(Action::Create {
        to: origin.other(),
        record: only_on_origin.detached(),
    })
}
