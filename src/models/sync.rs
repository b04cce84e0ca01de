//! Sync policy enums and pass results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::EntityType;
use crate::error::{ErrorKind, PlatformError};

/// One side of a configured platform pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Platform A (the configured source, also the primary platform)
    Source,
    /// Platform B
    Target,
}

impl Side {
    /// The opposite side
    pub fn other(self) -> Side {
        match self {
            Side::Source => Side::Target,
            Side::Target => Side::Source,
        }
    }
}

/// Which direction writes may flow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Source to target only
    AToB,
    /// Target to source only
    BToA,
    /// Either way
    #[default]
    Bidirectional,
}

impl SyncDirection {
    /// Whether a value may be written from `from` onto the other side
    pub fn allows_write_from(self, from: Side) -> bool {
        match self {
            SyncDirection::AToB => from == Side::Source,
            SyncDirection::BToA => from == Side::Target,
            SyncDirection::Bidirectional => true,
        }
    }

    /// Side whose orders are replicated; bidirectional configs use the primary
    pub fn origin(self) -> Side {
        match self {
            SyncDirection::BToA => Side::Target,
            SyncDirection::AToB | SyncDirection::Bidirectional => Side::Source,
        }
    }
}

/// Rule for picking a winner when both sides hold diverging values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Most recent `updated_at` wins; ties go to the source
    #[default]
    Newest,
    /// Source always wins
    SourceWins,
    /// Target always wins
    TargetWins,
}

/// How diverging stock quantities are settled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryStrategy {
    /// Use the configured conflict resolution
    #[default]
    FollowResolution,
    /// The numerically larger quantity wins
    Larger,
}

/// One captured failure within a pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncErrorRecord {
    /// Record key, absent for platform-wide failures
    pub key: Option<String>,
    /// Platform the failure came from
    pub platform: Option<String>,
    /// Failure classification
    pub kind: ErrorKind,
    /// Human-readable message
    pub message: String,
}

impl SyncErrorRecord {
    /// Failure tied to a single record
    pub fn for_key(key: impl Into<String>, platform: impl Into<String>, err: &PlatformError) -> Self {
        Self {
            key: Some(key.into()),
            platform: Some(platform.into()),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// Failure affecting a whole platform (e.g. a failed fetch)
    pub fn for_platform(platform: impl Into<String>, err: &PlatformError) -> Self {
        Self {
            key: None,
            platform: Some(platform.into()),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Caller-facing classification of a finished pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum PassOutcome {
    /// The entity type is disabled in the configuration
    Disabled,
    /// At least one record written, no failures
    Synced,
    /// Nothing needed writing (or nothing was allowed to be written)
    Skipped,
    /// Some records written, some failed
    PartiallySynced {
        /// Number of failed records
        failed: u64,
    },
    /// Nothing written and at least one failure
    Failed,
}

/// Result of one sync pass; immutable once recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    /// Entity type the pass covered
    pub entity: EntityType,
    /// True only when no record failed and no platform-wide error occurred
    pub success: bool,
    /// Records written successfully
    pub synced_count: u64,
    /// Records whose write failed
    pub failed_count: u64,
    /// Records that needed no write or were not allowed to be written
    pub skipped_count: u64,
    /// Failures in the order they were observed
    pub errors: Vec<SyncErrorRecord>,
    /// Wall time of the pass
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    /// When the pass started
    pub started_at: DateTime<Utc>,
    /// Whether the entity type was disabled by configuration
    #[serde(default)]
    pub disabled: bool,
}

impl SyncResult {
    /// Number of candidate records evaluated in the pass
    pub fn candidates(&self) -> u64 {
        self.synced_count + self.failed_count + self.skipped_count
    }

    /// Classify the pass without inspecting error text
    pub fn outcome(&self) -> PassOutcome {
        if self.disabled {
            return PassOutcome::Disabled;
        }
        if self.failed_count > 0 || !self.errors.is_empty() {
            if self.synced_count > 0 {
                return PassOutcome::PartiallySynced {
                    failed: self.failed_count,
                };
            }
            return PassOutcome::Failed;
        }
        if self.synced_count > 0 {
            PassOutcome::Synced
        } else {
            PassOutcome::Skipped
        }
    }
}

/// Serde helper for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
