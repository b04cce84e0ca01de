//! Domain models for storefront-sync
//!
//! This module contains the canonical records exchanged with platform adapters,
//! platform identity and capability types, and sync pass results.

pub mod platform;
pub mod record;
pub mod sync;

// Re-export commonly used types
pub use platform::{Capabilities, Credentials, PlatformIdentity, RateLimitState};
pub use record::{CanonicalRecord, EntityFilter, EntityType};
pub use sync::{
    ConflictResolution, InventoryStrategy, PassOutcome, Side, SyncDirection, SyncErrorRecord,
    SyncResult,
};
