//! Platform adapters
//!
//! This module defines the [`PlatformClient`] capability interface, the
//! rate-limited and cached [`PlatformHandle`] the registry hands out, and the
//! bundled adapters (REST and in-memory).

pub mod handle;
pub mod http;
pub mod memory;
pub mod rest;
pub mod traits;

pub use handle::PlatformHandle;
pub use http::RateLimitedHttpClient;
pub use memory::{InMemoryPlatform, Operation, SeedData};
pub use rest::RestPlatform;
pub use traits::PlatformClient;

#[cfg(test)]
pub use traits::MockPlatformClient;
