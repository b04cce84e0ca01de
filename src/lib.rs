//! storefront-sync - Catalog, inventory and order synchronization between
//! e-commerce platforms
//!
//! This crate provides a sync engine that reconciles two storefronts through
//! per-platform rate limiters, a TTL-aware response cache and a registry that
//! fans operations out to every active platform concurrently.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod platform;
pub mod ratelimit;
pub mod registry;
pub mod telemetry;
