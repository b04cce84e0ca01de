//! Outbound rate limiting and retry
//!
//! Each platform gets its own [`RateLimiter`]; limiters never share state.

pub mod backoff;
pub mod limiter;

pub use backoff::BackoffPolicy;
pub use limiter::RateLimiter;
