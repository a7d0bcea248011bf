//! Rate-limit engine: pluggable algorithms over a pluggable store, plus the
//! auth brute-force lockout limiter (spec §4.2).

pub mod algorithms;
pub mod auth_limiter;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod store;

pub use algorithms::RateLimitAlgorithm;
pub use auth_limiter::{
    AttemptState, AuthRateLimitConfig, AuthRateLimiter, FailedAttemptRepository, InMemoryFailedAttemptRepository,
};
pub use store::{InMemoryRateLimitStore, RateLimitStore, StoreError};
