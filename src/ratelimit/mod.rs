//! Rate limiter + circuit breaker (spec §4.1, C1)
//! Mission: per-endpoint adaptive pacing and three-state failure isolation,
//! owned exclusively by the collector task that created them.

pub mod breaker;
pub mod limiter;

pub use breaker::{BreakerOutcome, CircuitBreaker};
pub use limiter::{RateLimitObservation, RateLimiter};
