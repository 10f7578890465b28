//! Middleware for observability and rate limiting.
//!
//! This module provides:
//! - Request logging with latency tracking
//! - Rate limiting per IP address
//! - Metrics collection for Prometheus

pub mod audit;
pub mod logging;
pub mod rate_limit;

pub use audit::{actor_id, AuditLog};
pub use logging::request_logging;
pub use rate_limit::{rate_limit_middleware, RateLimitConfig, RateLimitLayer};
