//! The `Collector` capability set (spec §4.2).
//! Polymorphic over {start, stop, poll_once, backfill, health_check}.

use crate::error::MasterTradeError;
use crate::models::collector::CollectorHealth;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct HealthRecord {
    pub status: CollectorHealth,
    pub latency_ms: u64,
    pub records_collected: u64,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// One polling/streaming cycle's outcome, reported back to the scheduling
/// loop in `collectors::runner` so it can drive the rate limiter, breaker,
/// and health record uniformly across every collector variant.
#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> Result<(), MasterTradeError>;
    async fn stop(&self) -> Result<(), MasterTradeError>;

    /// Run one polling cycle: fetch, normalize, store, publish. Collectors
    /// that are purely streaming implement this as a no-op returning 0.
    async fn poll_once(&self) -> Result<u64, MasterTradeError>;

    /// Backfill historical data for a time range. Not all collectors support
    /// this; the default is a no-op.
    async fn backfill(&self, _range: TimeRange) -> Result<u64, MasterTradeError> {
        Ok(0)
    }

    async fn health_check(&self) -> HealthRecord;
}
