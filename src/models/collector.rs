//! CollectorState (spec §3, §4.1)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The data family a collector belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Onchain,
    Social,
    Market,
    Macro,
    Exchange,
}

/// Circuit breaker state. Transitions form the cycle
/// `closed -> open -> half_open -> {closed, open}`; no other edge is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    /// True if `self -> next` is an edge of the transition diagram in §4.1.
    pub fn can_transition_to(self, next: BreakerState) -> bool {
        use BreakerState::*;
        matches!(
            (self, next),
            (Closed, Open) | (Open, HalfOpen) | (HalfOpen, Closed) | (HalfOpen, Open)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectorHealth {
    Healthy,
    Degraded,
    Failed,
    CircuitOpen,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectorStats {
    pub total_polls: u64,
    pub total_records_collected: u64,
    pub total_errors: u64,
}

/// One per collector instance. Mutated only by the collector's own task and
/// the control API; persisted to cache with a 24h TTL for restart survival.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorState {
    pub name: String,
    pub source_kind: SourceKind,
    pub enabled: bool,

    pub max_requests_per_sec: f64,
    pub backoff_multiplier: f64,
    pub max_backoff_secs: u64,

    pub breaker_state: BreakerState,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_ok_at: Option<DateTime<Utc>>,
    pub recovery_attempts: u32,

    pub stats: CollectorStats,
}

impl CollectorState {
    pub fn new(name: impl Into<String>, source_kind: SourceKind) -> Self {
        Self {
            name: name.into(),
            source_kind,
            enabled: true,
            max_requests_per_sec: 5.0,
            backoff_multiplier: 2.0,
            max_backoff_secs: 300,
            breaker_state: BreakerState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            next_attempt_at: None,
            last_ok_at: None,
            recovery_attempts: 0,
            stats: CollectorStats::default(),
        }
    }

    pub fn health(&self) -> CollectorHealth {
        if !self.enabled {
            return CollectorHealth::Degraded;
        }
        match self.breaker_state {
            BreakerState::Open => CollectorHealth::CircuitOpen,
            BreakerState::HalfOpen => CollectorHealth::Degraded,
            BreakerState::Closed if self.consecutive_failures > 0 => CollectorHealth::Degraded,
            BreakerState::Closed => CollectorHealth::Healthy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_diagram_rejects_illegal_edges() {
        assert!(BreakerState::Closed.can_transition_to(BreakerState::Open));
        assert!(BreakerState::Open.can_transition_to(BreakerState::HalfOpen));
        assert!(BreakerState::HalfOpen.can_transition_to(BreakerState::Closed));
        assert!(BreakerState::HalfOpen.can_transition_to(BreakerState::Open));

        assert!(!BreakerState::Closed.can_transition_to(BreakerState::HalfOpen));
        assert!(!BreakerState::Open.can_transition_to(BreakerState::Closed));
    }

    #[test]
    fn fresh_collector_is_healthy() {
        let c = CollectorState::new("moralis", SourceKind::Onchain);
        assert_eq!(c.health(), CollectorHealth::Healthy);
    }
}
