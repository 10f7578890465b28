//! Three-state circuit breaker, one per collector.
//! Grounded on `DataSourceKillSwitch` in the teacher's `main.rs`
//! (consecutive-failure trip + latency-aware disable), generalized to the
//! full closed/open/half-open cycle of spec §4.1.

use crate::error::MasterTradeError;
use crate::models::collector::BreakerState;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Duration;

const HEALTH_WINDOW: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerOutcome {
    Allowed,
    Rejected,
}

/// A logged manual action on the breaker, for the control API audit trail.
#[derive(Debug, Clone)]
pub struct ManualAction {
    pub actor: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    pub state: BreakerState,
    pub failure_threshold: u32,
    pub timeout: Duration,
    pub max_timeout: Duration,
    pub half_open_success_threshold: u32,
    pub half_open_max_calls: u32,

    pub consecutive_failures: u32,
    pub half_open_successes: u32,
    pub half_open_calls: u32,
    pub recovery_attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,

    outcomes: VecDeque<bool>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, timeout: Duration, max_timeout: Duration) -> Self {
        Self {
            state: BreakerState::Closed,
            failure_threshold,
            timeout,
            max_timeout,
            half_open_success_threshold: 2,
            half_open_max_calls: 3,
            consecutive_failures: 0,
            half_open_successes: 0,
            half_open_calls: 0,
            recovery_attempts: 0,
            next_attempt_at: None,
            outcomes: VecDeque::with_capacity(HEALTH_WINDOW),
        }
    }

    /// Call before attempting the request. Transitions `open -> half_open`
    /// when the cooldown has elapsed.
    pub fn acquire(&mut self) -> Result<BreakerOutcome, MasterTradeError> {
        if self.state == BreakerState::Open {
            let now = Utc::now();
            if let Some(next) = self.next_attempt_at {
                if now >= next {
                    self.to_half_open();
                } else {
                    return Err(MasterTradeError::CircuitOpen {
                        collector: "unknown".into(),
                        next_attempt_at: next,
                    });
                }
            }
        }
        if self.state == BreakerState::HalfOpen {
            self.half_open_calls += 1;
        }
        Ok(BreakerOutcome::Allowed)
    }

    fn record_outcome(&mut self, success: bool) {
        if self.outcomes.len() >= HEALTH_WINDOW {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(success);
    }

    pub fn on_success(&mut self) {
        self.record_outcome(true);
        match self.state {
            BreakerState::Closed => {
                self.consecutive_failures = 0;
            }
            BreakerState::HalfOpen => {
                self.half_open_successes += 1;
                if self.half_open_successes >= self.half_open_success_threshold {
                    self.to_closed();
                }
            }
            BreakerState::Open => {
                // Success cannot be observed while open; acquire() gates that.
            }
        }
    }

    /// Only counts toward the breaker when `err.counts_toward_breaker()`.
    pub fn on_failure(&mut self, err: &MasterTradeError) {
        if !err.counts_toward_breaker() {
            return;
        }
        self.record_outcome(false);
        match self.state {
            BreakerState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.failure_threshold {
                    self.to_open();
                }
            }
            BreakerState::HalfOpen => {
                self.to_open();
            }
            BreakerState::Open => {}
        }
    }

    fn to_open(&mut self) {
        self.state = BreakerState::Open;
        let backoff = self
            .timeout
            .mul_f64(1.5f64.powi(self.recovery_attempts as i32))
            .min(self.max_timeout);
        self.next_attempt_at = Some(Utc::now() + chrono::Duration::from_std(backoff).unwrap());
        self.recovery_attempts += 1;
        self.half_open_successes = 0;
        self.half_open_calls = 0;
    }

    fn to_half_open(&mut self) {
        self.state = BreakerState::HalfOpen;
        self.half_open_successes = 0;
        self.half_open_calls = 0;
    }

    fn to_closed(&mut self) {
        self.state = BreakerState::Closed;
        self.consecutive_failures = 0;
        self.recovery_attempts = 0;
        self.next_attempt_at = None;
    }

    pub fn force_open(&mut self, _action: ManualAction) {
        self.to_open();
    }

    pub fn force_close(&mut self, _action: ManualAction) {
        self.to_closed();
    }

    pub fn reset(&mut self, _action: ManualAction) {
        self.to_closed();
        self.outcomes.clear();
    }

    /// Health score = successes / (successes + failures) over the last 1000 calls.
    pub fn health_score(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 1.0;
        }
        let successes = self.outcomes.iter().filter(|&&s| s).count();
        successes as f64 / self.outcomes.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network_err() -> MasterTradeError {
        MasterTradeError::TransientNetwork {
            endpoint: "x".into(),
            source: anyhow::anyhow!("boom"),
        }
    }

    #[test]
    fn e3_breaker_opens_then_half_opens_then_closes() {
        let mut b = CircuitBreaker::new(5, Duration::from_secs(300), Duration::from_secs(3600));
        for _ in 0..5 {
            b.on_failure(&network_err());
        }
        assert_eq!(b.state, BreakerState::Open);
        assert!(b.next_attempt_at.is_some());

        // Force the cooldown to have elapsed and re-acquire.
        b.next_attempt_at = Some(Utc::now() - chrono::Duration::seconds(1));
        b.acquire().unwrap();
        assert_eq!(b.state, BreakerState::HalfOpen);

        b.on_success();
        assert_eq!(b.state, BreakerState::HalfOpen, "needs 2 of 2 successes");
        b.on_success();
        assert_eq!(b.state, BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let mut b = CircuitBreaker::new(1, Duration::from_secs(1), Duration::from_secs(60));
        b.on_failure(&network_err());
        assert_eq!(b.state, BreakerState::Open);
        b.next_attempt_at = Some(Utc::now() - chrono::Duration::seconds(1));
        b.acquire().unwrap();
        assert_eq!(b.state, BreakerState::HalfOpen);
        b.on_failure(&network_err());
        assert_eq!(b.state, BreakerState::Open);
    }

    #[test]
    fn throttled_errors_never_trip_the_breaker() {
        let mut b = CircuitBreaker::new(2, Duration::from_secs(1), Duration::from_secs(60));
        let throttled = MasterTradeError::TransientThrottled {
            endpoint: "x".into(),
            retry_after_secs: 1,
        };
        b.on_failure(&throttled);
        b.on_failure(&throttled);
        b.on_failure(&throttled);
        assert_eq!(b.state, BreakerState::Closed);
    }

    #[test]
    fn acquire_rejects_while_open_and_before_cooldown() {
        let mut b = CircuitBreaker::new(1, Duration::from_secs(300), Duration::from_secs(3600));
        b.on_failure(&network_err());
        assert!(b.acquire().is_err());
    }
}
