//! Adaptive token-bucket rate limiter, one per (collector, endpoint).
//! Grounded on `scrapers::polymarket_api::RateLimiter` (window-based pacing)
//! generalized with the §4.1 adaptation rules.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::time::sleep;

const SUCCESS_STREAK_FOR_RAMP: u32 = 50;
const RAMP_FACTOR: f64 = 1.1;

/// What the caller observed on the wire, fed back into `observe_response`.
#[derive(Debug, Clone)]
pub struct RateLimitObservation {
    pub status_code: u16,
    pub retry_after_secs: Option<u64>,
    pub remaining: Option<u32>,
    pub reset_in_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterStats {
    pub total_acquires: u64,
    pub total_throttles: u64,
    pub current_rate_per_sec: f64,
}

/// Adaptive per-endpoint pacer. State is durable to restart via the cache
/// (`ratelimit:{collector}:{endpoint}`, 24h TTL) but owned in-process by the
/// collector that constructed it.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    configured_max_per_sec: f64,
    current_rate_per_sec: f64,
    backoff_multiplier: f64,
    max_backoff: Duration,
    success_streak: u32,
    last_acquire_at: Option<Instant>,
    stats: RateLimiterStats,
}

impl RateLimiter {
    pub fn new(max_requests_per_sec: f64, backoff_multiplier: f64, max_backoff: Duration) -> Self {
        Self {
            configured_max_per_sec: max_requests_per_sec,
            current_rate_per_sec: max_requests_per_sec,
            backoff_multiplier: backoff_multiplier.max(1.01),
            max_backoff,
            success_streak: 0,
            last_acquire_at: None,
            stats: RateLimiterStats {
                total_acquires: 0,
                total_throttles: 0,
                current_rate_per_sec: max_requests_per_sec,
            },
        }
    }

    /// Restore persisted pacing state on startup (advisory — a restart may
    /// lose a few seconds of precision but never exceeds `configured_max`).
    pub fn restore(&mut self, rate_per_sec: f64) {
        self.current_rate_per_sec = rate_per_sec.min(self.configured_max_per_sec).max(0.01);
    }

    fn min_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.current_rate_per_sec.max(0.01))
    }

    /// Block until a slot is free, then record the acquisition.
    pub async fn acquire(&mut self) {
        if let Some(last) = self.last_acquire_at {
            let min_interval = self.min_interval();
            let elapsed = last.elapsed();
            if elapsed < min_interval {
                sleep(min_interval - elapsed).await;
            }
        }
        self.last_acquire_at = Some(Instant::now());
        self.stats.total_acquires += 1;
    }

    /// Apply the §4.1 adaptation rules for one observed response.
    pub async fn observe_response(&mut self, observation: RateLimitObservation) {
        if observation.status_code == 429 {
            self.stats.total_throttles += 1;
            self.success_streak = 0;
            self.current_rate_per_sec = (self.current_rate_per_sec / self.backoff_multiplier).max(0.01);
            self.stats.current_rate_per_sec = self.current_rate_per_sec;

            let sleep_for = observation
                .retry_after_secs
                .map(Duration::from_secs)
                .unwrap_or(self.min_interval())
                .min(self.max_backoff);
            sleep(sleep_for).await;
            return;
        }

        if let (Some(remaining), Some(reset_in)) =
            (observation.remaining, observation.reset_in_secs)
        {
            if remaining > 0 && reset_in > 0 {
                self.current_rate_per_sec = (remaining as f64 / reset_in as f64)
                    .min(self.configured_max_per_sec)
                    .max(0.01);
                self.stats.current_rate_per_sec = self.current_rate_per_sec;
            }
        }

        if observation.status_code == 200 {
            self.success_streak += 1;
            if self.success_streak >= SUCCESS_STREAK_FOR_RAMP {
                self.current_rate_per_sec =
                    (self.current_rate_per_sec * RAMP_FACTOR).min(self.configured_max_per_sec);
                self.stats.current_rate_per_sec = self.current_rate_per_sec;
                self.success_streak = 0;
            }
        }
    }

    pub fn stats(&self) -> RateLimiterStats {
        self.stats.clone()
    }

    pub fn current_rate(&self) -> f64 {
        self.current_rate_per_sec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn throttle_lowers_rate_success_raises_it() {
        let mut limiter = RateLimiter::new(10.0, 2.0, Duration::from_secs(5));
        let before = limiter.current_rate();

        limiter
            .observe_response(RateLimitObservation {
                status_code: 429,
                retry_after_secs: Some(0),
                remaining: None,
                reset_in_secs: None,
            })
            .await;
        assert!(limiter.current_rate() < before);

        for _ in 0..SUCCESS_STREAK_FOR_RAMP {
            limiter
                .observe_response(RateLimitObservation {
                    status_code: 200,
                    retry_after_secs: None,
                    remaining: None,
                    reset_in_secs: None,
                })
                .await;
        }
        assert!(limiter.current_rate() > before / 2.0);
    }

    #[tokio::test]
    async fn rate_never_exceeds_configured_max() {
        let mut limiter = RateLimiter::new(5.0, 2.0, Duration::from_secs(5));
        for _ in 0..1000 {
            limiter
                .observe_response(RateLimitObservation {
                    status_code: 200,
                    retry_after_secs: None,
                    remaining: None,
                    reset_in_secs: None,
                })
                .await;
        }
        assert!(limiter.current_rate() <= 5.0 + 1e-9);
    }

    #[tokio::test]
    async fn remaining_and_reset_window_pace_acquisitions() {
        let mut limiter = RateLimiter::new(100.0, 2.0, Duration::from_secs(5));
        limiter
            .observe_response(RateLimitObservation {
                status_code: 200,
                retry_after_secs: None,
                remaining: Some(10),
                reset_in_secs: Some(100),
            })
            .await;
        assert!((limiter.current_rate() - 0.1).abs() < 1e-9);
    }
}
