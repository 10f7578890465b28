//! Error taxonomy
//! Mission: give every failure a policy-bearing tag instead of an opaque string

use thiserror::Error;

/// The error taxonomy of the platform. Each variant carries the retry/breaker
/// policy implied by its tag; callers match on the variant rather than on
/// message text.
#[derive(Debug, Error)]
pub enum MasterTradeError {
    /// Timeouts, 5xx upstream. Retried with backoff up to 3 attempts; counts
    /// toward the circuit breaker.
    #[error("transient network error calling {endpoint}: {source}")]
    TransientNetwork {
        endpoint: String,
        #[source]
        source: anyhow::Error,
    },

    /// 429 or local rate limiter rejection. Sleeps per the adaptive rule; does
    /// NOT count toward the breaker.
    #[error("throttled on {endpoint}, retry after {retry_after_secs}s")]
    TransientThrottled {
        endpoint: String,
        retry_after_secs: u64,
    },

    /// 4xx non-throttle response. Logged, no retry, does not count toward the
    /// breaker.
    #[error("permanent client error on {endpoint}: status {status}")]
    PermanentClient { endpoint: String, status: u16 },

    /// Malformed payload. Logged with a sample, no retry, no breaker, message
    /// dropped.
    #[error("failed to parse payload from {source_name}: {reason}")]
    PermanentParse { source_name: String, reason: String },

    /// DB/cache/broker unavailable. Retried once; if still failing the
    /// component self-degrades to `degraded` health.
    #[error("infrastructure store unavailable: {what}")]
    InfrastructureStore {
        what: String,
        #[source]
        source: anyhow::Error,
    },

    /// A data-model invariant was violated (e.g. activation beyond
    /// MAX_ACTIVE_STRATEGIES, an order transition out of order). Fatal for
    /// the affected operation; surfaced to alerts.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// The circuit breaker rejected the call.
    #[error("circuit open for {collector}, next attempt at {next_attempt_at}")]
    CircuitOpen {
        collector: String,
        next_attempt_at: chrono::DateTime<chrono::Utc>,
    },

    /// Startup-fatal configuration error. The process exits non-zero before
    /// accepting work.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

impl MasterTradeError {
    /// Whether this error should count toward a collector's circuit breaker.
    pub fn counts_toward_breaker(&self) -> bool {
        matches!(self, MasterTradeError::TransientNetwork { .. })
    }

    /// Whether the caller should retry this specific call immediately (as
    /// opposed to waiting for the rate limiter / breaker to reopen).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MasterTradeError::TransientNetwork { .. } | MasterTradeError::InfrastructureStore { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, MasterTradeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_errors_count_toward_breaker() {
        let e = MasterTradeError::TransientNetwork {
            endpoint: "x".into(),
            source: anyhow::anyhow!("boom"),
        };
        assert!(e.counts_toward_breaker());
        assert!(e.is_retryable());
    }

    #[test]
    fn throttled_does_not_count_toward_breaker() {
        let e = MasterTradeError::TransientThrottled {
            endpoint: "x".into(),
            retry_after_secs: 5,
        };
        assert!(!e.counts_toward_breaker());
        assert!(!e.is_retryable());
    }

    #[test]
    fn parse_errors_do_not_count() {
        let e = MasterTradeError::PermanentParse {
            source_name: "x".into(),
            reason: "bad json".into(),
        };
        assert!(!e.counts_toward_breaker());
    }
}
