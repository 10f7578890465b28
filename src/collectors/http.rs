//! Shared HTTP-fetch-with-policy helper used by every polling collector.
//! Grounded on `scrapers::polymarket_api`'s `execute_with_retry`, generalized
//! to route through the shared rate limiter + breaker and to classify every
//! outcome into the §7 error taxonomy.

use crate::error::MasterTradeError;
use crate::ratelimit::{CircuitBreaker, RateLimitObservation, RateLimiter};
use reqwest::{Client, Response};
use std::time::{Duration, Instant};
use tokio::time::timeout;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetch `url`, pacing through `limiter` and gating through `breaker`.
/// Returns the classified error on any non-2xx/parse/network failure so the
/// caller's cycle can apply §4.2 failure semantics without re-deriving them.
pub async fn fetch(
    client: &Client,
    url: &str,
    limiter: &mut RateLimiter,
    breaker: &mut CircuitBreaker,
) -> Result<Response, MasterTradeError> {
    breaker.acquire()?;
    limiter.acquire().await;

    let started = Instant::now();
    let result = timeout(HTTP_TIMEOUT, client.get(url).send()).await;

    let response = match result {
        Err(_) => {
            let err = MasterTradeError::TransientNetwork {
                endpoint: url.to_string(),
                source: anyhow::anyhow!("request timed out after {:?}", HTTP_TIMEOUT),
            };
            breaker.on_failure(&err);
            return Err(err);
        }
        Ok(Err(e)) => {
            let err = MasterTradeError::TransientNetwork {
                endpoint: url.to_string(),
                source: e.into(),
            };
            breaker.on_failure(&err);
            return Err(err);
        }
        Ok(Ok(resp)) => resp,
    };

    let status = response.status();
    let retry_after_secs = response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let remaining = response
        .headers()
        .get("X-RateLimit-Remaining")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u32>().ok());
    let reset_in_secs = response
        .headers()
        .get("X-RateLimit-Reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    limiter
        .observe_response(RateLimitObservation {
            status_code: status.as_u16(),
            retry_after_secs,
            remaining,
            reset_in_secs,
        })
        .await;

    if status.as_u16() == 429 {
        let err = MasterTradeError::TransientThrottled {
            endpoint: url.to_string(),
            retry_after_secs: retry_after_secs.unwrap_or(1),
        };
        // 429 never counts toward the breaker.
        return Err(err);
    }

    if status.is_server_error() {
        let err = MasterTradeError::TransientNetwork {
            endpoint: url.to_string(),
            source: anyhow::anyhow!("server error {}", status),
        };
        breaker.on_failure(&err);
        return Err(err);
    }

    if status.is_client_error() {
        // Permanent.Client: logged, no retry, does not count toward the breaker.
        return Err(MasterTradeError::PermanentClient {
            endpoint: url.to_string(),
            status: status.as_u16(),
        });
    }

    breaker.on_success();
    let _elapsed = started.elapsed();
    Ok(response)
}
