//! Macro indicator collector (FRED/Yahoo/alternative.me-shaped polling).
//! Same poll-and-publish shape as `onchain`/`social`; polls far less often
//! since macro series update daily at most.

use super::http::fetch;
use super::traits::{Collector, HealthRecord, TimeRange};
use crate::error::MasterTradeError;
use crate::fabric::Fabric;
use crate::models::collector::CollectorHealth;
use crate::models::message::{MessageType, RawMessage};
use crate::persistence::{timeseries::IndicatorPoint, Persistence};
use crate::ratelimit::{CircuitBreaker, RateLimiter};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use std::time::Duration;
use tracing::warn;

pub struct MacroCollector {
    name: String,
    base_url: String,
    api_key: String,
    indicators: Vec<String>,
    client: Client,
    limiter: Mutex<RateLimiter>,
    breaker: Mutex<CircuitBreaker>,
    fabric: Fabric,
    persistence: Persistence,
}

impl MacroCollector {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        indicators: Vec<String>,
        fabric: Fabric,
        persistence: Persistence,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            indicators,
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client"),
            limiter: Mutex::new(RateLimiter::new(1.0, 2.0, Duration::from_secs(300))),
            breaker: Mutex::new(CircuitBreaker::new(5, Duration::from_secs(300), Duration::from_secs(3600))),
            fabric,
            persistence,
        }
    }

    async fn fetch_guarded(&self, url: &str) -> Result<reqwest::Response, MasterTradeError> {
        let mut limiter = self.limiter.lock().clone();
        let mut breaker = self.breaker.lock().clone();
        let result = fetch(&self.client, url, &mut limiter, &mut breaker).await;
        *self.limiter.lock() = limiter;
        *self.breaker.lock() = breaker;
        result
    }

    async fn poll_indicator(&self, indicator: &str) -> Result<(), MasterTradeError> {
        let url = format!(
            "{}/series?id={}&api_key={}",
            self.base_url, indicator, self.api_key
        );
        let response = self.fetch_guarded(&url).await?;

        let body: serde_json::Value = response.json().await.map_err(|e| MasterTradeError::PermanentParse {
            source_name: self.name.clone(),
            reason: e.to_string(),
        })?;

        let value = body.get("value").and_then(|v| v.as_f64()).ok_or_else(|| {
            MasterTradeError::PermanentParse {
                source_name: self.name.clone(),
                reason: "missing `value` field".into(),
            }
        })?;

        let point = IndicatorPoint {
            symbol: "macro".into(),
            interval: "1d".into(),
            indicator: indicator.to_string(),
            ts: chrono::Utc::now(),
            value,
        };
        self.persistence.timeseries.insert_indicator(&point).await?;

        let message = RawMessage::new(
            MessageType::MarketData,
            self.name.clone(),
            "market.data.macro",
            body,
        );
        self.fabric.publish("mastertrade.market", &message).await?;
        Ok(())
    }
}

#[async_trait]
impl Collector for MacroCollector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<(), MasterTradeError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), MasterTradeError> {
        Ok(())
    }

    async fn poll_once(&self) -> Result<u64, MasterTradeError> {
        let mut collected = 0u64;
        for indicator in &self.indicators {
            match self.poll_indicator(indicator).await {
                Ok(()) => collected += 1,
                Err(MasterTradeError::PermanentClient { .. }) => {
                    warn!(collector = %self.name, indicator, "permanent client error, skipping indicator");
                }
                Err(MasterTradeError::PermanentParse { reason, .. }) => {
                    warn!(collector = %self.name, indicator, reason, "parse error, skipping indicator");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(collected)
    }

    async fn backfill(&self, _range: TimeRange) -> Result<u64, MasterTradeError> {
        Ok(0)
    }

    async fn health_check(&self) -> HealthRecord {
        let breaker = self.breaker.lock().clone();
        let status = match breaker.state {
            crate::models::collector::BreakerState::Open => CollectorHealth::CircuitOpen,
            crate::models::collector::BreakerState::HalfOpen => CollectorHealth::Degraded,
            crate::models::collector::BreakerState::Closed if breaker.consecutive_failures > 0 => {
                CollectorHealth::Degraded
            }
            crate::models::collector::BreakerState::Closed => CollectorHealth::Healthy,
        };
        HealthRecord {
            status,
            latency_ms: 0,
            records_collected: 0,
            error_message: None,
        }
    }
}
