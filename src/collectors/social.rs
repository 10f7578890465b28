//! Social sentiment collector (Twitter/Reddit/LunarCrush-shaped polling).
//! Same shape as `onchain::OnchainCollector`; kept as a separate type per
//! collector variant so each can carry source-specific parsing without a
//! shared god-struct.

use super::http::fetch;
use super::traits::{Collector, HealthRecord, TimeRange};
use crate::error::MasterTradeError;
use crate::fabric::Fabric;
use crate::models::collector::CollectorHealth;
use crate::models::message::{MessageType, RawMessage};
use crate::persistence::{timeseries::SentimentPoint, Persistence};
use crate::ratelimit::{CircuitBreaker, RateLimiter};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use std::time::Duration;
use tracing::warn;

pub struct SocialCollector {
    name: String,
    base_url: String,
    api_key: String,
    symbols: Vec<String>,
    client: Client,
    limiter: Mutex<RateLimiter>,
    breaker: Mutex<CircuitBreaker>,
    fabric: Fabric,
    persistence: Persistence,
}

impl SocialCollector {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        symbols: Vec<String>,
        fabric: Fabric,
        persistence: Persistence,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            symbols,
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client"),
            limiter: Mutex::new(RateLimiter::new(2.0, 2.0, Duration::from_secs(120))),
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

    async fn poll_symbol(&self, symbol: &str) -> Result<(), MasterTradeError> {
        let url = format!(
            "{}/sentiment?symbol={}&api_key={}",
            self.base_url, symbol, self.api_key
        );
        let response = self.fetch_guarded(&url).await?;

        let body: serde_json::Value = response.json().await.map_err(|e| MasterTradeError::PermanentParse {
            source_name: self.name.clone(),
            reason: e.to_string(),
        })?;

        let score = body.get("score").and_then(|v| v.as_f64()).ok_or_else(|| {
            MasterTradeError::PermanentParse {
                source_name: self.name.clone(),
                reason: "missing `score` field".into(),
            }
        })?;
        let volume = body.get("volume").and_then(|v| v.as_u64()).unwrap_or(0);

        let point = SentimentPoint {
            source: self.name.clone(),
            symbol: symbol.to_string(),
            ts: chrono::Utc::now(),
            score,
            volume,
        };
        self.persistence.timeseries.insert_sentiment(&point).await?;

        let message = RawMessage::new(
            MessageType::Sentiment,
            self.name.clone(),
            format!("sentiment.{symbol}"),
            body,
        );
        self.fabric.publish("mastertrade.market", &message).await?;
        Ok(())
    }
}

#[async_trait]
impl Collector for SocialCollector {
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
        for symbol in &self.symbols {
            match self.poll_symbol(symbol).await {
                Ok(()) => collected += 1,
                Err(MasterTradeError::PermanentClient { .. }) => {
                    warn!(collector = %self.name, symbol, "permanent client error, skipping symbol");
                }
                Err(MasterTradeError::PermanentParse { reason, .. }) => {
                    warn!(collector = %self.name, symbol, reason, "parse error, skipping symbol");
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
