//! DeFi protocol collector (TheGraph/Dune-shaped REST polling). Polls one
//! subgraph-style endpoint per tracked protocol and records its headline
//! metrics (TVL, 24h volume) the same way `macro_source` records indicator
//! series, since a protocol's TVL is just another named time series rather
//! than a per-symbol price or flow.

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

pub struct DefiCollector {
    name: String,
    base_url: String,
    api_key: String,
    protocols: Vec<String>,
    client: Client,
    limiter: Mutex<RateLimiter>,
    breaker: Mutex<CircuitBreaker>,
    fabric: Fabric,
    persistence: Persistence,
}

impl DefiCollector {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        protocols: Vec<String>,
        fabric: Fabric,
        persistence: Persistence,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            protocols,
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client"),
            limiter: Mutex::new(RateLimiter::new(2.0, 2.0, Duration::from_secs(60))),
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

    async fn poll_protocol(&self, protocol: &str) -> Result<(), MasterTradeError> {
        let url = format!(
            "{}/protocol/{}?api_key={}",
            self.base_url, protocol, self.api_key
        );
        let response = self.fetch_guarded(&url).await?;

        let body: serde_json::Value = response.json().await.map_err(|e| MasterTradeError::PermanentParse {
            source_name: self.name.clone(),
            reason: e.to_string(),
        })?;

        let tvl_usd = body.get("tvl_usd").and_then(|v| v.as_f64()).ok_or_else(|| {
            MasterTradeError::PermanentParse {
                source_name: self.name.clone(),
                reason: "missing `tvl_usd` field".into(),
            }
        })?;
        let volume_24h_usd = body.get("volume_24h_usd").and_then(|v| v.as_f64()).unwrap_or(0.0);

        let now = chrono::Utc::now();
        self.persistence
            .timeseries
            .insert_indicator(&IndicatorPoint {
                symbol: protocol.to_string(),
                interval: "1d".into(),
                indicator: "tvl_usd".into(),
                ts: now,
                value: tvl_usd,
            })
            .await?;
        self.persistence
            .timeseries
            .insert_indicator(&IndicatorPoint {
                symbol: protocol.to_string(),
                interval: "1d".into(),
                indicator: "volume_24h_usd".into(),
                ts: now,
                value: volume_24h_usd,
            })
            .await?;

        let message = RawMessage::new(
            MessageType::OnchainMetric,
            self.name.clone(),
            format!("defi.{protocol}"),
            body,
        );
        self.fabric.publish("mastertrade.market", &message).await?;
        Ok(())
    }
}

#[async_trait]
impl Collector for DefiCollector {
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
        for protocol in &self.protocols {
            match self.poll_protocol(protocol).await {
                Ok(()) => collected += 1,
                Err(MasterTradeError::PermanentClient { .. }) => {
                    warn!(collector = %self.name, protocol, "permanent client error, skipping protocol");
                }
                Err(MasterTradeError::PermanentParse { reason, .. }) => {
                    warn!(collector = %self.name, protocol, reason, "parse error, skipping protocol");
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
