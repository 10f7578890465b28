//! Weighted fusion of component signals into one `MarketSignal` per symbol,
//! per tick (spec §4.5). The fusion math itself is pure and unit-tested in
//! isolation from persistence so the decay/renormalization/conflict rules
//! can be checked without a database.

use crate::error::MasterTradeError;
use crate::fabric::Fabric;
use crate::models::message::{MessageType, RawMessage};
use crate::models::signal::{MarketSignal, SignalAction, SignalComponent, SignalStrength};
use crate::persistence::Persistence;
use crate::signals::buffer::SignalBuffer;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// A component older than this is excluded from fusion (spec §4.5 step 2).
const MAX_COMPONENT_AGE_SECS: i64 = 60 * 60;
/// Below this many fresh components, never fabricate a signal (spec §4.5
/// "Missing sources never fabricate a signal").
const MIN_FRESH_COMPONENTS: usize = 2;

pub fn base_weights() -> HashMap<String, f64> {
    HashMap::from([
        ("price".to_string(), 0.35),
        ("sentiment".to_string(), 0.25),
        ("onchain".to_string(), 0.20),
        ("flow".to_string(), 0.20),
    ])
}

/// Pure fusion step: excludes stale components, renormalizes the remaining
/// weights proportional to their original share, and computes the fused
/// score/confidence. Returns `None` when fewer than
/// `MIN_FRESH_COMPONENTS` components survive exclusion.
pub fn fuse(
    components: &HashMap<String, SignalComponent>,
    weights: &HashMap<String, f64>,
) -> Option<(f64, f64, HashMap<String, f64>)> {
    let fresh: HashMap<&String, &SignalComponent> = components
        .iter()
        .filter(|(_, c)| c.age_seconds <= MAX_COMPONENT_AGE_SECS)
        .collect();

    if fresh.len() < MIN_FRESH_COMPONENTS {
        return None;
    }

    let original_weight_sum: f64 = fresh.keys().filter_map(|k| weights.get(*k)).sum();
    if original_weight_sum <= 0.0 {
        return None;
    }

    let weights_used: HashMap<String, f64> = fresh
        .keys()
        .map(|k| {
            let w = weights.get(*k).copied().unwrap_or(0.0) / original_weight_sum;
            ((*k).clone(), w)
        })
        .collect();

    let fused_score: f64 = fresh
        .iter()
        .map(|(k, c)| weights_used.get(*k).copied().unwrap_or(0.0) * c.score)
        .sum();
    let fused_confidence: f64 = fresh
        .iter()
        .map(|(k, c)| weights_used.get(*k).copied().unwrap_or(0.0) * c.confidence)
        .sum();

    Some((fused_score, fused_confidence, weights_used))
}

pub struct SignalAggregator {
    persistence: Persistence,
    fabric: Fabric,
    buffer: SignalBuffer,
    symbols: Vec<String>,
    base_weights: HashMap<String, f64>,
    throttle_factor: std::sync::atomic::AtomicU8,
}

impl SignalAggregator {
    pub fn new(persistence: Persistence, fabric: Fabric, symbols: Vec<String>) -> Self {
        let buffer = SignalBuffer::new(persistence.cache.clone());
        Self {
            persistence,
            fabric,
            buffer,
            symbols,
            base_weights: base_weights(),
            throttle_factor: std::sync::atomic::AtomicU8::new(100),
        }
    }

    async fn gather_components(&self, symbol: &str) -> HashMap<String, SignalComponent> {
        let mut out = HashMap::new();
        let now = chrono::Utc::now();

        if let Ok(points) = self
            .persistence
            .timeseries
            .recent_ohlcv(symbol, "1h", 1)
            .await
        {
            if let Some(p) = points.first() {
                let range = (p.high - p.low).max(rust_decimal::Decimal::new(1, 2));
                let mid = (p.high + p.low) / rust_decimal::Decimal::from(2);
                let bias = ((p.close - mid) / range)
                    .clamp(rust_decimal::Decimal::from(-1), rust_decimal::Decimal::from(1));
                out.insert(
                    "price".to_string(),
                    SignalComponent {
                        score: bias.to_string().parse::<f64>().unwrap_or(0.0),
                        confidence: 0.8,
                        age_seconds: (now - p.ts).num_seconds().max(0),
                    },
                );
            }
        }

        if let Ok(points) = self.persistence.timeseries.recent_sentiment(symbol, 1).await {
            if let Some(p) = points.first() {
                out.insert(
                    "sentiment".to_string(),
                    SignalComponent {
                        score: p.score.clamp(-1.0, 1.0),
                        confidence: if p.volume > 0 { 0.7 } else { 0.4 },
                        age_seconds: (now - p.ts).num_seconds().max(0),
                    },
                );
            }
        }

        if let Ok(points) = self.persistence.timeseries.recent_onchain_flow(symbol, 1).await {
            if let Some(p) = points.first() {
                let flow = p.net_flow_usd.to_string().parse::<f64>().unwrap_or(0.0);
                out.insert(
                    "onchain".to_string(),
                    SignalComponent {
                        score: (flow / 10_000_000.0).tanh(),
                        confidence: 0.6,
                        age_seconds: (now - p.ts).num_seconds().max(0),
                    },
                );
            }
        }

        if let Ok(Some(pressure)) = self
            .persistence
            .timeseries
            .recent_whale_pressure(symbol, now - chrono::Duration::hours(1))
            .await
        {
            out.insert(
                "flow".to_string(),
                SignalComponent {
                    score: (pressure / 50_000_000.0).tanh(),
                    confidence: 0.5,
                    age_seconds: 0,
                },
            );
        }

        out
    }

    /// One fusion+publish cycle for a single symbol (spec §4.5 steps 1-7).
    pub async fn process_symbol(&self, symbol: &str) -> Result<Option<MarketSignal>, MasterTradeError> {
        let components = self.gather_components(symbol).await;
        let fused = fuse(&components, &self.base_weights);

        let (fused_score, fused_confidence, weights_used) = match fused {
            Some(v) => v,
            None => return Ok(None),
        };

        let action = MarketSignal::classify_action(fused_score, fused_confidence);
        let strength = SignalStrength::classify(fused_confidence);

        let signal = MarketSignal {
            symbol: symbol.to_string(),
            timestamp: chrono::Utc::now(),
            action,
            confidence: fused_confidence,
            strength,
            components,
            weights_used,
            fused_score,
        };

        self.buffer.push(&signal).await?;

        let throttle = self.throttle_factor.load(std::sync::atomic::Ordering::Relaxed);
        if throttle < 100 && signal.timestamp.timestamp_millis() % 100 >= throttle as i64 {
            // Throttled publish: buffered but not emitted onto the fabric.
            return Ok(Some(signal));
        }

        let routing_key = if matches!(strength, SignalStrength::Strong) {
            format!("signal.{symbol}.strong")
        } else {
            format!("signal.{symbol}")
        };
        let payload = serde_json::to_value(&signal).map_err(|e| MasterTradeError::PermanentParse {
            source_name: "MarketSignal".into(),
            reason: e.to_string(),
        })?;
        let message = RawMessage::new(MessageType::TradingSignal, "signal-aggregator", routing_key, payload);
        self.fabric.publish("mastertrade.trading", &message).await?;

        Ok(Some(signal))
    }

    /// Applies the §5 backpressure rule: when `trading_signals` depth > 1000,
    /// halve the publish rate and raise a warning.
    pub async fn check_backpressure(&self) {
        match self.fabric.queue_depth("trading_signals").await {
            Ok(depth) if depth > 1000 => {
                self.throttle_factor.store(50, std::sync::atomic::Ordering::Relaxed);
                warn!(depth, "trading_signals queue depth exceeds 1000, throttling publish rate 50%");
            }
            Ok(_) => {
                self.throttle_factor.store(100, std::sync::atomic::Ordering::Relaxed);
            }
            Err(err) => {
                warn!(error = %err, "failed to read trading_signals queue depth");
            }
        }
    }

    pub async fn run_once(&self) {
        self.check_backpressure().await;
        for symbol in &self.symbols {
            if let Err(err) = self.process_symbol(symbol).await {
                warn!(symbol, error = %err, "signal aggregation cycle failed for symbol");
            }
        }
    }

    pub async fn run_loop(&self, cadence: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(cadence);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.run_once().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(score: f64, confidence: f64, age: i64) -> SignalComponent {
        SignalComponent { score, confidence, age_seconds: age }
    }

    #[test]
    fn e1_two_fresh_strong_components_yield_buy_above_threshold() {
        let mut components = HashMap::new();
        components.insert("price".to_string(), component(0.6, 0.9, 10));
        components.insert("sentiment".to_string(), component(0.5, 0.8, 10));
        let (score, confidence, _) = fuse(&components, &base_weights()).unwrap();
        assert_eq!(MarketSignal::classify_action(score, confidence), SignalAction::Buy);
    }

    #[test]
    fn e2_conflicting_components_trend_toward_hold() {
        let mut components = HashMap::new();
        components.insert("price".to_string(), component(-0.3, 0.6, 10));
        components.insert("sentiment".to_string(), component(0.3, 0.6, 10));
        let (score, confidence, _) = fuse(&components, &base_weights()).unwrap();
        assert_eq!(MarketSignal::classify_action(score, confidence), SignalAction::Hold);
    }

    #[test]
    fn stale_components_are_excluded_and_weights_renormalized() {
        let mut components = HashMap::new();
        components.insert("price".to_string(), component(0.8, 0.9, 10));
        components.insert("sentiment".to_string(), component(0.8, 0.9, 10));
        components.insert("onchain".to_string(), component(-0.9, 0.9, 7200));
        let (_, _, weights) = fuse(&components, &base_weights()).unwrap();
        assert!(!weights.contains_key("onchain"));
        let sum: f64 = weights.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn fewer_than_two_fresh_components_yields_no_signal() {
        let mut components = HashMap::new();
        components.insert("price".to_string(), component(0.8, 0.9, 10));
        assert!(fuse(&components, &base_weights()).is_none());
    }
}
