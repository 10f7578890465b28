//! Thin typed wrapper over `persistence::CacheStore`'s `signals:recent`
//! sorted set (spec §4.5 step 7). Kept separate from `aggregator.rs` so the
//! control API's `/signals/recent` handler can depend on just this.

use crate::error::MasterTradeError;
use crate::models::MarketSignal;
use crate::persistence::CacheStore;

#[derive(Clone)]
pub struct SignalBuffer {
    cache: CacheStore,
}

impl SignalBuffer {
    pub fn new(cache: CacheStore) -> Self {
        Self { cache }
    }

    pub async fn push(&self, signal: &MarketSignal) -> Result<(), MasterTradeError> {
        let payload = serde_json::to_string(signal).map_err(|e| MasterTradeError::PermanentParse {
            source_name: "MarketSignal".into(),
            reason: e.to_string(),
        })?;
        self.cache
            .push_recent_signal(&payload, signal.timestamp.timestamp_millis())
            .await
    }

    pub async fn recent(&self, limit: isize) -> Result<Vec<MarketSignal>, MasterTradeError> {
        let raw = self.cache.recent_signals(limit).await?;
        Ok(raw
            .into_iter()
            .filter_map(|s| serde_json::from_str(&s).ok())
            .collect())
    }

    pub async fn recent_for_symbol(&self, symbol: &str, limit: isize) -> Result<Vec<MarketSignal>, MasterTradeError> {
        // `signals:recent` is a flat set across symbols; filter client-side
        // since the set is capped at 1000 entries (spec §4.5), a full scan
        // here is bounded and cheap.
        let all = self.recent(1000).await?;
        Ok(all
            .into_iter()
            .filter(|s| s.symbol == symbol)
            .take(limit.max(0) as usize)
            .collect())
    }

    pub async fn depth(&self) -> Result<i64, MasterTradeError> {
        self.cache.recent_signals_depth().await
    }
}
