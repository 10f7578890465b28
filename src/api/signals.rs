//! `/signals/recent`, `/signals/stats` (spec §4.10): read straight from the
//! `signals:recent` sorted-set buffer the aggregator writes (spec §4.5) —
//! the Control API never touches the relational store for this family.

use crate::api::error::ApiError;
use crate::models::signal::MarketSignal;
use crate::persistence::Persistence;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct SignalsState {
    pub persistence: Persistence,
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<isize>,
}

pub async fn recent_signals(
    State(state): State<SignalsState>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<MarketSignal>>, ApiError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 1000);
    let payloads = state.persistence.cache.recent_signals(limit).await?;
    let signals = payloads
        .iter()
        .filter_map(|p| serde_json::from_str::<MarketSignal>(p).ok())
        .collect();
    Ok(Json(signals))
}

#[derive(Debug, Serialize)]
pub struct SignalStats {
    pub buffered: i64,
    pub buy: usize,
    pub sell: usize,
    pub hold: usize,
}

/// Action counts over whatever is currently buffered, not a historical
/// aggregate — the buffer is capped at 1000 entries (spec §4.5) so this is
/// a snapshot, not a durable metric.
pub async fn signal_stats(State(state): State<SignalsState>) -> Result<Json<SignalStats>, ApiError> {
    let depth = state.persistence.cache.recent_signals_depth().await?;
    let payloads = state.persistence.cache.recent_signals(crate::persistence::cache::SIGNALS_RECENT_CAP).await?;

    let mut buy = 0;
    let mut sell = 0;
    let mut hold = 0;
    for payload in &payloads {
        if let Ok(signal) = serde_json::from_str::<MarketSignal>(payload) {
            match signal.action {
                crate::models::signal::SignalAction::Buy => buy += 1,
                crate::models::signal::SignalAction::Sell => sell += 1,
                crate::models::signal::SignalAction::Hold => hold += 1,
            }
        }
    }

    Ok(Json(SignalStats { buffered: depth, buy, sell, hold }))
}
