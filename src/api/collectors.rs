//! `/collectors` family (spec §4.10): list, enable, disable, restart,
//! set-rate-limit, reset-breaker, costs. Every mutating handler rereads the
//! row, mutates it, and writes it back through `upsert_collector_state` —
//! the same read-modify-write shape the collectors themselves use, just
//! driven by an operator instead of a poll cycle.

use crate::api::error::ApiError;
use crate::middleware::{actor_id, AuditLog};
use crate::models::collector::{BreakerState, CollectorState};
use crate::persistence::Persistence;
use axum::extract::{Path, Request, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone)]
pub struct CollectorsState {
    pub persistence: Persistence,
    pub audit: Arc<AuditLog>,
}

#[derive(Debug, Serialize)]
pub struct CollectorView {
    #[serde(flatten)]
    pub state: CollectorState,
    pub health: crate::models::collector::CollectorHealth,
}

fn to_view(state: CollectorState) -> CollectorView {
    CollectorView { health: state.health(), state }
}

pub async fn list_collectors(
    State(state): State<CollectorsState>,
) -> Result<Json<Vec<CollectorView>>, ApiError> {
    let rows = state.persistence.relational.list_collector_states().await?;
    Ok(Json(rows.into_iter().map(to_view).collect()))
}

async fn fetch_or_404(persistence: &Persistence, name: &str) -> Result<CollectorState, ApiError> {
    persistence
        .relational
        .fetch_collector_state(name)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("unknown collector {name}")))
}

async fn audit_and_save(
    state: &CollectorsState,
    req: &Request,
    endpoint: &str,
    collector: CollectorState,
) -> Result<CollectorView, ApiError> {
    state.persistence.relational.upsert_collector_state(&collector).await?;
    if let Some(actor) = actor_id(req) {
        state.audit.record(&actor, endpoint, serde_json::json!({ "collector": collector.name })).await;
    }
    Ok(to_view(collector))
}

pub async fn enable_collector(
    State(state): State<CollectorsState>,
    Path(name): Path<String>,
    req: Request,
) -> Result<Json<CollectorView>, ApiError> {
    let mut collector = fetch_or_404(&state.persistence, &name).await?;
    collector.enabled = true;
    Ok(Json(audit_and_save(&state, &req, "collectors.enable", collector).await?))
}

pub async fn disable_collector(
    State(state): State<CollectorsState>,
    Path(name): Path<String>,
    req: Request,
) -> Result<Json<CollectorView>, ApiError> {
    let mut collector = fetch_or_404(&state.persistence, &name).await?;
    collector.enabled = false;
    Ok(Json(audit_and_save(&state, &req, "collectors.disable", collector).await?))
}

/// Restart re-enables the collector and clears its breaker/failure history —
/// the same effect a fresh process boot would have on its in-memory state.
pub async fn restart_collector(
    State(state): State<CollectorsState>,
    Path(name): Path<String>,
    req: Request,
) -> Result<Json<CollectorView>, ApiError> {
    let mut collector = fetch_or_404(&state.persistence, &name).await?;
    collector.enabled = true;
    collector.breaker_state = BreakerState::Closed;
    collector.consecutive_failures = 0;
    collector.half_open_successes = 0;
    collector.next_attempt_at = None;
    collector.recovery_attempts = 0;
    Ok(Json(audit_and_save(&state, &req, "collectors.restart", collector).await?))
}

pub async fn reset_breaker(
    State(state): State<CollectorsState>,
    Path(name): Path<String>,
    req: Request,
) -> Result<Json<CollectorView>, ApiError> {
    let mut collector = fetch_or_404(&state.persistence, &name).await?;
    collector.breaker_state = BreakerState::Closed;
    collector.consecutive_failures = 0;
    collector.half_open_successes = 0;
    collector.next_attempt_at = None;
    Ok(Json(audit_and_save(&state, &req, "collectors.reset_breaker", collector).await?))
}

#[derive(Debug, Deserialize)]
pub struct SetRateLimitRequest {
    pub max_requests_per_sec: f64,
}

pub async fn set_rate_limit(
    State(state): State<CollectorsState>,
    Path(name): Path<String>,
    req: Request,
    Json(body): Json<SetRateLimitRequest>,
) -> Result<Json<CollectorView>, ApiError> {
    if body.max_requests_per_sec <= 0.0 {
        return Err(ApiError::bad_request("max_requests_per_sec must be positive"));
    }
    let mut collector = fetch_or_404(&state.persistence, &name).await?;
    collector.max_requests_per_sec = body.max_requests_per_sec;
    Ok(Json(audit_and_save(&state, &req, "collectors.set_rate_limit", collector).await?))
}

#[derive(Debug, Serialize)]
pub struct CollectorCost {
    pub name: String,
    pub total_polls: u64,
    pub total_records_collected: u64,
    pub total_errors: u64,
}

/// No per-call dollar cost is tracked anywhere upstream; poll/record/error
/// counters are the closest proxy this system has to collector cost.
pub async fn collector_costs(
    State(state): State<CollectorsState>,
) -> Result<Json<Vec<CollectorCost>>, ApiError> {
    let rows = state.persistence.relational.list_collector_states().await?;
    Ok(Json(
        rows.into_iter()
            .map(|c| CollectorCost {
                name: c.name,
                total_polls: c.stats.total_polls,
                total_records_collected: c.stats.total_records_collected,
                total_errors: c.stats.total_errors,
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::collector::SourceKind;

    #[test]
    fn view_carries_derived_health_alongside_flattened_state() {
        let state = CollectorState::new("moralis", SourceKind::Onchain);
        let view = to_view(state);
        assert_eq!(view.health, crate::models::collector::CollectorHealth::Healthy);
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["name"], "moralis");
        assert_eq!(json["health"], "healthy");
    }
}
