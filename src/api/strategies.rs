//! `/strategies`, `/strategies/{id}/pause|resume`, `/strategies/generate`
//! (spec §4.10). Pause/resume go through `Strategy::transition` so an
//! operator can never push a strategy through an edge the state machine
//! forbids; `/strategies/generate` wakes the orchestrator's generation loop
//! immediately instead of waiting for the next 03:00 UTC window.

use crate::api::error::ApiError;
use crate::middleware::{actor_id, AuditLog};
use crate::models::strategy::{Strategy, StrategyStatus};
use crate::persistence::Persistence;
use crate::strategy::Orchestrator;
use axum::extract::{Path, Request, State};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct StrategiesState {
    pub persistence: Persistence,
    pub orchestrator: Arc<Orchestrator>,
    pub audit: Arc<AuditLog>,
}

pub async fn list_strategies(
    State(state): State<StrategiesState>,
) -> Result<Json<Vec<Strategy>>, ApiError> {
    Ok(Json(state.persistence.relational.fetch_all_strategies().await?))
}

async fn transition(
    state: &StrategiesState,
    req: &Request,
    endpoint: &str,
    id: Uuid,
    target: StrategyStatus,
) -> Result<Strategy, ApiError> {
    let mut strategy = state
        .persistence
        .relational
        .fetch_strategy(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("unknown strategy {id}")))?;

    strategy.transition(target).map_err(|msg| ApiError {
        status: axum::http::StatusCode::CONFLICT,
        message: msg,
        details: None,
    })?;

    state.persistence.relational.update_strategy_status(id, target).await?;

    if let Some(actor) = actor_id(req) {
        state.audit.record(&actor, endpoint, serde_json::json!({ "strategy_id": id })).await;
    }

    Ok(strategy)
}

pub async fn pause_strategy(
    State(state): State<StrategiesState>,
    Path(id): Path<Uuid>,
    req: Request,
) -> Result<Json<Strategy>, ApiError> {
    Ok(Json(transition(&state, &req, "strategies.pause", id, StrategyStatus::Paused).await?))
}

pub async fn resume_strategy(
    State(state): State<StrategiesState>,
    Path(id): Path<Uuid>,
    req: Request,
) -> Result<Json<Strategy>, ApiError> {
    Ok(Json(transition(&state, &req, "strategies.resume", id, StrategyStatus::Active).await?))
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub triggered: bool,
}

/// Fire-and-forget: the generation cycle runs inline here rather than
/// merely nudging the background loop, so the caller's audit row and
/// response both reflect the cycle that actually ran.
pub async fn generate_strategies(
    State(state): State<StrategiesState>,
    req: Request,
) -> Result<Json<GenerateResponse>, ApiError> {
    let count = state.orchestrator.run_generation_now().await?;
    if let Some(actor) = actor_id(&req) {
        state.audit.record(&actor, "strategies.generate", serde_json::json!({ "generated": count })).await;
    }
    Ok(Json(GenerateResponse { triggered: true }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy(status: StrategyStatus) -> Strategy {
        Strategy {
            id: Uuid::new_v4(),
            name: "test".into(),
            strategy_type: "momentum".into(),
            symbol: "BTCUSDT".into(),
            interval: "1h".into(),
            parameters: serde_json::json!({}),
            entry_conditions: serde_json::json!({}),
            exit_conditions: serde_json::json!({}),
            risk_params: crate::models::strategy::RiskParams {
                stop_loss_pct: 0.02,
                take_profit_pct: 0.04,
                position_size_pct: 0.05,
            },
            status,
            version: 1,
            parent_strategy_id: None,
            generation: 0,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn pause_is_rejected_from_draft() {
        let mut s = strategy(StrategyStatus::Draft);
        assert!(s.transition(StrategyStatus::Paused).is_err());
    }
}
