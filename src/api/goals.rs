//! `/goals/status`, `/goals/history/{type}`, `/goals/targets`,
//! `/goals/record-profit` (spec §4.10). `/goals/status` also returns the
//! strategy adjustment factor/stance (spec §4.7) so the UI can show why
//! activation scoring is leaning aggressive or conservative right now.

use crate::api::error::ApiError;
use crate::middleware::{actor_id, AuditLog};
use crate::models::goal::{FinancialGoal, GoalProgress, GoalType, RealizedProfitEntry};
use crate::persistence::Persistence;
use crate::risk::goals::{strategy_adjustment_factor, Stance};
use axum::extract::{Path, Query, Request, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct GoalsState {
    pub persistence: Persistence,
    pub audit: Arc<AuditLog>,
}

fn goal_type_key(t: GoalType) -> &'static str {
    match t {
        GoalType::MonthlyReturnPct => "monthly_return_pct",
        GoalType::MonthlyProfitUsd => "monthly_profit_usd",
        GoalType::PortfolioTargetUsd => "portfolio_target_usd",
    }
}

fn parse_goal_type(s: &str) -> Result<&'static str, ApiError> {
    match s {
        "monthly_return_pct" => Ok("monthly_return_pct"),
        "monthly_profit_usd" => Ok("monthly_profit_usd"),
        "portfolio_target_usd" => Ok("portfolio_target_usd"),
        other => Err(ApiError::bad_request(format!("unknown goal type {other}"))),
    }
}

#[derive(Debug, Serialize)]
pub struct GoalStatusEntry {
    pub goal_type: GoalType,
    pub latest_progress: Option<GoalProgress>,
}

#[derive(Debug, Serialize)]
pub struct GoalStatusResponse {
    pub goals: Vec<GoalStatusEntry>,
    pub strategy_adjustment_factor: f64,
    pub stance: Stance,
}

pub async fn goal_status(State(state): State<GoalsState>) -> Result<Json<GoalStatusResponse>, ApiError> {
    let mut entries = Vec::new();
    for goal_type in [GoalType::MonthlyReturnPct, GoalType::MonthlyProfitUsd, GoalType::PortfolioTargetUsd] {
        let history =
            state.persistence.relational.goal_progress_history(goal_type_key(goal_type), 1).await?;
        entries.push(GoalStatusEntry { goal_type, latest_progress: history.into_iter().next() });
    }

    let return_pct = entries
        .iter()
        .find(|e| e.goal_type == GoalType::MonthlyReturnPct)
        .and_then(|e| e.latest_progress.as_ref())
        .map(|p| p.progress_pct)
        .unwrap_or(0.0);
    let income_pct = entries
        .iter()
        .find(|e| e.goal_type == GoalType::MonthlyProfitUsd)
        .and_then(|e| e.latest_progress.as_ref())
        .map(|p| p.progress_pct)
        .unwrap_or(0.0);
    let (factor, stance) = strategy_adjustment_factor(return_pct, income_pct);

    Ok(Json(GoalStatusResponse { goals: entries, strategy_adjustment_factor: factor, stance }))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

pub async fn goal_history(
    State(state): State<GoalsState>,
    Path(goal_type): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<GoalProgress>>, ApiError> {
    let goal_type = parse_goal_type(&goal_type)?;
    let limit = query.limit.unwrap_or(90).clamp(1, 365);
    Ok(Json(state.persistence.relational.goal_progress_history(goal_type, limit).await?))
}

pub async fn goal_targets(State(state): State<GoalsState>) -> Result<Json<Vec<FinancialGoal>>, ApiError> {
    Ok(Json(state.persistence.relational.list_financial_goals().await?))
}

#[derive(Debug, Deserialize)]
pub struct RecordProfitRequest {
    pub amount_usd: f64,
    pub source: String,
}

#[derive(Debug, Serialize)]
pub struct RecordProfitResponse {
    pub id: Uuid,
}

pub async fn record_profit(
    State(state): State<GoalsState>,
    req: Request,
    Json(body): Json<RecordProfitRequest>,
) -> Result<Json<RecordProfitResponse>, ApiError> {
    let entry = RealizedProfitEntry {
        id: Uuid::new_v4(),
        amount_usd: body.amount_usd,
        source: body.source,
        recorded_at: chrono::Utc::now(),
    };
    state.persistence.relational.record_profit(&entry).await?;

    if let Some(actor) = actor_id(&req) {
        state
            .audit
            .record(&actor, "goals.record_profit", serde_json::json!({ "amount_usd": entry.amount_usd }))
            .await;
    }

    Ok(Json(RecordProfitResponse { id: entry.id }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_an_unknown_goal_type() {
        assert!(parse_goal_type("not_a_goal").is_err());
        assert!(parse_goal_type("monthly_return_pct").is_ok());
    }
}
