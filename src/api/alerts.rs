//! `/alerts/list`, `/alerts/{id}/acknowledge|resolve|snooze` (spec §4.10).
//! There is no `Alert::snooze()` state transition — an alert stays
//! `active`/`acknowledged` while snoozed. Snoozing writes an
//! `alert_suppressions` row so the Alert Bus's own suppression check
//! (spec §4.9 step 1) stops re-delivering it, the same mechanism the bus
//! already uses for repeat-trigger suppression.

use crate::api::error::ApiError;
use crate::middleware::{actor_id, AuditLog};
use crate::models::alert::{Alert, AlertStatus};
use crate::persistence::Persistence;
use axum::extract::{Path, Query, Request, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct AlertsState {
    pub persistence: Persistence,
    pub audit: Arc<AuditLog>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

fn parse_status(s: &str) -> Result<AlertStatus, ApiError> {
    match s {
        "active" => Ok(AlertStatus::Active),
        "acknowledged" => Ok(AlertStatus::Acknowledged),
        "resolved" => Ok(AlertStatus::Resolved),
        other => Err(ApiError::bad_request(format!("unknown alert status {other}"))),
    }
}

pub async fn list_alerts(
    State(state): State<AlertsState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Alert>>, ApiError> {
    let status = query.status.as_deref().map(parse_status).transpose()?;
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    Ok(Json(state.persistence.relational.list_alerts(status, limit).await?))
}

async fn set_status(
    state: &AlertsState,
    req: &Request,
    endpoint: &str,
    id: Uuid,
    target: AlertStatus,
) -> Result<Alert, ApiError> {
    let alert = state
        .persistence
        .relational
        .fetch_alert(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("unknown alert {id}")))?;

    // §8 idempotence law: acknowledging/resolving an already-settled alert
    // is a no-op — no second audit row.
    let changed = state.persistence.relational.update_alert_status(id, target).await?;
    if changed {
        if let Some(actor) = actor_id(req) {
            state.audit.record(&actor, endpoint, serde_json::json!({ "alert_id": id })).await;
        }
    }

    Ok(Alert { status: target, ..alert })
}

pub async fn acknowledge_alert(
    State(state): State<AlertsState>,
    Path(id): Path<Uuid>,
    req: Request,
) -> Result<Json<Alert>, ApiError> {
    Ok(Json(set_status(&state, &req, "alerts.acknowledge", id, AlertStatus::Acknowledged).await?))
}

pub async fn resolve_alert(
    State(state): State<AlertsState>,
    Path(id): Path<Uuid>,
    req: Request,
) -> Result<Json<Alert>, ApiError> {
    Ok(Json(set_status(&state, &req, "alerts.resolve", id, AlertStatus::Resolved).await?))
}

#[derive(Debug, Deserialize)]
pub struct SnoozeRequest {
    pub minutes: Option<i64>,
}

pub async fn snooze_alert(
    State(state): State<AlertsState>,
    Path(id): Path<Uuid>,
    req: Request,
    Json(body): Json<SnoozeRequest>,
) -> Result<Json<Alert>, ApiError> {
    let alert = state
        .persistence
        .relational
        .fetch_alert(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("unknown alert {id}")))?;

    let minutes = body.minutes.unwrap_or(60).clamp(1, 7 * 24 * 60);
    let until = chrono::Utc::now() + chrono::Duration::minutes(minutes);
    state
        .persistence
        .relational
        .suppress_alert(&alert.alert_type, alert.entity_id.as_deref(), until)
        .await?;

    if let Some(actor) = actor_id(&req) {
        state
            .audit
            .record(&actor, "alerts.snooze", serde_json::json!({ "alert_id": id, "until": until }))
            .await;
    }

    Ok(Json(alert))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_an_unknown_status_filter() {
        assert!(parse_status("snoozed").is_err());
        assert!(parse_status("active").is_ok());
    }
}
