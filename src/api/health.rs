//! `/health` and `/metrics` (spec §4.10): aggregated in the gateway rather
//! than per-process, since the Control API is the one component every
//! operator dashboard already talks to. Component health is a direct probe
//! of the store/cache this process holds, not a self-report from the other
//! six processes — there is no cross-process health fan-in in this design
//! (see the Open Question recorded alongside this file).

use crate::persistence::Persistence;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::time::Duration;

/// spec §5: health check timeout is 2s.
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct HealthState {
    pub persistence: Persistence,
    pub prometheus: PrometheusHandle,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub cache: &'static str,
}

pub async fn health(State(state): State<HealthState>) -> impl IntoResponse {
    let database = probe_database(&state.persistence).await;
    let cache = probe_cache(&state.persistence).await;

    let status = if database == "up" && cache == "up" { "healthy" } else { "degraded" };
    let code = if status == "healthy" { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (code, Json(HealthResponse { status, database, cache }))
}

async fn probe_database(persistence: &Persistence) -> &'static str {
    let probe = sqlx::query("SELECT 1").execute(persistence.relational.pool());
    match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, probe).await {
        Ok(Ok(_)) => "up",
        _ => "down",
    }
}

async fn probe_cache(persistence: &Persistence) -> &'static str {
    let probe = persistence.cache.recent_signals_depth();
    match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, probe).await {
        Ok(Ok(_)) => "up",
        _ => "down",
    }
}

pub async fn metrics(State(state): State<HealthState>) -> impl IntoResponse {
    state.prometheus.render()
}
