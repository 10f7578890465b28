//! Control API (spec §4.10, C10): the synchronous HTTP surface consumed by
//! the monitoring UI and operators. One axum `Router` per endpoint family
//! merged into a single process-wide router, with JWT auth, per-client
//! rate limiting and request logging layered on top — the same layering
//! shape the teacher used for its Polymarket surface, generalized from one
//! domain's endpoints to seven.

pub mod alerts;
pub mod collectors;
pub mod error;
pub mod goals;
pub mod health;
pub mod signals;
pub mod strategies;
pub mod websocket;

use crate::auth::middleware::auth_middleware;
use crate::auth::{api as auth_api, AuthState, JwtHandler};
use crate::middleware::{rate_limit_middleware, AuditLog, RateLimitConfig, RateLimitLayer};
use crate::persistence::Persistence;
use crate::strategy::Orchestrator;
use axum::extract::FromRef;
use axum::middleware as axum_middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Everything the Control API needs, threaded through every handler family
/// via `FromRef` so each family's `State<FamilyState>` extractor keeps
/// working without a manual `From` impl per family.
#[derive(Clone)]
pub struct ApiState {
    pub persistence: Persistence,
    pub orchestrator: Arc<Orchestrator>,
    pub audit: Arc<AuditLog>,
    pub jwt_handler: Arc<JwtHandler>,
    pub auth: AuthState,
    pub prometheus: PrometheusHandle,
}

impl FromRef<ApiState> for collectors::CollectorsState {
    fn from_ref(state: &ApiState) -> Self {
        Self { persistence: state.persistence.clone(), audit: state.audit.clone() }
    }
}

impl FromRef<ApiState> for signals::SignalsState {
    fn from_ref(state: &ApiState) -> Self {
        Self { persistence: state.persistence.clone() }
    }
}

impl FromRef<ApiState> for strategies::StrategiesState {
    fn from_ref(state: &ApiState) -> Self {
        Self {
            persistence: state.persistence.clone(),
            orchestrator: state.orchestrator.clone(),
            audit: state.audit.clone(),
        }
    }
}

impl FromRef<ApiState> for goals::GoalsState {
    fn from_ref(state: &ApiState) -> Self {
        Self { persistence: state.persistence.clone(), audit: state.audit.clone() }
    }
}

impl FromRef<ApiState> for alerts::AlertsState {
    fn from_ref(state: &ApiState) -> Self {
        Self { persistence: state.persistence.clone(), audit: state.audit.clone() }
    }
}

impl FromRef<ApiState> for health::HealthState {
    fn from_ref(state: &ApiState) -> Self {
        Self { persistence: state.persistence.clone(), prometheus: state.prometheus.clone() }
    }
}

impl FromRef<ApiState> for AuthState {
    fn from_ref(state: &ApiState) -> Self {
        state.auth.clone()
    }
}

impl FromRef<ApiState> for Arc<JwtHandler> {
    fn from_ref(state: &ApiState) -> Self {
        state.jwt_handler.clone()
    }
}

impl FromRef<ApiState> for websocket::WsState {
    fn from_ref(state: &ApiState) -> Self {
        Self { persistence: state.persistence.clone(), jwt_handler: state.jwt_handler.clone() }
    }
}

/// Builds the full Control API router. `/health`, `/metrics` and
/// `/auth/login` are unauthenticated; every other route requires a valid
/// JWT, and mutating routes additionally write an audit row (spec §4.10
/// "all mutating endpoints require an actor id").
pub fn router(state: ApiState) -> Router {
    let public = Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics))
        .route("/auth/login", post(auth_api::login))
        .route("/ws/whale-alerts", get(websocket::whale_alerts_ws))
        .with_state(state.clone());

    let protected = Router::new()
        .route("/auth/me", get(auth_api::get_current_user))
        .route("/auth/users", get(auth_api::list_users).post(auth_api::create_user))
        .route("/auth/users/:id", delete(auth_api::delete_user))
        .route("/collectors", get(collectors::list_collectors))
        .route("/collectors/costs", get(collectors::collector_costs))
        .route("/collectors/:name/enable", post(collectors::enable_collector))
        .route("/collectors/:name/disable", post(collectors::disable_collector))
        .route("/collectors/:name/restart", post(collectors::restart_collector))
        .route("/collectors/:name/reset-breaker", post(collectors::reset_breaker))
        .route("/collectors/:name/rate-limit", post(collectors::set_rate_limit))
        .route("/signals/recent", get(signals::recent_signals))
        .route("/signals/stats", get(signals::signal_stats))
        .route("/strategies", get(strategies::list_strategies))
        .route("/strategies/generate", post(strategies::generate_strategies))
        .route("/strategies/:id/pause", post(strategies::pause_strategy))
        .route("/strategies/:id/resume", post(strategies::resume_strategy))
        .route("/goals/status", get(goals::goal_status))
        .route("/goals/targets", get(goals::goal_targets))
        .route("/goals/history/:goal_type", get(goals::goal_history))
        .route("/goals/record-profit", post(goals::record_profit))
        .route("/alerts/list", get(alerts::list_alerts))
        .route("/alerts/:id/acknowledge", post(alerts::acknowledge_alert))
        .route("/alerts/:id/resolve", post(alerts::resolve_alert))
        .route("/alerts/:id/snooze", post(alerts::snooze_alert))
        .with_state(state.clone())
        .layer(axum_middleware::from_fn_with_state(state.jwt_handler.clone(), auth_middleware));

    let rate_limiter = RateLimitLayer::new(RateLimitConfig::default());

    public
        .merge(protected)
        .layer(axum_middleware::from_fn_with_state(rate_limiter, rate_limit_middleware))
        .layer(axum_middleware::from_fn(crate::middleware::request_logging))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
