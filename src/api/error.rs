//! Control API error envelope (spec §6: `{error: {code, message, details?}}`).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::MasterTradeError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, message: what.into(), details: None }
    }

    pub fn bad_request(what: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: what.into(), details: None }
    }

    pub fn unauthorized(what: impl Into<String>) -> Self {
        Self { status: StatusCode::UNAUTHORIZED, message: what.into(), details: None }
    }
}

impl From<MasterTradeError> for ApiError {
    /// `Circuit.Open` and `Invariant.Violation` are caller-fault in the
    /// Control API's context (an operator asked for something the state
    /// machine forbids); everything else is `Infrastructure.Store` or
    /// unexpected, surfaced as 5xx per §7's propagation policy.
    fn from(err: MasterTradeError) -> Self {
        match err {
            MasterTradeError::InvariantViolation(msg) => {
                Self { status: StatusCode::CONFLICT, message: msg, details: None }
            }
            MasterTradeError::CircuitOpen { collector, next_attempt_at } => Self {
                status: StatusCode::CONFLICT,
                message: format!("circuit open for {collector}"),
                details: Some(json!({ "next_attempt_at": next_attempt_at })),
            },
            other => Self {
                status: StatusCode::SERVICE_UNAVAILABLE,
                message: other.to_string(),
                details: None,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.status.as_u16(),
                "message": self.message,
                "details": self.details,
            }
        });
        (self.status, Json(body)).into_response()
    }
}
