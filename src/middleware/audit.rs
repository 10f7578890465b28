//! API audit trail (spec §4.10): every mutating Control API call is
//! attributed to an actor, persisted to `api_audit_log`, and echoed onto the
//! fabric as a `system.config.*` notification. Grounded on the same
//! span/event shape as `logging::request_logging`, generalized from "log a
//! line" to "log a line, persist a row, publish an event".

use crate::fabric::Fabric;
use crate::models::message::{MessageType, RawMessage};
use crate::persistence::Persistence;
use axum::extract::Request;
use serde_json::Value;
use tracing::warn;

/// Resolves the acting identity for an incoming request: the JWT subject if
/// the auth middleware ran first, else an `X-Actor-Id` header for
/// service-to-service calls that bypass end-user auth (e.g. the executor
/// recording a profit entry on position close).
pub fn actor_id(req: &Request) -> Option<String> {
    if let Some(claims) = req.extensions().get::<crate::auth::models::Claims>() {
        return Some(claims.sub.clone());
    }
    req.headers()
        .get("X-Actor-Id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

#[derive(Clone)]
pub struct AuditLog {
    persistence: Persistence,
    fabric: Fabric,
}

impl AuditLog {
    pub fn new(persistence: Persistence, fabric: Fabric) -> Self {
        Self { persistence, fabric }
    }

    /// Persists the audit row and publishes `system.config.{endpoint}`.
    /// Publish failures are logged, not propagated — the audit row landing
    /// is the invariant that matters; a dropped notification is cosmetic.
    pub async fn record(&self, actor_id: &str, endpoint: &str, payload: Value) {
        let now = chrono::Utc::now();
        if let Err(err) = self.persistence.relational.insert_api_audit_log(actor_id, endpoint, &payload, now).await {
            warn!(error = %err, endpoint, "failed to write api_audit_log");
        }

        let message = RawMessage::new(
            MessageType::SystemNotification,
            "control-api",
            format!("system.config.{endpoint}"),
            serde_json::json!({ "actor_id": actor_id, "endpoint": endpoint, "payload": payload }),
        );
        if let Err(err) = self.fabric.publish("mastertrade.system", &message).await {
            warn!(error = %err, endpoint, "failed to publish system.config event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;

    #[test]
    fn falls_back_to_the_actor_id_header_without_claims() {
        let mut req = HttpRequest::new(Body::empty());
        req.headers_mut().insert("X-Actor-Id", "svc-executor".parse().unwrap());
        assert_eq!(actor_id(&req), Some("svc-executor".to_string()));
    }

    #[test]
    fn no_claims_and_no_header_is_anonymous() {
        let req = HttpRequest::new(Body::empty());
        assert_eq!(actor_id(&req), None);
    }
}
