//! Alert Bus (spec §4.9).
//! Subscribes to `system.#`, `risk.breach.*`, `order.update.*`, `goal.*`
//! and whale-alert triggers, turns the alert-worthy ones into persisted
//! `Alert` rows, and fans each out to its severity's channel set with
//! per-channel retry and rate limiting.

mod channels;

use crate::config::AlertChannelsConfig;
use crate::error::MasterTradeError;
use crate::fabric::Fabric;
use crate::models::alert::{Alert, AlertDeliveryAttempt, AlertSeverity, DeliveryChannel};
use crate::models::message::RawMessage;
use crate::persistence::Persistence;
use crate::ratelimit::limiter::RateLimiter;
use chrono::Utc;
use futures_util::future::join_all;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

const QUEUES: &[&str] =
    &["system_notifications", "risk_breaches", "order_updates", "goal_events", "whale_alerts"];

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_secs(5);

/// An alert-worthy event extracted from a bus message, before it is known
/// whether a row already exists (the Risk Gate persists its own alerts
/// before publishing, so `existing_id` short-circuits a duplicate insert).
struct AlertDraft {
    existing_id: Option<Uuid>,
    alert_type: String,
    severity: AlertSeverity,
    title: String,
    message: String,
    entity_type: Option<String>,
    entity_id: Option<String>,
}

pub struct AlertBus {
    persistence: Persistence,
    fabric: Fabric,
    http: reqwest::Client,
    channels: AlertChannelsConfig,
    limiters: HashMap<DeliveryChannel, Mutex<RateLimiter>>,
}

impl AlertBus {
    pub fn new(persistence: Persistence, fabric: Fabric, channels: AlertChannelsConfig) -> Self {
        let mut limiters = HashMap::new();
        limiters.insert(
            DeliveryChannel::Email,
            Mutex::new(RateLimiter::new(100.0 / 3600.0, 2.0, Duration::from_secs(60))),
        );
        limiters.insert(
            DeliveryChannel::Sms,
            Mutex::new(RateLimiter::new(50.0 / 3600.0, 2.0, Duration::from_secs(60))),
        );
        limiters.insert(
            DeliveryChannel::Telegram,
            Mutex::new(RateLimiter::new(30.0, 2.0, Duration::from_secs(10))),
        );
        limiters.insert(
            DeliveryChannel::Slack,
            Mutex::new(RateLimiter::new(1.0, 2.0, Duration::from_secs(10))),
        );

        Self {
            persistence,
            fabric,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client"),
            channels,
            limiters,
        }
    }

    /// Drains all five subscribed queues concurrently until told to shut
    /// down. Each queue gets its own consumer tag so a stalled handler on
    /// one queue never blocks the others.
    pub async fn run_loop(&self, shutdown: tokio::sync::watch::Receiver<bool>) -> Result<(), MasterTradeError> {
        let results = join_all(
            QUEUES.iter().map(|queue| self.consume_queue(queue, shutdown.clone())),
        )
        .await;

        for result in results {
            result?;
        }
        Ok(())
    }

    async fn consume_queue(
        &self,
        queue: &str,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Result<(), MasterTradeError> {
        let consumer = self.fabric.consumer(queue, "alert-bus").await?;
        let mut stream = consumer.stream().await?;

        loop {
            tokio::select! {
                delivery = stream.next() => {
                    let Some(delivery) = delivery else {
                        warn!(queue, "alert bus consumer stream closed");
                        return Ok(());
                    };
                    match delivery {
                        Ok(delivery) => {
                            let tag = delivery.delivery_tag;
                            match serde_json::from_slice::<RawMessage>(&delivery.data) {
                                Ok(message) => {
                                    if let Err(err) = self.handle_envelope(&message).await {
                                        warn!(queue, error = %err, "alert handling failed");
                                    }
                                    consumer.ack(tag).await?;
                                }
                                Err(err) => {
                                    warn!(queue, error = %err, "alert envelope parse failed, routing to DLQ");
                                    consumer.nack_to_dlq(tag).await?;
                                }
                            }
                        }
                        Err(e) => warn!(queue, error = %e, "alert bus delivery error"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn handle_envelope(&self, message: &RawMessage) -> Result<(), MasterTradeError> {
        let Some(draft) = classify(message) else {
            return Ok(());
        };

        let alert = self.resolve_alert(draft).await?;

        if self.persistence.relational.is_suppressed(&alert.alert_type, alert.entity_id.as_deref()).await? {
            info!(alert_id = %alert.id, alert_type = %alert.alert_type, "alert suppressed, not delivering");
            return Ok(());
        }

        let outcomes = join_all(
            channels_for_severity(alert.severity).iter().map(|channel| self.deliver_with_retry(*channel, &alert)),
        )
        .await;

        if outcomes.iter().all(|ok| !ok) {
            warn!(alert_id = %alert.id, "alert delivered to zero channels after retries");
        }
        Ok(())
    }

    /// Either fetches the already-persisted row (Risk Gate alerts are
    /// persisted by their producer before publish) or persists a new one
    /// built from the draft.
    async fn resolve_alert(&self, draft: AlertDraft) -> Result<Alert, MasterTradeError> {
        if let Some(id) = draft.existing_id {
            if let Some(existing) = self.persistence.relational.fetch_alert(id).await? {
                return Ok(existing);
            }
        }

        let mut alert = Alert::new(draft.alert_type, draft.severity, draft.title, draft.message);
        if let (Some(entity_type), Some(entity_id)) = (draft.entity_type, draft.entity_id) {
            alert = alert.with_entity(entity_type, entity_id);
        }
        self.persistence.relational.insert_alert(&alert).await?;
        Ok(alert)
    }

    /// Up to `MAX_ATTEMPTS`, 5s/10s/20s apart, each attempt rate-limited and
    /// recorded as an `alert_history` row. Returns whether any attempt
    /// succeeded.
    async fn deliver_with_retry(&self, channel: DeliveryChannel, alert: &Alert) -> bool {
        let mut delay = RETRY_BASE_DELAY;
        for attempt in 1..=MAX_ATTEMPTS {
            if let Some(limiter) = self.limiters.get(&channel) {
                limiter.lock().await.acquire().await;
            }

            let result = channels::deliver(&self.http, channel, &self.channels, alert).await;
            let succeeded = result.is_ok();

            let record = AlertDeliveryAttempt {
                alert_id: alert.id,
                channel,
                attempt,
                succeeded,
                error: result.as_ref().err().cloned(),
                attempted_at: Utc::now(),
            };
            if let Err(err) = self.persistence.relational.insert_alert_delivery_attempt(&record).await {
                error!(alert_id = %alert.id, error = %err, "failed to persist alert delivery attempt");
            }

            if succeeded {
                return true;
            }
            warn!(alert_id = %alert.id, ?channel, attempt, error = ?result.err(), "alert delivery attempt failed");
            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
        false
    }
}

fn channels_for_severity(severity: AlertSeverity) -> &'static [DeliveryChannel] {
    match severity {
        AlertSeverity::Critical => &[DeliveryChannel::Email, DeliveryChannel::Sms, DeliveryChannel::Telegram],
        AlertSeverity::Error => &[DeliveryChannel::Email, DeliveryChannel::Telegram],
        AlertSeverity::Warning => &[DeliveryChannel::Telegram],
        AlertSeverity::Info => &[DeliveryChannel::Log],
    }
}

fn classify(message: &RawMessage) -> Option<AlertDraft> {
    let rk = message.routing_key.as_str();

    if let Some(rest) = rk.strip_prefix("risk.breach.") {
        let existing_id = message.data.get("alert_id").and_then(|v| v.as_str()).and_then(|s| Uuid::parse_str(s).ok());
        return Some(AlertDraft {
            existing_id,
            alert_type: format!("risk_breach_{rest}"),
            severity: AlertSeverity::Critical,
            title: message.data.get("title").and_then(|v| v.as_str()).unwrap_or("Risk breach").to_string(),
            message: message.data.get("message").and_then(|v| v.as_str()).unwrap_or(rk).to_string(),
            entity_type: Some("portfolio".into()),
            entity_id: Some("default".into()),
        });
    }

    if rk.starts_with("goal.") {
        let goal_type = message.data.get("goal_type").and_then(|v| v.as_str()).unwrap_or("unknown");
        let status = message.data.get("status").and_then(|v| v.as_str()).unwrap_or("unknown");
        let progress_pct = message.data.get("progress_pct").and_then(|v| v.as_f64()).unwrap_or(0.0);
        return Some(AlertDraft {
            existing_id: None,
            alert_type: "goal_status_change".into(),
            severity: AlertSeverity::Info,
            title: format!("Goal {goal_type} status changed to {status}"),
            message: format!("{goal_type} is now {status} ({progress_pct:.1}% of target)"),
            entity_type: Some("goal".into()),
            entity_id: Some(goal_type.to_string()),
        });
    }

    if rk.starts_with("order.update.") {
        let status = message.data.get("status").and_then(|v| v.as_str()).unwrap_or("");
        if status != "rejected" {
            return None;
        }
        let order_id = message.data.get("order_id").and_then(|v| v.as_str()).unwrap_or("unknown");
        let reason = message.data.get("reason").and_then(|v| v.as_str()).unwrap_or("unspecified");
        return Some(AlertDraft {
            existing_id: None,
            alert_type: "order_rejected".into(),
            severity: AlertSeverity::Error,
            title: "Order rejected".into(),
            message: format!("order {order_id} rejected: {reason}"),
            entity_type: Some("order".into()),
            entity_id: Some(order_id.to_string()),
        });
    }

    if rk.starts_with("whale.alert.") {
        let symbol = message.data.get("symbol").and_then(|v| v.as_str()).unwrap_or("unknown");
        let amount_usd = message.data.get("amount_usd").and_then(|v| v.as_f64()).unwrap_or(0.0);
        return Some(AlertDraft {
            existing_id: None,
            alert_type: "whale_alert".into(),
            severity: AlertSeverity::Warning,
            title: format!("Whale movement on {symbol}"),
            message: format!("${amount_usd:.0} moved on {symbol}"),
            entity_type: Some("symbol".into()),
            entity_id: Some(symbol.to_string()),
        });
    }

    if rk.starts_with("system.") {
        let severity = message
            .data
            .get("severity")
            .and_then(|v| v.as_str())
            .map(severity_from_str)
            .unwrap_or(AlertSeverity::Warning);
        return Some(AlertDraft {
            existing_id: None,
            alert_type: "system_notification".into(),
            severity,
            title: format!("System notification from {}", message.source),
            message: message.data.to_string(),
            entity_type: None,
            entity_id: None,
        });
    }

    None
}

fn severity_from_str(s: &str) -> AlertSeverity {
    match s {
        "warning" => AlertSeverity::Warning,
        "error" => AlertSeverity::Error,
        "critical" => AlertSeverity::Critical,
        _ => AlertSeverity::Info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::MessageType;

    fn msg(routing_key: &str, data: serde_json::Value) -> RawMessage {
        RawMessage::new(MessageType::SystemNotification, "test", routing_key, data)
    }

    #[test]
    fn classifies_a_drawdown_breach_as_critical() {
        let draft = classify(&msg("risk.breach.drawdown", serde_json::json!({"title": "x", "message": "y"}))).unwrap();
        assert_eq!(draft.severity, AlertSeverity::Critical);
        assert_eq!(draft.alert_type, "risk_breach_drawdown");
    }

    #[test]
    fn skips_non_rejected_order_updates() {
        assert!(classify(&msg("order.update.filled.some-id", serde_json::json!({"status": "filled"}))).is_none());
    }

    #[test]
    fn flags_rejected_order_updates_as_errors() {
        let draft = classify(&msg(
            "order.update.rejected.some-id",
            serde_json::json!({"status": "rejected", "order_id": "some-id", "reason": "timeout"}),
        ))
        .unwrap();
        assert_eq!(draft.severity, AlertSeverity::Error);
        assert!(draft.message.contains("timeout"));
    }

    #[test]
    fn critical_severity_fans_out_to_three_channels() {
        assert_eq!(channels_for_severity(AlertSeverity::Critical).len(), 3);
        assert_eq!(channels_for_severity(AlertSeverity::Info), &[DeliveryChannel::Log]);
    }
}
