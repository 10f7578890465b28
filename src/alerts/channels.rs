//! Per-channel delivery transport (spec §4.9). Every non-log channel is a
//! generic webhook POST, grounded on the same `reqwest::Client` pattern the
//! collectors use for outbound calls; there is no SMTP/Twilio/Bot-API
//! integration in this deployment, so an unconfigured channel is a hard
//! delivery failure rather than a silent success.

use crate::config::AlertChannelsConfig;
use crate::models::alert::{Alert, DeliveryChannel};
use std::time::Duration;
use tracing::info;

fn webhook_for<'a>(channel: DeliveryChannel, config: &'a AlertChannelsConfig) -> Option<&'a str> {
    match channel {
        DeliveryChannel::Email => config.email_webhook_url.as_deref(),
        DeliveryChannel::Sms => config.sms_webhook_url.as_deref(),
        DeliveryChannel::Telegram => config.telegram_webhook_url.as_deref(),
        DeliveryChannel::Slack => config.slack_webhook_url.as_deref(),
        DeliveryChannel::Log => None,
    }
}

/// Attempts one delivery. Returns `Err` with a short reason on failure; the
/// caller owns retries and the `alert_history` row.
pub async fn deliver(
    client: &reqwest::Client,
    channel: DeliveryChannel,
    config: &AlertChannelsConfig,
    alert: &Alert,
) -> Result<(), String> {
    if channel == DeliveryChannel::Log {
        info!(alert_id = %alert.id, severity = ?alert.severity, title = %alert.title, "alert (log channel)");
        return Ok(());
    }

    let Some(url) = webhook_for(channel, config) else {
        return Err(format!("{channel:?} channel has no webhook configured"));
    };

    let body = serde_json::json!({
        "alert_id": alert.id,
        "alert_type": alert.alert_type,
        "severity": alert.severity,
        "title": alert.title,
        "message": alert.message,
        "entity_type": alert.entity_type,
        "entity_id": alert.entity_id,
    });

    let response = client
        .post(url)
        .json(&body)
        .timeout(Duration::from_secs(30))
        .send()
        .await
        .map_err(|e| e.to_string())?;

    if !response.status().is_success() {
        return Err(format!("webhook returned {}", response.status()));
    }
    Ok(())
}
