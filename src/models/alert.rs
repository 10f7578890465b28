//! Alert — a persistent observable event (spec §3, §4.9)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub alert_type: String,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn new(
        alert_type: impl Into<String>,
        severity: AlertSeverity,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_type: alert_type.into(),
            severity,
            title: title.into(),
            message: message.into(),
            entity_type: None,
            entity_id: None,
            status: AlertStatus::Active,
            created_at: Utc::now(),
            acknowledged_at: None,
            resolved_at: None,
        }
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Acknowledging an already-acknowledged alert is a no-op (spec §8).
    pub fn acknowledge(&mut self) -> bool {
        if self.status == AlertStatus::Acknowledged {
            return false;
        }
        self.status = AlertStatus::Acknowledged;
        self.acknowledged_at = Some(Utc::now());
        true
    }

    pub fn resolve(&mut self) -> bool {
        if self.status == AlertStatus::Resolved {
            return false;
        }
        self.status = AlertStatus::Resolved;
        self.resolved_at = Some(Utc::now());
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryChannel {
    Email,
    Sms,
    Telegram,
    Slack,
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertDeliveryAttempt {
    pub alert_id: Uuid,
    pub channel: DeliveryChannel,
    pub attempt: u32,
    pub succeeded: bool,
    pub error: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_acknowledge_is_a_noop() {
        let mut a = Alert::new("test", AlertSeverity::Warning, "t", "m");
        assert!(a.acknowledge());
        assert!(!a.acknowledge());
    }
}
