//! RawMessage — every envelope on the bus (spec §3, §9 "tagged-variant wire envelope")

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    MarketData,
    Ticker,
    Trade,
    Orderbook,
    Sentiment,
    OnchainMetric,
    WhaleAlert,
    TradingSignal,
    OrderRequest,
    OrderUpdate,
    RiskCheck,
    RiskBreach,
    SystemNotification,
    AlertDelivery,
}

/// The discriminated envelope published to and consumed from the fabric.
/// Consumers dispatch on `message_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub data: Value,
    pub routing_key: String,
    pub persistent: bool,
}

impl RawMessage {
    pub fn new(
        message_type: MessageType,
        source: impl Into<String>,
        routing_key: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            message_type,
            timestamp: Utc::now(),
            source: source.into(),
            data,
            routing_key: routing_key.into(),
            persistent: true,
        }
    }
}
