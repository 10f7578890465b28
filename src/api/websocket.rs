//! `/ws/whale-alerts?api_key=…&min_amount=…&symbol=…` (spec §6): pushes
//! `whale_alert` frames within 10s of detection. The handler subscribes its
//! own exclusive, auto-delete queue against `whale.alert.*` (via
//! `Fabric::ephemeral_consumer`) so every open connection gets its own copy
//! of each alert rather than competing with the Alert Bus's durable queue.

use crate::fabric::Fabric;
use crate::models::message::RawMessage;
use crate::persistence::Persistence;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct WsState {
    pub persistence: Persistence,
    pub jwt_handler: Arc<crate::auth::JwtHandler>,
}

#[derive(Debug, Deserialize)]
pub struct WhaleAlertParams {
    pub api_key: Option<String>,
    pub min_amount: Option<f64>,
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Filters {
    min_amount: f64,
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    UpdateFilters {
        #[serde(default)]
        min_amount: Option<f64>,
        #[serde(default)]
        symbol: Option<String>,
    },
    Ping,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame<'a> {
    WhaleAlert {
        symbol: &'a str,
        amount_usd: f64,
        detected_at: chrono::DateTime<chrono::Utc>,
    },
    Pong,
}

/// Requires a broker URL discoverable from the environment; the rest of the
/// process already connects via `Config::from_env`, but a websocket
/// upgrade handler has no `Config` threaded into it today, so it reads the
/// same variable directly rather than widening `WsState`.
async fn connect_fabric() -> Option<Fabric> {
    let url = std::env::var("BROKER_URL").ok()?;
    match Fabric::connect(&url).await {
        Ok(f) => Some(f),
        Err(err) => {
            warn!(error = %err, "websocket could not connect to fabric");
            None
        }
    }
}

pub async fn whale_alerts_ws(
    State(state): State<WsState>,
    Query(params): Query<WhaleAlertParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if let Some(key) = &params.api_key {
        if state.jwt_handler.validate_token(key).is_err() {
            return axum::http::StatusCode::UNAUTHORIZED.into_response();
        }
    } else {
        return axum::http::StatusCode::UNAUTHORIZED.into_response();
    }

    let filters = Filters { min_amount: params.min_amount.unwrap_or(0.0), symbol: params.symbol };
    ws.on_upgrade(move |socket| handle_socket(socket, filters))
}

async fn handle_socket(mut socket: WebSocket, mut filters: Filters) {
    let Some(fabric) = connect_fabric().await else {
        let _ = socket.send(Message::Close(None)).await;
        return;
    };

    let consumer = match fabric.ephemeral_consumer("whale.alert.*").await {
        Ok(c) => c,
        Err(err) => {
            warn!(error = %err, "failed to subscribe to whale alerts");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let mut stream = match consumer.stream().await {
        Ok(s) => s,
        Err(err) => {
            warn!(error = %err, "failed to open whale alert consumer stream");
            return;
        }
    };

    loop {
        tokio::select! {
            delivery = stream.next() => {
                let Some(Ok(delivery)) = delivery else { break };
                let tag = delivery.delivery_tag;
                if let Ok(message) = serde_json::from_slice::<RawMessage>(&delivery.data) {
                    if let Some(frame) = matching_frame(&message, &filters) {
                        if socket.send(Message::Text(serde_json::to_string(&frame).unwrap())).await.is_err() {
                            let _ = consumer.nack_requeue(tag).await;
                            break;
                        }
                    }
                }
                let _ = consumer.ack(tag).await;
            }
            incoming = socket.recv() => {
                let Some(Ok(msg)) = incoming else { break };
                if let Message::Text(text) = msg {
                    match serde_json::from_str::<ClientFrame>(&text) {
                        Ok(ClientFrame::UpdateFilters { min_amount, symbol }) => {
                            if let Some(m) = min_amount { filters.min_amount = m; }
                            if symbol.is_some() { filters.symbol = symbol; }
                        }
                        Ok(ClientFrame::Ping) => {
                            let _ = socket.send(Message::Text(serde_json::to_string(&ServerFrame::Pong).unwrap())).await;
                        }
                        Err(err) => warn!(error = %err, "unrecognized whale-alert ws client frame"),
                    }
                }
            }
        }
    }

    info!("whale alert websocket connection closed");
}

fn matching_frame<'a>(message: &'a RawMessage, filters: &Filters) -> Option<ServerFrame<'a>> {
    if !message.routing_key.starts_with("whale.alert.") {
        return None;
    }
    let symbol = message.data.get("symbol")?.as_str()?;
    let amount_usd = message.data.get("amount_usd").and_then(|v| v.as_f64()).unwrap_or(0.0);

    if amount_usd < filters.min_amount {
        return None;
    }
    if let Some(want) = &filters.symbol {
        if want != symbol {
            return None;
        }
    }

    Some(ServerFrame::WhaleAlert { symbol, amount_usd, detected_at: message.timestamp })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(symbol: &str, amount_usd: f64) -> RawMessage {
        RawMessage::new(
            crate::models::message::MessageType::WhaleAlert,
            "test",
            "whale.alert.btcusdt",
            serde_json::json!({ "symbol": symbol, "amount_usd": amount_usd }),
        )
    }

    #[test]
    fn filters_by_minimum_amount() {
        let filters = Filters { min_amount: 100_000.0, symbol: None };
        assert!(matching_frame(&message("BTCUSDT", 50_000.0), &filters).is_none());
        assert!(matching_frame(&message("BTCUSDT", 150_000.0), &filters).is_some());
    }

    #[test]
    fn filters_by_symbol() {
        let filters = Filters { min_amount: 0.0, symbol: Some("ETHUSDT".into()) };
        assert!(matching_frame(&message("BTCUSDT", 1_000_000.0), &filters).is_none());
        assert!(matching_frame(&message("ETHUSDT", 1_000_000.0), &filters).is_some());
    }
}
