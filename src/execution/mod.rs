//! Order Executor (spec §4.8).
//! Adapted from the teacher's `vault::trade_executor`/`vault::paper_ledger`
//! (per-user Kelly trade execution against Polymarket) into a single
//! strategy-scoped executor over `order_requests`/`order_updates`, using
//! real typed `Order`/`Position` rows instead of a bespoke user ledger.

mod paper;

use crate::error::MasterTradeError;
use crate::fabric::Fabric;
use crate::models::message::{MessageType, RawMessage};
use crate::models::order::{Order, OrderEnvironment, OrderSide, OrderStatus, OrderType};
use crate::persistence::Persistence;
use chrono::Utc;
use futures_util::StreamExt;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

const LIVE_DEADLINE: Duration = Duration::from_secs(60);
const PAPER_DEADLINE: Duration = Duration::from_secs(1);

/// Wire shape of an `order.request.*` message body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequestPayload {
    pub idempotency_key: String,
    pub strategy_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub environment: OrderEnvironment,
    /// Set by the Risk Gate before publishing; requests without this set
    /// are rejected as unapproved.
    pub approved: bool,
    /// Present only on a cancellation request; `order_id` of the order to
    /// cancel, all other fields are ignored.
    pub cancel_order_id: Option<Uuid>,
}

/// Consumes `order_requests`, maintains `Order`/`Position` state, publishes
/// `order_updates`. One executor instance per process (spec §4.8 runs
/// within the "execution" role). Held behind an `Arc` so the per-order
/// timeout task can outlive the request handler that armed it.
pub struct Executor {
    persistence: Persistence,
    fabric: Fabric,
    pending_timeouts: Mutex<HashMap<Uuid, tokio::task::JoinHandle<()>>>,
}

impl Executor {
    pub fn new(persistence: Persistence, fabric: Fabric) -> Arc<Self> {
        Arc::new(Self { persistence, fabric, pending_timeouts: Mutex::new(HashMap::new()) })
    }

    /// Drains `order_requests` until told to shut down.
    pub async fn run_loop(self: &Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) -> Result<(), MasterTradeError> {
        let consumer = self.fabric.consumer("order_requests", "executor").await?;
        let mut stream = consumer.stream().await?;

        loop {
            tokio::select! {
                delivery = stream.next() => {
                    let Some(delivery) = delivery else {
                        warn!("order_requests consumer stream closed");
                        return Ok(());
                    };
                    match delivery {
                        Ok(delivery) => {
                            let tag = delivery.delivery_tag;
                            match serde_json::from_slice::<RawMessage>(&delivery.data) {
                                Ok(message) => {
                                    if let Err(err) = self.handle_message(&message).await {
                                        warn!(error = %err, "order request handling failed");
                                    }
                                    consumer.ack(tag).await?;
                                }
                                Err(err) => {
                                    warn!(error = %err, "order request payload parse failed, routing to DLQ");
                                    consumer.nack_to_dlq(tag).await?;
                                }
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "order_requests delivery error");
                        }
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

    async fn handle_message(self: &Arc<Self>, message: &RawMessage) -> Result<(), MasterTradeError> {
        let payload: OrderRequestPayload = serde_json::from_value(message.data.clone()).map_err(|e| {
            MasterTradeError::PermanentParse { source_name: "OrderRequestPayload".into(), reason: e.to_string() }
        })?;

        if let Some(cancel_id) = payload.cancel_order_id {
            return self.cancel_order(cancel_id).await;
        }

        self.accept_request(payload).await
    }

    /// Validate, dedup, and dispatch to the paper or live path.
    async fn accept_request(self: &Arc<Self>, payload: OrderRequestPayload) -> Result<(), MasterTradeError> {
        if let Some(existing) =
            self.persistence.relational.fetch_order_by_idempotency_key(&payload.idempotency_key).await?
        {
            info!(order_id = %existing.id, "duplicate order request, idempotency key already seen");
            return Ok(());
        }

        if !payload.approved {
            warn!(strategy_id = %payload.strategy_id, symbol = %payload.symbol, "order request arrived unapproved");
            return self.reject_unsubmitted(&payload, "not approved by risk gate").await;
        }

        let order = Order {
            id: Uuid::new_v4(),
            strategy_id: payload.strategy_id,
            symbol: payload.symbol.clone(),
            side: payload.side,
            order_type: payload.order_type,
            quantity: payload.quantity,
            price: payload.price,
            stop_loss: payload.stop_loss,
            take_profit: payload.take_profit,
            environment: payload.environment,
            status: OrderStatus::Pending,
            filled_quantity: Decimal::ZERO,
            avg_fill_price: None,
            commission: Decimal::ZERO,
            idempotency_key: payload.idempotency_key.clone(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let inserted = self.persistence.relational.insert_order_idempotent(&order).await?;
        if !inserted {
            info!(idempotency_key = %payload.idempotency_key, "order insert lost the idempotency race, skipping");
            return Ok(());
        }

        match order.environment {
            OrderEnvironment::Paper => self.fill_paper(order).await,
            OrderEnvironment::Live => self.submit_live(order).await,
        }
    }

    /// Rejection path for requests that never became an `Order` row
    /// (unapproved). A synthetic id is enough since no row exists to key
    /// the update against.
    async fn reject_unsubmitted(&self, payload: &OrderRequestPayload, reason: &str) -> Result<(), MasterTradeError> {
        let synthetic_id = Uuid::new_v5(&Uuid::NAMESPACE_OID, payload.idempotency_key.as_bytes());
        self.publish_update(synthetic_id, "rejected", None, None, Some(reason)).await
    }

    async fn fill_paper(&self, mut order: Order) -> Result<(), MasterTradeError> {
        let fill = paper::simulate_fill(&self.persistence, &order).await?;

        order.transition(OrderStatus::Filled).map_err(|e| MasterTradeError::InvariantViolation(e))?;
        order.filled_quantity = order.quantity;
        order.avg_fill_price = Some(fill.price);

        self.persistence
            .relational
            .update_order_status(order.id, OrderStatus::Filled, order.filled_quantity, order.avg_fill_price)
            .await?;

        self.apply_fill_to_position(&order, fill.price).await?;
        self.publish_update(order.id, "filled", Some(order.filled_quantity), order.avg_fill_price, None).await
    }

    /// Live execution: no exchange adaptor is wired up in this deployment,
    /// so the order is marked `open` (submitted) and left to the deadline
    /// timer, matching the spec's auto-cancel-on-timeout path rather than
    /// pretending a fill happened. A real venue integration fills in
    /// before the timer and cancels this task.
    async fn submit_live(self: &Arc<Self>, mut order: Order) -> Result<(), MasterTradeError> {
        order.transition(OrderStatus::Open).map_err(|e| MasterTradeError::InvariantViolation(e))?;
        self.persistence
            .relational
            .update_order_status(order.id, OrderStatus::Open, Decimal::ZERO, None)
            .await?;
        self.publish_update(order.id, "open", None, None, None).await?;
        self.arm_timeout(order.id, order.environment).await;
        Ok(())
    }

    async fn apply_fill_to_position(&self, order: &Order, fill_price: Decimal) -> Result<(), MasterTradeError> {
        let positions = self.persistence.relational.fetch_open_positions().await?;
        let existing = positions.into_iter().find(|p| {
            p.strategy_id == order.strategy_id && p.symbol == order.symbol && p.environment == order.environment
        });

        let signed_qty = match order.side {
            OrderSide::Buy => order.quantity,
            OrderSide::Sell => -order.quantity,
        };

        match existing {
            None => {
                if signed_qty.is_zero() {
                    return Ok(());
                }
                let position = crate::models::order::Position {
                    strategy_id: order.strategy_id,
                    symbol: order.symbol.clone(),
                    environment: order.environment,
                    quantity: signed_qty,
                    entry_price: fill_price,
                    current_price: fill_price,
                    stop_loss: order.stop_loss,
                    take_profit: order.take_profit,
                    opened_at: Utc::now(),
                    updated_at: Utc::now(),
                };
                self.persistence.relational.upsert_position(&position).await
            }
            Some(mut position) => {
                let new_quantity = position.quantity + signed_qty;
                if new_quantity.is_zero() {
                    let env_str = match order.environment {
                        OrderEnvironment::Paper => "paper",
                        OrderEnvironment::Live => "live",
                    };
                    self.persistence.relational.delete_flat_position(order.strategy_id, &order.symbol, env_str).await
                } else {
                    let same_direction = (position.quantity > Decimal::ZERO) == (signed_qty > Decimal::ZERO);
                    if same_direction {
                        let total_cost = position.entry_price * position.quantity.abs() + fill_price * signed_qty.abs();
                        let total_qty = position.quantity.abs() + signed_qty.abs();
                        position.entry_price =
                            if !total_qty.is_zero() { total_cost / total_qty } else { position.entry_price };
                    }
                    position.quantity = new_quantity;
                    position.current_price = fill_price;
                    position.updated_at = Utc::now();
                    self.persistence.relational.upsert_position(&position).await
                }
            }
        }
    }

    async fn cancel_order(&self, order_id: Uuid) -> Result<(), MasterTradeError> {
        let Some(order) = self.persistence.relational.fetch_order(order_id).await? else {
            warn!(%order_id, "cancel requested for unknown order");
            return Ok(());
        };
        if order.status.is_terminal() {
            return Ok(());
        }
        self.persistence
            .relational
            .update_order_status(order_id, OrderStatus::Cancelled, order.filled_quantity, order.avg_fill_price)
            .await?;
        if let Some(handle) = self.pending_timeouts.lock().await.remove(&order_id) {
            handle.abort();
        }
        self.publish_update(order_id, "cancelled", Some(order.filled_quantity), order.avg_fill_price, None).await
    }

    async fn publish_update(
        &self,
        order_id: Uuid,
        status: &str,
        filled_quantity: Option<Decimal>,
        avg_fill_price: Option<Decimal>,
        reason: Option<&str>,
    ) -> Result<(), MasterTradeError> {
        let payload = serde_json::json!({
            "order_id": order_id,
            "status": status,
            "filled_quantity": filled_quantity,
            "avg_fill_price": avg_fill_price,
            "reason": reason,
        });
        let message =
            RawMessage::new(MessageType::OrderUpdate, "executor", format!("order.update.{status}.{order_id}"), payload);
        if let Err(err) = self.fabric.publish("mastertrade.orders", &message).await {
            error!(%order_id, error = %err, "failed to publish order update");
        }
        Ok(())
    }

    /// spec §4.8: "every `order.request.*` produces exactly one terminal
    /// `order.update.*` within a deadline... else the request is
    /// auto-cancelled and marked `rejected` with reason `timeout`".
    async fn arm_timeout(self: &Arc<Self>, order_id: Uuid, environment: OrderEnvironment) {
        let deadline = match environment {
            OrderEnvironment::Live => LIVE_DEADLINE,
            OrderEnvironment::Paper => PAPER_DEADLINE,
        };
        let executor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if let Ok(Some(order)) = executor.persistence.relational.fetch_order(order_id).await {
                if !order.status.is_terminal() {
                    warn!(%order_id, "order hit terminal-update deadline, auto-cancelling as rejected");
                    let _ = executor
                        .persistence
                        .relational
                        .update_order_status(order_id, OrderStatus::Rejected, order.filled_quantity, order.avg_fill_price)
                        .await;
                    let _ = executor.publish_update(order_id, "rejected", None, None, Some("timeout")).await;
                }
            }
            executor.pending_timeouts.lock().await.remove(&order_id);
        });
        self.pending_timeouts.lock().await.insert(order_id, handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_request_payload_round_trips_through_json() {
        let payload = OrderRequestPayload {
            idempotency_key: "key-1".into(),
            strategy_id: Uuid::new_v4(),
            symbol: "BTCUSDT".into(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            quantity: Decimal::new(5, 1),
            price: None,
            stop_loss: None,
            take_profit: None,
            environment: OrderEnvironment::Paper,
            approved: true,
            cancel_order_id: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        let back: OrderRequestPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back.idempotency_key, "key-1");
        assert!(back.approved);
    }
}
