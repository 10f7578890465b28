//! Relational accessor layer (spec §4.4).
//! One typed accessor per entity family; every mutation is transactional at
//! row granularity. Multi-row invariants (MAX_ACTIVE_STRATEGIES) are
//! enforced by the owning component under the `strategy.activation`
//! advisory lock (see `with_advisory_lock`).

use super::with_store_timeout;
use crate::error::MasterTradeError;
use crate::models::{
    Alert, AlertSeverity, AlertStatus, BacktestResult, CollectorState, FinancialGoal,
    GoalProgress, Order, OrderStatus, Position, Strategy, StrategyStatus,
};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// `hashtext(name)` keyed advisory lock, per spec §4.4/§5
/// ("the active-strategy set is mutated only under an advisory lock
/// `strategy.activation`").
pub async fn with_advisory_lock<T, F, Fut>(
    pool: &PgPool,
    lock_name: &str,
    f: F,
) -> Result<T, MasterTradeError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, MasterTradeError>>,
{
    let mut tx = pool.begin().await.map_err(|e| MasterTradeError::InfrastructureStore {
        what: "begin advisory lock tx".into(),
        source: e.into(),
    })?;

    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(lock_name)
        .execute(&mut *tx)
        .await
        .map_err(|e| MasterTradeError::InfrastructureStore {
            what: format!("acquire advisory lock {lock_name}"),
            source: e.into(),
        })?;

    let result = f().await;

    tx.commit().await.map_err(|e| MasterTradeError::InfrastructureStore {
        what: "commit advisory lock tx".into(),
        source: e.into(),
    })?;

    result
}

#[derive(Clone)]
pub struct RelationalStore {
    pool: PgPool,
}

impl RelationalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // --- CollectorState -------------------------------------------------

    pub async fn upsert_collector_state(
        &self,
        state: &CollectorState,
    ) -> Result<(), MasterTradeError> {
        let payload = serde_json::to_value(state).map_err(|e| MasterTradeError::InfrastructureStore {
            what: "serialize collector state".into(),
            source: e.into(),
        })?;
        with_store_timeout(
            "upsert collector_states",
            sqlx::query(
                "INSERT INTO collector_states (name, state, updated_at)
                 VALUES ($1, $2, now())
                 ON CONFLICT (name) DO UPDATE SET state = EXCLUDED.state, updated_at = now()",
            )
            .bind(&state.name)
            .bind(payload)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    /// All known collector states, for the Control API's `/collectors`
    /// listing. `state` already carries every field of `CollectorState`
    /// (including `name`); the separate `name` column only exists for the
    /// upsert's conflict key.
    pub async fn list_collector_states(&self) -> Result<Vec<CollectorState>, MasterTradeError> {
        let rows = with_store_timeout(
            "list collector_states",
            sqlx::query("SELECT state FROM collector_states ORDER BY name").fetch_all(&self.pool),
        )
        .await?;
        Ok(rows.into_iter().filter_map(|r| serde_json::from_value(r.get("state")).ok()).collect())
    }

    /// Single collector's state, for the Control API's mutating endpoints
    /// (enable/disable/restart/set-rate-limit/reset-breaker) to read-modify-
    /// write against.
    pub async fn fetch_collector_state(
        &self,
        name: &str,
    ) -> Result<Option<CollectorState>, MasterTradeError> {
        let row = with_store_timeout(
            "fetch collector_state",
            sqlx::query("SELECT state FROM collector_states WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.and_then(|r| serde_json::from_value(r.get("state")).ok()))
    }

    // --- Strategy ---------------------------------------------------------

    pub async fn insert_strategy(&self, strategy: &Strategy) -> Result<(), MasterTradeError> {
        with_store_timeout(
            "insert strategy",
            sqlx::query(
                "INSERT INTO strategies
                 (id, name, strategy_type, symbol, interval, parameters, entry_conditions,
                  exit_conditions, risk_params, status, version, parent_strategy_id,
                  generation, created_at, updated_at)
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)",
            )
            .bind(strategy.id)
            .bind(&strategy.name)
            .bind(&strategy.strategy_type)
            .bind(&strategy.symbol)
            .bind(&strategy.interval)
            .bind(&strategy.parameters)
            .bind(&strategy.entry_conditions)
            .bind(&strategy.exit_conditions)
            .bind(serde_json::to_value(&strategy.risk_params).unwrap())
            .bind(strategy_status_str(strategy.status))
            .bind(strategy.version as i32)
            .bind(strategy.parent_strategy_id)
            .bind(strategy.generation as i32)
            .bind(strategy.created_at)
            .bind(strategy.updated_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    pub async fn update_strategy_status(
        &self,
        id: Uuid,
        status: StrategyStatus,
    ) -> Result<(), MasterTradeError> {
        with_store_timeout(
            "update strategy status",
            sqlx::query("UPDATE strategies SET status = $1, updated_at = now() WHERE id = $2")
                .bind(strategy_status_str(status))
                .bind(id)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    pub async fn count_active_strategies(&self) -> Result<u32, MasterTradeError> {
        let row = with_store_timeout(
            "count active strategies",
            sqlx::query("SELECT count(*) AS n FROM strategies WHERE status = 'active'")
                .fetch_one(&self.pool),
        )
        .await?;
        Ok(row.get::<i64, _>("n") as u32)
    }

    pub async fn list_non_archived_strategies(&self) -> Result<Vec<Uuid>, MasterTradeError> {
        let rows = with_store_timeout(
            "list non-archived strategies",
            sqlx::query("SELECT id FROM strategies WHERE status != 'archived'")
                .fetch_all(&self.pool),
        )
        .await?;
        Ok(rows.into_iter().map(|r| r.get("id")).collect())
    }

    /// Full rows for the activation loop: scores and the activate/deactivate
    /// diff both need the complete `Strategy`, not just its id.
    pub async fn fetch_non_archived_strategies(&self) -> Result<Vec<Strategy>, MasterTradeError> {
        let rows = with_store_timeout(
            "fetch non-archived strategies",
            sqlx::query(
                "SELECT id, name, strategy_type, symbol, interval, parameters, entry_conditions,
                        exit_conditions, risk_params, status, version, parent_strategy_id,
                        generation, created_at, updated_at
                 FROM strategies WHERE status != 'archived'",
            )
            .fetch_all(&self.pool),
        )
        .await?;
        Ok(rows.into_iter().map(row_to_strategy).collect())
    }

    /// Every strategy regardless of status, for the Control API's
    /// `/strategies` listing (unlike the activation/backtest loops, the UI
    /// wants to see `archived` strategies too).
    pub async fn fetch_all_strategies(&self) -> Result<Vec<Strategy>, MasterTradeError> {
        let rows = with_store_timeout(
            "fetch all strategies",
            sqlx::query(
                "SELECT id, name, strategy_type, symbol, interval, parameters, entry_conditions,
                        exit_conditions, risk_params, status, version, parent_strategy_id,
                        generation, created_at, updated_at
                 FROM strategies ORDER BY created_at DESC",
            )
            .fetch_all(&self.pool),
        )
        .await?;
        Ok(rows.into_iter().map(row_to_strategy).collect())
    }

    pub async fn fetch_strategy(&self, id: Uuid) -> Result<Option<Strategy>, MasterTradeError> {
        let row = with_store_timeout(
            "fetch strategy",
            sqlx::query(
                "SELECT id, name, strategy_type, symbol, interval, parameters, entry_conditions,
                        exit_conditions, risk_params, status, version, parent_strategy_id,
                        generation, created_at, updated_at
                 FROM strategies WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.map(row_to_strategy))
    }

    /// Before/after record for one activation cycle (spec §4.6 step 5).
    pub async fn insert_strategy_activation_log(
        &self,
        strategy_id: Uuid,
        previous_status: StrategyStatus,
        new_status: StrategyStatus,
        overall_score: f64,
        at: DateTime<Utc>,
    ) -> Result<(), MasterTradeError> {
        with_store_timeout(
            "insert strategy_activation_log",
            sqlx::query(
                "INSERT INTO strategy_activation_log
                 (strategy_id, previous_status, new_status, overall_score, created_at)
                 VALUES ($1,$2,$3,$4,$5)",
            )
            .bind(strategy_id)
            .bind(strategy_status_str(previous_status))
            .bind(strategy_status_str(new_status))
            .bind(overall_score)
            .bind(at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    /// Most recent transition's timestamp and the `overall` score recorded
    /// at that time, used by the activation loop's 24h/15%-move stability
    /// rule. `None` for a strategy that has never transitioned.
    pub async fn latest_activation_log(
        &self,
        strategy_id: Uuid,
    ) -> Result<(Option<DateTime<Utc>>, Option<f64>), MasterTradeError> {
        let row = with_store_timeout(
            "latest strategy_activation_log",
            sqlx::query(
                "SELECT created_at, overall_score FROM strategy_activation_log
                 WHERE strategy_id = $1 ORDER BY created_at DESC LIMIT 1",
            )
            .bind(strategy_id)
            .fetch_optional(&self.pool),
        )
        .await?;
        Ok(match row {
            Some(r) => (Some(r.get("created_at")), Some(r.get("overall_score"))),
            None => (None, None),
        })
    }

    // --- BacktestResult -----------------------------------------------------

    pub async fn insert_backtest_result(
        &self,
        result: &BacktestResult,
    ) -> Result<(), MasterTradeError> {
        with_store_timeout(
            "insert backtest_results",
            sqlx::query(
                "INSERT INTO backtest_results
                 (id, strategy_id, window_start, window_end, metrics, monthly_returns,
                  trade_log, rng_seed, created_at)
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)",
            )
            .bind(result.id)
            .bind(result.strategy_id)
            .bind(result.window_start)
            .bind(result.window_end)
            .bind(serde_json::to_value(&result.metrics).unwrap())
            .bind(serde_json::to_value(&result.monthly_returns).unwrap())
            .bind(serde_json::to_value(&result.trade_log).unwrap())
            .bind(result.rng_seed as i64)
            .bind(result.created_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    /// Most recent backtest's metric set, used by the activation scorer's
    /// backtest subcomponent.
    pub async fn latest_backtest_metrics(
        &self,
        strategy_id: Uuid,
    ) -> Result<Option<crate::models::strategy::BacktestMetrics>, MasterTradeError> {
        let row = with_store_timeout(
            "latest backtest metrics",
            sqlx::query(
                "SELECT metrics FROM backtest_results
                 WHERE strategy_id = $1 ORDER BY created_at DESC LIMIT 1",
            )
            .bind(strategy_id)
            .fetch_optional(&self.pool),
        )
        .await?;
        Ok(match row {
            Some(r) => serde_json::from_value(r.get("metrics")).ok(),
            None => None,
        })
    }

    // --- Order / Position ---------------------------------------------------

    /// Idempotent on `idempotency_key`: a duplicate publish yields exactly
    /// one row (spec §8 idempotence law).
    pub async fn insert_order_idempotent(&self, order: &Order) -> Result<bool, MasterTradeError> {
        let result = with_store_timeout(
            "insert order",
            sqlx::query(
                "INSERT INTO orders
                 (id, strategy_id, symbol, side, order_type, quantity, price, stop_loss,
                  take_profit, environment, status, filled_quantity, avg_fill_price,
                  commission, idempotency_key, created_at, updated_at)
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17)
                 ON CONFLICT (idempotency_key) DO NOTHING",
            )
            .bind(order.id)
            .bind(order.strategy_id)
            .bind(&order.symbol)
            .bind(order_side_str(order.side))
            .bind(order_type_str(order.order_type))
            .bind(order.quantity)
            .bind(order.price)
            .bind(order.stop_loss)
            .bind(order.take_profit)
            .bind(order_env_str(order.environment))
            .bind(order_status_str(order.status))
            .bind(order.filled_quantity)
            .bind(order.avg_fill_price)
            .bind(order.commission)
            .bind(&order.idempotency_key)
            .bind(order.created_at)
            .bind(order.updated_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn fetch_order_by_idempotency_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<Order>, MasterTradeError> {
        let row = with_store_timeout(
            "fetch order by idempotency key",
            sqlx::query(
                "SELECT id, strategy_id, symbol, side, order_type, quantity, price, stop_loss,
                        take_profit, environment, status, filled_quantity, avg_fill_price,
                        commission, idempotency_key, created_at, updated_at
                 FROM orders WHERE idempotency_key = $1",
            )
            .bind(idempotency_key)
            .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.map(row_to_order))
    }

    pub async fn fetch_order(&self, id: Uuid) -> Result<Option<Order>, MasterTradeError> {
        let row = with_store_timeout(
            "fetch order",
            sqlx::query(
                "SELECT id, strategy_id, symbol, side, order_type, quantity, price, stop_loss,
                        take_profit, environment, status, filled_quantity, avg_fill_price,
                        commission, idempotency_key, created_at, updated_at
                 FROM orders WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.map(row_to_order))
    }

    pub async fn update_order_status(
        &self,
        id: Uuid,
        status: OrderStatus,
        filled_quantity: rust_decimal::Decimal,
        avg_fill_price: Option<rust_decimal::Decimal>,
    ) -> Result<(), MasterTradeError> {
        with_store_timeout(
            "update order status",
            sqlx::query(
                "UPDATE orders
                 SET status = $1, filled_quantity = $2, avg_fill_price = $3, updated_at = now()
                 WHERE id = $4",
            )
            .bind(order_status_str(status))
            .bind(filled_quantity)
            .bind(avg_fill_price)
            .bind(id)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    pub async fn upsert_position(&self, position: &Position) -> Result<(), MasterTradeError> {
        with_store_timeout(
            "upsert position",
            sqlx::query(
                "INSERT INTO positions
                 (strategy_id, symbol, environment, quantity, entry_price, current_price,
                  stop_loss, take_profit, opened_at, updated_at)
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
                 ON CONFLICT (strategy_id, symbol, environment) DO UPDATE SET
                   quantity = EXCLUDED.quantity,
                   current_price = EXCLUDED.current_price,
                   stop_loss = EXCLUDED.stop_loss,
                   take_profit = EXCLUDED.take_profit,
                   updated_at = now()",
            )
            .bind(position.strategy_id)
            .bind(&position.symbol)
            .bind(order_env_str(position.environment))
            .bind(position.quantity)
            .bind(position.entry_price)
            .bind(position.current_price)
            .bind(position.stop_loss)
            .bind(position.take_profit)
            .bind(position.opened_at)
            .bind(position.updated_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    pub async fn delete_flat_position(
        &self,
        strategy_id: Uuid,
        symbol: &str,
        environment: &str,
    ) -> Result<(), MasterTradeError> {
        with_store_timeout(
            "delete flat position",
            sqlx::query(
                "DELETE FROM positions WHERE strategy_id = $1 AND symbol = $2 AND environment = $3",
            )
            .bind(strategy_id)
            .bind(symbol)
            .bind(environment)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    pub async fn fetch_open_positions(&self) -> Result<Vec<Position>, MasterTradeError> {
        let rows = with_store_timeout(
            "fetch open positions",
            sqlx::query(
                "SELECT strategy_id, symbol, environment, quantity, entry_price, current_price,
                        stop_loss, take_profit, opened_at, updated_at FROM positions",
            )
            .fetch_all(&self.pool),
        )
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| Position {
                strategy_id: r.get("strategy_id"),
                symbol: r.get("symbol"),
                environment: order_env_from_str(r.get::<&str, _>("environment")),
                quantity: r.get("quantity"),
                entry_price: r.get("entry_price"),
                current_price: r.get("current_price"),
                stop_loss: r.get("stop_loss"),
                take_profit: r.get("take_profit"),
                opened_at: r.get("opened_at"),
                updated_at: r.get("updated_at"),
            })
            .collect())
    }

    /// Sum of open-position notional (spec §4.7 inputs to
    /// `size_position`/`check_drawdown`).
    pub async fn portfolio_value(&self) -> Result<rust_decimal::Decimal, MasterTradeError> {
        let row = with_store_timeout(
            "portfolio value",
            sqlx::query(
                "SELECT COALESCE(SUM(quantity * current_price), 0) AS notional FROM positions",
            )
            .fetch_one(&self.pool),
        )
        .await?;
        Ok(row.get("notional"))
    }

    /// Most recent recorded `progress_pct` for a goal, used to feed the goal
    /// adjustment factor without recomputing it inline.
    pub async fn latest_goal_progress_pct(&self, goal_id: Uuid) -> Result<Option<f64>, MasterTradeError> {
        let row = with_store_timeout(
            "latest goal progress",
            sqlx::query("SELECT progress_pct FROM goal_progress WHERE goal_id = $1 ORDER BY ts DESC LIMIT 1")
                .bind(goal_id)
                .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.map(|r| r.get("progress_pct")))
    }

    // --- FinancialGoal / GoalProgress ---------------------------------------

    pub async fn insert_goal_progress(
        &self,
        progress: &GoalProgress,
    ) -> Result<(), MasterTradeError> {
        with_store_timeout(
            "insert goal progress",
            sqlx::query(
                "INSERT INTO goal_progress
                 (goal_id, ts, current_value, target, progress_pct, gap, status)
                 VALUES ($1,$2,$3,$4,$5,$6,$7)",
            )
            .bind(progress.goal_id)
            .bind(progress.timestamp)
            .bind(progress.current)
            .bind(progress.target)
            .bind(progress.progress_pct)
            .bind(progress.gap)
            .bind(goal_status_str(progress.status))
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    pub async fn active_goal(
        &self,
        goal_type: &str,
    ) -> Result<Option<FinancialGoal>, MasterTradeError> {
        let row = with_store_timeout(
            "fetch active goal",
            sqlx::query(
                "SELECT id, target_value, priority, created_at FROM financial_goals
                 WHERE goal_type = $1 AND status = 'active' LIMIT 1",
            )
            .bind(goal_type)
            .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.map(|r| FinancialGoal {
            id: r.get("id"),
            goal_type: goal_type_from_str(goal_type),
            target_value: r.get("target_value"),
            priority: r.get::<i32, _>("priority") as u32,
            status: crate::models::goal::GoalActiveStatus::Active,
            created_at: r.get("created_at"),
        }))
    }

    /// `/goals/targets` listing — every configured goal regardless of
    /// active/inactive status.
    pub async fn list_financial_goals(&self) -> Result<Vec<FinancialGoal>, MasterTradeError> {
        let rows = with_store_timeout(
            "list financial_goals",
            sqlx::query(
                "SELECT id, goal_type, target_value, priority, status, created_at FROM financial_goals
                 ORDER BY priority",
            )
            .fetch_all(&self.pool),
        )
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| FinancialGoal {
                id: r.get("id"),
                goal_type: goal_type_from_str(r.get::<&str, _>("goal_type")),
                target_value: r.get("target_value"),
                priority: r.get::<i32, _>("priority") as u32,
                status: if r.get::<&str, _>("status") == "active" {
                    crate::models::goal::GoalActiveStatus::Active
                } else {
                    crate::models::goal::GoalActiveStatus::Inactive
                },
                created_at: r.get("created_at"),
            })
            .collect())
    }

    /// `/goals/history/{type}` — most recent snapshots for a goal type,
    /// newest first.
    pub async fn goal_progress_history(
        &self,
        goal_type: &str,
        limit: i64,
    ) -> Result<Vec<GoalProgress>, MasterTradeError> {
        let rows = with_store_timeout(
            "goal progress history",
            sqlx::query(
                "SELECT gp.goal_id, gp.ts, gp.current_value, gp.target, gp.progress_pct, gp.gap, gp.status
                 FROM goal_progress gp
                 JOIN financial_goals fg ON fg.id = gp.goal_id
                 WHERE fg.goal_type = $1
                 ORDER BY gp.ts DESC LIMIT $2",
            )
            .bind(goal_type)
            .bind(limit)
            .fetch_all(&self.pool),
        )
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| GoalProgress {
                goal_id: r.get("goal_id"),
                timestamp: r.get("ts"),
                current: r.get("current_value"),
                target: r.get("target"),
                progress_pct: r.get("progress_pct"),
                gap: r.get("gap"),
                status: goal_status_from_str(r.get::<&str, _>("status")),
            })
            .collect())
    }

    /// Records a realized-profit entry (spec §4.10 `/goals/record-profit`).
    /// Feeds `monthly_profit_usd`'s next snapshot via
    /// `sum_realized_profit_since`; does not touch `goal_progress` directly.
    pub async fn record_profit(
        &self,
        entry: &crate::models::RealizedProfitEntry,
    ) -> Result<(), MasterTradeError> {
        with_store_timeout(
            "insert realized_profit_log",
            sqlx::query(
                "INSERT INTO realized_profit_log (id, amount_usd, source, recorded_at)
                 VALUES ($1,$2,$3,$4)",
            )
            .bind(entry.id)
            .bind(entry.amount_usd)
            .bind(&entry.source)
            .bind(entry.recorded_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    pub async fn sum_realized_profit_since(&self, since: DateTime<Utc>) -> Result<f64, MasterTradeError> {
        let row = with_store_timeout(
            "sum realized_profit_log",
            sqlx::query(
                "SELECT COALESCE(SUM(amount_usd), 0) AS total FROM realized_profit_log WHERE recorded_at >= $1",
            )
            .bind(since)
            .fetch_one(&self.pool),
        )
        .await?;
        Ok(row.get("total"))
    }

    // --- Alerts --------------------------------------------------------------

    pub async fn insert_alert(&self, alert: &Alert) -> Result<(), MasterTradeError> {
        with_store_timeout(
            "insert alert",
            sqlx::query(
                "INSERT INTO alerts
                 (id, alert_type, severity, title, message, entity_type, entity_id, status,
                  created_at)
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)",
            )
            .bind(alert.id)
            .bind(&alert.alert_type)
            .bind(alert_severity_str(alert.severity))
            .bind(&alert.title)
            .bind(&alert.message)
            .bind(&alert.entity_type)
            .bind(&alert.entity_id)
            .bind(alert_status_str(alert.status))
            .bind(alert.created_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    /// Returns `false` (no row changed) if the alert was already in that
    /// terminal status — callers use this for the §8 "ack is a no-op" law.
    pub async fn update_alert_status(
        &self,
        id: Uuid,
        status: AlertStatus,
    ) -> Result<bool, MasterTradeError> {
        let result = with_store_timeout(
            "update alert status",
            sqlx::query(
                "UPDATE alerts SET status = $1 WHERE id = $2 AND status != $1",
            )
            .bind(alert_status_str(status))
            .bind(id)
            .execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// spec §4.9 suppression rules: `(alert_type, entity_id?)` suppressed
    /// until a point in time. A row with a null `entity_id` suppresses that
    /// type for every entity.
    pub async fn is_suppressed(
        &self,
        alert_type: &str,
        entity_id: Option<&str>,
    ) -> Result<bool, MasterTradeError> {
        let row = with_store_timeout(
            "check alert suppression",
            sqlx::query(
                "SELECT 1 FROM alert_suppressions
                 WHERE alert_type = $1 AND (entity_id = $2 OR entity_id IS NULL)
                   AND suppressed_until > now()
                 LIMIT 1",
            )
            .bind(alert_type)
            .bind(entity_id)
            .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.is_some())
    }

    /// `/alerts/{id}/snooze`: suppresses `alert_type` for this entity until
    /// `until`, upserting over any earlier suppression window.
    pub async fn suppress_alert(
        &self,
        alert_type: &str,
        entity_id: Option<&str>,
        until: chrono::DateTime<Utc>,
    ) -> Result<(), MasterTradeError> {
        with_store_timeout(
            "suppress alert",
            sqlx::query(
                "INSERT INTO alert_suppressions (alert_type, entity_id, suppressed_until)
                 VALUES ($1,$2,$3)
                 ON CONFLICT (alert_type, entity_id)
                 DO UPDATE SET suppressed_until = EXCLUDED.suppressed_until",
            )
            .bind(alert_type)
            .bind(entity_id)
            .bind(until)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    pub async fn insert_alert_delivery_attempt(
        &self,
        attempt: &crate::models::alert::AlertDeliveryAttempt,
    ) -> Result<(), MasterTradeError> {
        with_store_timeout(
            "insert alert delivery attempt",
            sqlx::query(
                "INSERT INTO alert_history
                 (alert_id, channel, attempt, succeeded, error, attempted_at)
                 VALUES ($1,$2,$3,$4,$5,$6)",
            )
            .bind(attempt.alert_id)
            .bind(delivery_channel_str(attempt.channel))
            .bind(attempt.attempt as i32)
            .bind(attempt.succeeded)
            .bind(&attempt.error)
            .bind(attempt.attempted_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    /// `/alerts/list`, optionally filtered by status, newest first.
    pub async fn list_alerts(
        &self,
        status: Option<AlertStatus>,
        limit: i64,
    ) -> Result<Vec<Alert>, MasterTradeError> {
        let rows = with_store_timeout(
            "list alerts",
            match status {
                Some(s) => sqlx::query(
                    "SELECT id, alert_type, severity, title, message, entity_type, entity_id,
                            status, created_at, acknowledged_at, resolved_at
                     FROM alerts WHERE status = $1 ORDER BY created_at DESC LIMIT $2",
                )
                .bind(alert_status_str(s))
                .bind(limit)
                .fetch_all(&self.pool),
                None => sqlx::query(
                    "SELECT id, alert_type, severity, title, message, entity_type, entity_id,
                            status, created_at, acknowledged_at, resolved_at
                     FROM alerts ORDER BY created_at DESC LIMIT $1",
                )
                .bind(limit)
                .fetch_all(&self.pool),
            },
        )
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| Alert {
                id: r.get("id"),
                alert_type: r.get("alert_type"),
                severity: alert_severity_from_str(r.get("severity")),
                title: r.get("title"),
                message: r.get("message"),
                entity_type: r.get("entity_type"),
                entity_id: r.get("entity_id"),
                status: alert_status_from_str(r.get("status")),
                created_at: r.get("created_at"),
                acknowledged_at: r.get("acknowledged_at"),
                resolved_at: r.get("resolved_at"),
            })
            .collect())
    }

    /// Returns the alert row itself so the bus can re-read its severity when
    /// dispatching from a bare `alert_id` off the wire.
    pub async fn fetch_alert(&self, id: Uuid) -> Result<Option<Alert>, MasterTradeError> {
        let row = with_store_timeout(
            "fetch alert",
            sqlx::query(
                "SELECT id, alert_type, severity, title, message, entity_type, entity_id,
                        status, created_at, acknowledged_at, resolved_at
                 FROM alerts WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.map(|r| Alert {
            id: r.get("id"),
            alert_type: r.get("alert_type"),
            severity: alert_severity_from_str(r.get("severity")),
            title: r.get("title"),
            message: r.get("message"),
            entity_type: r.get("entity_type"),
            entity_id: r.get("entity_id"),
            status: alert_status_from_str(r.get("status")),
            created_at: r.get("created_at"),
            acknowledged_at: r.get("acknowledged_at"),
            resolved_at: r.get("resolved_at"),
        }))
    }

    // --- API audit log -------------------------------------------------------

    pub async fn insert_api_audit_log(
        &self,
        actor_id: &str,
        endpoint: &str,
        payload: &serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<(), MasterTradeError> {
        with_store_timeout(
            "insert api_audit_log",
            sqlx::query(
                "INSERT INTO api_audit_log (actor_id, endpoint, payload, created_at)
                 VALUES ($1,$2,$3,$4)",
            )
            .bind(actor_id)
            .bind(endpoint)
            .bind(payload)
            .bind(at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }
}

fn strategy_status_str(s: StrategyStatus) -> &'static str {
    match s {
        StrategyStatus::Draft => "draft",
        StrategyStatus::Backtested => "backtested",
        StrategyStatus::Paper => "paper",
        StrategyStatus::Active => "active",
        StrategyStatus::Paused => "paused",
        StrategyStatus::Archived => "archived",
    }
}

fn strategy_status_from_str(s: &str) -> StrategyStatus {
    match s {
        "draft" => StrategyStatus::Draft,
        "backtested" => StrategyStatus::Backtested,
        "paper" => StrategyStatus::Paper,
        "active" => StrategyStatus::Active,
        "paused" => StrategyStatus::Paused,
        _ => StrategyStatus::Archived,
    }
}

fn goal_type_from_str(s: &str) -> crate::models::GoalType {
    match s {
        "monthly_profit_usd" => crate::models::GoalType::MonthlyProfitUsd,
        "portfolio_target_usd" => crate::models::GoalType::PortfolioTargetUsd,
        _ => crate::models::GoalType::MonthlyReturnPct,
    }
}

fn goal_status_from_str(s: &str) -> crate::models::GoalStatus {
    match s {
        "on_track" => crate::models::GoalStatus::OnTrack,
        "ahead" => crate::models::GoalStatus::Ahead,
        "achieved" => crate::models::GoalStatus::Achieved,
        _ => crate::models::GoalStatus::Behind,
    }
}

fn order_side_str(s: crate::models::OrderSide) -> &'static str {
    match s {
        crate::models::OrderSide::Buy => "buy",
        crate::models::OrderSide::Sell => "sell",
    }
}

fn order_type_str(t: crate::models::OrderType) -> &'static str {
    match t {
        crate::models::OrderType::Market => "market",
        crate::models::OrderType::Limit => "limit",
    }
}

fn order_env_str(e: crate::models::OrderEnvironment) -> &'static str {
    match e {
        crate::models::OrderEnvironment::Paper => "paper",
        crate::models::OrderEnvironment::Live => "live",
    }
}

fn order_env_from_str(s: &str) -> crate::models::OrderEnvironment {
    match s {
        "live" => crate::models::OrderEnvironment::Live,
        _ => crate::models::OrderEnvironment::Paper,
    }
}

fn order_status_str(s: OrderStatus) -> &'static str {
    match s {
        OrderStatus::Pending => "pending",
        OrderStatus::Open => "open",
        OrderStatus::PartiallyFilled => "partially_filled",
        OrderStatus::Filled => "filled",
        OrderStatus::Cancelled => "cancelled",
        OrderStatus::Rejected => "rejected",
    }
}

fn order_side_from_str(s: &str) -> crate::models::OrderSide {
    match s {
        "sell" => crate::models::OrderSide::Sell,
        _ => crate::models::OrderSide::Buy,
    }
}

fn order_type_from_str(s: &str) -> crate::models::OrderType {
    match s {
        "limit" => crate::models::OrderType::Limit,
        _ => crate::models::OrderType::Market,
    }
}

fn order_status_from_str(s: &str) -> OrderStatus {
    match s {
        "open" => OrderStatus::Open,
        "partially_filled" => OrderStatus::PartiallyFilled,
        "filled" => OrderStatus::Filled,
        "cancelled" => OrderStatus::Cancelled,
        "rejected" => OrderStatus::Rejected,
        _ => OrderStatus::Pending,
    }
}

fn row_to_order(r: sqlx::postgres::PgRow) -> Order {
    Order {
        id: r.get("id"),
        strategy_id: r.get("strategy_id"),
        symbol: r.get("symbol"),
        side: order_side_from_str(r.get::<&str, _>("side")),
        order_type: order_type_from_str(r.get::<&str, _>("order_type")),
        quantity: r.get("quantity"),
        price: r.get("price"),
        stop_loss: r.get("stop_loss"),
        take_profit: r.get("take_profit"),
        environment: order_env_from_str(r.get::<&str, _>("environment")),
        status: order_status_from_str(r.get::<&str, _>("status")),
        filled_quantity: r.get("filled_quantity"),
        avg_fill_price: r.get("avg_fill_price"),
        commission: r.get("commission"),
        idempotency_key: r.get("idempotency_key"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}

fn row_to_strategy(r: sqlx::postgres::PgRow) -> Strategy {
    Strategy {
        id: r.get("id"),
        name: r.get("name"),
        strategy_type: r.get("strategy_type"),
        symbol: r.get("symbol"),
        interval: r.get("interval"),
        parameters: r.get("parameters"),
        entry_conditions: r.get("entry_conditions"),
        exit_conditions: r.get("exit_conditions"),
        risk_params: serde_json::from_value(r.get("risk_params")).unwrap_or(
            crate::models::strategy::RiskParams {
                stop_loss_pct: 0.02,
                take_profit_pct: 0.04,
                position_size_pct: 0.05,
            },
        ),
        status: strategy_status_from_str(r.get::<&str, _>("status")),
        version: r.get::<i32, _>("version") as u32,
        parent_strategy_id: r.get("parent_strategy_id"),
        generation: r.get::<i32, _>("generation") as u32,
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}

fn goal_status_str(s: crate::models::GoalStatus) -> &'static str {
    match s {
        crate::models::GoalStatus::Behind => "behind",
        crate::models::GoalStatus::OnTrack => "on_track",
        crate::models::GoalStatus::Ahead => "ahead",
        crate::models::GoalStatus::Achieved => "achieved",
    }
}

fn alert_severity_str(s: AlertSeverity) -> &'static str {
    match s {
        AlertSeverity::Info => "info",
        AlertSeverity::Warning => "warning",
        AlertSeverity::Error => "error",
        AlertSeverity::Critical => "critical",
    }
}

fn alert_status_str(s: AlertStatus) -> &'static str {
    match s {
        AlertStatus::Active => "active",
        AlertStatus::Acknowledged => "acknowledged",
        AlertStatus::Resolved => "resolved",
    }
}

fn alert_severity_from_str(s: &str) -> AlertSeverity {
    match s {
        "warning" => AlertSeverity::Warning,
        "error" => AlertSeverity::Error,
        "critical" => AlertSeverity::Critical,
        _ => AlertSeverity::Info,
    }
}

fn alert_status_from_str(s: &str) -> AlertStatus {
    match s {
        "acknowledged" => AlertStatus::Acknowledged,
        "resolved" => AlertStatus::Resolved,
        _ => AlertStatus::Active,
    }
}

fn delivery_channel_str(c: crate::models::alert::DeliveryChannel) -> &'static str {
    use crate::models::alert::DeliveryChannel;
    match c {
        DeliveryChannel::Email => "email",
        DeliveryChannel::Sms => "sms",
        DeliveryChannel::Telegram => "telegram",
        DeliveryChannel::Slack => "slack",
        DeliveryChannel::Log => "log",
    }
}
