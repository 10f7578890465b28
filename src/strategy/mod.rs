//! Strategy Orchestrator (spec §4.6): three cooperating loops — generation,
//! backtest, activation — owned by one task per process.

pub mod activation;
pub mod backtest;
pub mod generator;
pub mod scoring;

use crate::error::MasterTradeError;
use crate::fabric::Fabric;
use crate::models::message::{MessageType, RawMessage};
use crate::models::strategy::{BacktestResult, Strategy, StrategyStatus};
use crate::persistence::Persistence;
use crate::scheduler::{self, Scheduler};
use activation::{plan_activation, ActivationTransition, RankedStrategy, ScoreComponents};
use backtest::BacktestRunner;
use chrono::{DateTime, Utc};
use generator::Generator;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Realism filter (spec §4.6 backtest loop): a backtest this far off reality
/// is more likely a curve-fit artifact than an edge worth activating.
fn passes_realism_filter(result: &BacktestResult) -> bool {
    let m = &result.metrics;
    if result.monthly_returns.iter().any(|r| r.return_pct.abs() > 50.0) {
        return false;
    }
    if !(0.2..=0.85).contains(&m.win_rate) {
        return false;
    }
    if m.trade_count < 10 {
        return false;
    }
    if m.max_drawdown > 0.8 {
        return false;
    }
    true
}

/// How many OHLCV bars cover `window_days` at a given candle interval.
fn bars_for_window(interval: &str, window_days: i64) -> i64 {
    let per_day = match interval {
        "15m" => 96,
        "1h" => 24,
        "4h" => 6,
        _ => 24,
    };
    per_day * window_days
}

pub struct Orchestrator {
    persistence: Persistence,
    fabric: Fabric,
    scheduler: Scheduler,
    max_active_strategies: u32,
    backtest_window_days: i64,
    runner: BacktestRunner,
    generator: Mutex<Generator>,
    backtest_retries: Mutex<HashMap<Uuid, u32>>,
    activation_requested: Notify,
    generation_requested: Notify,
}

impl Orchestrator {
    pub fn new(
        persistence: Persistence,
        fabric: Fabric,
        scheduler: Scheduler,
        max_active_strategies: u32,
        backtest_parallelism: usize,
        rng_seed: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            persistence,
            fabric,
            scheduler,
            max_active_strategies,
            backtest_window_days: backtest::DEFAULT_WINDOW_DAYS,
            runner: BacktestRunner::new(backtest_parallelism),
            generator: Mutex::new(Generator::new(rng_seed)),
            backtest_retries: Mutex::new(HashMap::new()),
            activation_requested: Notify::new(),
            generation_requested: Notify::new(),
        })
    }

    /// Wakes the generation loop immediately instead of waiting for the
    /// next 03:00 UTC window. Used by the Control API's `/strategies/generate`.
    pub fn trigger_generation(&self) {
        self.generation_requested.notify_one();
    }

    /// Runs all three loops concurrently until told to shut down. Seeds the
    /// generation/activation cron rows so `Scheduler::try_claim` has
    /// something to race on the first tick even on a brand-new deployment.
    pub async fn run(self: &Arc<Self>, shutdown: tokio::sync::watch::Receiver<bool>) -> Result<(), MasterTradeError> {
        self.scheduler.ensure_job(scheduler::STRATEGY_GENERATION, next_hour_utc(Utc::now(), 3)).await?;
        self.scheduler.ensure_job(scheduler::STRATEGY_ACTIVATION, Utc::now()).await?;
        self.scheduler.ensure_job(scheduler::STRATEGY_ACTIVATION_DRAIN, Utc::now()).await?;

        let generation = self.clone().run_generation_loop(shutdown.clone());
        let backtest = self.clone().run_backtest_loop(shutdown.clone());
        let activation = self.clone().run_activation_loop(shutdown.clone());

        let (g, b, a) = tokio::join!(generation, backtest, activation);
        g?;
        b?;
        a?;
        Ok(())
    }

    // --- Generation loop: daily 03:00 UTC --------------------------------

    async fn run_generation_loop(
        self: Arc<Self>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Result<(), MasterTradeError> {
        loop {
            let now = Utc::now();
            let next = next_hour_utc(now, 3);
            let wait = (next - now).to_std().unwrap_or(std::time::Duration::from_secs(60));
            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    match self.scheduler.try_claim(scheduler::STRATEGY_GENERATION, Utc::now(), next_hour_utc(next, 3)).await {
                        Ok(true) => {
                            if let Err(err) = self.run_generation_cycle().await {
                                error!(error = %err, "strategy generation cycle failed");
                            }
                        }
                        Ok(false) => info!("strategy generation tick claimed by another replica"),
                        Err(err) => error!(error = %err, "strategy generation scheduler claim failed"),
                    }
                }
                _ = self.generation_requested.notified() => {
                    if let Err(err) = self.run_generation_cycle().await {
                        error!(error = %err, "strategy generation cycle failed");
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

    async fn run_generation_cycle(&self) -> Result<usize, MasterTradeError> {
        let existing = self.persistence.relational.fetch_non_archived_strategies().await?;
        let seed_pool: Vec<Strategy> = existing.iter().filter(|s| s.status == StrategyStatus::Backtested).cloned().collect();
        let parent_max_generation = existing.iter().map(|s| s.generation).max().unwrap_or(0);

        let batch = {
            let mut gen = self.generator.lock().await;
            gen.generate_batch(&seed_pool, parent_max_generation)
        };

        for candidate in &batch {
            self.persistence.relational.insert_strategy(candidate).await?;
        }
        info!(count = batch.len(), generation = parent_max_generation + 1, "strategy candidates generated");
        Ok(batch.len())
    }

    /// Runs an out-of-schedule generation cycle on behalf of the Control
    /// API and returns how many candidates were produced.
    pub async fn run_generation_now(&self) -> Result<usize, MasterTradeError> {
        self.run_generation_cycle().await
    }

    // --- Backtest loop: continuously drains drafts ------------------------

    async fn run_backtest_loop(
        self: Arc<Self>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Result<(), MasterTradeError> {
        loop {
            let drained = self.drain_draft_backtests().await?;
            if drained > 0 {
                self.activation_requested.notify_one();
            }

            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(5)), if drained == 0 => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Runs one backtest batch (bounded parallelism via `BacktestRunner`)
    /// and persists results. Returns how many drafts were processed.
    async fn drain_draft_backtests(&self) -> Result<usize, MasterTradeError> {
        let candidates = self.persistence.relational.fetch_non_archived_strategies().await?;
        let drafts: Vec<Strategy> = candidates.into_iter().filter(|s| s.status == StrategyStatus::Draft).collect();
        if drafts.is_empty() {
            return Ok(0);
        }

        let mut jobs = Vec::with_capacity(drafts.len());
        for strategy in &drafts {
            let limit = bars_for_window(&strategy.interval, self.backtest_window_days);
            let bars = self.persistence.timeseries.recent_ohlcv(&strategy.symbol, &strategy.interval, limit).await?;
            let seed = strategy.id.as_u128() as u64;
            jobs.push((strategy.clone(), bars, seed));
        }

        let results = self.runner.run_batch(jobs);
        for (strategy_id, result) in results {
            self.apply_backtest_result(strategy_id, result).await;
        }
        Ok(drafts.len())
    }

    async fn apply_backtest_result(&self, strategy_id: Uuid, result: BacktestResult) {
        if passes_realism_filter(&result) {
            if let Err(err) = self.persistence.relational.insert_backtest_result(&result).await {
                error!(%strategy_id, error = %err, "failed to persist backtest result");
                return;
            }
            if let Err(err) =
                self.persistence.relational.update_strategy_status(strategy_id, StrategyStatus::Backtested).await
            {
                error!(%strategy_id, error = %err, "failed to mark strategy backtested");
            }
            self.backtest_retries.lock().await.remove(&strategy_id);
            return;
        }

        let retries = {
            let mut guard = self.backtest_retries.lock().await;
            let count = guard.entry(strategy_id).or_insert(0);
            *count += 1;
            *count
        };

        if retries < 2 {
            warn!(%strategy_id, retries, "backtest failed realism filter, retrying once");
            return;
        }

        warn!(%strategy_id, "backtest failed realism filter twice, archiving");
        self.backtest_retries.lock().await.remove(&strategy_id);
        if let Err(err) = self.persistence.relational.update_strategy_status(strategy_id, StrategyStatus::Archived).await
        {
            error!(%strategy_id, error = %err, "failed to archive strategy after repeated backtest failure");
        }
    }

    // --- Activation loop: every 4 hours, or right after a backtest drain --

    async fn run_activation_loop(
        self: Arc<Self>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Result<(), MasterTradeError> {
        loop {
            let mut drain_triggered = false;
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(4 * 3600)) => {}
                _ = self.activation_requested.notified() => { drain_triggered = true; }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
            if *shutdown.borrow() {
                return Ok(());
            }

            let now = Utc::now();
            // The drain-triggered wake claims its own always-due-now row
            // instead of racing the periodic tick's `next_run_at` window,
            // which a just-advanced periodic claim would otherwise reject.
            let claim = if drain_triggered {
                self.scheduler.try_claim(scheduler::STRATEGY_ACTIVATION_DRAIN, now, now).await
            } else {
                self.scheduler.try_claim(scheduler::STRATEGY_ACTIVATION, now, now + chrono::Duration::hours(4)).await
            };
            match claim {
                Ok(true) => {
                    if let Err(err) = self.run_activation_cycle().await {
                        error!(error = %err, "activation cycle failed");
                    }
                }
                Ok(false) => info!("activation tick claimed by another replica"),
                Err(err) => error!(error = %err, "activation scheduler claim failed"),
            }
        }
    }

    /// Enforces `MAX_ACTIVE_STRATEGIES` under the `strategy.activation`
    /// advisory lock (spec §4.4 "multi-row invariants ... enforced by the
    /// owning component under an advisory lock keyed on the invariant
    /// name") so two replicas racing an activation tick can't both promote
    /// strategies past the cap between each other's read and write.
    async fn run_activation_cycle(&self) -> Result<(), MasterTradeError> {
        let pool = self.persistence.relational.pool().clone();
        crate::persistence::relational::with_advisory_lock(&pool, "strategy.activation", || {
            self.run_activation_cycle_locked()
        })
        .await
    }

    async fn run_activation_cycle_locked(&self) -> Result<(), MasterTradeError> {
        let now = Utc::now();
        let candidates = self.persistence.relational.fetch_non_archived_strategies().await?;
        // Draft strategies have no backtest to score yet; they are not
        // eligible for activation until the backtest loop promotes them.
        let eligible: Vec<Strategy> = candidates.into_iter().filter(|s| s.status != StrategyStatus::Draft).collect();
        if eligible.is_empty() {
            return Ok(());
        }

        let strategy_factor = self.current_strategy_adjustment_factor().await;

        let mut overall_by_id = HashMap::new();
        let mut ranked = Vec::with_capacity(eligible.len());
        for strategy in &eligible {
            let components = self.score_strategy(strategy).await?;
            let overall = components.overall();
            let adjusted = overall * strategy_factor;
            overall_by_id.insert(strategy.id, overall);

            let (last_transition_at, score_at_last_transition) =
                self.persistence.relational.latest_activation_log(strategy.id).await?;

            ranked.push(RankedStrategy {
                strategy_id: strategy.id,
                overall,
                adjusted,
                currently_active: strategy.status == StrategyStatus::Active,
                last_transition_at,
                score_at_last_transition,
            });
        }

        let plan = plan_activation(ranked, self.max_active_strategies, now);

        let mut by_id: HashMap<Uuid, Strategy> = eligible.into_iter().map(|s| (s.id, s)).collect();
        for (id, transition) in plan {
            if matches!(transition, ActivationTransition::Unchanged) {
                continue;
            }
            let Some(strategy) = by_id.get_mut(&id) else { continue };
            let previous_status = strategy.status;
            match activation::apply_transition(strategy, transition) {
                Ok(true) => {
                    if let Err(err) =
                        self.persistence.relational.update_strategy_status(id, strategy.status).await
                    {
                        error!(%id, error = %err, "failed to persist activation transition");
                        continue;
                    }
                    let overall = overall_by_id.get(&id).copied().unwrap_or(0.0);
                    if let Err(err) = self
                        .persistence
                        .relational
                        .insert_strategy_activation_log(id, previous_status, strategy.status, overall, now)
                        .await
                    {
                        error!(%id, error = %err, "failed to write strategy_activation_log");
                    }
                    self.publish_transition_event(id, strategy.status).await;
                }
                Ok(false) => {}
                Err(err) => warn!(%id, error = %err, "activation transition rejected by state machine"),
            }
        }

        Ok(())
    }

    async fn score_strategy(&self, strategy: &Strategy) -> Result<ScoreComponents, MasterTradeError> {
        let latest_backtest = self.persistence.relational.latest_backtest_metrics(strategy.id).await?;
        let positions = self
            .persistence
            .relational
            .fetch_open_positions()
            .await?
            .into_iter()
            .filter(|p| p.strategy_id == strategy.id)
            .collect::<Vec<_>>();
        let recent_bars =
            self.persistence.timeseries.recent_ohlcv(&strategy.symbol, &strategy.interval, 50).await?;

        Ok(ScoreComponents {
            performance: scoring::performance_score(&positions),
            backtest: scoring::backtest_score(latest_backtest.as_ref()),
            market_alignment: scoring::market_alignment_score(strategy, &recent_bars),
            risk_score: scoring::risk_score(strategy),
        })
    }

    /// spec §4.6 step 2 / §4.7 "strategy adjustment": falls back to 1.0
    /// with a warning alert on any read failure rather than blocking
    /// activation.
    async fn current_strategy_adjustment_factor(&self) -> f64 {
        let return_progress = self.latest_progress_pct("monthly_return_pct").await;
        let income_progress = self.latest_progress_pct("monthly_profit_usd").await;

        match (return_progress, income_progress) {
            (Ok(r), Ok(i)) => {
                let (factor, _stance) = crate::risk::goals::strategy_adjustment_factor(r, i);
                factor
            }
            _ => {
                warn!("goal progress unavailable for activation scoring, falling back to factor 1.0");
                let alert = crate::models::alert::Alert::new(
                    "activation_goal_read_failed",
                    crate::models::alert::AlertSeverity::Warning,
                    "Activation fell back to neutral goal factor",
                    "could not read goal progress while scoring strategies for activation",
                );
                if let Err(err) = self.persistence.relational.insert_alert(&alert).await {
                    error!(error = %err, "failed to persist activation fallback alert");
                }
                1.0
            }
        }
    }

    async fn latest_progress_pct(&self, goal_type: &str) -> Result<f64, MasterTradeError> {
        let goal = self.persistence.relational.active_goal(goal_type).await?.ok_or_else(|| {
            MasterTradeError::InvariantViolation(format!("no active goal of type {goal_type}"))
        })?;
        Ok(self.persistence.relational.latest_goal_progress_pct(goal.id).await?.unwrap_or(0.0))
    }

    async fn publish_transition_event(&self, strategy_id: Uuid, new_status: StrategyStatus) {
        let event = match new_status {
            StrategyStatus::Active => "strategy.activated",
            StrategyStatus::Paused => "strategy.paused",
            _ => return,
        };
        let message = RawMessage::new(
            MessageType::SystemNotification,
            "strategy-orchestrator",
            event,
            serde_json::json!({"strategy_id": strategy_id, "status": new_status}),
        );
        if let Err(err) = self.fabric.publish("mastertrade.system", &message).await {
            warn!(%strategy_id, error = %err, "failed to publish activation transition event");
        }
    }
}

fn next_hour_utc(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let today = now.date_naive().and_hms_opt(hour, 0, 0).unwrap().and_utc();
    if today > now {
        today
    } else {
        (now + chrono::Duration::days(1)).date_naive().and_hms_opt(hour, 0, 0).unwrap().and_utc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::strategy::{BacktestMetrics, MonthlyReturn};
    use chrono::{Timelike, Utc};

    fn metrics(win_rate: f64, trade_count: u32, max_drawdown: f64) -> BacktestMetrics {
        BacktestMetrics {
            total_return: 0.1,
            cagr: 0.2,
            sharpe: 1.0,
            sortino: 1.0,
            max_drawdown,
            win_rate,
            profit_factor: 1.5,
            trade_count,
            winning_trades: (trade_count as f64 * win_rate) as u32,
            losing_trades: trade_count - (trade_count as f64 * win_rate) as u32,
        }
    }

    fn result(metrics: BacktestMetrics, monthly_returns: Vec<MonthlyReturn>) -> BacktestResult {
        BacktestResult {
            id: Uuid::new_v4(),
            strategy_id: Uuid::new_v4(),
            window_start: Utc::now(),
            window_end: Utc::now(),
            metrics,
            monthly_returns,
            trade_log: vec![],
            rng_seed: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn realistic_backtest_passes() {
        let r = result(metrics(0.5, 30, 0.1), vec![MonthlyReturn { month: "2026-01".into(), return_pct: 8.0 }]);
        assert!(passes_realism_filter(&r));
    }

    #[test]
    fn too_few_trades_fails_the_filter() {
        let r = result(metrics(0.5, 3, 0.1), vec![]);
        assert!(!passes_realism_filter(&r));
    }

    #[test]
    fn extreme_monthly_return_fails_the_filter() {
        let r = result(metrics(0.5, 30, 0.1), vec![MonthlyReturn { month: "2026-01".into(), return_pct: 75.0 }]);
        assert!(!passes_realism_filter(&r));
    }

    #[test]
    fn win_rate_outside_band_fails_the_filter() {
        let r = result(metrics(0.95, 30, 0.1), vec![]);
        assert!(!passes_realism_filter(&r));
    }

    #[test]
    fn next_hour_rolls_to_tomorrow_once_past_it() {
        let now = Utc::now().date_naive().and_hms_opt(4, 0, 0).unwrap().and_utc();
        let next = next_hour_utc(now, 3);
        assert!(next > now);
        assert_eq!(next.hour(), 3);
    }
}
