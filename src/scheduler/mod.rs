//! Durable cron facility (spec §9 "Scheduler"): DB-row leader election over
//! a `scheduled_jobs` table so exactly one replica runs the daily
//! generation/goal-snapshot and 4-hourly activation jobs even when several
//! processes race the same wall-clock tick. Grounded on
//! `persistence::relational`'s one-accessor-per-query shape; the claim
//! itself has no teacher analog and is new per `SPEC_FULL.md` §10.5.

use crate::error::MasterTradeError;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Job names for the cron-scheduled cycles named in spec §9. The
/// continuously-draining backtest loop is intentionally absent — it has no
/// fixed tick to race, so it needs no leader election.
pub const STRATEGY_GENERATION: &str = "strategy_generation";
pub const STRATEGY_ACTIVATION: &str = "strategy_activation";
/// Separate row for the drain-triggered "activate right after a backtest
/// drain" path (spec §4.6). Kept apart from `STRATEGY_ACTIVATION` so a
/// drain-triggered claim is never rejected by the periodic job's 4-hour
/// `next_run_at` window — it has its own always-due-now claim instead.
pub const STRATEGY_ACTIVATION_DRAIN: &str = "strategy_activation_drain";
pub const GOAL_SNAPSHOT: &str = "goal_snapshot";

#[derive(Clone)]
pub struct Scheduler {
    pool: PgPool,
}

impl Scheduler {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Seeds `job_name`'s row on first sight. A no-op on every later boot
    /// (and on every other replica's boot), so the job's `next_run_at`
    /// always reflects the last successful claim, not a process's restart.
    pub async fn ensure_job(&self, job_name: &str, first_run: DateTime<Utc>) -> Result<(), MasterTradeError> {
        sqlx::query(
            "INSERT INTO scheduled_jobs (job_name, next_run_at) VALUES ($1, $2)
             ON CONFLICT (job_name) DO NOTHING",
        )
        .bind(job_name)
        .bind(first_run)
        .execute(&self.pool)
        .await
        .map_err(|e| MasterTradeError::InfrastructureStore {
            what: format!("seed scheduled job {job_name}"),
            source: e.into(),
        })?;
        Ok(())
    }

    /// Claims `job_name` for this tick iff its `next_run_at` is due and no
    /// other replica currently holds the row's lock. `FOR UPDATE SKIP
    /// LOCKED` is what makes two replicas racing the same timer resolve
    /// without either blocking: the loser sees zero rows instead of
    /// waiting on the winner's transaction. On a successful claim,
    /// `next_run_at` is advanced to `next_run` inside the same transaction,
    /// so the job will not be claimable again until its next natural tick.
    pub async fn try_claim(
        &self,
        job_name: &str,
        due_by: DateTime<Utc>,
        next_run: DateTime<Utc>,
    ) -> Result<bool, MasterTradeError> {
        let mut tx = self.pool.begin().await.map_err(|e| MasterTradeError::InfrastructureStore {
            what: "begin scheduler claim".into(),
            source: e.into(),
        })?;

        let claimed: Option<String> = sqlx::query_scalar(
            "SELECT job_name FROM scheduled_jobs
             WHERE job_name = $1 AND next_run_at <= $2
             FOR UPDATE SKIP LOCKED",
        )
        .bind(job_name)
        .bind(due_by)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| MasterTradeError::InfrastructureStore {
            what: format!("claim scheduled job {job_name}"),
            source: e.into(),
        })?;

        if claimed.is_none() {
            let _ = tx.rollback().await;
            return Ok(false);
        }

        sqlx::query("UPDATE scheduled_jobs SET next_run_at = $1, last_run_at = now() WHERE job_name = $2")
            .bind(next_run)
            .bind(job_name)
            .execute(&mut *tx)
            .await
            .map_err(|e| MasterTradeError::InfrastructureStore {
                what: format!("advance scheduled job {job_name}"),
                source: e.into(),
            })?;

        tx.commit().await.map_err(|e| MasterTradeError::InfrastructureStore {
            what: "commit scheduler claim".into(),
            source: e.into(),
        })?;

        Ok(true)
    }
}
