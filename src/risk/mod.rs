//! Risk Gate (spec §4.7): the two primary operations, `size_position` and
//! `check_drawdown`, plus the goal-progress background task that feeds the
//! goal adjustment factor into both the activation scorer and the sizer.

pub mod drawdown;
pub mod goals;
pub mod sizing;

use crate::error::MasterTradeError;
use crate::fabric::Fabric;
use crate::models::alert::{Alert, AlertSeverity};
use crate::persistence::Persistence;
use crate::scheduler::{self, Scheduler};
use chrono::Utc;
use drawdown::{DrawdownTracker, DrawdownVerdict};
use rust_decimal::prelude::ToPrimitive;
use sizing::{PortfolioSnapshot, SizingDecision};
use std::sync::Mutex;
use tokio::time::{sleep, Duration as TokioDuration};
use tracing::{error, info, warn};

/// Ties the sizing, drawdown and goal sub-modules to the persistence/fabric
/// handles they need to read portfolio state and publish alerts.
pub struct RiskGate {
    persistence: Persistence,
    fabric: Fabric,
    scheduler: Scheduler,
    drawdown: Mutex<Option<DrawdownTracker>>,
}

impl RiskGate {
    pub fn new(persistence: Persistence, fabric: Fabric, scheduler: Scheduler) -> Self {
        Self { persistence, fabric, scheduler, drawdown: Mutex::new(None) }
    }

    /// spec §4.7 `size_position`.
    pub async fn size_position(
        &self,
        strategy: &crate::models::strategy::Strategy,
        symbol: &str,
    ) -> Result<SizingDecision, MasterTradeError> {
        let latest_price = self
            .persistence
            .timeseries
            .latest_close(symbol)
            .await?
            .unwrap_or(rust_decimal::Decimal::ZERO);

        let positions = self.persistence.relational.fetch_open_positions().await?;
        let total_value = self.persistence.relational.portfolio_value().await?;
        let portfolio = PortfolioSnapshot { total_value, positions };

        let goal_factor = self.current_goal_adjustment_factor().await;
        Ok(sizing::size_position(strategy, symbol, goal_factor, &portfolio, latest_price))
    }

    /// spec §4.7 `check_drawdown`. Persists and alerts at `critical` on any
    /// breach.
    pub async fn check_drawdown(&self) -> Result<DrawdownVerdict, MasterTradeError> {
        let now = Utc::now();
        let portfolio_value = self
            .persistence
            .relational
            .portfolio_value()
            .await?
            .to_f64()
            .unwrap_or(0.0);
        let portfolio_target = self
            .persistence
            .relational
            .active_goal("portfolio_target_usd")
            .await?
            .map(|g| g.target_value)
            .unwrap_or(1_000_000.0);

        let verdict = {
            let mut guard = self.drawdown.lock().unwrap();
            let tracker = guard.get_or_insert_with(|| DrawdownTracker::new(portfolio_value, now));
            tracker.check(portfolio_value, portfolio_target, now)
        };

        if verdict.breached() {
            let alert = Alert::new(
                "drawdown_breach",
                AlertSeverity::Critical,
                "Drawdown limit breached",
                format!(
                    "drawdown {:.2}% exceeds limit {:.2}%, actions: {:?}",
                    verdict.drawdown_pct * 100.0,
                    verdict.limit_pct * 100.0,
                    verdict.actions
                ),
            )
            .with_entity("portfolio", "default");

            if let Err(err) = self.persistence.relational.insert_alert(&alert).await {
                error!(error = %err, "failed to persist drawdown alert");
            }
            if let Err(err) = self.fabric.publish("mastertrade.risk", &alert_message(&alert)).await {
                warn!(error = %err, "failed to publish drawdown alert");
            }
        }

        Ok(verdict)
    }

    async fn current_goal_adjustment_factor(&self) -> f64 {
        let progress_of = |goal: Option<crate::models::goal::FinancialGoal>| async move {
            match goal {
                Some(g) => self.persistence.relational.latest_goal_progress_pct(g.id).await.ok().flatten().unwrap_or(0.0),
                None => 0.0,
            }
        };

        let return_goal = self.persistence.relational.active_goal("monthly_return_pct").await.ok().flatten();
        let income_goal = self.persistence.relational.active_goal("monthly_profit_usd").await.ok().flatten();
        let portfolio_goal = self.persistence.relational.active_goal("portfolio_target_usd").await.ok().flatten();

        let return_pct = progress_of(return_goal).await;
        let income_pct = progress_of(income_goal).await;
        let portfolio_pct = progress_of(portfolio_goal).await;

        goals::goal_adjustment_factor(return_pct, income_pct, portfolio_pct)
    }

    fn next_2359_utc(now: chrono::DateTime<Utc>) -> chrono::DateTime<Utc> {
        let today = now.date_naive().and_hms_opt(23, 59, 0).unwrap().and_utc();
        if today > now {
            today
        } else {
            (now + chrono::Duration::days(1)).date_naive().and_hms_opt(23, 59, 0).unwrap().and_utc()
        }
    }

    /// Background task: runs the daily 23:59 UTC goal snapshot until told to
    /// shut down. Gated by `Scheduler::try_claim` (spec §9) so only one
    /// replica records a snapshot per day even when several processes run
    /// this loop.
    pub async fn run_goal_snapshot_loop(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        if let Err(err) = self.scheduler.ensure_job(scheduler::GOAL_SNAPSHOT, Self::next_2359_utc(Utc::now())).await {
            error!(error = %err, "failed to seed goal snapshot schedule");
        }

        loop {
            let next = Self::next_2359_utc(Utc::now());
            let wait = (next - Utc::now()).to_std().unwrap_or(std::time::Duration::from_secs(60));

            tokio::select! {
                _ = sleep(TokioDuration::from_std(wait).unwrap_or(TokioDuration::from_secs(60))) => {
                    match self.scheduler.try_claim(scheduler::GOAL_SNAPSHOT, Utc::now(), Self::next_2359_utc(next)).await {
                        Ok(true) => {
                            if let Err(err) = goals::run_goal_snapshot(&self.persistence, &self.fabric).await {
                                error!(error = %err, "goal snapshot task failed");
                            } else {
                                info!("goal snapshot recorded");
                            }
                        }
                        Ok(false) => info!("goal snapshot tick claimed by another replica"),
                        Err(err) => error!(error = %err, "goal snapshot scheduler claim failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}

fn alert_message(alert: &Alert) -> crate::models::message::RawMessage {
    crate::models::message::RawMessage::new(
        crate::models::message::MessageType::RiskBreach,
        "risk-gate",
        "risk.breach.drawdown",
        serde_json::json!({
            "alert_id": alert.id,
            "severity": "critical",
            "title": alert.title,
            "message": alert.message,
        }),
    )
}
