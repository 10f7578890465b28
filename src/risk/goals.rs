//! Goal progress tracking and the two goal-derived scalars consumed
//! elsewhere: the *goal adjustment factor* (position sizing, §4.7) and the
//! *strategy adjustment factor* (activation scoring, §4.6/§4.7).

use crate::error::MasterTradeError;
use crate::fabric::Fabric;
use crate::models::goal::{GoalProgress, GoalStatus};
use crate::models::message::{MessageType, RawMessage};
use crate::persistence::Persistence;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    Aggressive,
    ModerateAggressive,
    Balanced,
    SlightConservative,
    Conservative,
}

/// §4.7 "Monthly-return progress vs target" bucket table, reused for the
/// monthly-income component.
fn progress_factor(progress_pct: f64) -> f64 {
    if progress_pct < 70.0 {
        1.3
    } else if progress_pct < 85.0 {
        1.15
    } else if progress_pct < 100.0 {
        1.0
    } else if progress_pct <= 110.0 {
        0.9
    } else {
        0.8
    }
}

/// Goal adjustment factor for `size_position` (spec §4.7), clamped to
/// `[0.5, 1.3]`. `portfolio_value_progress_pct` entering preservation mode
/// (`current > 0.9 * target`) pulls the blended factor down toward 0.5-0.7.
pub fn goal_adjustment_factor(
    monthly_return_progress_pct: f64,
    monthly_income_progress_pct: f64,
    portfolio_value_progress_pct: f64,
) -> f64 {
    let return_factor = progress_factor(monthly_return_progress_pct);
    let income_factor = progress_factor(monthly_income_progress_pct);
    let blended = (return_factor + income_factor) / 2.0;

    let factor = if portfolio_value_progress_pct > 90.0 {
        let preservation = 0.7 - 0.2 * ((portfolio_value_progress_pct - 90.0) / 10.0).clamp(0.0, 1.0);
        blended.min(preservation)
    } else {
        blended
    };

    factor.clamp(0.5, 1.3)
}

/// Strategy adjustment factor consumed by activation scoring (spec §4.7),
/// `[0.7, 1.3]` plus a qualitative stance derived from the same bucket.
pub fn strategy_adjustment_factor(
    monthly_return_progress_pct: f64,
    monthly_income_progress_pct: f64,
) -> (f64, Stance) {
    let avg_progress = (monthly_return_progress_pct + monthly_income_progress_pct) / 2.0;
    let (factor, stance) = if avg_progress < 70.0 {
        (1.3, Stance::Aggressive)
    } else if avg_progress < 85.0 {
        (1.15, Stance::ModerateAggressive)
    } else if avg_progress < 100.0 {
        (1.0, Stance::Balanced)
    } else if avg_progress <= 110.0 {
        (0.9, Stance::SlightConservative)
    } else {
        (0.7, Stance::Conservative)
    };
    (factor, stance)
}

/// Daily 23:59 UTC sub-task (spec §4.7): for each active goal, compute
/// current value and write a `GoalProgress` row; emit `goal.status_change`
/// when the status transitions.
pub async fn run_goal_snapshot(persistence: &Persistence, fabric: &Fabric) -> Result<(), MasterTradeError> {
    for goal_type in ["monthly_return_pct", "monthly_profit_usd", "portfolio_target_usd"] {
        let Some(goal) = persistence.relational.active_goal(goal_type).await? else {
            continue;
        };

        let since = chrono::Utc::now() - chrono::Duration::days(30);
        let current = match goal_type {
            "monthly_return_pct" => persistence
                .timeseries
                .daily_return_pct("BTCUSDT", since)
                .await
                .map(|rows| rows.iter().map(|(_, pct)| pct).sum::<f64>())
                .unwrap_or(0.0),
            "monthly_profit_usd" => {
                persistence.relational.sum_realized_profit_since(since).await.unwrap_or(0.0)
            }
            _ => persistence
                .relational
                .portfolio_value()
                .await
                .ok()
                .and_then(|v| rust_decimal::prelude::ToPrimitive::to_f64(&v))
                .unwrap_or(0.0),
        };

        let previous_status = persistence
            .cache
            .get(&format!("goal:{goal_type}:last_status"))
            .await
            .ok()
            .flatten();

        let progress = GoalProgress::compute(goal.id, current, goal.target_value);
        persistence.relational.insert_goal_progress(&progress).await?;

        let status_str = format!("{:?}", progress.status);
        if previous_status.as_deref() != Some(status_str.as_str()) {
            persistence
                .cache
                .set_ex(
                    &format!("goal:{goal_type}:last_status"),
                    &status_str,
                    std::time::Duration::from_secs(7 * 24 * 3600),
                )
                .await
                .ok();

            let payload = serde_json::json!({
                "goal_id": progress.goal_id,
                "goal_type": goal_type,
                "status": status_str,
                "progress_pct": progress.progress_pct,
            });
            let message = RawMessage::new(
                MessageType::SystemNotification,
                "risk-gate",
                "goal.status_change",
                payload,
            );
            if let Err(err) = fabric.publish("mastertrade.system", &message).await {
                warn!(error = %err, goal_type, "failed to publish goal.status_change");
            }
        }
    }
    Ok(())
}

/// Status bucket crossed into `Achieved` from anything else is a terminal
/// transition worth surfacing distinctly (used by the Control API's
/// `/goals/status` summary).
pub fn is_newly_achieved(previous: Option<GoalStatus>, current: GoalStatus) -> bool {
    current == GoalStatus::Achieved && previous != Some(GoalStatus::Achieved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn behind_progress_yields_max_factor() {
        assert_eq!(goal_adjustment_factor(50.0, 50.0, 10.0), 1.3);
    }

    #[test]
    fn ahead_progress_reduces_factor() {
        assert!(goal_adjustment_factor(105.0, 105.0, 10.0) < 1.0);
    }

    #[test]
    fn preservation_mode_caps_the_factor_near_the_milestone() {
        let factor = goal_adjustment_factor(50.0, 50.0, 95.0);
        assert!(factor <= 0.6);
    }

    #[test]
    fn strategy_factor_tracks_the_same_bucket_table() {
        let (factor, stance) = strategy_adjustment_factor(50.0, 50.0);
        assert_eq!(factor, 1.3);
        assert_eq!(stance, Stance::Aggressive);
    }
}
