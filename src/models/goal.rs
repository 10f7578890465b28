//! FinancialGoal and GoalProgress (spec §3, §4.7)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalType {
    MonthlyReturnPct,
    MonthlyProfitUsd,
    PortfolioTargetUsd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Behind,
    OnTrack,
    Ahead,
    Achieved,
}

impl GoalStatus {
    /// Derive status from a completion ratio (current / target), expressed
    /// as a percentage (100.0 == on target).
    pub fn from_progress_pct(progress_pct: f64) -> Self {
        if progress_pct >= 100.0 {
            GoalStatus::Achieved
        } else if progress_pct >= 90.0 {
            GoalStatus::Ahead
        } else if progress_pct >= 70.0 {
            GoalStatus::OnTrack
        } else {
            GoalStatus::Behind
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalActiveStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialGoal {
    pub id: Uuid,
    pub goal_type: GoalType,
    pub target_value: f64,
    pub priority: u32,
    pub status: GoalActiveStatus,
    pub created_at: DateTime<Utc>,
}

/// A realized-profit record (spec §4.10 `/goals/record-profit`), recorded
/// either by an operator or by the order executor on position close.
/// `monthly_profit_usd`'s "current" value is the sum of these over the
/// trailing 30 days — unlike `monthly_return_pct`, there is no return
/// series to derive it from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealizedProfitEntry {
    pub id: Uuid,
    pub amount_usd: f64,
    pub source: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalProgress {
    pub goal_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub current: f64,
    pub target: f64,
    pub progress_pct: f64,
    pub gap: f64,
    pub status: GoalStatus,
}

impl GoalProgress {
    pub fn compute(goal_id: Uuid, current: f64, target: f64) -> Self {
        let progress_pct = if target.abs() > f64::EPSILON {
            (current / target) * 100.0
        } else {
            0.0
        };
        Self {
            goal_id,
            timestamp: Utc::now(),
            current,
            target,
            progress_pct,
            gap: target - current,
            status: GoalStatus::from_progress_pct(progress_pct),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_status_bucket_per_range() {
        assert_eq!(GoalStatus::from_progress_pct(120.0), GoalStatus::Achieved);
        assert_eq!(GoalStatus::from_progress_pct(100.0), GoalStatus::Achieved);
        assert_eq!(GoalStatus::from_progress_pct(95.0), GoalStatus::Ahead);
        assert_eq!(GoalStatus::from_progress_pct(75.0), GoalStatus::OnTrack);
        assert_eq!(GoalStatus::from_progress_pct(50.0), GoalStatus::Behind);
    }
}
