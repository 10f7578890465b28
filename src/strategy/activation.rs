//! Activation loop (spec §4.6 "Activation loop").
//! Scores every non-archived strategy, applies the goal-based adjustment
//! factor, ranks, diffs against the currently active set under the
//! `strategy.activation` advisory lock, and enforces the 24h stability
//! rule.

use crate::models::strategy::{Strategy, StrategyStatus};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct ScoreComponents {
    pub performance: f64,
    pub backtest: f64,
    pub market_alignment: f64,
    pub risk_score: f64,
}

impl ScoreComponents {
    /// `overall = 0.50·performance + 0.25·backtest + 0.15·market_alignment + 0.10·risk_score`.
    pub fn overall(&self) -> f64 {
        0.50 * self.performance + 0.25 * self.backtest + 0.15 * self.market_alignment + 0.10 * self.risk_score
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ActivationTransition {
    Activate,
    Deactivate,
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct RankedStrategy {
    pub strategy_id: Uuid,
    pub overall: f64,
    pub adjusted: f64,
    pub currently_active: bool,
    pub last_transition_at: Option<DateTime<Utc>>,
    /// Adjusted score at the time of `last_transition_at`, used to let a
    /// large score swing override the 24h stability cooldown.
    pub score_at_last_transition: Option<f64>,
}

/// Pure diff step: given every non-archived strategy's adjusted score,
/// which are currently active, and when each last flipped, decide activate/
/// deactivate/unchanged honoring `max_active` and the 24h/15%-move
/// stability rule.
pub fn plan_activation(
    mut candidates: Vec<RankedStrategy>,
    max_active: u32,
    now: DateTime<Utc>,
) -> HashMap<Uuid, ActivationTransition> {
    candidates.sort_by(|a, b| b.adjusted.partial_cmp(&a.adjusted).unwrap_or(std::cmp::Ordering::Equal));

    let mut plan = HashMap::new();
    let mut activated_count = 0u32;

    for c in &candidates {
        let in_cooldown_window = c
            .last_transition_at
            .is_some_and(|t| now - t < chrono::Duration::hours(24));

        // Stability rule: the cooldown still yields if the score has moved
        // by more than 15% (relative) since the last transition.
        let moved_enough_to_override = c.score_at_last_transition.is_some_and(|prev| {
            if prev.abs() > f64::EPSILON {
                ((c.adjusted - prev) / prev).abs() > 0.15
            } else {
                c.adjusted.abs() > 0.15
            }
        });
        let within_cooldown = in_cooldown_window && !moved_enough_to_override;

        let should_be_active = activated_count < max_active;

        let transition = if should_be_active && !c.currently_active {
            if within_cooldown {
                ActivationTransition::Unchanged
            } else {
                ActivationTransition::Activate
            }
        } else if !should_be_active && c.currently_active {
            if within_cooldown {
                ActivationTransition::Unchanged
            } else {
                ActivationTransition::Deactivate
            }
        } else {
            ActivationTransition::Unchanged
        };

        if should_be_active && (c.currently_active || matches!(transition, ActivationTransition::Activate)) {
            activated_count += 1;
        }

        plan.insert(c.strategy_id, transition);
    }

    plan
}

/// Applies a planned transition to a strategy's status, returning `Err` if
/// the underlying state machine rejects the edge (e.g. a draft strategy
/// slipped into the candidate set).
///
/// `Activate` traverses the mandated three-step path one hop per cycle: a
/// `backtested` strategy moves to `paper` and waits there for the next
/// activation cycle to confirm it into `active`; a `paper` or `paused`
/// strategy (both of which already cleared `backtested` once) moves
/// straight to `active`. No deployment-specific atomic-skip variant is
/// implemented.
pub fn apply_transition(strategy: &mut Strategy, transition: ActivationTransition) -> Result<bool, String> {
    match transition {
        ActivationTransition::Activate => {
            let target = if strategy.status == StrategyStatus::Backtested { StrategyStatus::Paper } else { StrategyStatus::Active };
            strategy.transition(target)?;
            Ok(true)
        }
        ActivationTransition::Deactivate => {
            strategy.transition(StrategyStatus::Paused)?;
            Ok(true)
        }
        ActivationTransition::Unchanged => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked(id: Uuid, adjusted: f64, active: bool, last: Option<DateTime<Utc>>) -> RankedStrategy {
        RankedStrategy {
            strategy_id: id,
            overall: adjusted,
            adjusted,
            currently_active: active,
            last_transition_at: last,
            score_at_last_transition: None,
        }
    }

    #[test]
    fn e4_top_n_are_activated_and_rest_unchanged_or_deactivated() {
        let now = Utc::now();
        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        let candidates = vec![
            ranked(ids[0], 0.9, false, None),
            ranked(ids[1], 0.8, true, Some(now - chrono::Duration::hours(48))),
            ranked(ids[2], 0.7, true, Some(now - chrono::Duration::hours(48))),
            ranked(ids[3], 0.6, false, None),
            ranked(ids[4], 0.5, false, None),
        ];
        let plan = plan_activation(candidates, 2, now);
        assert!(matches!(plan[&ids[0]], ActivationTransition::Activate));
        assert!(matches!(plan[&ids[1]], ActivationTransition::Unchanged));
        assert!(matches!(plan[&ids[2]], ActivationTransition::Deactivate));
    }

    #[test]
    fn recently_flipped_strategies_are_protected_by_the_cooldown() {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let candidates = vec![ranked(id, 0.1, true, Some(now - chrono::Duration::hours(1)))];
        let plan = plan_activation(candidates, 0, now);
        assert!(matches!(plan[&id], ActivationTransition::Unchanged));
    }

    #[test]
    fn a_large_enough_score_swing_overrides_the_cooldown() {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let mut candidate = ranked(id, 0.1, true, Some(now - chrono::Duration::hours(1)));
        candidate.score_at_last_transition = Some(0.9);
        let plan = plan_activation(vec![candidate], 0, now);
        assert!(matches!(plan[&id], ActivationTransition::Deactivate));
    }

    fn draft_strategy(status: StrategyStatus) -> Strategy {
        let now = Utc::now();
        Strategy {
            id: Uuid::new_v4(),
            name: "t".into(),
            strategy_type: "momentum".into(),
            symbol: "BTCUSDT".into(),
            interval: "1h".into(),
            parameters: serde_json::json!({}),
            entry_conditions: serde_json::json!({}),
            exit_conditions: serde_json::json!({}),
            risk_params: crate::models::strategy::RiskParams {
                stop_loss_pct: 0.02,
                take_profit_pct: 0.04,
                position_size_pct: 0.05,
            },
            status,
            version: 1,
            parent_strategy_id: None,
            generation: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn activating_a_backtested_strategy_parks_it_in_paper_for_one_cycle() {
        let mut strategy = draft_strategy(StrategyStatus::Backtested);
        let changed = apply_transition(&mut strategy, ActivationTransition::Activate).unwrap();
        assert!(changed);
        assert_eq!(strategy.status, StrategyStatus::Paper);
    }

    #[test]
    fn activating_a_paper_strategy_confirms_it_into_active() {
        let mut strategy = draft_strategy(StrategyStatus::Paper);
        apply_transition(&mut strategy, ActivationTransition::Activate).unwrap();
        assert_eq!(strategy.status, StrategyStatus::Active);
    }

    #[test]
    fn activating_a_paused_strategy_goes_straight_back_to_active() {
        let mut strategy = draft_strategy(StrategyStatus::Paused);
        apply_transition(&mut strategy, ActivationTransition::Activate).unwrap();
        assert_eq!(strategy.status, StrategyStatus::Active);
    }
}
