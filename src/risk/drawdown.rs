//! Monthly peak / drawdown tracking (spec §4.7 "check_drawdown").
//! Adapted from the teacher's `DrawdownMonitor` (peak-tracking with a single
//! throttle threshold); generalized to the spec's two-tier limit (normal vs
//! protective) and three-tier escalation instead of one on/off throttle.

use chrono::{DateTime, Datelike, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawdownAction {
    PauseNew,
    ReducePositions,
    CloseAll,
}

#[derive(Debug, Clone)]
pub struct DrawdownVerdict {
    pub drawdown_pct: f64,
    pub limit_pct: f64,
    pub actions: Vec<DrawdownAction>,
}

impl DrawdownVerdict {
    pub fn breached(&self) -> bool {
        !self.actions.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct DrawdownTracker {
    peak: f64,
    current_month: u32,
    current_year: i32,
}

impl DrawdownTracker {
    pub fn new(initial_value: f64, now: DateTime<Utc>) -> Self {
        Self {
            peak: initial_value,
            current_month: now.month(),
            current_year: now.year(),
        }
    }

    /// Resets the peak at month boundaries, then evaluates the current
    /// drawdown against the normal/protective limit pair (spec §4.7).
    pub fn check(&mut self, portfolio_value: f64, portfolio_target: f64, now: DateTime<Utc>) -> DrawdownVerdict {
        if now.month() != self.current_month || now.year() != self.current_year {
            self.peak = portfolio_value;
            self.current_month = now.month();
            self.current_year = now.year();
        }
        if portfolio_value > self.peak {
            self.peak = portfolio_value;
        }

        let drawdown_pct = if self.peak > 0.0 { (self.peak - portfolio_value) / self.peak } else { 0.0 };

        let protective = portfolio_value > 0.9 * portfolio_target;
        let limit_pct = if protective { 0.02 } else { 0.05 };

        let ratio = if limit_pct > 0.0 { drawdown_pct / limit_pct } else { 0.0 };
        let actions = if ratio >= 2.0 {
            vec![DrawdownAction::CloseAll]
        } else if ratio >= 1.5 {
            vec![DrawdownAction::PauseNew, DrawdownAction::ReducePositions]
        } else if drawdown_pct >= limit_pct {
            vec![DrawdownAction::PauseNew]
        } else {
            vec![]
        };

        DrawdownVerdict { drawdown_pct, limit_pct, actions }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn e5_drawdown_escalation() {
        let now = Utc::now();
        let mut tracker = DrawdownTracker::new(100.0, now);
        let verdict = tracker.check(92.0, 500_000.0, now);
        assert!((verdict.drawdown_pct - 0.08).abs() < 1e-9);
        assert_eq!(verdict.actions, vec![DrawdownAction::PauseNew, DrawdownAction::ReducePositions]);

        let verdict2 = tracker.check(89.0, 500_000.0, now);
        assert_eq!(verdict2.actions, vec![DrawdownAction::CloseAll]);
    }

    #[test]
    fn protective_mode_tightens_the_limit_near_the_milestone() {
        let now = Utc::now();
        let mut tracker = DrawdownTracker::new(950_000.0, now);
        let verdict = tracker.check(930_000.0, 1_000_000.0, now);
        assert_eq!(verdict.limit_pct, 0.02);
        assert!(verdict.breached());
    }

    #[test]
    fn month_boundary_resets_the_peak() {
        let now = Utc::now();
        let mut tracker = DrawdownTracker::new(100.0, now);
        let _ = tracker.check(80.0, 500_000.0, now);
        let next_month = now + chrono::Duration::days(32);
        let verdict = tracker.check(80.0, 500_000.0, next_month);
        assert!(!verdict.breached());
    }
}
