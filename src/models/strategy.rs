//! Strategy and BacktestResult (spec §3, §4.6)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyStatus {
    Draft,
    Backtested,
    Paper,
    Active,
    Paused,
    Archived,
}

impl StrategyStatus {
    /// Valid edges per §3: `draft -> backtested -> paper -> active -> {paused, archived}`,
    /// plus `active <-> paused`. No transition may skip `backtested`.
    pub fn can_transition_to(self, next: StrategyStatus) -> bool {
        use StrategyStatus::*;
        matches!(
            (self, next),
            (Draft, Backtested)
                | (Draft, Archived)
                | (Backtested, Paper)
                | (Backtested, Archived)
                | (Paper, Active)
                | (Paper, Archived)
                | (Active, Paused)
                | (Active, Archived)
                | (Paused, Active)
                | (Paused, Archived)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskParams {
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub position_size_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub id: Uuid,
    pub name: String,
    pub strategy_type: String,
    pub symbol: String,
    pub interval: String,
    pub parameters: Value,
    pub entry_conditions: Value,
    pub exit_conditions: Value,
    pub risk_params: RiskParams,
    pub status: StrategyStatus,
    pub version: u32,
    pub parent_strategy_id: Option<Uuid>,
    pub generation: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Strategy {
    pub fn transition(&mut self, next: StrategyStatus) -> Result<(), String> {
        if !self.status.can_transition_to(next) {
            return Err(format!(
                "illegal strategy transition {:?} -> {:?} for {}",
                self.status, next, self.id
            ));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyReturn {
    pub month: String,
    pub return_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeLogEntry {
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub side: String,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    pub pnl: Decimal,
    pub won: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub total_return: f64,
    pub cagr: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub trade_count: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub id: Uuid,
    pub strategy_id: Uuid,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub metrics: BacktestMetrics,
    pub monthly_returns: Vec<MonthlyReturn>,
    pub trade_log: Vec<TradeLogEntry>,
    pub rng_seed: u64,
    pub created_at: DateTime<Utc>,
}

impl BacktestResult {
    /// §3 invariant: winning + losing == total, within floating tolerance.
    pub fn trade_counts_consistent(&self) -> bool {
        let sum = self.metrics.winning_trades + self.metrics.losing_trades;
        sum == self.metrics.trade_count
    }

    /// §4.6 "realism filter": discard candidates that look too good/implausible.
    pub fn passes_realism_filter(&self) -> bool {
        let m = &self.metrics;
        let monthly_ok = self
            .monthly_returns
            .iter()
            .all(|r| r.return_pct.abs() <= 50.0);
        monthly_ok
            && (0.2..=0.85).contains(&m.win_rate)
            && m.trade_count >= 10
            && m.max_drawdown <= 0.8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn make_strategy(status: StrategyStatus) -> Strategy {
        Strategy {
            id: Uuid::new_v4(),
            name: "test".into(),
            strategy_type: "momentum".into(),
            symbol: "BTCUSDT".into(),
            interval: "1h".into(),
            parameters: serde_json::json!({}),
            entry_conditions: serde_json::json!({}),
            exit_conditions: serde_json::json!({}),
            risk_params: RiskParams {
                stop_loss_pct: 0.02,
                take_profit_pct: 0.04,
                position_size_pct: 0.05,
            },
            status,
            version: 1,
            parent_strategy_id: None,
            generation: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn no_transition_skips_backtested() {
        let mut s = make_strategy(StrategyStatus::Draft);
        assert!(s.transition(StrategyStatus::Paper).is_err());
        assert!(s.transition(StrategyStatus::Active).is_err());
        assert!(s.transition(StrategyStatus::Backtested).is_ok());
    }

    #[test]
    fn active_paused_cycle_allowed() {
        let mut s = make_strategy(StrategyStatus::Active);
        assert!(s.transition(StrategyStatus::Paused).is_ok());
        assert!(s.transition(StrategyStatus::Active).is_ok());
    }

    #[test]
    fn realism_filter_rejects_too_few_trades() {
        let r = BacktestResult {
            id: Uuid::new_v4(),
            strategy_id: Uuid::new_v4(),
            window_start: Utc::now(),
            window_end: Utc::now(),
            metrics: BacktestMetrics {
                total_return: 0.1,
                cagr: 0.1,
                sharpe: 1.0,
                sortino: 1.0,
                max_drawdown: 0.1,
                win_rate: 0.55,
                profit_factor: 1.2,
                trade_count: 3,
                winning_trades: 2,
                losing_trades: 1,
            },
            monthly_returns: vec![],
            trade_log: vec![],
            rng_seed: 1,
            created_at: Utc::now(),
        };
        assert!(r.trade_counts_consistent());
        assert!(!r.passes_realism_filter());
    }
}
