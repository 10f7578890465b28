//! `size_position` (spec §4.7): goal-adaptive position sizing plus the
//! portfolio exposure guardrails that gate a signal before it reaches the
//! executor.

use crate::models::order::Position;
use crate::models::strategy::Strategy;
use rust_decimal::Decimal;
use uuid::Uuid;

pub const PER_SYMBOL_CAP_PCT: f64 = 0.15;
pub const PER_STRATEGY_CAP_PCT: f64 = 0.15;
pub const CORRELATED_CLUSTER_CAP_PCT: f64 = 0.40;

/// Coarse correlation clustering: same base asset family trades together.
/// Adequate for the cap check without a full covariance matrix.
fn cluster_of(symbol: &str) -> &'static str {
    if symbol.starts_with("BTC") {
        "btc"
    } else if symbol.starts_with("ETH") {
        "eth"
    } else {
        "alt"
    }
}

#[derive(Debug, Clone)]
pub struct PortfolioSnapshot {
    pub total_value: Decimal,
    pub positions: Vec<Position>,
}

impl PortfolioSnapshot {
    fn exposure_pct(&self, predicate: impl Fn(&Position) -> bool) -> f64 {
        if self.total_value.is_zero() {
            return 0.0;
        }
        let exposed: Decimal = self
            .positions
            .iter()
            .filter(|p| predicate(p))
            .map(|p| (p.quantity * p.current_price).abs())
            .sum();
        (exposed / self.total_value).to_string().parse().unwrap_or(0.0)
    }

    fn symbol_exposure_pct(&self, symbol: &str) -> f64 {
        self.exposure_pct(|p| p.symbol == symbol)
    }

    fn strategy_exposure_pct(&self, strategy_id: Uuid) -> f64 {
        self.exposure_pct(|p| p.strategy_id == strategy_id)
    }

    fn cluster_exposure_pct(&self, symbol: &str) -> f64 {
        let cluster = cluster_of(symbol);
        self.exposure_pct(|p| cluster_of(&p.symbol) == cluster)
    }
}

#[derive(Debug, Clone)]
pub struct SizingDecision {
    pub approved: bool,
    pub quantity: Decimal,
    pub reason: String,
}

/// `size_position(strategy, symbol, goal_factor, portfolio, latest_price)`.
/// `goal_factor` is the output of [`super::goals::goal_adjustment_factor`].
pub fn size_position(
    strategy: &Strategy,
    symbol: &str,
    goal_factor: f64,
    portfolio: &PortfolioSnapshot,
    latest_price: Decimal,
) -> SizingDecision {
    if latest_price <= Decimal::ZERO {
        return SizingDecision { approved: false, quantity: Decimal::ZERO, reason: "no ticker price".into() };
    }

    let base_size_pct = strategy.risk_params.position_size_pct;
    let adjusted_pct = (base_size_pct * goal_factor).max(0.0);
    let notional = portfolio.total_value * Decimal::try_from(adjusted_pct).unwrap_or(Decimal::ZERO);

    let symbol_after = portfolio.symbol_exposure_pct(symbol) + adjusted_pct;
    if symbol_after > PER_SYMBOL_CAP_PCT {
        return SizingDecision {
            approved: false,
            quantity: Decimal::ZERO,
            reason: format!("per-symbol cap exceeded: {symbol_after:.3} > {PER_SYMBOL_CAP_PCT}"),
        };
    }

    let strategy_after = portfolio.strategy_exposure_pct(strategy.id) + adjusted_pct;
    if strategy_after > PER_STRATEGY_CAP_PCT {
        return SizingDecision {
            approved: false,
            quantity: Decimal::ZERO,
            reason: format!("per-strategy cap exceeded: {strategy_after:.3} > {PER_STRATEGY_CAP_PCT}"),
        };
    }

    let cluster_after = portfolio.cluster_exposure_pct(symbol) + adjusted_pct;
    if cluster_after > CORRELATED_CLUSTER_CAP_PCT {
        return SizingDecision {
            approved: false,
            quantity: Decimal::ZERO,
            reason: format!("correlated-cluster cap exceeded: {cluster_after:.3} > {CORRELATED_CLUSTER_CAP_PCT}"),
        };
    }

    let quantity = notional / latest_price;
    SizingDecision { approved: true, quantity, reason: "approved".into() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::order::OrderEnvironment;
    use crate::models::strategy::{RiskParams, StrategyStatus};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn strategy() -> Strategy {
        Strategy {
            id: Uuid::new_v4(),
            name: "t".into(),
            strategy_type: "momentum".into(),
            symbol: "BTCUSDT".into(),
            interval: "1h".into(),
            parameters: serde_json::json!({}),
            entry_conditions: serde_json::json!({}),
            exit_conditions: serde_json::json!({}),
            risk_params: RiskParams { stop_loss_pct: 0.02, take_profit_pct: 0.04, position_size_pct: 0.05 },
            status: StrategyStatus::Active,
            version: 1,
            parent_strategy_id: None,
            generation: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn approves_within_caps() {
        let portfolio = PortfolioSnapshot { total_value: dec!(100_000), positions: vec![] };
        let decision = size_position(&strategy(), "BTCUSDT", 1.0, &portfolio, dec!(50_000));
        assert!(decision.approved);
        assert!(decision.quantity > Decimal::ZERO);
    }

    #[test]
    fn rejects_when_symbol_cap_already_saturated() {
        let existing = Position {
            strategy_id: Uuid::new_v4(),
            symbol: "BTCUSDT".into(),
            environment: OrderEnvironment::Paper,
            quantity: dec!(2),
            entry_price: dec!(50_000),
            current_price: dec!(50_000),
            stop_loss: None,
            take_profit: None,
            opened_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let portfolio = PortfolioSnapshot { total_value: dec!(100_000), positions: vec![existing] };
        let decision = size_position(&strategy(), "BTCUSDT", 1.3, &portfolio, dec!(50_000));
        assert!(!decision.approved);
    }
}
