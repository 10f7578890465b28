//! Score subcomponents feeding `ScoreComponents::overall` (spec §4.6 step 1).
//! Each subcomponent is clamped to `[0,1]` so the weighted blend can never
//! leave that range regardless of how noisy the inputs are.

use crate::models::order::Position;
use crate::models::strategy::{BacktestMetrics, Strategy};
use crate::persistence::timeseries::OhlcvPoint;
use rust_decimal::prelude::ToPrimitive;

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Backtest subcomponent: a blend of risk-adjusted return (Sharpe), hit
/// rate, and a drawdown penalty. Strategies with no backtest yet score 0
/// outright — they have nothing to rank on.
pub fn backtest_score(metrics: Option<&BacktestMetrics>) -> f64 {
    let Some(m) = metrics else { return 0.0 };
    let sharpe_component = clamp01(0.5 + m.sharpe / 6.0);
    let win_rate_component = clamp01(m.win_rate);
    let drawdown_component = clamp01(1.0 - m.max_drawdown);
    clamp01(0.4 * sharpe_component + 0.3 * win_rate_component + 0.3 * drawdown_component)
}

/// Live-performance subcomponent: unrealized PnL% averaged across the
/// strategy's open positions. A strategy with no open positions yet (not
/// active, or active with no fills) gets the neutral midpoint rather than
/// being penalized for having no live track record.
pub fn performance_score(positions: &[Position]) -> f64 {
    if positions.is_empty() {
        return 0.5;
    }
    let avg_pnl_pct: f64 =
        positions.iter().map(|p| p.unrealized_pnl_pct().to_f64().unwrap_or(0.0)).sum::<f64>() / positions.len() as f64;
    // +/-20% unrealized swings saturate the score; most positions live well
    // inside that band under the sizing caps in `risk::sizing`.
    clamp01(0.5 + avg_pnl_pct / 40.0)
}

/// Market-alignment subcomponent: does the strategy's directional bias
/// agree with the symbol's recent trend? Momentum/breakout templates want
/// a trending market; mean-reversion wants a range. Neutral when there is
/// not enough history to judge.
pub fn market_alignment_score(strategy: &Strategy, recent_bars: &[OhlcvPoint]) -> f64 {
    if recent_bars.len() < 2 {
        return 0.5;
    }
    let first = recent_bars.first().unwrap().close.to_f64().unwrap_or(0.0);
    let last = recent_bars.last().unwrap().close.to_f64().unwrap_or(0.0);
    if first <= 0.0 {
        return 0.5;
    }
    let trend_pct = (last - first) / first;
    let trend_strength = clamp01(0.5 + trend_pct.abs() / 0.10);

    let wants_trend = matches!(strategy.strategy_type.as_str(), "momentum" | "breakout" | "macd" | "hybrid");
    if wants_trend {
        trend_strength
    } else {
        1.0 - trend_strength // mean_reversion, btc_correlation reward a range-bound market
    }
}

/// Risk subcomponent: rewards tighter stops and smaller position sizing,
/// since a strategy that risks less per trade is cheaper to keep active
/// while it proves itself.
pub fn risk_score(strategy: &Strategy) -> f64 {
    let stop_component = clamp01(1.0 - strategy.risk_params.stop_loss_pct / 0.05);
    let size_component = clamp01(1.0 - strategy.risk_params.position_size_pct / 0.10);
    clamp01(0.5 * stop_component + 0.5 * size_component)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn missing_backtest_scores_zero() {
        assert_eq!(backtest_score(None), 0.0);
    }

    #[test]
    fn strong_sharpe_and_high_win_rate_score_well() {
        let metrics = BacktestMetrics {
            total_return: 0.5,
            cagr: 1.0,
            sharpe: 2.0,
            sortino: 2.0,
            max_drawdown: 0.05,
            win_rate: 0.6,
            profit_factor: 2.0,
            trade_count: 50,
            winning_trades: 30,
            losing_trades: 20,
        };
        assert!(backtest_score(Some(&metrics)) > 0.7);
    }

    #[test]
    fn no_positions_is_neutral_performance() {
        assert_eq!(performance_score(&[]), 0.5);
    }

    fn position(pnl_pct_numerator: i64) -> Position {
        Position {
            strategy_id: uuid::Uuid::new_v4(),
            symbol: "BTCUSDT".into(),
            environment: crate::models::order::OrderEnvironment::Paper,
            quantity: dec!(1),
            entry_price: dec!(100),
            current_price: dec!(100) + rust_decimal::Decimal::new(pnl_pct_numerator, 0),
            stop_loss: None,
            take_profit: None,
            opened_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn profitable_positions_score_above_neutral() {
        assert!(performance_score(&[position(10)]) > 0.5);
    }

    fn strategy_with_risk(risk_params: crate::models::strategy::RiskParams) -> Strategy {
        let now = Utc::now();
        Strategy {
            id: uuid::Uuid::new_v4(),
            name: "t".into(),
            strategy_type: "momentum".into(),
            symbol: "BTCUSDT".into(),
            interval: "1h".into(),
            parameters: serde_json::json!({}),
            entry_conditions: serde_json::json!({}),
            exit_conditions: serde_json::json!({}),
            risk_params,
            status: crate::models::strategy::StrategyStatus::Draft,
            version: 1,
            parent_strategy_id: None,
            generation: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn tighter_risk_params_score_higher() {
        let tight = crate::models::strategy::RiskParams {
            stop_loss_pct: 0.01,
            take_profit_pct: 0.02,
            position_size_pct: 0.02,
        };
        let loose = crate::models::strategy::RiskParams {
            stop_loss_pct: 0.05,
            take_profit_pct: 0.10,
            position_size_pct: 0.10,
        };
        assert!(risk_score(&strategy_with_risk(tight)) > risk_score(&strategy_with_risk(loose)));
    }
}
