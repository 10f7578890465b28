//! Deterministic backtest engine (spec §4.6, "Backtest loop").
//! Replays OHLCV bars at the strategy's interval over a fixed window and
//! computes the full `BacktestMetrics` set. Pure given `(strategy, bars,
//! rng_seed)` so the same triple always reproduces the same result —
//! determinism is required for the realism filter to behave consistently
//! across reruns.

use crate::models::strategy::{BacktestMetrics, BacktestResult, MonthlyReturn, Strategy, TradeLogEntry};
use crate::persistence::timeseries::OhlcvPoint;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use rayon::ThreadPool;
use rust_decimal::Decimal;
use statrs::statistics::Statistics;
use uuid::Uuid;

pub const DEFAULT_WINDOW_DAYS: i64 = 90;

/// Replay `bars` (oldest first) against `strategy`'s template, producing a
/// trade log. The template dictates the entry signal; stop-loss/take-profit
/// from `risk_params` govern the exit.
fn simulate_trades(strategy: &Strategy, bars: &[OhlcvPoint], rng_seed: u64) -> Vec<TradeLogEntry> {
    use rand::Rng;
    let mut rng = ChaCha8Rng::seed_from_u64(rng_seed);
    let lookback = strategy
        .parameters
        .get("lookback")
        .and_then(|v| v.as_u64())
        .unwrap_or(20) as usize;
    let threshold = strategy
        .parameters
        .get("threshold")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.02);

    let mut trades = Vec::new();
    if bars.len() <= lookback + 1 {
        return trades;
    }

    let mut i = lookback;
    while i < bars.len() - 1 {
        let window = &bars[i - lookback..i];
        let closes: Vec<f64> = window
            .iter()
            .map(|b| b.close.to_string().parse::<f64>().unwrap_or(0.0))
            .collect();
        let sma = closes.clone().mean();
        let current_close = bars[i].close.to_string().parse::<f64>().unwrap_or(0.0);

        let entry_signal = match strategy.strategy_type.as_str() {
            "mean_reversion" => current_close < sma * (1.0 - threshold),
            "breakout" => {
                let max = closes.iter().cloned().fold(f64::MIN, f64::max);
                current_close > max * (1.0 + threshold)
            }
            _ => current_close > sma * (1.0 + threshold), // momentum, macd, hybrid, btc_correlation
        };

        if !entry_signal {
            i += 1;
            continue;
        }

        // Simulated execution slippage, deterministic for a fixed seed.
        let slippage_bps = rng.gen_range(-5..=5) as f64 / 10_000.0;
        let entry_price = bars[i].close * Decimal::try_from(1.0 + slippage_bps).unwrap_or(Decimal::ONE);
        let entry_ts = bars[i].ts;
        let stop = entry_price * Decimal::try_from(1.0 - strategy.risk_params.stop_loss_pct).unwrap_or(Decimal::ONE);
        let target =
            entry_price * Decimal::try_from(1.0 + strategy.risk_params.take_profit_pct).unwrap_or(Decimal::ONE);

        let mut exit_idx = bars.len() - 1;
        for (offset, bar) in bars.iter().enumerate().skip(i + 1) {
            if bar.low <= stop || bar.high >= target {
                exit_idx = offset;
                break;
            }
        }
        let exit_price = bars[exit_idx].close;
        let exit_ts = bars[exit_idx].ts;
        let quantity = Decimal::ONE;
        let pnl = (exit_price - entry_price) * quantity;

        trades.push(TradeLogEntry {
            opened_at: entry_ts,
            closed_at: exit_ts,
            side: "buy".to_string(),
            entry_price,
            exit_price,
            quantity,
            pnl,
            won: pnl > Decimal::ZERO,
        });

        i = exit_idx + 1;
    }

    trades
}

fn monthly_returns(trades: &[TradeLogEntry]) -> Vec<MonthlyReturn> {
    use std::collections::BTreeMap;
    let mut by_month: BTreeMap<String, f64> = BTreeMap::new();
    for t in trades {
        let key = t.closed_at.format("%Y-%m").to_string();
        let pct = (t.pnl / t.entry_price.max(Decimal::ONE)).to_string().parse::<f64>().unwrap_or(0.0) * 100.0;
        *by_month.entry(key).or_insert(0.0) += pct;
    }
    by_month
        .into_iter()
        .map(|(month, return_pct)| MonthlyReturn { month, return_pct })
        .collect()
}

fn compute_metrics(trades: &[TradeLogEntry]) -> BacktestMetrics {
    if trades.is_empty() {
        return BacktestMetrics {
            total_return: 0.0,
            cagr: 0.0,
            sharpe: 0.0,
            sortino: 0.0,
            max_drawdown: 0.0,
            win_rate: 0.0,
            profit_factor: 0.0,
            trade_count: 0,
            winning_trades: 0,
            losing_trades: 0,
        };
    }

    let returns: Vec<f64> = trades
        .iter()
        .map(|t| (t.pnl / t.entry_price.max(Decimal::ONE)).to_string().parse::<f64>().unwrap_or(0.0))
        .collect();

    let total_return: f64 = returns.iter().sum();
    let mean = returns.clone().mean();
    let std_dev = returns.clone().std_dev();
    let sharpe = if std_dev > 0.0 { mean / std_dev * (252.0_f64).sqrt() } else { 0.0 };

    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    let downside_dev = if downside.is_empty() { 0.0 } else { downside.clone().std_dev() };
    let sortino = if downside_dev > 0.0 { mean / downside_dev * (252.0_f64).sqrt() } else { 0.0 };

    let mut equity = 1.0;
    let mut peak = 1.0;
    let mut max_drawdown = 0.0;
    for r in &returns {
        equity *= 1.0 + r;
        peak = peak.max(equity);
        let dd = (peak - equity) / peak;
        max_drawdown = max_drawdown.max(dd);
    }

    let winning_trades = trades.iter().filter(|t| t.won).count() as u32;
    let losing_trades = trades.len() as u32 - winning_trades;
    let win_rate = winning_trades as f64 / trades.len() as f64;

    let gross_profit: f64 = returns.iter().copied().filter(|r| *r > 0.0).sum();
    let gross_loss: f64 = returns.iter().copied().filter(|r| *r < 0.0).map(f64::abs).sum();
    let profit_factor = if gross_loss > 0.0 { gross_profit / gross_loss } else { gross_profit.max(1.0) };

    let cagr = total_return * (365.0 / DEFAULT_WINDOW_DAYS as f64);

    BacktestMetrics {
        total_return,
        cagr,
        sharpe,
        sortino,
        max_drawdown,
        win_rate,
        profit_factor,
        trade_count: trades.len() as u32,
        winning_trades,
        losing_trades,
    }
}

pub fn run_backtest(strategy: &Strategy, bars: &[OhlcvPoint], rng_seed: u64) -> BacktestResult {
    let trades = simulate_trades(strategy, bars, rng_seed);
    let metrics = compute_metrics(&trades);
    let monthly_returns = monthly_returns(&trades);

    BacktestResult {
        id: Uuid::new_v4(),
        strategy_id: strategy.id,
        window_start: bars.first().map(|b| b.ts).unwrap_or_else(chrono::Utc::now),
        window_end: bars.last().map(|b| b.ts).unwrap_or_else(chrono::Utc::now),
        metrics,
        monthly_returns,
        trade_log: trades,
        rng_seed,
        created_at: chrono::Utc::now(),
    }
}

/// Bounded-parallelism runner (spec §4.6 "N workers, default min(cpu_count, 8)").
pub struct BacktestRunner {
    pool: ThreadPool,
}

impl BacktestRunner {
    pub fn new(worker_count: usize) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_count.max(1))
            .build()
            .expect("rayon thread pool");
        Self { pool }
    }

    pub fn run_batch(
        &self,
        jobs: Vec<(Strategy, Vec<OhlcvPoint>, u64)>,
    ) -> Vec<(Uuid, BacktestResult)> {
        self.pool.install(|| {
            jobs.into_par_iter()
                .map(|(strategy, bars, seed)| {
                    let id = strategy.id;
                    (id, run_backtest(&strategy, &bars, seed))
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn bar(ts_offset: i64, close: Decimal, high: Decimal, low: Decimal) -> OhlcvPoint {
        OhlcvPoint {
            symbol: "BTCUSDT".into(),
            interval: "1h".into(),
            ts: Utc::now() + chrono::Duration::hours(ts_offset),
            open: close,
            high,
            low,
            close,
            volume: dec!(100),
        }
    }

    fn momentum_strategy() -> Strategy {
        Strategy {
            id: Uuid::new_v4(),
            name: "t".into(),
            strategy_type: "momentum".into(),
            symbol: "BTCUSDT".into(),
            interval: "1h".into(),
            parameters: serde_json::json!({"lookback": 5, "threshold": 0.01}),
            entry_conditions: serde_json::json!({}),
            exit_conditions: serde_json::json!({}),
            risk_params: crate::models::strategy::RiskParams {
                stop_loss_pct: 0.02,
                take_profit_pct: 0.04,
                position_size_pct: 0.05,
            },
            status: crate::models::strategy::StrategyStatus::Draft,
            version: 1,
            parent_strategy_id: None,
            generation: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn same_seed_and_bars_reproduce_identical_metrics() {
        let strategy = momentum_strategy();
        let mut bars = Vec::new();
        let mut price = dec!(100);
        for i in 0..60 {
            price += dec!(1);
            bars.push(bar(i, price, price + dec!(2), price - dec!(2)));
        }
        let a = run_backtest(&strategy, &bars, 7);
        let b = run_backtest(&strategy, &bars, 7);
        assert_eq!(a.metrics.trade_count, b.metrics.trade_count);
        assert_eq!(a.metrics.total_return, b.metrics.total_return);
    }

    #[test]
    fn trade_counts_are_internally_consistent() {
        let strategy = momentum_strategy();
        let mut bars = Vec::new();
        let mut price = dec!(100);
        for i in 0..200 {
            price += if i % 3 == 0 { dec!(3) } else { dec!(-1) };
            bars.push(bar(i, price, price + dec!(2), price - dec!(2)));
        }
        let result = run_backtest(&strategy, &bars, 11);
        assert!(result.trade_counts_consistent());
    }
}
