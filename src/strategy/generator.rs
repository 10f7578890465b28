//! Candidate generation (spec §4.6, "Generation loop").
//! Scheduled daily 03:00 UTC. Produces draft candidates by crossover+
//! mutation over a seed pool of past `backtested` strategies and by
//! systematic parameter sweeps over known templates. RNG is seeded per
//! cycle so a given seed pool + seed always reproduces the same batch.

use crate::models::strategy::{RiskParams, Strategy, StrategyStatus};
use chrono::Utc;
use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use uuid::Uuid;

pub const CANDIDATES_PER_CYCLE: usize = 500;

const TEMPLATES: &[&str] = &["momentum", "mean_reversion", "breakout", "btc_correlation", "macd", "hybrid"];
const SYMBOLS: &[&str] = &["BTCUSDT", "ETHUSDT", "SOLUSDT"];
const INTERVALS: &[&str] = &["15m", "1h", "4h"];

pub struct Generator {
    rng: ChaCha8Rng,
}

impl Generator {
    pub fn new(seed: u64) -> Self {
        Self { rng: ChaCha8Rng::seed_from_u64(seed) }
    }

    fn random_risk_params(&mut self) -> RiskParams {
        RiskParams {
            stop_loss_pct: self.rng.gen_range(0.005..0.05),
            take_profit_pct: self.rng.gen_range(0.01..0.10),
            position_size_pct: self.rng.gen_range(0.01..0.10),
        }
    }

    fn sweep_candidate(&mut self, generation: u32) -> Strategy {
        let template = TEMPLATES[self.rng.gen_range(0..TEMPLATES.len())];
        let symbol = SYMBOLS[self.rng.gen_range(0..SYMBOLS.len())];
        let interval = INTERVALS[self.rng.gen_range(0..INTERVALS.len())];
        let now = Utc::now();

        Strategy {
            id: Uuid::new_v4(),
            name: format!("{template}-{symbol}-{interval}-{}", self.rng.gen_range(0..100_000)),
            strategy_type: template.to_string(),
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            parameters: serde_json::json!({
                "lookback": self.rng.gen_range(10..200),
                "threshold": self.rng.gen_range(0.01..0.5),
            }),
            entry_conditions: serde_json::json!({"template": template}),
            exit_conditions: serde_json::json!({"template": template}),
            risk_params: self.random_risk_params(),
            status: StrategyStatus::Draft,
            version: 1,
            parent_strategy_id: None,
            generation,
            created_at: now,
            updated_at: now,
        }
    }

    /// Crossover: blend two parents' numeric parameters, mutate slightly,
    /// inherit the fitter parent's template and symbol.
    fn crossover(&mut self, a: &Strategy, b: &Strategy, generation: u32) -> Strategy {
        let now = Utc::now();
        let mix = |x: f64, y: f64, rng: &mut ChaCha8Rng| -> f64 {
            let t = rng.gen_range(0.0..1.0);
            let blended = x * t + y * (1.0 - t);
            blended * rng.gen_range(0.95..1.05)
        };

        let risk_params = RiskParams {
            stop_loss_pct: mix(a.risk_params.stop_loss_pct, b.risk_params.stop_loss_pct, &mut self.rng),
            take_profit_pct: mix(a.risk_params.take_profit_pct, b.risk_params.take_profit_pct, &mut self.rng),
            position_size_pct: mix(
                a.risk_params.position_size_pct,
                b.risk_params.position_size_pct,
                &mut self.rng,
            ),
        };

        Strategy {
            id: Uuid::new_v4(),
            name: format!("cross-{}-{}", a.strategy_type, self.rng.gen_range(0..100_000)),
            strategy_type: a.strategy_type.clone(),
            symbol: a.symbol.clone(),
            interval: a.interval.clone(),
            parameters: a.parameters.clone(),
            entry_conditions: a.entry_conditions.clone(),
            exit_conditions: b.exit_conditions.clone(),
            risk_params,
            status: StrategyStatus::Draft,
            version: 1,
            parent_strategy_id: Some(a.id),
            generation,
            created_at: now,
            updated_at: now,
        }
    }

    /// Generate one cycle's batch. `seed_pool` is the most recent
    /// `backtested` generation to cross over from; `parent_max_generation`
    /// is the highest generation number seen across all strategies.
    pub fn generate_batch(&mut self, seed_pool: &[Strategy], parent_max_generation: u32) -> Vec<Strategy> {
        let generation = parent_max_generation + 1;
        let mut batch = Vec::with_capacity(CANDIDATES_PER_CYCLE);

        let crossover_count = if seed_pool.len() >= 2 { CANDIDATES_PER_CYCLE / 2 } else { 0 };
        for _ in 0..crossover_count {
            let i = self.rng.gen_range(0..seed_pool.len());
            let j = self.rng.gen_range(0..seed_pool.len());
            batch.push(self.crossover(&seed_pool[i], &seed_pool[j], generation));
        }

        while batch.len() < CANDIDATES_PER_CYCLE {
            batch.push(self.sweep_candidate(generation));
        }

        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_a_fixed_seed() {
        let mut gen_a = Generator::new(42);
        let mut gen_b = Generator::new(42);
        let batch_a = gen_a.generate_batch(&[], 0);
        let batch_b = gen_b.generate_batch(&[], 0);
        assert_eq!(batch_a.len(), CANDIDATES_PER_CYCLE);
        assert_eq!(batch_a[0].name, batch_b[0].name);
    }

    #[test]
    fn every_candidate_starts_in_draft_at_parent_generation_plus_one() {
        let mut gen = Generator::new(7);
        let batch = gen.generate_batch(&[], 3);
        assert!(batch.iter().all(|s| s.status == StrategyStatus::Draft && s.generation == 4));
    }
}
