use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

struct StrategyRecord {
    outcomes: VecDeque<(bool, Decimal)>,
}

impl StrategyRecord {
    fn new() -> Self {
        Self { outcomes: VecDeque::new() }
    }
}

/// Auto-disables a strategy that keeps losing: once it has at least
/// `min_trades` outcomes in its trailing `window` and both its win rate and
/// profit factor are below threshold, it's benched for `disable_minutes`.
pub struct Guardrails {
    records: HashMap<String, StrategyRecord>,
    disabled_until: HashMap<String, DateTime<Utc>>,
}

impl Guardrails {
    pub fn new() -> Self {
        Self { records: HashMap::new(), disabled_until: HashMap::new() }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &mut self,
        strategy: &str,
        won: bool,
        pnl: Decimal,
        window: usize,
        min_trades: usize,
        disable_minutes: i64,
        min_win_rate: f64,
        min_profit_factor: f64,
    ) {
        let record = self.records.entry(strategy.to_string()).or_insert_with(StrategyRecord::new);
        record.outcomes.push_back((won, pnl));
        while record.outcomes.len() > window {
            record.outcomes.pop_front();
        }

        if record.outcomes.len() < min_trades {
            return;
        }

        let wins = record.outcomes.iter().filter(|(w, _)| *w).count();
        let win_rate = wins as f64 / record.outcomes.len() as f64;
        let gross_win: Decimal = record.outcomes.iter().filter(|(w, _)| *w).map(|(_, p)| *p).sum();
        let gross_loss: Decimal = record.outcomes.iter().filter(|(w, _)| !*w).map(|(_, p)| p.abs()).sum();
        let profit_factor = if gross_loss.is_zero() {
            f64::INFINITY
        } else {
            (gross_win / gross_loss).to_f64().unwrap_or(0.0)
        };

        if win_rate < min_win_rate && profit_factor < min_profit_factor {
            self.disabled_until
                .insert(strategy.to_string(), Utc::now() + Duration::minutes(disable_minutes));
        }
    }

    /// Auto re-enables once the ban has expired; no explicit unlatch needed.
    pub fn is_disabled(&self, strategy: &str) -> bool {
        self.disabled_until.get(strategy).map(|until| Utc::now() < *until).unwrap_or(false)
    }
}

impl Default for Guardrails {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn stays_enabled_below_the_minimum_trade_count() {
        let mut guardrails = Guardrails::new();
        for _ in 0..5 {
            guardrails.record("trend", false, dec!(-10), 20, 10, 120, 0.35, 0.85);
        }
        assert!(!guardrails.is_disabled("trend"));
    }

    #[test]
    fn disables_a_strategy_with_poor_win_rate_and_profit_factor() {
        let mut guardrails = Guardrails::new();
        for _ in 0..12 {
            guardrails.record("mean_reversion", false, dec!(-10), 20, 10, 120, 0.35, 0.85);
        }
        assert!(guardrails.is_disabled("mean_reversion"));
    }

    #[test]
    fn a_strong_profit_factor_keeps_a_low_win_rate_strategy_enabled() {
        let mut guardrails = Guardrails::new();
        for i in 0..12 {
            let won = i % 4 == 0; // 25% win rate
            let pnl = if won { dec!(100) } else { dec!(-5) };
            guardrails.record("reversal", won, pnl, 20, 10, 120, 0.35, 0.85);
        }
        assert!(!guardrails.is_disabled("reversal"));
    }
}
