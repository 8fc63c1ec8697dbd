use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{Pair, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
    Neutral,
}

impl Direction {
    pub fn side(&self) -> Option<Side> {
        match self {
            Direction::Long => Some(Side::Buy),
            Direction::Short => Some(Side::Sell),
            Direction::Neutral => None,
        }
    }

    pub fn is_actionable(&self) -> bool {
        !matches!(self, Direction::Neutral)
    }

    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
            Direction::Neutral => Direction::Neutral,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendRegime {
    Trend,
    Range,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolRegime {
    Low,
    Mid,
    High,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Regime {
    pub trend: TrendRegime,
    pub vol: VolRegime,
    pub vol_level: f64,
    pub vol_expanding: bool,
}

/// Output of a single strategy's `evaluate` call. Strategies always produce
/// one of these — a neutral signal is the inactionable base case, not the
/// absence of a signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySignal {
    pub strategy: String,
    pub direction: Direction,
    pub strength: Decimal,
    pub confidence: Decimal,
    pub entry_hint: Option<Decimal>,
    pub sl_hint: Option<Decimal>,
    pub tp_hint: Option<Decimal>,
    pub metadata: HashMap<String, String>,
}

impl StrategySignal {
    pub fn neutral(strategy: &str) -> Self {
        Self {
            strategy: strategy.to_string(),
            direction: Direction::Neutral,
            strength: Decimal::ZERO,
            confidence: Decimal::ZERO,
            entry_hint: None,
            sl_hint: None,
            tp_hint: None,
            metadata: HashMap::new(),
        }
    }

    pub fn new(strategy: &str, direction: Direction, strength: Decimal, confidence: Decimal) -> Self {
        Self {
            strategy: strategy.to_string(),
            direction,
            strength,
            confidence,
            entry_hint: None,
            sl_hint: None,
            tp_hint: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_levels(mut self, entry: Decimal, sl: Decimal, tp: Decimal) -> Self {
        self.entry_hint = Some(entry);
        self.sl_hint = Some(sl);
        self.tp_hint = Some(tp);
        self
    }

    pub fn is_actionable(&self) -> bool {
        self.direction.is_actionable()
    }
}

/// Aggregate confluence output for a pair on one timeframe pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfluenceSignal {
    pub pair: Pair,
    pub direction: Direction,
    pub strength: Decimal,
    pub confidence: Decimal,
    pub confluence_count: usize,
    pub is_sure_fire: bool,
    pub obi_agrees: bool,
    pub entry: Decimal,
    pub sl: Decimal,
    pub tp: Decimal,
    pub trend_regime: TrendRegime,
    pub vol_regime: VolRegime,
    pub vol_level: f64,
    pub vol_expanding: bool,
    pub timeframe_agreement: Decimal,
    pub ts: DateTime<Utc>,
}

impl ConfluenceSignal {
    pub fn risk_reward_ratio(&self) -> Option<Decimal> {
        let risk = (self.entry - self.sl).abs();
        if risk.is_zero() {
            return None;
        }
        Some((self.tp - self.entry).abs() / risk)
    }

    pub fn age_seconds(&self) -> i64 {
        (Utc::now() - self.ts).num_seconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn neutral_signal_is_never_actionable() {
        let signal = StrategySignal::neutral("trend");
        assert!(!signal.is_actionable());
    }

    #[test]
    fn strategy_signal_carries_suggested_levels() {
        let signal = StrategySignal::new("keltner", Direction::Long, dec!(0.8), dec!(0.7))
            .with_levels(dec!(100), dec!(97), dec!(106));
        assert_eq!(signal.sl_hint, Some(dec!(97)));
        assert!(signal.is_actionable());
    }
}
