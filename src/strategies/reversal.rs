use std::sync::Mutex;

use rust_decimal_macros::dec;

use crate::indicators::IndicatorCache;
use crate::types::{Candle, Direction, Pair, Regime, StrategySignal};

use super::{PerformanceTracker, Strategy};

const LOOKBACK: usize = 3;

/// Single/multi-candle exhaustion patterns: a long wick rejecting a recent
/// extreme, on an otherwise quiet bar sequence.
pub struct ReversalStrategy {
    performance: Mutex<PerformanceTracker>,
}

impl ReversalStrategy {
    pub fn new() -> Self {
        Self { performance: Mutex::new(PerformanceTracker::new()) }
    }
}

impl Default for ReversalStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for ReversalStrategy {
    fn name(&self) -> &'static str {
        "reversal"
    }

    fn min_candles_required(&self) -> usize {
        LOOKBACK + 10
    }

    fn base_weight(&self) -> f64 {
        0.65
    }

    fn evaluate(
        &self,
        _pair: &Pair,
        candles: &[Candle],
        _cache: &mut IndicatorCache,
        _regime: Regime,
        _book: Option<crate::market_data::BookAnalysis>,
    ) -> StrategySignal {
        if candles.len() < self.min_candles_required() {
            return StrategySignal::neutral(self.name());
        }
        let n = candles.len();
        let last = &candles[n - 1];
        let range = last.range();
        if range.is_zero() {
            return StrategySignal::neutral(self.name());
        }

        let body = last.body_size();
        let upper_wick = last.high - last.open.max(last.close);
        let lower_wick = last.open.min(last.close) - last.low;
        let body_ratio = body / range;

        let recent_high = candles[(n - LOOKBACK - 1)..n].iter().map(|c| c.high).fold(last.high, |a, b| a.max(b));
        let recent_low = candles[(n - LOOKBACK - 1)..n].iter().map(|c| c.low).fold(last.low, |a, b| a.min(b));

        let is_pin_bar = body_ratio < rust_decimal::Decimal::new(35, 2);
        let rejects_high = last.high >= recent_high && lower_wick < upper_wick && last.is_bearish();
        let rejects_low = last.low <= recent_low && upper_wick < lower_wick && last.is_bullish();

        if is_pin_bar && rejects_low {
            let strength = (upper_wick / range).min(rust_decimal::Decimal::ONE);
            StrategySignal::new(self.name(), Direction::Long, strength, dec!(0.55))
        } else if is_pin_bar && rejects_high {
            let strength = (lower_wick / range).min(rust_decimal::Decimal::ONE);
            StrategySignal::new(self.name(), Direction::Short, strength, dec!(0.55))
        } else {
            StrategySignal::neutral(self.name())
        }
    }

    fn record_result(&mut self, won: bool, regime: Regime) {
        self.performance.lock().unwrap().record(won, regime);
    }

    fn adaptive_performance_factor(&self, regime: Regime) -> f64 {
        self.performance.lock().unwrap().adaptive_factor(regime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeFrame;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec as d;

    fn flat_candle(i: i64, close: f64) -> Candle {
        let pair = Pair::new("BTC", "USDT");
        let c = Decimal::try_from(close).unwrap();
        Candle::new(&pair, TimeFrame::M5, i * 300, c, c, c, c, d!(10), true)
    }

    #[test]
    fn hammer_at_recent_low_signals_long() {
        let mut candles: Vec<Candle> = (0..20).map(|i| flat_candle(i, 100.0)).collect();
        let pair = Pair::new("BTC", "USDT");
        let hammer = Candle::new(&pair, TimeFrame::M5, 20 * 300, d!(99.8), d!(100.0), d!(97.0), d!(99.9), d!(10), true);
        candles.push(hammer);
        let strategy = ReversalStrategy::new();
        let mut cache = IndicatorCache::new();
        let regime = crate::types::Regime {
            trend: crate::types::TrendRegime::Range,
            vol: crate::types::VolRegime::Mid,
            vol_level: 0.01,
            vol_expanding: false,
        };
        let signal = strategy.evaluate(&pair, &candles, &mut cache, regime, None);
        assert_eq!(signal.direction, Direction::Long);
    }
}
