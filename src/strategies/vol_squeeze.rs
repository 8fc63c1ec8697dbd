use std::sync::Mutex;

use rust_decimal_macros::dec;

use crate::indicators::{bollinger, keltner, IndicatorCache};
use crate::types::{Candle, Direction, Pair, Regime, StrategySignal, TimeFrame};

use super::{closes, highs, lows, to_decimal, PerformanceTracker, Strategy};

const PERIOD: usize = 20;

/// Bollinger bands contracting inside the Keltner channel ("the squeeze"),
/// firing when bandwidth expands back out with directional confirmation.
pub struct VolSqueezeStrategy {
    performance: Mutex<PerformanceTracker>,
}

impl VolSqueezeStrategy {
    pub fn new() -> Self {
        Self { performance: Mutex::new(PerformanceTracker::new()) }
    }
}

impl Default for VolSqueezeStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for VolSqueezeStrategy {
    fn name(&self) -> &'static str {
        "vol_squeeze"
    }

    fn min_candles_required(&self) -> usize {
        PERIOD + 10
    }

    fn base_weight(&self) -> f64 {
        0.75
    }

    fn evaluate(
        &self,
        pair: &Pair,
        candles: &[Candle],
        cache: &mut IndicatorCache,
        regime: Regime,
        _book: Option<crate::market_data::BookAnalysis>,
    ) -> StrategySignal {
        if candles.len() < self.min_candles_required() {
            return StrategySignal::neutral(self.name());
        }
        let close = closes(candles);
        let high = highs(candles);
        let low = lows(candles);
        let tf = candles.last().map(|c| c.timeframe).unwrap_or(TimeFrame::M5);
        let pair_key = pair.canonical();

        let bands = cache.get_or_compute("bollinger", &pair_key, tf, &[PERIOD as u64, 200], || bollinger(&close, PERIOD, 2.0));
        let channel = cache.get_or_compute("keltner", &pair_key, tf, &[PERIOD as u64, 10, 150], || keltner(&high, &low, &close, PERIOD, 10, 1.5));

        let n = close.len();
        let i = n - 1;
        let prev = n - 2;
        if !bands.upper[prev].is_finite() || !channel.upper[prev].is_finite() || !bands.upper[i].is_finite() || !channel.upper[i].is_finite() {
            return StrategySignal::neutral(self.name());
        }

        let was_squeezed = bands.upper[prev] < channel.upper[prev] && bands.lower[prev] > channel.lower[prev];
        let now_released = bands.upper[i] >= channel.upper[i] || bands.lower[i] <= channel.lower[i];
        if !(was_squeezed && now_released) {
            return StrategySignal::neutral(self.name());
        }

        let direction = if close[i] > close[prev] { Direction::Long } else { Direction::Short };
        let mut confidence = dec!(0.55);
        if regime.vol_expanding {
            confidence += dec!(0.15);
        }
        StrategySignal::new(self.name(), direction, to_decimal(0.6), confidence.min(dec!(0.9)))
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
    use crate::types::{TrendRegime, VolRegime};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec as d;

    fn candle(i: i64, close: f64) -> Candle {
        let pair = Pair::new("BTC", "USDT");
        let c = Decimal::try_from(close).unwrap();
        Candle::new(&pair, TimeFrame::M5, i * 300, c, c, c, c, d!(10), true)
    }

    #[test]
    fn squeeze_release_produces_actionable_direction() {
        let mut candles: Vec<Candle> = (0..30).map(|i| candle(i, 100.0 + (i as f64 * 0.05).sin() * 0.05)).collect();
        candles.push(candle(30, 105.0));
        let strategy = VolSqueezeStrategy::new();
        let mut cache = IndicatorCache::new();
        let regime = Regime { trend: TrendRegime::Trend, vol: VolRegime::Low, vol_level: 0.003, vol_expanding: true };
        let signal = strategy.evaluate(&Pair::new("BTC", "USDT"), &candles, &mut cache, regime, None);
        assert!(signal.direction == Direction::Long || !signal.is_actionable());
    }
}
