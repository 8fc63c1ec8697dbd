use std::sync::Mutex;

use rust_decimal_macros::dec;

use crate::indicators::{keltner, IndicatorCache};
use crate::types::{Candle, Direction, Pair, Regime, StrategySignal, TimeFrame};

use super::{closes, highs, lows, to_decimal, PerformanceTracker, Strategy};

const EMA_PERIOD: usize = 20;
const ATR_PERIOD: usize = 10;
const MULT: f64 = 1.5;

/// Channel breakout: a close outside the Keltner band signals continuation.
pub struct KeltnerBreakoutStrategy {
    performance: Mutex<PerformanceTracker>,
}

impl KeltnerBreakoutStrategy {
    pub fn new() -> Self {
        Self { performance: Mutex::new(PerformanceTracker::new()) }
    }
}

impl Default for KeltnerBreakoutStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for KeltnerBreakoutStrategy {
    fn name(&self) -> &'static str {
        "keltner_breakout"
    }

    fn min_candles_required(&self) -> usize {
        EMA_PERIOD + ATR_PERIOD + 5
    }

    fn base_weight(&self) -> f64 {
        0.9
    }

    fn evaluate(
        &self,
        pair: &Pair,
        candles: &[Candle],
        cache: &mut IndicatorCache,
        _regime: Regime,
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

        let params = [EMA_PERIOD as u64, ATR_PERIOD as u64, (MULT * 100.0) as u64];
        let channel = cache
            .get_or_compute("keltner", &pair_key, tf, &params, || keltner(&high, &low, &close, EMA_PERIOD, ATR_PERIOD, MULT))
            ;
        let i = close.len() - 1;
        if !channel.upper[i].is_finite() {
            return StrategySignal::neutral(self.name());
        }
        let price = close[i];
        let width = channel.upper[i] - channel.lower[i];
        if width <= 0.0 {
            return StrategySignal::neutral(self.name());
        }

        if price > channel.upper[i] {
            let overshoot = ((price - channel.upper[i]) / width).min(1.0);
            StrategySignal::new(self.name(), Direction::Long, to_decimal(overshoot), dec!(0.55) + to_decimal(overshoot * 0.3))
        } else if price < channel.lower[i] {
            let overshoot = ((channel.lower[i] - price) / width).min(1.0);
            StrategySignal::new(self.name(), Direction::Short, to_decimal(overshoot), dec!(0.55) + to_decimal(overshoot * 0.3))
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
    use crate::types::{TrendRegime, VolRegime};
    use rust_decimal::Decimal;

    fn candle(i: i64, close: f64) -> Candle {
        let pair = Pair::new("BTC", "USDT");
        let c = Decimal::try_from(close).unwrap();
        Candle::new(&pair, TimeFrame::M5, i * 300, c, c, c, c, dec!(10), true)
    }

    #[test]
    fn sharp_breakout_above_channel_is_long() {
        let mut candles: Vec<Candle> = (0..40).map(|i| candle(i, 100.0 + (i as f64 * 0.2).sin() * 0.3)).collect();
        candles.push(candle(40, 108.0));
        let strategy = KeltnerBreakoutStrategy::new();
        let mut cache = IndicatorCache::new();
        let regime = Regime { trend: TrendRegime::Trend, vol: VolRegime::Mid, vol_level: 0.01, vol_expanding: true };
        let signal = strategy.evaluate(&Pair::new("BTC", "USDT"), &candles, &mut cache, regime, None);
        assert_eq!(signal.direction, Direction::Long);
    }
}
