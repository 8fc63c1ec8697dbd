use std::sync::Mutex;

use rust_decimal_macros::dec;

use crate::indicators::{supertrend, IndicatorCache};
use crate::types::{Candle, Direction, Pair, Regime, StrategySignal, TimeFrame};

use super::{closes, highs, lows, to_decimal, volumes, PerformanceTracker, Strategy};

const PERIOD: usize = 10;
const MULT: f64 = 3.0;
const VOLUME_LOOKBACK: usize = 20;
const VOLUME_CONFIRM_MULT: f64 = 1.2;

/// Supertrend line flip, only taken when it's accompanied by volume at or
/// above its recent average — an unconfirmed flip is treated as noise.
pub struct SupertrendFlipStrategy {
    performance: Mutex<PerformanceTracker>,
}

impl SupertrendFlipStrategy {
    pub fn new() -> Self {
        Self { performance: Mutex::new(PerformanceTracker::new()) }
    }
}

impl Default for SupertrendFlipStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for SupertrendFlipStrategy {
    fn name(&self) -> &'static str {
        "supertrend_flip"
    }

    fn min_candles_required(&self) -> usize {
        PERIOD * 3 + VOLUME_LOOKBACK
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
        let volume = volumes(candles);
        let tf = candles.last().map(|c| c.timeframe).unwrap_or(TimeFrame::M5);
        let pair_key = pair.canonical();

        let st = cache.get_or_compute("supertrend", &pair_key, tf, &[PERIOD as u64, 300], || supertrend(&high, &low, &close, PERIOD, MULT));

        let n = close.len();
        let i = n - 1;
        if !st.direction[i].is_finite() || !st.direction[i - 1].is_finite() {
            return StrategySignal::neutral(self.name());
        }
        if st.direction[i] == st.direction[i - 1] {
            return StrategySignal::neutral(self.name());
        }

        let avg_volume: f64 = volume[(n - VOLUME_LOOKBACK)..].iter().sum::<f64>() / VOLUME_LOOKBACK as f64;
        if avg_volume <= 0.0 || volume[i] < avg_volume * VOLUME_CONFIRM_MULT {
            return StrategySignal::neutral(self.name());
        }

        let direction = if st.direction[i] > 0.0 { Direction::Long } else { Direction::Short };
        let volume_ratio = (volume[i] / avg_volume).min(3.0) / 3.0;
        StrategySignal::new(self.name(), direction, to_decimal(volume_ratio), dec!(0.6) + to_decimal(volume_ratio * 0.2))
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

    fn candle(i: i64, close: f64, volume: f64) -> Candle {
        let pair = Pair::new("BTC", "USDT");
        let c = Decimal::try_from(close).unwrap();
        let v = Decimal::try_from(volume).unwrap();
        Candle::new(&pair, TimeFrame::M5, i * 300, c, c, c, c, v, true)
    }

    #[test]
    fn unconfirmed_flip_without_volume_stays_neutral() {
        let mut close: Vec<f64> = (0..50).map(|i| 100.0 + i as f64).collect();
        close.extend((0..10).map(|i| 150.0 - i as f64 * 3.0));
        let candles: Vec<Candle> = close.iter().enumerate().map(|(i, c)| candle(i as i64, *c, 10.0)).collect();
        let strategy = SupertrendFlipStrategy::new();
        let mut cache = IndicatorCache::new();
        let regime = Regime { trend: TrendRegime::Trend, vol: VolRegime::Mid, vol_level: 0.01, vol_expanding: false };
        let signal = strategy.evaluate(&Pair::new("BTC", "USDT"), &candles, &mut cache, regime, None);
        assert!(!signal.is_actionable());
    }
}
