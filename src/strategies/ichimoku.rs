use std::sync::Mutex;

use rust_decimal_macros::dec;

use crate::indicators::IndicatorCache;
use crate::types::{Candle, Direction, Pair, Regime, StrategySignal};

use super::{closes, highs, lows, to_decimal, PerformanceTracker, Strategy};

const TENKAN: usize = 9;
const KIJUN: usize = 26;
const SENKOU_B: usize = 52;

fn mid_of_window(high: &[f64], low: &[f64], end: usize, period: usize) -> Option<f64> {
    if end + 1 < period {
        return None;
    }
    let start = end + 1 - period;
    let h = high[start..=end].iter().cloned().fold(f64::MIN, f64::max);
    let l = low[start..=end].iter().cloned().fold(f64::MAX, f64::min);
    Some((h + l) / 2.0)
}

/// Tenkan/Kijun cross confirmed by price clearing the (lagged) cloud.
pub struct IchimokuStrategy {
    performance: Mutex<PerformanceTracker>,
}

impl IchimokuStrategy {
    pub fn new() -> Self {
        Self { performance: Mutex::new(PerformanceTracker::new()) }
    }
}

impl Default for IchimokuStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for IchimokuStrategy {
    fn name(&self) -> &'static str {
        "ichimoku"
    }

    fn min_candles_required(&self) -> usize {
        SENKOU_B + KIJUN + 5
    }

    fn base_weight(&self) -> f64 {
        0.8
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
        let close = closes(candles);
        let high = highs(candles);
        let low = lows(candles);
        let i = close.len() - 1;

        let (Some(tenkan), Some(kijun), Some(senkou_a_now), Some(senkou_b_now)) = (
            mid_of_window(&high, &low, i, TENKAN),
            mid_of_window(&high, &low, i, KIJUN),
            mid_of_window(&high, &low, i, TENKAN).zip(mid_of_window(&high, &low, i, KIJUN)).map(|(a, b)| (a + b) / 2.0),
            mid_of_window(&high, &low, i, SENKOU_B),
        ) else {
            return StrategySignal::neutral(self.name());
        };

        let price = close[i];
        let cloud_top = senkou_a_now.max(senkou_b_now);
        let cloud_bottom = senkou_a_now.min(senkou_b_now);

        if tenkan > kijun && price > cloud_top {
            let strength = ((tenkan - kijun) / kijun.abs().max(1e-9)).min(1.0);
            StrategySignal::new(self.name(), Direction::Long, to_decimal(strength), dec!(0.65))
        } else if tenkan < kijun && price < cloud_bottom {
            let strength = ((kijun - tenkan) / kijun.abs().max(1e-9)).min(1.0);
            StrategySignal::new(self.name(), Direction::Short, to_decimal(strength), dec!(0.65))
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
    use crate::types::{TimeFrame, TrendRegime, VolRegime};
    use rust_decimal::Decimal;

    fn candle(i: i64, close: f64) -> Candle {
        let pair = Pair::new("BTC", "USDT");
        let c = Decimal::try_from(close).unwrap();
        Candle::new(&pair, TimeFrame::M5, i * 300, c, c, c, c, dec!(10), true)
    }

    #[test]
    fn clean_uptrend_clears_cloud_to_the_long_side() {
        let candles: Vec<Candle> = (0..100).map(|i| candle(i, 100.0 + i as f64 * 0.5)).collect();
        let strategy = IchimokuStrategy::new();
        let mut cache = IndicatorCache::new();
        let regime = Regime { trend: TrendRegime::Trend, vol: VolRegime::Mid, vol_level: 0.01, vol_expanding: false };
        let signal = strategy.evaluate(&Pair::new("BTC", "USDT"), &candles, &mut cache, regime, None);
        assert_eq!(signal.direction, Direction::Long);
    }
}
