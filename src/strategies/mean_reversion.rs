use std::sync::Mutex;

use rust_decimal_macros::dec;

use crate::indicators::{bollinger, rsi, IndicatorCache};
use crate::types::{Candle, Direction, Pair, Regime, StrategySignal, TimeFrame};

use super::{closes, to_decimal, PerformanceTracker, Strategy};

const BB_PERIOD: usize = 20;
const RSI_PERIOD: usize = 14;

/// Fades price extremes back toward the Bollinger midline, confirmed by an
/// RSI reading in the corresponding extreme. Works best in ranging regimes.
pub struct MeanReversionStrategy {
    performance: Mutex<PerformanceTracker>,
}

impl MeanReversionStrategy {
    pub fn new() -> Self {
        Self { performance: Mutex::new(PerformanceTracker::new()) }
    }
}

impl Default for MeanReversionStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for MeanReversionStrategy {
    fn name(&self) -> &'static str {
        "mean_reversion"
    }

    fn min_candles_required(&self) -> usize {
        BB_PERIOD + RSI_PERIOD + 5
    }

    fn base_weight(&self) -> f64 {
        0.85
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
        let tf = candles.last().map(|c| c.timeframe).unwrap_or(TimeFrame::M5);
        let pair_key = pair.canonical();

        let bands = cache.get_or_compute("bollinger", &pair_key, tf, &[BB_PERIOD as u64, 200], || bollinger(&close, BB_PERIOD, 2.0));
        let rsi_out = cache.get_or_compute("rsi", &pair_key, tf, &[RSI_PERIOD as u64], || rsi(&close, RSI_PERIOD));

        let i = close.len() - 1;
        if !bands.upper[i].is_finite() || !rsi_out[i].is_finite() {
            return StrategySignal::neutral(self.name());
        }
        let price = close[i];
        let r = rsi_out[i];

        if price <= bands.lower[i] && r < 35.0 {
            let depth = ((bands.lower[i] - price).abs() / (bands.middle[i] - bands.lower[i]).max(1e-9)).min(1.0);
            StrategySignal::new(self.name(), Direction::Long, to_decimal(depth), dec!(0.5) + to_decimal((35.0 - r) / 100.0))
        } else if price >= bands.upper[i] && r > 65.0 {
            let depth = ((price - bands.upper[i]).abs() / (bands.upper[i] - bands.middle[i]).max(1e-9)).min(1.0);
            StrategySignal::new(self.name(), Direction::Short, to_decimal(depth), dec!(0.5) + to_decimal((r - 65.0) / 100.0))
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
    fn sharp_dip_below_lower_band_triggers_long() {
        let mut candles: Vec<Candle> = (0..40).map(|i| candle(i, 100.0 + (i as f64 * 0.3).sin() * 0.5)).collect();
        for i in 0..6 {
            candles.push(candle(40 + i, 100.0 - i as f64 * 1.5));
        }
        let strategy = MeanReversionStrategy::new();
        let mut cache = IndicatorCache::new();
        let regime = Regime { trend: TrendRegime::Range, vol: VolRegime::Mid, vol_level: 0.01, vol_expanding: false };
        let signal = strategy.evaluate(&Pair::new("BTC", "USDT"), &candles, &mut cache, regime, None);
        assert_eq!(signal.direction, Direction::Long);
    }
}
