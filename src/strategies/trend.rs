use std::sync::Mutex;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::indicators::{adx, ema, macd, IndicatorCache};
use crate::types::{Candle, Direction, Pair, Regime, StrategySignal, TimeFrame};

use super::{closes, highs, last_finite, lows, to_decimal, PerformanceTracker, Strategy};

const FAST_PERIOD: usize = 9;
const SLOW_PERIOD: usize = 21;
const ADX_PERIOD: usize = 14;

/// EMA crossover confirmed by MACD direction and trend strength (ADX).
/// Best suited for sustained directional moves on BTC/ETH-class pairs.
pub struct TrendStrategy {
    performance: Mutex<PerformanceTracker>,
}

impl TrendStrategy {
    pub fn new() -> Self {
        Self { performance: Mutex::new(PerformanceTracker::new()) }
    }
}

impl Default for TrendStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for TrendStrategy {
    fn name(&self) -> &'static str {
        "trend"
    }

    fn min_candles_required(&self) -> usize {
        SLOW_PERIOD + ADX_PERIOD * 2 + 5
    }

    fn base_weight(&self) -> f64 {
        1.0
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

        let fast = cache.get_or_compute("ema_fast", &pair_key, tf, &[FAST_PERIOD as u64], || ema(&close, FAST_PERIOD)).clone();
        let slow = cache.get_or_compute("ema_slow", &pair_key, tf, &[SLOW_PERIOD as u64], || ema(&close, SLOW_PERIOD)).clone();
        let macd_out = macd(&close, 12, 26, 9);
        let adx_out = adx(&high, &low, &close, ADX_PERIOD);

        let (Some(f), Some(s), Some(hist), Some(adx_last)) = (
            last_finite(&fast),
            last_finite(&slow),
            last_finite(&macd_out.histogram),
            last_finite(&adx_out),
        ) else {
            return StrategySignal::neutral(self.name());
        };

        let price = *close.last().unwrap();
        let spread_pct = if s != 0.0 { (f - s).abs() / s * 100.0 } else { 0.0 };
        let is_bullish = f > s;
        let macd_confirms = if is_bullish { hist > 0.0 } else { hist < 0.0 };
        let trend_aligned = if is_bullish { price > f && price > s } else { price < f && price < s };

        if spread_pct < 0.3 || !trend_aligned {
            return StrategySignal::neutral(self.name());
        }

        let direction = if is_bullish { Direction::Long } else { Direction::Short };
        let mut confidence = dec!(0.5);
        if spread_pct > 1.0 {
            confidence += dec!(0.15);
        }
        if macd_confirms {
            confidence += dec!(0.2);
        }
        if adx_last > 25.0 {
            confidence += dec!(0.15);
        }
        let confidence = confidence.min(dec!(0.95));
        let strength = to_decimal((spread_pct / 3.0).min(1.0));

        StrategySignal::new(self.name(), direction, strength, confidence)
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
    use crate::indicators::IndicatorCache;
    use crate::types::{TrendRegime, VolRegime};
    use rust_decimal::Decimal;

    fn candle(i: i64, close: f64) -> Candle {
        let pair = Pair::new("BTC", "USDT");
        let c = Decimal::try_from(close).unwrap();
        Candle::new(&pair, TimeFrame::M5, i * 300, c, c, c, c, dec!(10), true)
    }

    #[test]
    fn sustained_uptrend_produces_long_signal() {
        let candles: Vec<Candle> = (0..80).map(|i| candle(i, 100.0 + i as f64 * 0.6)).collect();
        let strategy = TrendStrategy::new();
        let mut cache = IndicatorCache::new();
        let regime = Regime { trend: TrendRegime::Trend, vol: VolRegime::Mid, vol_level: 0.01, vol_expanding: false };
        let signal = strategy.evaluate(&Pair::new("BTC", "USDT"), &candles, &mut cache, regime, None);
        assert_eq!(signal.direction, Direction::Long);
        assert!(signal.is_actionable());
    }

    #[test]
    fn flat_market_is_neutral() {
        let candles: Vec<Candle> = (0..80).map(|i| candle(i, 100.0 + (i as f64 * 0.3).sin() * 0.1)).collect();
        let strategy = TrendStrategy::new();
        let mut cache = IndicatorCache::new();
        let regime = Regime { trend: TrendRegime::Range, vol: VolRegime::Low, vol_level: 0.002, vol_expanding: false };
        let signal = strategy.evaluate(&Pair::new("BTC", "USDT"), &candles, &mut cache, regime, None);
        assert!(!signal.is_actionable());
    }
}
