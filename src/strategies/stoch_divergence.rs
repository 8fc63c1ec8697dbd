use std::sync::Mutex;

use rust_decimal_macros::dec;

use crate::indicators::{stochastic, IndicatorCache};
use crate::types::{Candle, Direction, Pair, Regime, StrategySignal, TimeFrame};

use super::{closes, highs, lows, to_decimal, PerformanceTracker, Strategy};

const K_PERIOD: usize = 14;
const D_PERIOD: usize = 3;
const LOOKBACK: usize = 10;

/// Price makes a new extreme that the stochastic oscillator fails to confirm.
pub struct StochDivergenceStrategy {
    performance: Mutex<PerformanceTracker>,
}

impl StochDivergenceStrategy {
    pub fn new() -> Self {
        Self { performance: Mutex::new(PerformanceTracker::new()) }
    }
}

impl Default for StochDivergenceStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for StochDivergenceStrategy {
    fn name(&self) -> &'static str {
        "stoch_divergence"
    }

    fn min_candles_required(&self) -> usize {
        K_PERIOD + D_PERIOD + LOOKBACK + 5
    }

    fn base_weight(&self) -> f64 {
        0.7
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

        let stoch = cache.get_or_compute("stochastic", &pair_key, tf, &[K_PERIOD as u64, D_PERIOD as u64], || {
            stochastic(&high, &low, &close, K_PERIOD, D_PERIOD)
        });

        let n = close.len();
        let recent_close = &close[(n - LOOKBACK)..];
        let recent_k = &stoch.k[(n - LOOKBACK)..];
        if recent_k.iter().any(|v| !v.is_finite()) {
            return StrategySignal::neutral(self.name());
        }

        let price_high_idx = recent_close.iter().enumerate().max_by(|a, b| a.1.partial_cmp(b.1).unwrap()).unwrap().0;
        let price_low_idx = recent_close.iter().enumerate().min_by(|a, b| a.1.partial_cmp(b.1).unwrap()).unwrap().0;
        let last = LOOKBACK - 1;

        let bearish_div = price_high_idx == last && recent_k[last] < recent_k[price_high_idx.saturating_sub(3).max(0)] && recent_k[last] > 60.0;
        let bullish_div = price_low_idx == last && recent_k[last] > recent_k[price_low_idx.saturating_sub(3).max(0)] && recent_k[last] < 40.0;

        if bullish_div {
            StrategySignal::new(self.name(), Direction::Long, to_decimal((40.0 - recent_k[last]).max(0.0) / 40.0), dec!(0.6))
        } else if bearish_div {
            StrategySignal::new(self.name(), Direction::Short, to_decimal((recent_k[last] - 60.0).max(0.0) / 40.0), dec!(0.6))
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
    use rust_decimal_macros::dec;

    fn candle(i: i64, close: f64) -> Candle {
        let pair = Pair::new("BTC", "USDT");
        let c = Decimal::try_from(close).unwrap();
        Candle::new(&pair, TimeFrame::M5, i * 300, c, c, c, c, dec!(10), true)
    }

    #[test]
    fn min_candles_required_is_positive() {
        let strategy = StochDivergenceStrategy::new();
        assert!(strategy.min_candles_required() > 0);
    }

    #[test]
    fn short_history_is_neutral() {
        let candles: Vec<Candle> = (0..5).map(|i| candle(i, 100.0)).collect();
        let strategy = StochDivergenceStrategy::new();
        let mut cache = IndicatorCache::new();
        let regime = Regime { trend: TrendRegime::Range, vol: VolRegime::Mid, vol_level: 0.01, vol_expanding: false };
        let signal = strategy.evaluate(&Pair::new("BTC", "USDT"), &candles, &mut cache, regime, None);
        assert!(!signal.is_actionable());
    }
}
