use std::sync::Mutex;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::indicators::IndicatorCache;
use crate::market_data::BookAnalysis;
use crate::types::{Candle, Direction, Pair, Regime, StrategySignal};

use super::{closes, to_decimal, PerformanceTracker, Strategy};

const MIN_CANDLES: usize = 10;
const POSITION_LOOKBACK: usize = 10;
const BOOK_SCORE_THRESHOLD: Decimal = dec!(0.3);
const MAX_SPREAD_PCT: Decimal = dec!(0.08);

/// Fires on order-book imbalance: a `book_score` beyond threshold, a tight
/// spread to trust it, and price sitting on the side of its recent range the
/// book favors rather than already extended away from it.
pub struct OrderFlowStrategy {
    performance: Mutex<PerformanceTracker>,
}

impl OrderFlowStrategy {
    pub fn new() -> Self {
        Self { performance: Mutex::new(PerformanceTracker::new()) }
    }
}

impl Default for OrderFlowStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for OrderFlowStrategy {
    fn name(&self) -> &'static str {
        "order_flow"
    }

    fn min_candles_required(&self) -> usize {
        MIN_CANDLES
    }

    fn base_weight(&self) -> f64 {
        0.75
    }

    fn evaluate(
        &self,
        _pair: &Pair,
        candles: &[Candle],
        _cache: &mut IndicatorCache,
        _regime: Regime,
        book: Option<BookAnalysis>,
    ) -> StrategySignal {
        if candles.len() < self.min_candles_required() {
            return StrategySignal::neutral(self.name());
        }
        let Some(book) = book else {
            return StrategySignal::neutral(self.name());
        };
        if book.book_score.abs() < BOOK_SCORE_THRESHOLD || book.spread_pct > MAX_SPREAD_PCT {
            return StrategySignal::neutral(self.name());
        }

        let direction = if book.book_score > Decimal::ZERO { Direction::Long } else { Direction::Short };

        let close = closes(candles);
        let n = close.len();
        let window = &close[(n - POSITION_LOOKBACK)..];
        let recent_low = window.iter().cloned().fold(f64::INFINITY, f64::min);
        let recent_high = window.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let range = (recent_high - recent_low).max(1e-9);
        let position = (close[n - 1] - recent_low) / range;
        let positional_ok = match direction {
            Direction::Long => position <= 0.65,
            Direction::Short => position >= 0.35,
            Direction::Neutral => false,
        };
        if !positional_ok {
            return StrategySignal::neutral(self.name());
        }

        let strength = to_decimal(book.book_score.abs().to_f64().unwrap_or(0.0).min(1.0));
        let spread_room = ((MAX_SPREAD_PCT - book.spread_pct) / MAX_SPREAD_PCT).max(Decimal::ZERO).min(Decimal::ONE);
        let confidence = (dec!(0.5) + spread_room * dec!(0.3)).min(dec!(0.9));

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
    use crate::types::{TimeFrame, TrendRegime, VolRegime};
    use rust_decimal::Decimal as Dec;

    fn candle(i: i64, close: f64) -> Candle {
        let pair = Pair::new("BTC", "USDT");
        let c = Dec::try_from(close).unwrap();
        Candle::new(&pair, TimeFrame::M5, i * 300, c, c, c, c, dec!(10), true)
    }

    fn book(score: Decimal, spread_pct: Decimal) -> BookAnalysis {
        BookAnalysis {
            obi: score,
            book_score: score,
            spread_pct,
            whale_flag: false,
            liquidity_score: dec!(0.5),
            ts: chrono::Utc::now(),
        }
    }

    /// Last 10 candles (the positional-context window) drift down from 105
    /// to 100.5, leaving the final close at the bottom of its own range —
    /// the setup a buy-side book imbalance is meant to catch, not a chase.
    fn pulled_back_candles() -> Vec<Candle> {
        let mut candles: Vec<Candle> = (0..10).map(|i| candle(i, 105.0)).collect();
        candles.extend((10..20).map(|i| candle(i, 105.0 - (i - 10) as f64 * 0.5)));
        candles
    }

    #[test]
    fn strong_bid_imbalance_with_tight_spread_produces_long_signal() {
        let candles = pulled_back_candles();
        let strategy = OrderFlowStrategy::new();
        let mut cache = IndicatorCache::new();
        let regime = Regime { trend: TrendRegime::Trend, vol: VolRegime::Mid, vol_level: 0.01, vol_expanding: false };
        let signal = strategy.evaluate(&Pair::new("BTC", "USDT"), &candles, &mut cache, regime, Some(book(dec!(0.5), dec!(0.02))));
        assert_eq!(signal.direction, Direction::Long);
        assert!(signal.is_actionable());
    }

    #[test]
    fn wide_spread_neutralizes_the_signal_even_with_strong_imbalance() {
        let candles = pulled_back_candles();
        let strategy = OrderFlowStrategy::new();
        let mut cache = IndicatorCache::new();
        let regime = Regime { trend: TrendRegime::Trend, vol: VolRegime::Mid, vol_level: 0.01, vol_expanding: false };
        let signal = strategy.evaluate(&Pair::new("BTC", "USDT"), &candles, &mut cache, regime, Some(book(dec!(0.5), dec!(0.5))));
        assert!(!signal.is_actionable());
    }

    #[test]
    fn missing_book_data_stays_neutral() {
        let candles: Vec<Candle> = (0..20).map(|i| candle(i, 100.0)).collect();
        let strategy = OrderFlowStrategy::new();
        let mut cache = IndicatorCache::new();
        let regime = Regime { trend: TrendRegime::Range, vol: VolRegime::Mid, vol_level: 0.01, vol_expanding: false };
        let signal = strategy.evaluate(&Pair::new("BTC", "USDT"), &candles, &mut cache, regime, None);
        assert!(!signal.is_actionable());
    }
}
