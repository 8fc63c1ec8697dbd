pub mod ichimoku;
pub mod keltner_breakout;
pub mod mean_reversion;
pub mod order_flow;
pub mod performance;
pub mod reversal;
pub mod stoch_divergence;
pub mod supertrend_flip;
pub mod trend;
pub mod vol_squeeze;

pub use performance::PerformanceTracker;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::indicators::IndicatorCache;
use crate::market_data::BookAnalysis;
use crate::types::{Candle, Pair, Regime, StrategySignal};

use ichimoku::IchimokuStrategy;
use keltner_breakout::KeltnerBreakoutStrategy;
use mean_reversion::MeanReversionStrategy;
use order_flow::OrderFlowStrategy;
use reversal::ReversalStrategy;
use stoch_divergence::StochDivergenceStrategy;
use supertrend_flip::SupertrendFlipStrategy;
use trend::TrendStrategy;
use vol_squeeze::VolSqueezeStrategy;

/// The full confluence voter roster, in no particular order — `ConfluenceEngine`
/// weighs and aggregates them independently of construction order.
pub fn default_strategies() -> Vec<Box<dyn Strategy>> {
    vec![
        Box::new(TrendStrategy::new()),
        Box::new(MeanReversionStrategy::new()),
        Box::new(KeltnerBreakoutStrategy::new()),
        Box::new(IchimokuStrategy::new()),
        Box::new(SupertrendFlipStrategy::new()),
        Box::new(StochDivergenceStrategy::new()),
        Box::new(ReversalStrategy::new()),
        Box::new(OrderFlowStrategy::new()),
        Box::new(VolSqueezeStrategy::new()),
    ]
}

/// A single confluence voter. Strategies are pure functions of closed candle
/// history plus the shared regime classification — they hold no market-data
/// state of their own, only their own recent-trade outcomes.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn min_candles_required(&self) -> usize;

    /// Base weight this strategy contributes to confluence before the
    /// adaptive performance factor and regime multiplier are applied.
    fn base_weight(&self) -> f64;

    /// Always returns a signal; a non-actionable setup is `StrategySignal::neutral`,
    /// not the absence of a return value. `book` is the latest order-book
    /// analysis for the pair, when fresh enough to use (only `OrderFlow`
    /// reads it; every other detector ignores it).
    fn evaluate(
        &self,
        pair: &Pair,
        candles: &[Candle],
        cache: &mut IndicatorCache,
        regime: Regime,
        book: Option<BookAnalysis>,
    ) -> StrategySignal;

    fn record_result(&mut self, won: bool, regime: Regime);

    fn adaptive_performance_factor(&self, regime: Regime) -> f64;
}

pub(crate) fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close.to_f64().unwrap_or(0.0)).collect()
}

pub(crate) fn highs(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.high.to_f64().unwrap_or(0.0)).collect()
}

pub(crate) fn lows(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.low.to_f64().unwrap_or(0.0)).collect()
}

pub(crate) fn volumes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.volume.to_f64().unwrap_or(0.0)).collect()
}

pub(crate) fn to_decimal(value: f64) -> Decimal {
    Decimal::try_from(value).unwrap_or(Decimal::ZERO)
}

/// Last finite value in an indicator output array, if any.
pub(crate) fn last_finite(values: &[f64]) -> Option<f64> {
    values.iter().rev().find(|v| v.is_finite()).copied()
}
