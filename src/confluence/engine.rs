use std::panic::AssertUnwindSafe;
use std::sync::Mutex;

use chrono::{Timelike, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::indicators::{atr, compute_sl_tp, IndicatorCache, DEFAULT_SL_FLOOR_PCT, DEFAULT_TP_FLOOR_PCT};
use crate::market_data::{BookAnalysis, MarketDataCache};
use crate::strategies::{closes, highs, lows, to_decimal, Strategy};
use crate::types::{Candle, ConfluenceSignal, Direction, Pair, Regime, StrategySignal, TimeFrame};

use super::guardrails::Guardrails;
use super::regime::{detect_regime, regime_weight_multiplier};
use super::session::SessionMultiplier;

/// Per-timeframe aggregate vote: the weighted-majority direction plus the
/// counts used for the confidence bonus/penalty and the Sure-Fire check.
struct TimeframeVote {
    label: String,
    tf_weight: f64,
    direction: Direction,
    strength: Decimal,
    confidence: Decimal,
    confluence_count: usize,
    regime: Regime,
    candles: Vec<Candle>,
}

fn parse_timeframe(label: &str) -> Option<TimeFrame> {
    match label {
        "1" => Some(TimeFrame::M1),
        "5" => Some(TimeFrame::M5),
        "15" => Some(TimeFrame::M15),
        "60" => Some(TimeFrame::H1),
        _ => None,
    }
}

/// Ascending-timeframe weight ladder: a 15m agreement counts for more than a
/// 1m agreement, since it reflects less noise.
fn timeframe_weight(index: usize) -> f64 {
    const LADDER: [f64; 4] = [1.0, 1.3, 1.5, 1.8];
    LADDER.get(index).copied().unwrap_or(1.8)
}

/// Runs every strategy against one candle series, votes on a direction, and
/// folds the votes into a single weighted strength/confidence pair.
pub struct ConfluenceEngine {
    strategies: Vec<Box<dyn Strategy>>,
    guardrails: Mutex<Guardrails>,
    session: Mutex<SessionMultiplier>,
}

impl ConfluenceEngine {
    pub fn new(strategies: Vec<Box<dyn Strategy>>) -> Self {
        Self {
            strategies,
            guardrails: Mutex::new(Guardrails::new()),
            session: Mutex::new(SessionMultiplier::new()),
        }
    }

    /// Feeds a closed trade's outcome back into the contributing strategy's
    /// performance tracker, the guardrail window, and the session multiplier.
    pub fn record_trade_result(&mut self, strategy_name: &str, won: bool, pnl: Decimal, regime: Regime, config: &RuntimeConfig) {
        if let Some(strategy) = self.strategies.iter_mut().find(|s| s.name() == strategy_name) {
            strategy.record_result(won, regime);
        }
        self.guardrails.lock().unwrap().record(
            strategy_name,
            won,
            pnl,
            config.ai.strategy_guardrails_window_trades,
            config.ai.strategy_guardrails_min_trades,
            config.ai.strategy_guardrails_disable_minutes,
            config.ai.strategy_guardrails_min_win_rate.to_f64().unwrap_or(0.35),
            config.ai.strategy_guardrails_min_profit_factor.to_f64().unwrap_or(0.85),
        );
        self.session.lock().unwrap().record(Utc::now().hour(), won);
    }

    fn aggregate_one_timeframe(
        &self,
        pair: &Pair,
        candles: &[Candle],
        cache: &mut IndicatorCache,
        regime: Regime,
        config: &RuntimeConfig,
        book: Option<BookAnalysis>,
    ) -> (Direction, Decimal, Decimal, usize) {
        let guardrails = self.guardrails.lock().unwrap();
        let mut long_signals: Vec<(f64, StrategySignal)> = Vec::new();
        let mut short_signals: Vec<(f64, StrategySignal)> = Vec::new();

        for strategy in &self.strategies {
            if guardrails.is_disabled(strategy.name()) {
                continue;
            }
            if candles.len() < strategy.min_candles_required() {
                continue;
            }
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| strategy.evaluate(pair, candles, cache, regime, book)));
            let signal = match outcome {
                Ok(signal) => signal,
                Err(_) => {
                    warn!(strategy = strategy.name(), "strategy panicked; neutralizing for this scan");
                    continue;
                }
            };
            if !signal.is_actionable() {
                continue;
            }
            let weight =
                strategy.base_weight() * strategy.adaptive_performance_factor(regime) * regime_weight_multiplier(regime, &config.regime);
            match signal.direction {
                Direction::Long => long_signals.push((weight, signal)),
                Direction::Short => short_signals.push((weight, signal)),
                Direction::Neutral => {}
            }
        }
        drop(guardrails);

        let long_weight: f64 = long_signals.iter().map(|(w, _)| w).sum();
        let short_weight: f64 = short_signals.iter().map(|(w, _)| w).sum();

        if long_weight <= 0.0 && short_weight <= 0.0 {
            return (Direction::Neutral, Decimal::ZERO, Decimal::ZERO, 0);
        }
        let (direction, majority, opposing_count) = if long_weight >= short_weight {
            (Direction::Long, long_signals, short_signals.len())
        } else {
            (Direction::Short, short_signals, long_signals.len())
        };

        let total_weight: f64 = majority.iter().map(|(w, _)| w).sum();
        if total_weight <= 0.0 {
            return (Direction::Neutral, Decimal::ZERO, Decimal::ZERO, 0);
        }
        let confluence_count = majority.len();

        let mut strength: f64 = majority.iter().map(|(w, s)| w * s.strength.to_f64().unwrap_or(0.0)).sum::<f64>() / total_weight;
        let raw_confidence: f64 =
            majority.iter().map(|(w, s)| w * s.confidence.to_f64().unwrap_or(0.0)).sum::<f64>() / total_weight;

        let bonus = (0.10 * confluence_count.saturating_sub(1) as f64).min(0.30);
        let penalty = (0.04 * opposing_count as f64).min(0.12);
        let mut confidence = (raw_confidence + bonus - penalty).clamp(0.0, 1.0);
        let mut confluence_count = confluence_count;

        // Step 6: fuse the order book. A synthetic signal joins the vote when
        // `obi_counts_as_confluence` and the book agrees past threshold;
        // otherwise a bare directional match earns a flat confidence nudge.
        if let Some(book) = book {
            let book_score = book.book_score.to_f64().unwrap_or(0.0);
            let matches_direction = match direction {
                Direction::Long => book_score > 0.0,
                Direction::Short => book_score < 0.0,
                Direction::Neutral => false,
            };
            let threshold = config.ai.book_score_threshold.to_f64().unwrap_or(0.3);
            if config.ai.obi_counts_as_confluence {
                if matches_direction && book_score.abs() >= threshold {
                    let obi_weight = config.ai.obi_weight;
                    let book_strength = book_score.abs().min(1.0);
                    let blended_weight = total_weight + obi_weight;
                    strength = (strength * total_weight + obi_weight * book_strength) / blended_weight;
                    confidence = (confidence * total_weight + obi_weight * book_strength) / blended_weight;
                    confluence_count += 1;
                }
            } else if matches_direction {
                confidence = (confidence + 0.05).min(1.0);
            }
        }

        (direction, to_decimal(strength.clamp(0.0, 1.0)), to_decimal(confidence.clamp(0.0, 1.0)), confluence_count)
    }

    /// Full pipeline for one pair: per-timeframe aggregation, multi-timeframe
    /// combination, order-book fusion, session adjustment, and the Sure-Fire
    /// flag. Returns `None` when there's nothing actionable or the
    /// timeframes disagree past `multi_timeframe_min_agreement`.
    pub async fn evaluate(
        &self,
        pair: &Pair,
        market: &MarketDataCache,
        cache: &mut IndicatorCache,
        config: &RuntimeConfig,
    ) -> Option<ConfluenceSignal> {
        let book_analysis = market.get_book_analysis(pair).await;
        let fresh_book = book_analysis.filter(|book| (Utc::now() - book.ts).num_seconds() <= config.ai.book_score_max_age_seconds);

        let mut votes = Vec::new();
        for (index, label) in config.trading.timeframes.iter().enumerate() {
            let Some(tf) = parse_timeframe(label) else { continue };
            let candles = market.get_candles(pair, tf, config.trading.warmup_bars).await;
            if candles.len() < 60 {
                continue;
            }
            let regime = detect_regime(&candles, &config.regime);
            let (direction, strength, confidence, confluence_count) =
                self.aggregate_one_timeframe(pair, &candles, cache, regime, config, fresh_book);
            if direction == Direction::Neutral {
                continue;
            }
            votes.push(TimeframeVote {
                label: label.clone(),
                tf_weight: timeframe_weight(index),
                direction,
                strength,
                confidence,
                confluence_count,
                regime,
                candles,
            });
        }

        if votes.is_empty() {
            return None;
        }

        let long_weight: f64 = votes.iter().filter(|v| v.direction == Direction::Long).map(|v| v.tf_weight).sum();
        let short_weight: f64 = votes.iter().filter(|v| v.direction == Direction::Short).map(|v| v.tf_weight).sum();
        let overall_direction = if long_weight >= short_weight { Direction::Long } else { Direction::Short };

        let total_tf_weight: f64 = votes.iter().map(|v| v.tf_weight).sum();
        let agreeing_weight: f64 = votes.iter().filter(|v| v.direction == overall_direction).map(|v| v.tf_weight).sum();
        let timeframe_agreement = if total_tf_weight > 0.0 { agreeing_weight / total_tf_weight } else { 0.0 };

        let min_agreement = config.ai.multi_timeframe_min_agreement.to_f64().unwrap_or(0.6);
        if timeframe_agreement < min_agreement {
            debug!(pair = %pair, agreement = timeframe_agreement, "timeframes disagree past the minimum, skipping");
            return None;
        }

        let agreeing: Vec<&TimeframeVote> = votes.iter().filter(|v| v.direction == overall_direction).collect();
        let primary = agreeing
            .iter()
            .find(|v| v.label == config.ai.primary_timeframe)
            .or_else(|| agreeing.last())
            .copied()?;

        let agreeing_tf_weight: f64 = agreeing.iter().map(|v| v.tf_weight).sum();
        let weighted_strength: f64 =
            agreeing.iter().map(|v| v.tf_weight * v.strength.to_f64().unwrap_or(0.0)).sum::<f64>() / agreeing_tf_weight;
        let weighted_confidence: f64 =
            agreeing.iter().map(|v| v.tf_weight * v.confidence.to_f64().unwrap_or(0.0)).sum::<f64>() / agreeing_tf_weight;

        // Step 7 bonus: unanimous timeframe agreement adds +0.15 confidence;
        // partial agreement (still above the minimum gate) scales up to +0.10.
        let agreement_bonus = if timeframe_agreement >= 0.999 { 0.15 } else { timeframe_agreement * 0.10 };
        let weighted_confidence = (weighted_confidence + agreement_bonus).min(1.0);

        let confluence_count = primary.confluence_count;
        if confluence_count < 1 {
            return None;
        }

        let obi_threshold = config.ai.obi_threshold.to_f64().unwrap_or(0.3);
        let obi_agrees = fresh_book
            .map(|book| {
                let obi = book.obi.to_f64().unwrap_or(0.0);
                match overall_direction {
                    Direction::Long => obi >= obi_threshold,
                    Direction::Short => obi <= -obi_threshold,
                    Direction::Neutral => false,
                }
            })
            .unwrap_or(false);

        let session_multiplier = self.session.lock().unwrap().current_multiplier();
        let mut strength = (weighted_strength * session_multiplier).clamp(0.0, 1.0);
        let mut confidence = (weighted_confidence * session_multiplier).clamp(0.0, 1.0);

        let min_confidence = config.ai.min_confidence.to_f64().unwrap_or(0.55);
        let is_sure_fire = confluence_count >= config.ai.confluence_threshold && obi_agrees && confidence >= min_confidence;
        if is_sure_fire {
            strength = (strength + 0.15).min(1.0);
            confidence = (confidence + 0.10).min(1.0);
        }

        if confidence < min_confidence {
            return None;
        }

        let close_f64 = closes(&primary.candles);
        let high_f64 = highs(&primary.candles);
        let low_f64 = lows(&primary.candles);
        let atr_values = atr(&high_f64, &low_f64, &close_f64, 14);
        let last_atr = atr_values.iter().rev().find(|v| v.is_finite()).copied().unwrap_or(0.0);
        let entry = primary.candles.last()?.close;
        let entry_f64 = entry.to_f64().unwrap_or(0.0);

        let sl_tp = compute_sl_tp(
            overall_direction,
            entry_f64,
            last_atr,
            config.risk.atr_multiplier_sl,
            config.risk.atr_multiplier_tp,
            DEFAULT_SL_FLOOR_PCT,
            DEFAULT_TP_FLOOR_PCT,
        );

        let min_rr = config.ai.min_risk_reward_ratio.to_f64().unwrap_or(1.5);
        let rr_ok = {
            let risk = (entry_f64 - sl_tp.stop_loss).abs();
            let reward = (sl_tp.take_profit - entry_f64).abs();
            risk > 0.0 && reward / risk >= min_rr
        };
        if !rr_ok {
            return None;
        }

        Some(ConfluenceSignal {
            pair: pair.clone(),
            direction: overall_direction,
            strength: to_decimal(strength),
            confidence: to_decimal(confidence),
            confluence_count,
            is_sure_fire,
            obi_agrees,
            entry,
            sl: to_decimal(sl_tp.stop_loss),
            tp: to_decimal(sl_tp.take_profit),
            trend_regime: primary.regime.trend,
            vol_regime: primary.regime.vol,
            vol_level: primary.regime.vol_level,
            vol_expanding: primary.regime.vol_expanding,
            timeframe_agreement: to_decimal(timeframe_agreement),
            ts: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::trend::TrendStrategy;
    use rust_decimal_macros::dec;

    fn candle(i: i64, close: f64) -> Candle {
        let pair = Pair::new("BTC", "USDT");
        let c = Decimal::try_from(close).unwrap();
        Candle::new(&pair, TimeFrame::M1, i * 60, c, c + dec!(0.1), c - dec!(0.1), c, dec!(10), true)
    }

    #[tokio::test]
    async fn sustained_uptrend_across_timeframes_produces_a_long_signal() {
        let market = MarketDataCache::new(600, crate::market_data::DEFAULT_OUTLIER_THRESHOLD);
        let pair = Pair::new("BTC", "USDT");
        for i in 0..600 {
            let close = 100.0 + i as f64 * 0.1;
            market.update_candle(&pair, TimeFrame::M1, candle(i, close)).await;
        }

        let mut config = RuntimeConfig::default();
        config.trading.timeframes = vec!["1".to_string()];
        config.trading.warmup_bars = 200;
        config.ai.multi_timeframe_min_agreement = dec!(0.0);
        config.ai.min_confidence = dec!(0.01);
        config.ai.min_risk_reward_ratio = dec!(1.0);
        config.ai.primary_timeframe = "1".to_string();

        let engine = ConfluenceEngine::new(vec![Box::new(TrendStrategy::new())]);
        let mut cache = IndicatorCache::new();
        let signal = engine.evaluate(&pair, &market, &mut cache, &config).await;
        assert!(signal.is_some());
        assert_eq!(signal.unwrap().direction, Direction::Long);
    }
}
