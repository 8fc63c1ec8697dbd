use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Pair, TimeFrame};

/// A single OHLCV bar. `open_time` is the bar-open epoch second; the newest
/// bar may be in-progress (`is_closed = false`) and updatable in place.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub pair_hash: u64,
    pub timeframe: TimeFrame,
    pub open_time: i64,
    pub close_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub is_closed: bool,
}

impl Candle {
    pub fn new(
        pair: &Pair,
        timeframe: TimeFrame,
        open_time: i64,
        o: Decimal,
        h: Decimal,
        l: Decimal,
        c: Decimal,
        v: Decimal,
        is_closed: bool,
    ) -> Self {
        Self {
            pair_hash: pair_hash(pair),
            timeframe,
            open_time,
            close_time: open_time + timeframe.to_seconds(),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: v,
            is_closed,
        }
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    pub fn range(&self) -> Decimal {
        self.high - self.low
    }

    pub fn body_size(&self) -> Decimal {
        (self.close - self.open).abs()
    }

    pub fn typical_price(&self) -> Decimal {
        (self.high + self.low + self.close) / Decimal::from(3)
    }

    /// Garman-Klass volatility contribution of this single bar.
    pub fn garman_klass_term(&self) -> f64 {
        let h: f64 = self.high.try_into().unwrap_or(0.0);
        let l: f64 = self.low.try_into().unwrap_or(0.0);
        let o: f64 = self.open.try_into().unwrap_or(0.0);
        let c: f64 = self.close.try_into().unwrap_or(0.0);
        if o <= 0.0 || l <= 0.0 || h <= 0.0 {
            return 0.0;
        }
        let hl = 0.5 * (h / l).ln().powi(2);
        let co = (2.0 * 2f64.ln() - 1.0) * (c / o).ln().powi(2);
        (hl - co).max(0.0)
    }
}

fn pair_hash(pair: &Pair) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    pair.hash(&mut hasher);
    hasher.finish()
}

/// Resample a newest-last series of 1-minute candles into `bucket_minutes`
/// buckets: open = first, high = max, low = min, close = last, volume = sum.
/// Drops a trailing partial bucket unless `include_partial` is set — this is
/// what lets `use_closed_candles_only` drop the in-progress bar.
pub fn resample(candles: &[Candle], bucket_minutes: i64, include_partial: bool) -> Vec<Candle> {
    if candles.is_empty() || bucket_minutes <= 1 {
        return candles.to_vec();
    }
    let bucket_seconds = bucket_minutes * 60;
    let mut out: Vec<Candle> = Vec::new();
    let mut current_bucket_start = i64::MIN;
    for candle in candles {
        let bucket_start = (candle.open_time / bucket_seconds) * bucket_seconds;
        if bucket_start != current_bucket_start {
            out.push(Candle {
                pair_hash: candle.pair_hash,
                timeframe: candle.timeframe,
                open_time: bucket_start,
                close_time: bucket_start + bucket_seconds,
                open: candle.open,
                high: candle.high,
                low: candle.low,
                close: candle.close,
                volume: candle.volume,
                is_closed: candle.is_closed,
            });
            current_bucket_start = bucket_start;
        } else if let Some(last) = out.last_mut() {
            last.high = last.high.max(candle.high);
            last.low = last.low.min(candle.low);
            last.close = candle.close;
            last.volume += candle.volume;
            last.is_closed = candle.is_closed;
        }
    }
    if !include_partial {
        if let Some(last) = out.last() {
            if !last.is_closed {
                out.pop();
            }
        }
    }
    out
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Ticker {
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Decimal,
    pub ts: DateTime<Utc>,
}

impl Ticker {
    pub fn is_crossed(&self) -> bool {
        self.bid > self.ask
    }

    pub fn mid_price(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::from(2)
    }

    pub fn spread_pct(&self) -> Decimal {
        if self.mid_price().is_zero() {
            return Decimal::ZERO;
        }
        (self.ask - self.bid) / self.mid_price() * Decimal::from(100)
    }

    pub fn is_stale(&self, max_age_seconds: i64) -> bool {
        (Utc::now() - self.ts).num_seconds() > max_age_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle_at(open_time: i64, close: Decimal, is_closed: bool) -> Candle {
        let pair = Pair::new("BTC", "USDT");
        Candle::new(&pair, TimeFrame::M1, open_time, close, close, close, close, dec!(1), is_closed)
    }

    #[test]
    fn resample_is_idempotent_across_repeated_calls() {
        let candles: Vec<Candle> = (0..20)
            .map(|i| candle_at(i * 60, Decimal::from(100 + i), true))
            .collect();
        let once = resample(&candles, 5, true);
        let twice = resample(&once.clone(), 5, true);
        assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(twice.iter()) {
            assert_eq!(a.open_time, b.open_time);
            assert_eq!(a.close, b.close);
        }
    }

    #[test]
    fn resample_drops_partial_trailing_bucket_when_requested() {
        let mut candles: Vec<Candle> = (0..10)
            .map(|i| candle_at(i * 60, Decimal::from(100 + i), true))
            .collect();
        candles.push(candle_at(600, dec!(111), false));
        let closed_only = resample(&candles, 5, false);
        assert!(closed_only.iter().all(|c| c.is_closed));
    }

    #[test]
    fn ticker_spread_and_staleness() {
        let t = Ticker {
            bid: dec!(100),
            ask: dec!(100.10),
            last: dec!(100.05),
            ts: Utc::now() - chrono::Duration::seconds(200),
        };
        assert!(!t.is_crossed());
        assert!(t.spread_pct() > Decimal::ZERO);
        assert!(t.is_stale(180));
        assert!(!t.is_stale(300));
    }
}
