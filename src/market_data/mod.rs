pub mod book;
pub mod ring_buffer;

pub use book::*;
pub use ring_buffer::*;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::RwLock;
use tracing::warn;

use crate::types::{Candle, Pair, TimeFrame, Ticker};

struct PairCache {
    candles: HashMap<TimeFrame, CandleRing>,
    ticker: Option<Ticker>,
    book: Option<BookSnapshot>,
    book_analysis: Option<BookAnalysis>,
    last_update: i64, // unix seconds, across any update path
}

impl PairCache {
    fn new(capacity: usize, outlier_threshold: Decimal, timeframes: &[TimeFrame]) -> Self {
        let mut candles = HashMap::new();
        for tf in timeframes {
            candles.insert(*tf, CandleRing::new(capacity, outlier_threshold));
        }
        Self {
            candles,
            ticker: None,
            book: None,
            book_analysis: None,
            last_update: 0,
        }
    }
}

/// Owned by the stream-consumer task (the sole writer); scan-loop and
/// position-loop read snapshots rather than holding a lock across an await
/// point.
pub struct MarketDataCache {
    capacity: usize,
    default_outlier_threshold: Decimal,
    per_pair_outlier_threshold: HashMap<String, Decimal>,
    pairs: RwLock<HashMap<String, PairCache>>,
}

impl MarketDataCache {
    pub fn new(capacity: usize, default_outlier_threshold: Decimal) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            default_outlier_threshold,
            per_pair_outlier_threshold: HashMap::new(),
            pairs: RwLock::new(HashMap::new()),
        })
    }

    pub fn with_pair_outlier_override(mut self, pair: &Pair, threshold: Decimal) -> Self {
        self.per_pair_outlier_threshold.insert(pair.canonical(), threshold);
        self
    }

    fn outlier_threshold_for(&self, pair: &Pair) -> Decimal {
        self.per_pair_outlier_threshold
            .get(&pair.canonical())
            .copied()
            .unwrap_or(self.default_outlier_threshold)
    }

    async fn ensure_pair(&self, pair: &Pair, timeframes: &[TimeFrame]) {
        let mut pairs = self.pairs.write().await;
        pairs.entry(pair.canonical()).or_insert_with(|| {
            PairCache::new(self.capacity, self.outlier_threshold_for(pair), timeframes)
        });
    }

    pub async fn update_candle(&self, pair: &Pair, timeframe: TimeFrame, candle: Candle) {
        self.ensure_pair(pair, &[timeframe]).await;
        let mut pairs = self.pairs.write().await;
        if let Some(cache) = pairs.get_mut(&pair.canonical()) {
            let ring = cache
                .candles
                .entry(timeframe)
                .or_insert_with(|| CandleRing::new(self.capacity, self.outlier_threshold_for(pair)));
            if candle.is_closed {
                if !ring.push_closed(candle) {
                    warn!(pair = %pair, timeframe = ?timeframe, "rejected outlier candle");
                }
            } else {
                ring.update_in_progress(candle);
            }
            cache.last_update = Utc::now().timestamp();
        }
    }

    pub async fn update_ticker(&self, pair: &Pair, ticker: Ticker) {
        self.ensure_pair(pair, &[]).await;
        let mut pairs = self.pairs.write().await;
        if let Some(cache) = pairs.get_mut(&pair.canonical()) {
            cache.last_update = Utc::now().timestamp();
            cache.ticker = Some(ticker);
        }
    }

    pub async fn update_book(&self, pair: &Pair, book: BookSnapshot, obi_levels: usize) {
        self.ensure_pair(pair, &[]).await;
        let mut pairs = self.pairs.write().await;
        if let Some(cache) = pairs.get_mut(&pair.canonical()) {
            cache.last_update = Utc::now().timestamp();
            cache.book_analysis = Some(book.analyze(obi_levels));
            cache.book = Some(book);
        }
    }

    pub async fn get_candles(&self, pair: &Pair, timeframe: TimeFrame, n: usize) -> Vec<Candle> {
        let pairs = self.pairs.read().await;
        pairs
            .get(&pair.canonical())
            .and_then(|cache| cache.candles.get(&timeframe))
            .map(|ring| ring.last_n(n))
            .unwrap_or_default()
    }

    pub async fn get_ticker(&self, pair: &Pair) -> Option<Ticker> {
        let pairs = self.pairs.read().await;
        pairs.get(&pair.canonical()).and_then(|cache| cache.ticker)
    }

    pub async fn get_book_analysis(&self, pair: &Pair) -> Option<BookAnalysis> {
        let pairs = self.pairs.read().await;
        pairs.get(&pair.canonical()).and_then(|cache| cache.book_analysis)
    }

    pub async fn last_update_ts(&self, pair: &Pair) -> i64 {
        let pairs = self.pairs.read().await;
        pairs.get(&pair.canonical()).map(|c| c.last_update).unwrap_or(0)
    }

    pub async fn is_stale(&self, pair: &Pair, max_age_seconds: i64) -> bool {
        let last = self.last_update_ts(pair).await;
        if last == 0 {
            return true;
        }
        Utc::now().timestamp() - last > max_age_seconds
    }

    pub async fn outliers_rejected(&self, pair: &Pair, timeframe: TimeFrame) -> u64 {
        let pairs = self.pairs.read().await;
        pairs
            .get(&pair.canonical())
            .and_then(|cache| cache.candles.get(&timeframe))
            .map(|ring| ring.outliers_rejected())
            .unwrap_or(0)
    }
}

pub const DEFAULT_OUTLIER_THRESHOLD: Decimal = dec!(0.20);
pub const SCAN_LOOP_STALE_SECONDS: i64 = 180;
pub const POSITION_LOOP_STALE_SECONDS: i64 = 120;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(open_time: i64, close: Decimal, is_closed: bool) -> Candle {
        let pair = Pair::new("BTC", "USDT");
        Candle::new(&pair, TimeFrame::M1, open_time, close, close, close, close, dec!(1), is_closed)
    }

    #[tokio::test]
    async fn staleness_flips_once_max_age_elapses_with_no_updates() {
        let cache = MarketDataCache::new(100, DEFAULT_OUTLIER_THRESHOLD);
        let pair = Pair::new("BTC", "USDT");
        assert!(cache.is_stale(&pair, 180).await);
        cache.update_candle(&pair, TimeFrame::M1, candle(0, dec!(100), true)).await;
        assert!(!cache.is_stale(&pair, 180).await);
    }

    #[tokio::test]
    async fn get_candles_returns_newest_last_view() {
        let cache = MarketDataCache::new(5, DEFAULT_OUTLIER_THRESHOLD);
        let pair = Pair::new("ETH", "USDT");
        for i in 0..5 {
            cache
                .update_candle(&pair, TimeFrame::M1, candle(i * 60, Decimal::from(100 + i), true))
                .await;
        }
        let view = cache.get_candles(&pair, TimeFrame::M1, 3).await;
        assert_eq!(view.len(), 3);
        assert_eq!(view.last().unwrap().close, Decimal::from(104));
    }
}
