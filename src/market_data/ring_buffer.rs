use crate::types::Candle;

/// Pre-allocated circular buffer of candles. Append is O(1); reading the
/// newest-last view copies only when the request wraps the backing array.
#[derive(Debug, Clone)]
pub struct CandleRing {
    slots: Vec<Option<Candle>>,
    capacity: usize,
    head: usize, // index the next push will write to
    len: usize,
    outlier_threshold: rust_decimal::Decimal,
    outliers_rejected: u64,
}

impl CandleRing {
    pub fn new(capacity: usize, outlier_threshold: rust_decimal::Decimal) -> Self {
        Self {
            slots: vec![None; capacity],
            capacity,
            head: 0,
            len: 0,
            outlier_threshold,
            outliers_rejected: 0,
        }
    }

    fn last_index(&self) -> Option<usize> {
        if self.len == 0 {
            None
        } else {
            Some((self.head + self.capacity - 1) % self.capacity)
        }
    }

    pub fn last(&self) -> Option<&Candle> {
        self.last_index().and_then(|i| self.slots[i].as_ref())
    }

    /// Push a closed bar, applying the outlier policy: if the close deviates
    /// from the previous close by more than `outlier_threshold`, reject it
    /// and leave the previous candle intact.
    pub fn push_closed(&mut self, candle: Candle) -> bool {
        if let Some(prev) = self.last() {
            if !prev.close.is_zero() {
                let deviation = ((candle.close - prev.close) / prev.close).abs();
                if deviation > self.outlier_threshold {
                    self.outliers_rejected += 1;
                    return false;
                }
            }
        }
        self.slots[self.head] = Some(candle);
        self.head = (self.head + 1) % self.capacity;
        if self.len < self.capacity {
            self.len += 1;
        }
        true
    }

    /// Overwrite the in-progress (newest) bar without advancing the head.
    /// Used for partial, still-open candle updates.
    pub fn update_in_progress(&mut self, candle: Candle) {
        if self.len == 0 {
            self.slots[self.head] = Some(candle);
            self.head = (self.head + 1) % self.capacity;
            self.len = 1;
            return;
        }
        let idx = self.last_index().unwrap();
        self.slots[idx] = Some(candle);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn outliers_rejected(&self) -> u64 {
        self.outliers_rejected
    }

    /// Newest-last view of the last `n` candles (or fewer if not yet filled).
    pub fn last_n(&self, n: usize) -> Vec<Candle> {
        let n = n.min(self.len);
        let mut out = Vec::with_capacity(n);
        let start = (self.head + self.capacity - n) % self.capacity;
        for i in 0..n {
            let idx = (start + i) % self.capacity;
            if let Some(c) = self.slots[idx] {
                out.push(c);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Pair, TimeFrame};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn candle(open_time: i64, close: rust_decimal::Decimal) -> Candle {
        let pair = Pair::new("BTC", "USDT");
        Candle::new(&pair, TimeFrame::M1, open_time, close, close, close, close, dec!(1), true)
    }

    #[test]
    fn append_is_bounded_by_capacity_and_preserves_newest_last_order() {
        let mut ring = CandleRing::new(3, dec!(0.20));
        for i in 0..5 {
            ring.push_closed(candle(i * 60, Decimal::from(100 + i)));
        }
        let view = ring.last_n(3);
        assert_eq!(view.len(), 3);
        assert_eq!(view.last().unwrap().close, Decimal::from(104));
        assert_eq!(view.first().unwrap().close, Decimal::from(102));
    }

    #[test]
    fn outlier_bar_is_rejected_and_previous_candle_stays() {
        let mut ring = CandleRing::new(10, dec!(0.20));
        ring.push_closed(candle(0, dec!(100)));
        let accepted = ring.push_closed(candle(60, dec!(200))); // +100% jump
        assert!(!accepted);
        assert_eq!(ring.outliers_rejected(), 1);
        assert_eq!(ring.last().unwrap().close, dec!(100));
    }
}
