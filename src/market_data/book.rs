use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub bids: Vec<BookLevel>, // sorted best-first (descending price)
    pub asks: Vec<BookLevel>, // sorted best-first (ascending price)
    pub ts: DateTime<Utc>,
}

/// Derived microstructure summary. `book_analysis.ts` is recomputed at most
/// once per tick and must never be newer than the ticker it was derived
/// alongside.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BookAnalysis {
    pub obi: Decimal,
    pub book_score: Decimal,
    pub spread_pct: Decimal,
    pub whale_flag: bool,
    pub liquidity_score: Decimal,
    pub ts: DateTime<Utc>,
}

impl BookSnapshot {
    pub fn is_stale(&self, max_age_seconds: i64) -> bool {
        (Utc::now() - self.ts).num_seconds() > max_age_seconds
    }

    fn mid_price(&self) -> Option<Decimal> {
        Some((self.bids.first()?.price + self.asks.first()?.price) / dec!(2))
    }

    /// Order book imbalance over the top `levels`: `(bid_vol - ask_vol) /
    /// (bid_vol + ask_vol)`, in [-1, 1].
    fn obi(&self, levels: usize) -> Decimal {
        let bid_vol: Decimal = self.bids.iter().take(levels).map(|l| l.size).sum();
        let ask_vol: Decimal = self.asks.iter().take(levels).map(|l| l.size).sum();
        let total = bid_vol + ask_vol;
        if total.is_zero() {
            return Decimal::ZERO;
        }
        (bid_vol - ask_vol) / total
    }

    fn spread_pct(&self) -> Decimal {
        match (self.bids.first(), self.asks.first()) {
            (Some(bid), Some(ask)) => {
                let mid = (bid.price + ask.price) / dec!(2);
                if mid.is_zero() {
                    Decimal::ZERO
                } else {
                    (ask.price - bid.price) / mid * dec!(100)
                }
            }
            _ => Decimal::ZERO,
        }
    }

    /// A single large level relative to the average top-5 size on either side.
    fn whale_flag(&self) -> bool {
        let avg = |levels: &[BookLevel]| -> Decimal {
            let take: Vec<_> = levels.iter().take(5).collect();
            if take.is_empty() {
                return Decimal::ZERO;
            }
            take.iter().map(|l| l.size).sum::<Decimal>() / Decimal::from(take.len())
        };
        let bid_avg = avg(&self.bids);
        let ask_avg = avg(&self.asks);
        self.bids.iter().take(5).any(|l| !bid_avg.is_zero() && l.size > bid_avg * dec!(5))
            || self.asks.iter().take(5).any(|l| !ask_avg.is_zero() && l.size > ask_avg * dec!(5))
    }

    fn liquidity_score(&self) -> Decimal {
        let top5_bid: Decimal = self.bids.iter().take(5).map(|l| l.size).sum();
        let top5_ask: Decimal = self.asks.iter().take(5).map(|l| l.size).sum();
        (top5_bid + top5_ask).min(dec!(1000)) / dec!(1000)
    }

    /// Composite book score in [-1, 1]: OBI weighted down by wide spread,
    /// bumped by a whale level agreeing with the OBI's sign.
    pub fn analyze(&self, obi_levels: usize) -> BookAnalysis {
        let obi = self.obi(obi_levels);
        let spread_pct = self.spread_pct();
        let whale_flag = self.whale_flag();
        let liquidity_score = self.liquidity_score();

        let spread_penalty = if spread_pct > dec!(0.1) { dec!(0.7) } else { Decimal::ONE };
        let mut score = obi * spread_penalty;
        if whale_flag {
            score = (score + score.signum() * dec!(0.1)).max(dec!(-1)).min(dec!(1));
        }

        BookAnalysis {
            obi,
            book_score: score.max(dec!(-1)).min(dec!(1)),
            spread_pct,
            whale_flag,
            liquidity_score,
            ts: self.ts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> BookSnapshot {
        BookSnapshot {
            bids: vec![
                BookLevel { price: dec!(100.00), size: dec!(10) },
                BookLevel { price: dec!(99.95), size: dec!(5) },
            ],
            asks: vec![
                BookLevel { price: dec!(100.05), size: dec!(4) },
                BookLevel { price: dec!(100.10), size: dec!(3) },
            ],
            ts: Utc::now(),
        }
    }

    #[test]
    fn book_score_is_bounded_and_signed_with_obi() {
        let snap = snapshot();
        let analysis = snap.analyze(5);
        assert!(analysis.book_score >= dec!(-1) && analysis.book_score <= dec!(1));
        assert!(analysis.obi > Decimal::ZERO); // more bid depth than ask depth
        assert!(analysis.book_score > Decimal::ZERO);
    }

    #[test]
    fn analysis_timestamp_never_outpaces_source_snapshot() {
        let snap = snapshot();
        let analysis = snap.analyze(5);
        assert_eq!(analysis.ts, snap.ts);
    }
}
