//! Fire-and-forget performance mirror. Trade closes and signal evaluations
//! are pushed here from the Ledger write path; a bounded channel keeps this
//! from ever applying backpressure to trading itself — under load, events
//! are dropped and counted rather than queued unboundedly, the same
//! trade-off the teacher's notification manager makes by truncating its
//! oldest entries instead of growing forever.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::warn;

use crate::types::{CloseReason, Pair};

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum AnalyticsEvent {
    TradeClosed { pair: Pair, strategy: String, pnl: Decimal, reason: CloseReason, closed_at: DateTime<Utc> },
    SignalEvaluated { pair: Pair, confluence_count: usize, is_sure_fire: bool },
}

/// Sender handle cloned into every component that reports analytics events.
#[derive(Clone)]
pub struct AnalyticsSink {
    tx: mpsc::Sender<AnalyticsEvent>,
    dropped: Arc<AtomicU64>,
}

impl AnalyticsSink {
    /// Records the event or silently drops it if the channel is full.
    pub fn record(&self, event: AnalyticsEvent) {
        if self.tx.try_send(event).is_err() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped % 100 == 1 {
                warn!(dropped, "analytics mirror dropping events under backpressure");
            }
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Running in-process tallies, rebuilt from scratch each process lifetime —
/// the durable record of truth is the Ledger's `trades`/`signals` tables.
#[derive(Debug, Default)]
pub struct RollingStats {
    pub trades_closed: u64,
    pub wins: u64,
    pub losses: u64,
    pub total_pnl: Decimal,
    pub signals_seen: u64,
    pub sure_fire_signals: u64,
}

impl RollingStats {
    fn apply(&mut self, event: &AnalyticsEvent) {
        match event {
            AnalyticsEvent::TradeClosed { pnl, .. } => {
                self.trades_closed += 1;
                self.total_pnl += *pnl;
                if *pnl >= Decimal::ZERO {
                    self.wins += 1;
                } else {
                    self.losses += 1;
                }
            }
            AnalyticsEvent::SignalEvaluated { is_sure_fire, .. } => {
                self.signals_seen += 1;
                if *is_sure_fire {
                    self.sure_fire_signals += 1;
                }
            }
        }
    }

    pub fn win_rate(&self) -> Decimal {
        if self.trades_closed == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.wins) / Decimal::from(self.trades_closed) * Decimal::from(100)
    }
}

/// Builds the sink/receiver pair and spawns the drain task that folds events
/// into `RollingStats` behind a lock the CLI's `status` path can read.
pub fn spawn() -> (AnalyticsSink, Arc<tokio::sync::RwLock<RollingStats>>) {
    let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
    let dropped = Arc::new(AtomicU64::new(0));
    let stats = Arc::new(tokio::sync::RwLock::new(RollingStats::default()));

    let stats_writer = Arc::clone(&stats);
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            stats_writer.write().await.apply(&event);
        }
    });

    (AnalyticsSink { tx, dropped }, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn trade_closed_events_fold_into_rolling_stats() {
        let (sink, stats) = spawn();
        let pair: Pair = "BTC/USDT".parse().unwrap();
        sink.record(AnalyticsEvent::TradeClosed {
            pair: pair.clone(),
            strategy: "confluence".to_string(),
            pnl: dec!(50),
            reason: CloseReason::TakeProfit,
            closed_at: Utc::now(),
        });
        sink.record(AnalyticsEvent::TradeClosed {
            pair,
            strategy: "confluence".to_string(),
            pnl: dec!(-20),
            reason: CloseReason::StopLoss,
            closed_at: Utc::now(),
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let snapshot = stats.read().await;
        assert_eq!(snapshot.trades_closed, 2);
        assert_eq!(snapshot.wins, 1);
        assert_eq!(snapshot.losses, 1);
        assert_eq!(snapshot.total_pnl, dec!(30));
    }

    #[test]
    fn dropped_events_are_counted_not_panicked_on() {
        let (tx, _rx) = mpsc::channel(1);
        let sink = AnalyticsSink { tx, dropped: Arc::new(AtomicU64::new(0)) };
        sink.record(AnalyticsEvent::SignalEvaluated { pair: "BTC/USDT".parse().unwrap(), confluence_count: 3, is_sure_fire: false });
        sink.record(AnalyticsEvent::SignalEvaluated { pair: "BTC/USDT".parse().unwrap(), confluence_count: 3, is_sure_fire: false });
        assert!(sink.dropped_count() >= 1);
    }
}
