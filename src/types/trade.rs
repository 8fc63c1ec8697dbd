use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::{Pair, Regime, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Open,
    Closed,
    Cancelled,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    SmartExitTier(u8),
    Trailing,
    OperatorClose,
    MaxDuration,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::StopLoss => "stop_loss",
            CloseReason::TakeProfit => "take_profit",
            CloseReason::SmartExitTier(_) => "smart_exit_tier",
            CloseReason::Trailing => "trailing",
            CloseReason::OperatorClose => "operator_close",
            CloseReason::MaxDuration => "max_duration",
        }
    }
}

/// Tightens monotonically toward price. Must never loosen — the position
/// loop relies on this invariant to skip redundant exchange-stop amendments.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrailingState {
    pub initial_sl: Decimal,
    pub current_sl: Decimal,
    pub breakeven_activated: bool,
    pub trailing_activated: bool,
    pub trailing_high: Decimal,
    pub trailing_low: Decimal,
}

impl TrailingState {
    pub fn new(initial_sl: Decimal, entry: Decimal) -> Self {
        Self {
            initial_sl,
            current_sl: initial_sl,
            breakeven_activated: false,
            trailing_activated: false,
            trailing_high: entry,
            trailing_low: entry,
        }
    }

    /// Move the stop for a long position. Returns `true` if the stop changed.
    pub fn tighten_long(&mut self, candidate: Decimal) -> bool {
        if candidate > self.current_sl {
            self.current_sl = candidate;
            true
        } else {
            false
        }
    }

    /// Move the stop for a short position. Returns `true` if the stop changed.
    pub fn tighten_short(&mut self, candidate: Decimal) -> bool {
        if candidate < self.current_sl {
            self.current_sl = candidate;
            true
        } else {
            false
        }
    }
}

/// A partial close recorded against `Trade::metadata`'s smart-exit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialExit {
    pub tier: u8,
    pub quantity: Decimal,
    pub price: Decimal,
    pub pnl: Decimal,
    pub at: DateTime<Utc>,
}

/// Forward-compatible extension fields that don't warrant a typed column:
/// planned-vs-filled prices, exchange-stop order id, regime at entry, and
/// fee rates used at the time of the trade.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeMetadata {
    pub planned_entry: Option<Decimal>,
    pub filled_entry: Option<Decimal>,
    pub exchange_stop_order_id: Option<String>,
    pub partial_exits: Vec<PartialExit>,
    pub maker_fee_rate: Option<Decimal>,
    pub taker_fee_rate: Option<Decimal>,
    pub regime_at_entry: Option<String>,
    pub exit_attempts: u32,
    pub extra: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub pair: Pair,
    pub side: Side,
    pub status: TradeStatus,
    pub entry_price: Decimal,
    pub exit_price: Option<Decimal>,
    pub quantity: Decimal,
    pub entry_fee: Decimal,
    pub exit_fee: Decimal,
    pub pnl: Option<Decimal>,
    pub pnl_pct: Option<Decimal>,
    pub strategy: String,
    pub confidence: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub trailing_state: TrailingState,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub close_reason: Option<CloseReason>,
    pub metadata: TradeMetadata,
}

impl Trade {
    pub fn open(
        pair: Pair,
        side: Side,
        entry_price: Decimal,
        quantity: Decimal,
        strategy: &str,
        confidence: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
        regime: Regime,
    ) -> Self {
        let now = Utc::now();
        Self {
            trade_id: Uuid::new_v4().to_string(),
            pair,
            side,
            status: TradeStatus::Open,
            entry_price,
            exit_price: None,
            quantity,
            entry_fee: Decimal::ZERO,
            exit_fee: Decimal::ZERO,
            pnl: None,
            pnl_pct: None,
            strategy: strategy.to_string(),
            confidence,
            stop_loss,
            take_profit,
            trailing_state: TrailingState::new(stop_loss, entry_price),
            entry_time: now,
            exit_time: None,
            close_reason: None,
            metadata: TradeMetadata {
                regime_at_entry: Some(format!("{:?}/{:?}", regime.trend, regime.vol)),
                ..Default::default()
            },
        }
    }

    pub fn unrealized_pnl(&self, current_price: Decimal) -> Decimal {
        let direction = Decimal::from(self.side.sign());
        (current_price - self.entry_price) * self.quantity * direction
    }

    pub fn unrealized_pnl_pct(&self, current_price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        let direction = Decimal::from(self.side.sign());
        (current_price - self.entry_price) / self.entry_price * direction * Decimal::from(100)
    }

    /// Idempotent: closing an already-closed trade is a no-op, per the
    /// at-most-once trade-close guarantee.
    pub fn close(&mut self, exit_price: Decimal, reason: CloseReason) {
        if self.status != TradeStatus::Open {
            return;
        }
        let direction = Decimal::from(self.side.sign());
        let gross = (exit_price - self.entry_price) * self.quantity * direction;
        let partial_pnl: Decimal = self.metadata.partial_exits.iter().map(|p| p.pnl).sum();
        let net = gross - self.entry_fee - self.exit_fee + partial_pnl;

        self.exit_price = Some(exit_price);
        self.pnl = Some(net);
        self.pnl_pct = if self.entry_price.is_zero() {
            Some(Decimal::ZERO)
        } else {
            Some(net / (self.entry_price * self.quantity) * Decimal::from(100))
        };
        self.exit_time = Some(Utc::now());
        self.close_reason = Some(reason);
        self.status = TradeStatus::Closed;
    }

    pub fn mark_error(&mut self) {
        if self.status == TradeStatus::Open {
            self.status = TradeStatus::Error;
            self.exit_time = Some(Utc::now());
        }
    }

    pub fn notional(&self) -> Decimal {
        self.entry_price * self.quantity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_trade() -> Trade {
        let regime = Regime {
            trend: super::super::TrendRegime::Trend,
            vol: super::super::VolRegime::Mid,
            vol_level: 0.4,
            vol_expanding: false,
        };
        Trade::open(
            Pair::new("BTC", "USDT"),
            Side::Buy,
            dec!(100),
            dec!(1),
            "trend",
            dec!(0.7),
            dec!(97),
            dec!(106),
            regime,
        )
    }

    #[test]
    fn close_is_idempotent() {
        let mut trade = sample_trade();
        trade.close(dec!(105), CloseReason::TakeProfit);
        let pnl_after_first_close = trade.pnl;
        let exit_time_after_first_close = trade.exit_time;

        trade.close(dec!(999), CloseReason::OperatorClose);

        assert_eq!(trade.pnl, pnl_after_first_close);
        assert_eq!(trade.exit_time, exit_time_after_first_close);
        assert_eq!(trade.close_reason, Some(CloseReason::TakeProfit));
    }

    #[test]
    fn exit_time_is_never_before_entry_time() {
        let mut trade = sample_trade();
        trade.close(dec!(105), CloseReason::TakeProfit);
        assert!(trade.exit_time.unwrap() >= trade.entry_time);
    }

    #[test]
    fn pnl_matches_formula_with_fees_and_partials() {
        let mut trade = sample_trade();
        trade.entry_fee = dec!(0.5);
        trade.exit_fee = dec!(0.5);
        trade.metadata.partial_exits.push(PartialExit {
            tier: 1,
            quantity: dec!(0.2),
            price: dec!(103),
            pnl: dec!(0.6),
            at: Utc::now(),
        });
        trade.close(dec!(106), CloseReason::TakeProfit);
        // gross = (106-100)*1 = 6; net = 6 - 0.5 - 0.5 + 0.6 = 5.6
        assert_eq!(trade.pnl, Some(dec!(5.6)));
    }

    #[test]
    fn trailing_stop_never_loosens_for_longs() {
        let mut state = TrailingState::new(dec!(97), dec!(100));
        assert!(state.tighten_long(dec!(100)));
        assert!(!state.tighten_long(dec!(99)));
        assert_eq!(state.current_sl, dec!(100));
    }

    #[test]
    fn trailing_stop_never_loosens_for_shorts() {
        let mut state = TrailingState::new(dec!(103), dec!(100));
        assert!(state.tighten_short(dec!(100)));
        assert!(!state.tighten_short(dec!(101)));
        assert_eq!(state.current_sl, dec!(100));
    }
}
