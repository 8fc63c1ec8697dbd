use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::Pair;

/// In-memory risk bookkeeping, persisted as a snapshot on each change and
/// restored from the ledger at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    pub bankroll: Decimal,
    pub initial_bankroll: Decimal,
    pub peak_bankroll: Decimal,
    pub daily_pnl: Decimal,
    pub daily_loss_day: NaiveDate,
    pub consecutive_wins: u32,
    pub consecutive_losses: u32,
    pub global_cooldown_until: Option<DateTime<Utc>>,
    pub per_pair_cooldown_until: HashMap<String, DateTime<Utc>>,
    pub per_strategy_cooldown_until: HashMap<String, DateTime<Utc>>,
    pub open_positions: HashSet<String>,
    pub total_exposure_usd: Decimal,
    pub trades_closed: u64,
}

impl RiskState {
    pub fn new(initial_bankroll: Decimal) -> Self {
        Self {
            bankroll: initial_bankroll,
            initial_bankroll,
            peak_bankroll: initial_bankroll,
            daily_pnl: Decimal::ZERO,
            daily_loss_day: Utc::now().date_naive(),
            consecutive_wins: 0,
            consecutive_losses: 0,
            global_cooldown_until: None,
            per_pair_cooldown_until: HashMap::new(),
            per_strategy_cooldown_until: HashMap::new(),
            open_positions: HashSet::new(),
            total_exposure_usd: Decimal::ZERO,
            trades_closed: 0,
        }
    }

    pub fn drawdown_pct(&self) -> Decimal {
        if self.peak_bankroll.is_zero() {
            return Decimal::ZERO;
        }
        ((self.peak_bankroll - self.bankroll) / self.peak_bankroll) * Decimal::from(100)
    }

    pub fn reset_daily_if_new_day(&mut self) {
        let today = Utc::now().date_naive();
        if today != self.daily_loss_day {
            self.daily_loss_day = today;
            self.daily_pnl = Decimal::ZERO;
        }
    }

    pub fn is_pair_cooling_down(&self, pair: &Pair) -> bool {
        self.per_pair_cooldown_until
            .get(&pair.canonical())
            .map(|until| Utc::now() < *until)
            .unwrap_or(false)
    }

    pub fn is_strategy_cooling_down(&self, strategy: &str) -> bool {
        self.per_strategy_cooldown_until
            .get(strategy)
            .map(|until| Utc::now() < *until)
            .unwrap_or(false)
    }

    pub fn is_globally_cooling_down(&self) -> bool {
        self.global_cooldown_until
            .map(|until| Utc::now() < until)
            .unwrap_or(false)
    }

    /// Applies close-side accounting: bankroll, peak, daily pnl, streaks, and
    /// (on a loss) the global cooldown.
    pub fn record_close(&mut self, pnl: Decimal, global_cooldown_seconds_on_loss: i64) {
        self.reset_daily_if_new_day();
        self.bankroll += pnl;
        self.peak_bankroll = self.peak_bankroll.max(self.bankroll);
        self.daily_pnl += pnl;
        self.trades_closed += 1;

        if pnl < Decimal::ZERO {
            self.consecutive_losses += 1;
            self.consecutive_wins = 0;
            self.global_cooldown_until =
                Some(Utc::now() + chrono::Duration::seconds(global_cooldown_seconds_on_loss));
        } else {
            self.consecutive_wins += 1;
            self.consecutive_losses = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn drawdown_tracks_peak_not_initial() {
        let mut state = RiskState::new(dec!(10000));
        state.record_close(dec!(500), 1800);
        assert_eq!(state.peak_bankroll, dec!(10500));
        state.record_close(dec!(-1000), 1800);
        assert_eq!(state.bankroll, dec!(9500));
        assert!(state.drawdown_pct() > Decimal::ZERO);
    }

    #[test]
    fn loss_sets_global_cooldown_and_resets_win_streak() {
        let mut state = RiskState::new(dec!(10000));
        state.consecutive_wins = 4;
        state.record_close(dec!(-100), 1800);
        assert_eq!(state.consecutive_wins, 0);
        assert_eq!(state.consecutive_losses, 1);
        assert!(state.is_globally_cooling_down());
    }
}
