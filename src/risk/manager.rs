use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::types::{ConfluenceSignal, EngineState, Pair, RiskState, VolRegime};

const CORRELATION_GROUP_CAP: usize = 2;
const MAX_SIGNAL_AGE_SECONDS: i64 = 30;
const MIN_NOTIONAL_USD: Decimal = dec!(10);
const TRADE_HISTORY_WINDOW: usize = 200;
const ROR_MIN_TRADES: u64 = 50;

fn to_decimal(value: f64) -> Decimal {
    Decimal::try_from(value).unwrap_or(Decimal::ZERO)
}

/// First failing pre-trade gate, in the order `check_gates` evaluates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateFailure {
    EngineNotAccepting,
    BankrollDepleted,
    DailyLossLimitHit,
    GlobalCooldown,
    PairCooldown,
    StrategyCooldown,
    MaxConcurrentPositions,
    MaxDailyTrades,
    QuietHours,
    HourlyRateLimit,
    CorrelationGroupLimit,
    StopDistanceInvalid,
    RiskRewardTooLow,
    SignalStale,
    SignalConfidenceTooLow,
    PortfolioHeatExceeded,
    RiskOfRuinTooHigh,
}

impl std::fmt::Display for GateFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Everything `compute_size` needs beyond the signal itself: current book
/// conditions and the contributing strategy's trailing performance, used for
/// the spread penalty, volatility multiplier, and the Kelly cap.
#[derive(Debug, Clone)]
pub struct SizingInputs {
    pub spread_pct: Decimal,
    pub strategy_win_rate: Option<f64>,
    pub strategy_avg_win: Option<Decimal>,
    pub strategy_avg_loss: Option<Decimal>,
}

/// Pre-trade gates, fractional-plus-Kelly-capped sizing, and close-side
/// bookkeeping (bankroll, streaks, cooldowns, risk of ruin). Holds no
/// exchange or strategy state of its own — only the risk ledger.
pub struct RiskManager {
    config: Arc<RwLock<RuntimeConfig>>,
    state: RwLock<RiskState>,
    open_pairs: RwLock<HashMap<String, Pair>>,
    recent_entries: RwLock<VecDeque<DateTime<Utc>>>,
    daily_trade_count: RwLock<(chrono::NaiveDate, u32)>,
    trade_pnls: RwLock<VecDeque<Decimal>>,
    trade_notionals: RwLock<VecDeque<Decimal>>,
}

impl RiskManager {
    pub fn new(config: Arc<RwLock<RuntimeConfig>>, initial_bankroll: Decimal) -> Self {
        Self {
            config,
            state: RwLock::new(RiskState::new(initial_bankroll)),
            open_pairs: RwLock::new(HashMap::new()),
            recent_entries: RwLock::new(VecDeque::new()),
            daily_trade_count: RwLock::new((Utc::now().date_naive(), 0)),
            trade_pnls: RwLock::new(VecDeque::new()),
            trade_notionals: RwLock::new(VecDeque::new()),
        }
    }

    pub async fn state_snapshot(&self) -> RiskState {
        self.state.read().await.clone()
    }

    /// Used at startup to restore bankroll, streaks, and cooldowns from the
    /// ledger's last persisted snapshot.
    pub async fn restore_state(&self, state: RiskState) {
        *self.state.write().await = state;
    }

    pub fn config_arc(&self) -> Arc<RwLock<RuntimeConfig>> {
        Arc::clone(&self.config)
    }

    /// Registers a newly-opened trade. `is_restart` skips the daily trade
    /// counter and hourly throttle so rehydrated positions don't double-count
    /// against limits meant to bound new entries.
    pub async fn register_open(&self, trade_id: &str, pair: &Pair, is_restart: bool, notional: Decimal) {
        self.open_pairs.write().await.insert(trade_id.to_string(), pair.clone());
        {
            let mut state = self.state.write().await;
            state.open_positions.insert(trade_id.to_string());
            state.total_exposure_usd += notional;
        }
        if !is_restart {
            let today = Utc::now().date_naive();
            let mut count = self.daily_trade_count.write().await;
            if count.0 != today {
                *count = (today, 0);
            }
            count.1 += 1;
            self.recent_entries.write().await.push_back(Utc::now());
        }
    }

    pub async fn register_close(&self, trade_id: &str, pnl: Decimal, notional: Decimal) {
        let pair = self.open_pairs.write().await.remove(trade_id);
        let config = self.config.read().await.clone();
        {
            let mut state = self.state.write().await;
            state.open_positions.remove(trade_id);
            state.total_exposure_usd = (state.total_exposure_usd - notional).max(Decimal::ZERO);
            state.record_close(pnl, config.risk.global_cooldown_seconds_on_loss);
        }
        let mut pnls = self.trade_pnls.write().await;
        pnls.push_back(pnl);
        while pnls.len() > TRADE_HISTORY_WINDOW {
            pnls.pop_front();
        }
        let mut notionals = self.trade_notionals.write().await;
        notionals.push_back(notional);
        while notionals.len() > TRADE_HISTORY_WINDOW {
            notionals.pop_front();
        }
        if pair.is_none() {
            warn!(trade_id, "closing a trade RiskManager never registered as open");
        }
    }

    fn purge_stale_entries(entries: &mut VecDeque<DateTime<Utc>>) {
        let cutoff = Utc::now() - chrono::Duration::minutes(60);
        while entries.front().map(|t| *t < cutoff).unwrap_or(false) {
            entries.pop_front();
        }
    }

    /// Evaluates the ordered pre-trade gates and reports the first failure.
    /// `estimated_notional` is a rough risk-based size used only for the
    /// portfolio-heat gate; the real cap is enforced in `compute_size`.
    pub async fn check_gates(
        &self,
        engine_state: &EngineState,
        pair: &Pair,
        strategy: &str,
        signal: &ConfluenceSignal,
        estimated_notional: Decimal,
    ) -> Result<(), GateFailure> {
        if !engine_state.accepts_new_entries() {
            return Err(GateFailure::EngineNotAccepting);
        }

        let config = self.config.read().await.clone();
        let mut state = self.state.write().await;
        state.reset_daily_if_new_day();

        if state.bankroll <= Decimal::ZERO {
            return Err(GateFailure::BankrollDepleted);
        }

        if state.daily_pnl <= -(state.initial_bankroll * config.risk.max_daily_loss) {
            return Err(GateFailure::DailyLossLimitHit);
        }

        if state.is_globally_cooling_down() {
            return Err(GateFailure::GlobalCooldown);
        }
        if state.is_pair_cooling_down(pair) {
            return Err(GateFailure::PairCooldown);
        }
        if state.is_strategy_cooling_down(strategy) {
            return Err(GateFailure::StrategyCooldown);
        }

        if state.open_positions.len() >= config.trading.max_concurrent_positions {
            return Err(GateFailure::MaxConcurrentPositions);
        }

        if config.risk.max_daily_trades > 0 {
            let today = Utc::now().date_naive();
            let count = self.daily_trade_count.read().await;
            let today_count = if count.0 == today { count.1 } else { 0 };
            if today_count >= config.risk.max_daily_trades {
                return Err(GateFailure::MaxDailyTrades);
            }
        }

        let current_hour = Utc::now().hour();
        if config.trading.quiet_hours_utc.contains(&current_hour) {
            return Err(GateFailure::QuietHours);
        }

        {
            let mut entries = self.recent_entries.write().await;
            Self::purge_stale_entries(&mut entries);
            if entries.len() as u32 >= config.trading.max_trades_per_hour {
                return Err(GateFailure::HourlyRateLimit);
            }
        }

        let group = pair.correlation_group();
        let open_pairs = self.open_pairs.read().await;
        let correlated_count = open_pairs.values().filter(|p| p.correlation_group() == group).count();
        if correlated_count >= CORRELATION_GROUP_CAP {
            return Err(GateFailure::CorrelationGroupLimit);
        }
        drop(open_pairs);

        let sl_distance_pct = if signal.entry.is_zero() {
            Decimal::ZERO
        } else {
            (signal.entry - signal.sl).abs() / signal.entry
        };
        if sl_distance_pct <= Decimal::ZERO || sl_distance_pct > dec!(0.10) {
            return Err(GateFailure::StopDistanceInvalid);
        }
        match signal.risk_reward_ratio() {
            Some(rr) if rr >= config.ai.min_risk_reward_ratio => {}
            _ => return Err(GateFailure::RiskRewardTooLow),
        }

        if signal.age_seconds() > MAX_SIGNAL_AGE_SECONDS {
            return Err(GateFailure::SignalStale);
        }
        if signal.confidence < config.ai.min_confidence {
            return Err(GateFailure::SignalConfidenceTooLow);
        }

        let capacity = state.bankroll * config.risk.max_total_exposure_pct;
        if state.total_exposure_usd + estimated_notional > capacity {
            return Err(GateFailure::PortfolioHeatExceeded);
        }

        if state.trades_closed >= ROR_MIN_TRADES {
            drop(state);
            let ror = self.risk_of_ruin().await;
            if ror > config.risk.risk_of_ruin_threshold {
                return Err(GateFailure::RiskOfRuinTooHigh);
            }
        }

        Ok(())
    }

    async fn risk_of_ruin(&self) -> Decimal {
        let pnls = self.trade_pnls.read().await;
        let notionals = self.trade_notionals.read().await;
        let state = self.state.read().await;
        if pnls.len() < ROR_MIN_TRADES as usize || notionals.is_empty() {
            return Decimal::ZERO;
        }
        let edge: Decimal = pnls.iter().sum::<Decimal>() / Decimal::from(pnls.len() as u32);
        let avg_bet: Decimal = notionals.iter().sum::<Decimal>() / Decimal::from(notionals.len() as u32);
        if edge <= Decimal::ZERO || avg_bet.is_zero() {
            return Decimal::ONE;
        }
        let edge_ratio = edge / avg_bet;
        let units = state.bankroll / avg_bet;
        let base = (Decimal::ONE - edge_ratio) / (Decimal::ONE + edge_ratio);
        if base <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        to_decimal(base.to_f64().unwrap_or(1.0).powf(units.to_f64().unwrap_or(0.0)))
    }

    fn drawdown_factor(drawdown_pct: Decimal) -> f64 {
        if drawdown_pct >= dec!(18) {
            0.15
        } else if drawdown_pct >= dec!(12) {
            0.35
        } else if drawdown_pct >= dec!(7) {
            0.60
        } else if drawdown_pct >= dec!(3) {
            0.80
        } else {
            1.0
        }
    }

    fn streak_factor(consecutive_wins: u32, consecutive_losses: u32) -> f64 {
        if consecutive_losses >= 3 {
            (1.0 - 0.15 * (consecutive_losses - 2) as f64).max(0.40)
        } else if consecutive_wins >= 3 {
            (1.0 + 0.05 * (consecutive_wins - 2) as f64).min(1.20)
        } else {
            1.0
        }
    }

    fn spread_factor(spread_pct: Decimal) -> f64 {
        let spread_fraction = spread_pct.to_f64().unwrap_or(0.0) / 100.0;
        if spread_fraction > 0.001 {
            (1.0 - (spread_fraction - 0.001) * 50.0).max(0.5)
        } else {
            1.0
        }
    }

    fn volatility_factor(vol_regime: VolRegime, vol_level: f64, vol_expanding: bool) -> f64 {
        let base = match vol_regime {
            VolRegime::Low if vol_level < 0.3 => 1.15,
            VolRegime::Low => 1.0,
            VolRegime::Mid => 1.0,
            VolRegime::High if vol_level >= 0.9 => 0.60,
            VolRegime::High if vol_level >= 0.7 => 0.70,
            VolRegime::High => 0.80,
        };
        if vol_expanding {
            base * 0.60
        } else {
            base
        }
    }

    /// Fractional-plus-Kelly-capped size, returned as a USD notional. `None`
    /// means the trade is rejected outright (sub-$10 notional after caps).
    pub async fn compute_size(&self, signal: &ConfluenceSignal, inputs: &SizingInputs) -> Option<Decimal> {
        let config = self.config.read().await.clone();
        let state = self.state.read().await.clone();

        let sl_distance_pct = (signal.entry - signal.sl).abs() / signal.entry;
        if sl_distance_pct.is_zero() {
            return None;
        }
        let risk_usd = state.bankroll * config.risk.max_risk_per_trade;
        let mut size = risk_usd / sl_distance_pct;

        if state.trades_closed >= ROR_MIN_TRADES {
            if let (Some(win_rate), Some(avg_win), Some(avg_loss)) =
                (inputs.strategy_win_rate, inputs.strategy_avg_win, inputs.strategy_avg_loss)
            {
                if !avg_loss.is_zero() {
                    let p = win_rate;
                    let q = 1.0 - p;
                    let b = (avg_win / avg_loss).to_f64().unwrap_or(0.0);
                    if b > 0.0 {
                        let edge = p * b - q;
                        if edge > 0.0 {
                            let k = edge / b;
                            let confidence = signal.confidence.to_f64().unwrap_or(0.0);
                            let max_kelly = config.risk.max_kelly_size.to_f64().unwrap_or(0.10);
                            let kelly_fraction = config.risk.kelly_fraction.to_f64().unwrap_or(0.5);
                            let k_eff = (kelly_fraction * k * confidence).min(max_kelly);
                            let kelly_notional = to_decimal(k_eff) * state.bankroll;
                            size = size.min(kelly_notional);
                        }
                    }
                }
            }
        }

        let combined = (Self::drawdown_factor(state.drawdown_pct())
            * Self::streak_factor(state.consecutive_wins, state.consecutive_losses)
            * Self::spread_factor(inputs.spread_pct)
            * Self::volatility_factor(signal.vol_regime, signal.vol_level, signal.vol_expanding))
        .max(0.30);
        size *= to_decimal(combined);

        let remaining_capacity = (state.bankroll * config.risk.max_total_exposure_pct - state.total_exposure_usd).max(Decimal::ZERO);
        size = size.min(config.risk.max_position_usd).min(remaining_capacity);

        if size < MIN_NOTIONAL_USD {
            debug!(pair = %signal.pair, notional = %size, "position size below minimum notional, rejecting");
            return None;
        }
        Some(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, TrendRegime};
    use rust_decimal_macros::dec;

    fn config() -> Arc<RwLock<RuntimeConfig>> {
        Arc::new(RwLock::new(RuntimeConfig::default()))
    }

    fn sample_signal(entry: Decimal, sl: Decimal, tp: Decimal) -> ConfluenceSignal {
        ConfluenceSignal {
            pair: Pair::new("BTC", "USDT"),
            direction: Direction::Long,
            strength: dec!(0.8),
            confidence: dec!(0.8),
            confluence_count: 4,
            is_sure_fire: false,
            obi_agrees: true,
            entry,
            sl,
            tp,
            trend_regime: TrendRegime::Trend,
            vol_regime: VolRegime::Mid,
            vol_level: 0.5,
            vol_expanding: false,
            timeframe_agreement: dec!(0.9),
            ts: Utc::now(),
        }
    }

    #[tokio::test]
    async fn a_killed_engine_fails_the_first_gate() {
        let manager = RiskManager::new(config(), dec!(10000));
        let mut engine_state = EngineState::new();
        engine_state.running = true;
        engine_state.kill();
        let signal = sample_signal(dec!(100), dec!(97), dec!(106));
        let result = manager.check_gates(&engine_state, &signal.pair, "trend", &signal, dec!(100)).await;
        assert_eq!(result, Err(GateFailure::EngineNotAccepting));
    }

    #[tokio::test]
    async fn gates_pass_for_a_healthy_signal_with_no_open_exposure() {
        let manager = RiskManager::new(config(), dec!(10000));
        let mut engine_state = EngineState::new();
        engine_state.running = true;
        let signal = sample_signal(dec!(100), dec!(97), dec!(106));
        let result = manager.check_gates(&engine_state, &signal.pair, "trend", &signal, dec!(100)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn correlation_group_cap_blocks_a_third_correlated_position() {
        let manager = RiskManager::new(config(), dec!(10000));
        manager.register_open("t1", &Pair::new("BTC", "USDT"), false, dec!(100)).await;
        manager.register_open("t2", &Pair::new("WBTC", "USDT"), false, dec!(100)).await;

        let mut engine_state = EngineState::new();
        engine_state.running = true;
        let signal = sample_signal(dec!(100), dec!(97), dec!(106));
        let result = manager.check_gates(&engine_state, &Pair::new("BTC", "USDT"), "trend", &signal, dec!(100)).await;
        assert_eq!(result, Err(GateFailure::CorrelationGroupLimit));
    }

    #[tokio::test]
    async fn kelly_cap_never_inflates_the_fractional_base_size() {
        let manager = RiskManager::new(config(), dec!(10000));
        let signal = sample_signal(dec!(100), dec!(97), dec!(106));
        let inputs = SizingInputs {
            spread_pct: dec!(0.02),
            strategy_win_rate: Some(0.9),
            strategy_avg_win: Some(dec!(10)),
            strategy_avg_loss: Some(dec!(1)),
        };
        // fewer than 50 trades closed: Kelly branch is skipped entirely.
        let size = manager.compute_size(&signal, &inputs).await;
        assert!(size.is_some());
        assert!(size.unwrap() <= dec!(10000) * RuntimeConfig::default().risk.max_risk_per_trade / dec!(0.03) + dec!(1));
    }

    #[test]
    fn drawdown_factor_steps_down_at_each_tier() {
        assert_eq!(RiskManager::drawdown_factor(dec!(0)), 1.0);
        assert_eq!(RiskManager::drawdown_factor(dec!(3)), 0.80);
        assert_eq!(RiskManager::drawdown_factor(dec!(7)), 0.60);
        assert_eq!(RiskManager::drawdown_factor(dec!(12)), 0.35);
        assert_eq!(RiskManager::drawdown_factor(dec!(18)), 0.15);
    }

    #[test]
    fn streak_factor_penalizes_losses_and_rewards_wins_within_bounds() {
        assert_eq!(RiskManager::streak_factor(0, 5), 0.55);
        assert_eq!(RiskManager::streak_factor(0, 10), 0.40); // floored
        assert_eq!(RiskManager::streak_factor(6, 0), 1.20); // capped
        assert_eq!(RiskManager::streak_factor(0, 0), 1.0);
    }
}
