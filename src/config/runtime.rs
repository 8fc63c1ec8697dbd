use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::types::TradingMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub mode: ModeSettings,
    pub trading: TradingSettings,
    pub exchange: ExchangeSettings,
    pub ai: ConfluenceSettings,
    pub risk: RiskSettings,
    pub monitoring: MonitoringSettings,
    pub regime: RegimeSettings,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mode: ModeSettings::default(),
            trading: TradingSettings::default(),
            exchange: ExchangeSettings::default(),
            ai: ConfluenceSettings::default(),
            risk: RiskSettings::default(),
            monitoring: MonitoringSettings::default(),
            regime: RegimeSettings::default(),
        }
    }
}

impl RuntimeConfig {
    /// Reads a TOML config file, falling back to defaults if it doesn't
    /// exist. Validates before returning so callers never have to.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let config = if std::path::Path::new(path).exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw)?
        } else {
            Self::default()
        };
        config.validate().map_err(|errors| anyhow::anyhow!(errors.join(", ")))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.mode.trading_mode == TradingMode::Live && self.exchange.api_key_env.is_none() {
            errors.push("live mode requires exchange.api_key_env to be set".to_string());
        }

        if self.trading.pairs.is_empty() {
            errors.push("trading.pairs must not be empty".to_string());
        }
        if self.trading.scan_interval_seconds == 0 {
            errors.push("trading.scan_interval_seconds must be > 0".to_string());
        }
        if self.trading.warmup_bars < 100 {
            errors.push("trading.warmup_bars must be >= 100".to_string());
        }
        if self.trading.max_concurrent_positions == 0 {
            errors.push("trading.max_concurrent_positions must be > 0".to_string());
        }
        if self.trading.max_spread_pct <= Decimal::ZERO {
            errors.push("trading.max_spread_pct must be > 0".to_string());
        }

        if self.exchange.rate_limit_per_second == 0 {
            errors.push("exchange.rate_limit_per_second must be > 0".to_string());
        }
        if self.exchange.maker_fee < Decimal::ZERO || self.exchange.taker_fee < Decimal::ZERO {
            errors.push("exchange fee rates must be >= 0".to_string());
        }

        if self.ai.min_confidence <= Decimal::ZERO || self.ai.min_confidence > Decimal::ONE {
            errors.push("ai.min_confidence must be in (0, 1]".to_string());
        }
        if self.ai.min_risk_reward_ratio < Decimal::ONE {
            errors.push("ai.min_risk_reward_ratio must be >= 1".to_string());
        }
        if self.ai.multi_timeframe_min_agreement < Decimal::ZERO || self.ai.multi_timeframe_min_agreement > Decimal::ONE {
            errors.push("ai.multi_timeframe_min_agreement must be in [0, 1]".to_string());
        }

        if self.risk.max_risk_per_trade <= Decimal::ZERO || self.risk.max_risk_per_trade > dec!(0.20) {
            errors.push("risk.max_risk_per_trade must be in (0, 0.20]".to_string());
        }
        if self.risk.max_daily_loss <= Decimal::ZERO || self.risk.max_daily_loss > Decimal::ONE {
            errors.push("risk.max_daily_loss must be in (0, 1]".to_string());
        }
        if self.risk.initial_bankroll <= Decimal::ZERO {
            errors.push("risk.initial_bankroll must be > 0".to_string());
        }
        if self.risk.kelly_fraction < Decimal::ZERO || self.risk.kelly_fraction > Decimal::ONE {
            errors.push("risk.kelly_fraction must be in [0, 1]".to_string());
        }
        if self.risk.max_total_exposure_pct <= Decimal::ZERO || self.risk.max_total_exposure_pct > Decimal::ONE {
            errors.push("risk.max_total_exposure_pct must be in (0, 1]".to_string());
        }

        if self.monitoring.stale_data_pause_after_checks == 0 {
            errors.push("monitoring.stale_data_pause_after_checks must be > 0".to_string());
        }

        if self.regime.adx_trend_threshold <= 0.0 {
            errors.push("regime.adx_trend_threshold must be > 0".to_string());
        }
        if self.regime.atr_pct_low >= self.regime.atr_pct_high {
            errors.push("regime.atr_pct_low must be < atr_pct_high".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeSettings {
    pub trading_mode: TradingMode,
}

impl Default for ModeSettings {
    fn default() -> Self {
        Self { trading_mode: TradingMode::Paper }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSettings {
    pub pairs: Vec<String>,
    pub scan_interval_seconds: u64,
    pub position_check_interval_seconds: u64,
    pub warmup_bars: usize,
    pub timeframes: Vec<String>,
    pub max_concurrent_positions: usize,
    pub cooldown_seconds: u64,
    pub event_price_move_pct: Decimal,
    pub max_spread_pct: Decimal,
    pub use_closed_candles_only: bool,
    pub single_strategy_mode: Option<String>,
    pub quiet_hours_utc: Vec<u32>,
    pub max_trades_per_hour: u32,
}

impl Default for TradingSettings {
    fn default() -> Self {
        Self {
            pairs: vec!["BTC/USDT".to_string(), "ETH/USDT".to_string(), "SOL/USDT".to_string()],
            scan_interval_seconds: 60,
            position_check_interval_seconds: 2,
            warmup_bars: 500,
            timeframes: vec!["1".to_string(), "5".to_string(), "15".to_string()],
            max_concurrent_positions: 3,
            cooldown_seconds: 300,
            event_price_move_pct: dec!(0.5),
            max_spread_pct: dec!(0.1),
            use_closed_candles_only: true,
            single_strategy_mode: None,
            quiet_hours_utc: Vec::new(),
            max_trades_per_hour: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeSettings {
    pub api_key_env: Option<String>,
    pub api_secret_env: Option<String>,
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
    pub post_only: bool,
    pub limit_chase_attempts: u32,
    pub limit_chase_delay_seconds: u64,
    pub limit_fallback_to_market: bool,
    pub rate_limit_per_second: u32,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_cap_ms: u64,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            api_key_env: None,
            api_secret_env: None,
            maker_fee: dec!(0.001),
            taker_fee: dec!(0.001),
            post_only: false,
            limit_chase_attempts: 3,
            limit_chase_delay_seconds: 5,
            limit_fallback_to_market: true,
            rate_limit_per_second: 10,
            max_retries: 3,
            retry_base_delay_ms: 500,
            retry_cap_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfluenceSettings {
    pub confluence_threshold: usize,
    pub min_confidence: Decimal,
    pub min_risk_reward_ratio: Decimal,
    pub obi_threshold: Decimal,
    pub book_score_threshold: Decimal,
    pub book_score_max_age_seconds: i64,
    pub obi_counts_as_confluence: bool,
    pub obi_weight: f64,
    pub multi_timeframe_min_agreement: Decimal,
    pub primary_timeframe: String,
    pub strategy_guardrails_window_trades: usize,
    pub strategy_guardrails_min_trades: usize,
    pub strategy_guardrails_disable_minutes: i64,
    pub strategy_guardrails_min_win_rate: Decimal,
    pub strategy_guardrails_min_profit_factor: Decimal,
}

impl Default for ConfluenceSettings {
    fn default() -> Self {
        Self {
            confluence_threshold: 3,
            min_confidence: dec!(0.55),
            min_risk_reward_ratio: dec!(1.5),
            obi_threshold: dec!(0.3),
            book_score_threshold: dec!(0.3),
            book_score_max_age_seconds: 5,
            obi_counts_as_confluence: true,
            obi_weight: 0.8,
            multi_timeframe_min_agreement: dec!(0.6),
            primary_timeframe: "5".to_string(),
            strategy_guardrails_window_trades: 20,
            strategy_guardrails_min_trades: 10,
            strategy_guardrails_disable_minutes: 120,
            strategy_guardrails_min_win_rate: dec!(0.35),
            strategy_guardrails_min_profit_factor: dec!(0.85),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartExitSettings {
    pub enabled: bool,
    pub tier_tp_multiples: Vec<Decimal>,
    pub tier_close_fractions: Vec<Decimal>,
}

impl Default for SmartExitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            tier_tp_multiples: vec![dec!(0.5), dec!(1.0)],
            tier_close_fractions: vec![dec!(0.5), dec!(0.5)],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSettings {
    pub max_risk_per_trade: Decimal,
    pub max_daily_loss: Decimal,
    pub max_position_usd: Decimal,
    pub initial_bankroll: Decimal,
    pub atr_multiplier_sl: f64,
    pub atr_multiplier_tp: f64,
    pub trailing_activation_pct: Decimal,
    pub trailing_step_pct: Decimal,
    pub breakeven_activation_pct: Decimal,
    pub kelly_fraction: Decimal,
    pub max_kelly_size: Decimal,
    pub risk_of_ruin_threshold: Decimal,
    pub max_daily_trades: u32,
    pub max_total_exposure_pct: Decimal,
    pub global_cooldown_seconds_on_loss: i64,
    pub smart_exit: SmartExitSettings,
    /// Force-close a trade after this many seconds regardless of PnL. `None`
    /// disables the check.
    pub max_trade_duration_seconds: Option<i64>,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            max_risk_per_trade: dec!(0.02),
            max_daily_loss: dec!(0.05),
            max_position_usd: dec!(2000),
            initial_bankroll: dec!(10000),
            atr_multiplier_sl: 2.0,
            atr_multiplier_tp: 4.0,
            trailing_activation_pct: dec!(0.015),
            trailing_step_pct: dec!(0.005),
            breakeven_activation_pct: dec!(0.01),
            kelly_fraction: dec!(0.5),
            max_kelly_size: dec!(0.10),
            risk_of_ruin_threshold: dec!(0.05),
            max_daily_trades: 0,
            max_total_exposure_pct: dec!(0.60),
            global_cooldown_seconds_on_loss: 1800,
            smart_exit: SmartExitSettings::default(),
            max_trade_duration_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSettings {
    pub stale_data_pause_after_checks: u32,
    pub ws_disconnect_pause_after_seconds: i64,
    pub consecutive_losses_pause_threshold: u32,
    pub drawdown_pause_pct: Decimal,
    pub emergency_close_on_auto_pause: bool,
    pub auto_clear_on_condition_clear: bool,
    pub health_interval_seconds: u64,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            stale_data_pause_after_checks: 3,
            ws_disconnect_pause_after_seconds: 60,
            consecutive_losses_pause_threshold: 5,
            drawdown_pause_pct: dec!(0.18),
            emergency_close_on_auto_pause: false,
            auto_clear_on_condition_clear: false,
            health_interval_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeSettings {
    pub adx_trend_threshold: f64,
    pub atr_pct_low: f64,
    pub atr_pct_high: f64,
    pub weight_multipliers: HashMap<String, f64>,
}

impl Default for RegimeSettings {
    fn default() -> Self {
        let mut weight_multipliers = HashMap::new();
        weight_multipliers.insert("trend".to_string(), 1.2);
        weight_multipliers.insert("range".to_string(), 0.9);
        weight_multipliers.insert("low_vol".to_string(), 1.1);
        weight_multipliers.insert("high_vol".to_string(), 0.8);
        Self {
            adx_trend_threshold: 25.0,
            atr_pct_low: 0.008,
            atr_pct_high: 0.02,
            weight_multipliers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates_cleanly() {
        assert!(RuntimeConfig::default().validate().is_ok());
    }

    #[test]
    fn live_mode_without_api_key_env_fails_validation() {
        let mut config = RuntimeConfig::default();
        config.mode.trading_mode = TradingMode::Live;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_max_positions_fails_validation() {
        let mut config = RuntimeConfig::default();
        config.trading.max_concurrent_positions = 0;
        assert!(config.validate().is_err());
    }
}
