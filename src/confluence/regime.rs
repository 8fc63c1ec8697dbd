use crate::config::RegimeSettings;
use crate::indicators::{adx, atr_pct};
use crate::types::{Candle, Regime, TrendRegime, VolRegime};

fn last_finite(values: &[f64]) -> Option<f64> {
    values.iter().rev().find(|v| v.is_finite()).copied()
}

/// Fraction of the trailing window strictly below the most recent value, in
/// [0, 1] — used as `vol_level`, a continuous companion to the `VolRegime`
/// bucket.
fn percentile_rank(values: &[f64]) -> f64 {
    let Some(last) = values.last().copied() else { return 0.0 };
    if values.len() < 2 {
        return 0.5;
    }
    let below = values[..values.len() - 1].iter().filter(|v| **v < last).count();
    below as f64 / (values.len() - 1) as f64
}

/// True when the mean Garman-Klass term over the most recent 5 bars exceeds
/// the mean over the 5 before that — volatility is actively expanding, not
/// just elevated.
fn is_vol_expanding(gk: &[f64]) -> bool {
    if gk.len() < 10 {
        return false;
    }
    let n = gk.len();
    let recent: f64 = gk[n - 5..].iter().sum::<f64>() / 5.0;
    let prior: f64 = gk[n - 10..n - 5].iter().sum::<f64>() / 5.0;
    recent > prior
}

/// Classifies trend (ADX) and volatility (ATR%) regime off one candle series,
/// plus a continuous `vol_level` percentile and an expansion flag from a
/// Garman-Klass volatility proxy.
pub fn detect_regime(candles: &[Candle], settings: &RegimeSettings) -> Regime {
    let high: Vec<f64> = candles.iter().map(|c| c.high.try_into().unwrap_or(0.0)).collect();
    let low: Vec<f64> = candles.iter().map(|c| c.low.try_into().unwrap_or(0.0)).collect();
    let close: Vec<f64> = candles.iter().map(|c| c.close.try_into().unwrap_or(0.0)).collect();

    let adx_values = adx(&high, &low, &close, 14);
    let atr_pct_values = atr_pct(&high, &low, &close, 14);

    let last_adx = last_finite(&adx_values).unwrap_or(0.0);
    let last_atr_pct = last_finite(&atr_pct_values).unwrap_or(0.0);

    let trend = if last_adx >= settings.adx_trend_threshold {
        TrendRegime::Trend
    } else {
        TrendRegime::Range
    };

    let vol = if last_atr_pct < settings.atr_pct_low {
        VolRegime::Low
    } else if last_atr_pct > settings.atr_pct_high {
        VolRegime::High
    } else {
        VolRegime::Mid
    };

    let gk: Vec<f64> = candles.iter().map(|c| c.garman_klass_term()).collect();
    let vol_level = percentile_rank(&gk);
    let vol_expanding = is_vol_expanding(&gk);

    Regime { trend, vol, vol_level, vol_expanding }
}

/// Combined regime weight multiplier from the config table: trend/range times
/// an optional low/high-vol adjustment. Falls back to 1.0 for any missing key.
pub fn regime_weight_multiplier(regime: Regime, settings: &RegimeSettings) -> f64 {
    let trend_key = match regime.trend {
        TrendRegime::Trend => "trend",
        TrendRegime::Range => "range",
    };
    let trend_mult = settings.weight_multipliers.get(trend_key).copied().unwrap_or(1.0);
    let vol_mult = match regime.vol {
        VolRegime::Low => settings.weight_multipliers.get("low_vol").copied().unwrap_or(1.0),
        VolRegime::High => settings.weight_multipliers.get("high_vol").copied().unwrap_or(1.0),
        VolRegime::Mid => 1.0,
    };
    trend_mult * vol_mult
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Pair, TimeFrame};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn trending_candles(n: i64) -> Vec<Candle> {
        let pair = Pair::new("BTC", "USDT");
        (0..n)
            .map(|i| {
                let c = Decimal::try_from(100.0 + i as f64 * 1.0).unwrap();
                Candle::new(&pair, TimeFrame::M5, i * 300, c, c + dec!(0.5), c - dec!(0.5), c, dec!(10), true)
            })
            .collect()
    }

    #[test]
    fn strong_uptrend_classifies_as_trend_regime() {
        let candles = trending_candles(80);
        let settings = RegimeSettings::default();
        let regime = detect_regime(&candles, &settings);
        assert_eq!(regime.trend, TrendRegime::Trend);
    }

    #[test]
    fn weight_multiplier_falls_back_to_neutral_for_unknown_keys() {
        let mut settings = RegimeSettings::default();
        settings.weight_multipliers.clear();
        let regime = Regime { trend: TrendRegime::Trend, vol: VolRegime::Low, vol_level: 0.1, vol_expanding: false };
        assert_eq!(regime_weight_multiplier(regime, &settings), 1.0);
    }
}
