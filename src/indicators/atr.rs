/// Wilder's smoothed ATR. Aligned to `close.len()`, NaN until `period` true
/// ranges have accumulated.
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    let n = close.len();
    let mut out = vec![f64::NAN; n];
    if n == 0 || period == 0 || n < period {
        return out;
    }

    let mut true_ranges = vec![0.0; n];
    for i in 0..n {
        true_ranges[i] = if i == 0 {
            high[i] - low[i]
        } else {
            let hl = high[i] - low[i];
            let hc = (high[i] - close[i - 1]).abs();
            let lc = (low[i] - close[i - 1]).abs();
            hl.max(hc).max(lc)
        };
    }

    let seed: f64 = true_ranges[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = seed;
    let mut prev = seed;
    for i in period..n {
        let v = (prev * (period as f64 - 1.0) + true_ranges[i]) / period as f64;
        out[i] = v;
        prev = v;
    }
    out
}

/// ATR expressed as a fraction of price, used for volatility-regime bucketing.
pub fn atr_pct(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    let atr_values = atr(high, low, close, period);
    atr_values
        .iter()
        .zip(close.iter())
        .map(|(a, c)| if *c == 0.0 { f64::NAN } else { a / c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atr_has_no_nan_leak_past_warmup() {
        let high: Vec<f64> = (0..30).map(|i| 100.0 + i as f64 + 1.0).collect();
        let low: Vec<f64> = (0..30).map(|i| 100.0 + i as f64 - 1.0).collect();
        let close: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let result = atr(&high, &low, &close, 14);
        assert!(result[13..].iter().all(|v| v.is_finite()));
        assert!(result[..13].iter().all(|v| v.is_nan()));
    }
}
