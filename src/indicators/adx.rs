/// Average Directional Index via Wilder-smoothed DM+/DM-/TR ratios.
pub fn adx(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    let n = close.len();
    let mut out = vec![f64::NAN; n];
    if n < period * 2 + 1 {
        return out;
    }

    let mut plus_dm = vec![0.0; n];
    let mut minus_dm = vec![0.0; n];
    let mut tr = vec![0.0; n];

    for i in 1..n {
        let up_move = high[i] - high[i - 1];
        let down_move = low[i - 1] - low[i];
        plus_dm[i] = if up_move > down_move && up_move > 0.0 { up_move } else { 0.0 };
        minus_dm[i] = if down_move > up_move && down_move > 0.0 { down_move } else { 0.0 };
        tr[i] = (high[i] - low[i])
            .max((high[i] - close[i - 1]).abs())
            .max((low[i] - close[i - 1]).abs());
    }

    let smooth = |values: &[f64], period: usize| -> Vec<f64> {
        let mut smoothed = vec![f64::NAN; values.len()];
        if values.len() <= period {
            return smoothed;
        }
        let seed: f64 = values[1..=period].iter().sum();
        smoothed[period] = seed;
        for i in (period + 1)..values.len() {
            smoothed[i] = smoothed[i - 1] - (smoothed[i - 1] / period as f64) + values[i];
        }
        smoothed
    };

    let smoothed_plus = smooth(&plus_dm, period);
    let smoothed_minus = smooth(&minus_dm, period);
    let smoothed_tr = smooth(&tr, period);

    let mut dx = vec![f64::NAN; n];
    for i in period..n {
        if smoothed_tr[i].is_finite() && smoothed_tr[i] != 0.0 {
            let plus_di = 100.0 * smoothed_plus[i] / smoothed_tr[i];
            let minus_di = 100.0 * smoothed_minus[i] / smoothed_tr[i];
            let sum = plus_di + minus_di;
            dx[i] = if sum == 0.0 { 0.0 } else { 100.0 * (plus_di - minus_di).abs() / sum };
        }
    }

    let dx_start = period;
    if n >= dx_start + period {
        let seed: f64 = dx[dx_start..(dx_start + period)].iter().sum::<f64>() / period as f64;
        out[dx_start + period - 1] = seed;
        let mut prev = seed;
        for i in (dx_start + period)..n {
            if dx[i].is_finite() {
                let v = (prev * (period as f64 - 1.0) + dx[i]) / period as f64;
                out[i] = v;
                prev = v;
            }
        }
    }
    out
}

pub const TREND_THRESHOLD: f64 = 25.0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strong_trend_produces_adx_above_threshold() {
        let n = 80;
        let close: Vec<f64> = (0..n).map(|i| 100.0 + i as f64 * 1.0).collect();
        let high: Vec<f64> = close.iter().map(|c| c + 0.3).collect();
        let low: Vec<f64> = close.iter().map(|c| c - 0.3).collect();
        let result = adx(&high, &low, &close, 14);
        let last = result.last().copied().unwrap();
        assert!(last.is_finite());
        assert!(last > TREND_THRESHOLD);
    }
}
