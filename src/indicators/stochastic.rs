pub struct StochasticOutput {
    pub k: Vec<f64>,
    pub d: Vec<f64>,
}

/// %K smoothed by %D over the high/low/close window.
pub fn stochastic(high: &[f64], low: &[f64], close: &[f64], k_period: usize, d_period: usize) -> StochasticOutput {
    let n = close.len();
    let mut k = vec![f64::NAN; n];
    if n < k_period {
        return StochasticOutput { k, d: vec![f64::NAN; n] };
    }
    for i in (k_period - 1)..n {
        let window_high = high[(i + 1 - k_period)..=i].iter().cloned().fold(f64::MIN, f64::max);
        let window_low = low[(i + 1 - k_period)..=i].iter().cloned().fold(f64::MAX, f64::min);
        let range = window_high - window_low;
        k[i] = if range == 0.0 { 50.0 } else { (close[i] - window_low) / range * 100.0 };
    }

    let mut d = vec![f64::NAN; n];
    for i in 0..n {
        if i + 1 >= d_period {
            let window = &k[(i + 1 - d_period)..=i];
            if window.iter().all(|v| v.is_finite()) {
                d[i] = window.iter().sum::<f64>() / d_period as f64;
            }
        }
    }

    StochasticOutput { k, d }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn k_is_bounded_0_to_100() {
        let high: Vec<f64> = (0..30).map(|i| 10.0 + (i as f64 * 0.5).sin() * 3.0 + 1.0).collect();
        let low: Vec<f64> = high.iter().map(|h| h - 2.0).collect();
        let close: Vec<f64> = high.iter().zip(low.iter()).map(|(h, l)| (h + l) / 2.0).collect();
        let out = stochastic(&high, &low, &close, 14, 3);
        for v in out.k.iter().filter(|v| v.is_finite()) {
            assert!(*v >= 0.0 && *v <= 100.0);
        }
    }
}
