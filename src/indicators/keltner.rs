use super::atr::atr;
use super::ema::ema;

pub struct KeltnerOutput {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

/// EMA midline with ATR-width channel.
pub fn keltner(high: &[f64], low: &[f64], close: &[f64], ema_period: usize, atr_period: usize, mult: f64) -> KeltnerOutput {
    let middle = ema(close, ema_period);
    let atr_values = atr(high, low, close, atr_period);
    let n = close.len();
    let mut upper = vec![f64::NAN; n];
    let mut lower = vec![f64::NAN; n];
    for i in 0..n {
        if middle[i].is_finite() && atr_values[i].is_finite() {
            upper[i] = middle[i] + atr_values[i] * mult;
            lower[i] = middle[i] - atr_values[i] * mult;
        }
    }
    KeltnerOutput { upper, middle, lower }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_upper_is_always_above_lower_once_finite() {
        let high: Vec<f64> = (0..40).map(|i| 100.0 + i as f64 + 1.0).collect();
        let low: Vec<f64> = (0..40).map(|i| 100.0 + i as f64 - 1.0).collect();
        let close: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let out = keltner(&high, &low, &close, 20, 10, 1.5);
        for i in 0..40 {
            if out.upper[i].is_finite() {
                assert!(out.upper[i] > out.lower[i]);
            }
        }
    }
}
