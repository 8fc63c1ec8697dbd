pub struct BollingerOutput {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
    pub bandwidth: Vec<f64>,
}

/// Population standard deviation bands, aligned to `close.len()`.
pub fn bollinger(close: &[f64], period: usize, std_dev_mult: f64) -> BollingerOutput {
    let n = close.len();
    let mut upper = vec![f64::NAN; n];
    let mut middle = vec![f64::NAN; n];
    let mut lower = vec![f64::NAN; n];
    let mut bandwidth = vec![f64::NAN; n];

    if n < period {
        return BollingerOutput { upper, middle, lower, bandwidth };
    }

    for i in (period - 1)..n {
        let window = &close[(i + 1 - period)..=i];
        let mean = window.iter().sum::<f64>() / period as f64;
        let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64;
        let std_dev = variance.sqrt();
        let dev = std_dev * std_dev_mult;
        upper[i] = mean + dev;
        middle[i] = mean;
        lower[i] = mean - dev;
        bandwidth[i] = if mean != 0.0 { (upper[i] - lower[i]) / mean * 100.0 } else { f64::NAN };
    }

    BollingerOutput { upper, middle, lower, bandwidth }
}

pub fn default_params() -> (usize, f64) {
    (20, 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn middle_band_equals_simple_moving_average() {
        let close: Vec<f64> = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let out = bollinger(&close, 5, 2.0);
        assert!((out.middle[4] - 3.0).abs() < 1e-9);
    }
}
