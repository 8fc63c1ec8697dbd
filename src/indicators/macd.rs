use super::ema::ema;

pub struct MacdOutput {
    pub macd_line: Vec<f64>,
    pub signal_line: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd(close: &[f64], fast: usize, slow: usize, signal: usize) -> MacdOutput {
    let fast_ema = ema(close, fast);
    let slow_ema = ema(close, slow);
    let macd_line: Vec<f64> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(f, s)| f - s)
        .collect();

    // ema() over a series that itself starts with NaN would propagate NaN
    // forever, so feed the signal EMA only the finite tail and re-align.
    let first_finite = macd_line.iter().position(|v| v.is_finite());
    let mut signal_line = vec![f64::NAN; close.len()];
    let mut histogram = vec![f64::NAN; close.len()];
    if let Some(start) = first_finite {
        let tail = &macd_line[start..];
        let signal_tail = ema(tail, signal);
        for (i, v) in signal_tail.into_iter().enumerate() {
            signal_line[start + i] = v;
            if v.is_finite() {
                histogram[start + i] = macd_line[start + i] - v;
            }
        }
    }

    MacdOutput { macd_line, signal_line, histogram }
}

pub fn default_params() -> (usize, usize, usize) {
    (12, 26, 9)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_is_finite_once_both_emas_and_signal_are_seeded() {
        let close: Vec<f64> = (0..60).map(|i| 100.0 + i as f64 * 0.2).collect();
        let out = macd(&close, 12, 26, 9);
        assert!(out.histogram[59].is_finite());
        assert!(out.macd_line[0].is_nan());
    }
}
