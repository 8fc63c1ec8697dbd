use super::atr::atr;

pub struct SupertrendOutput {
    pub line: Vec<f64>,
    /// 1.0 = uptrend (line below price), -1.0 = downtrend. NaN during warmup.
    pub direction: Vec<f64>,
}

/// Alternates a basic-band direction flag with an ATR channel boundary: the
/// line flips when price closes through the opposite band.
pub fn supertrend(high: &[f64], low: &[f64], close: &[f64], period: usize, mult: f64) -> SupertrendOutput {
    let n = close.len();
    let atr_values = atr(high, low, close, period);
    let mut line = vec![f64::NAN; n];
    let mut direction = vec![f64::NAN; n];

    let mut final_upper = f64::NAN;
    let mut final_lower = f64::NAN;
    let mut current_direction = 1.0;

    for i in 0..n {
        if !atr_values[i].is_finite() {
            continue;
        }
        let hl2 = (high[i] + low[i]) / 2.0;
        let basic_upper = hl2 + mult * atr_values[i];
        let basic_lower = hl2 - mult * atr_values[i];

        if final_upper.is_nan() {
            final_upper = basic_upper;
            final_lower = basic_lower;
        } else {
            final_upper = if basic_upper < final_upper || close[i - 1] > final_upper {
                basic_upper
            } else {
                final_upper
            };
            final_lower = if basic_lower > final_lower || close[i - 1] < final_lower {
                basic_lower
            } else {
                final_lower
            };
        }

        if close[i] > final_upper {
            current_direction = 1.0;
        } else if close[i] < final_lower {
            current_direction = -1.0;
        }

        line[i] = if current_direction > 0.0 { final_lower } else { final_upper };
        direction[i] = current_direction;
    }

    SupertrendOutput { line, direction }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flips_direction_on_a_sustained_reversal() {
        let mut close: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        close.extend((0..40).map(|i| 140.0 - i as f64));
        let high: Vec<f64> = close.iter().map(|c| c + 0.5).collect();
        let low: Vec<f64> = close.iter().map(|c| c - 0.5).collect();
        let out = supertrend(&high, &low, &close, 10, 3.0);
        let first_finite = out.direction.iter().position(|d| d.is_finite()).unwrap();
        let up_phase = out.direction[first_finite];
        let down_phase = *out.direction.last().unwrap();
        assert_eq!(up_phase, 1.0);
        assert_eq!(down_phase, -1.0);
    }
}
