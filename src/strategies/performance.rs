use std::collections::VecDeque;

use crate::types::{Regime, TrendRegime};

const MAX_HISTORY: usize = 50;
const MIN_SAMPLES_FOR_ADAPTATION: usize = 8;

struct Outcome {
    won: bool,
    trend_regime: TrendRegime,
}

/// Sliding window of a strategy's own recent outcomes, bucketed by the regime
/// they were taken in, feeding the adaptive weight multiplier.
pub struct PerformanceTracker {
    history: VecDeque<Outcome>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self { history: VecDeque::with_capacity(MAX_HISTORY) }
    }

    pub fn record(&mut self, won: bool, regime: Regime) {
        if self.history.len() == MAX_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(Outcome { won, trend_regime: regime.trend });
    }

    /// Win-rate-derived multiplier in [0.5, 1.5]: 0.5 at 0% win rate in this
    /// regime, 1.0 at 50%, 1.5 at 100%. Falls back to the whole history (and
    /// finally to a neutral 1.0) when there aren't enough same-regime samples.
    pub fn adaptive_factor(&self, regime: Regime) -> f64 {
        let same_regime: Vec<&Outcome> = self
            .history
            .iter()
            .filter(|o| o.trend_regime == regime.trend)
            .collect();

        let sample: Vec<bool> = if same_regime.len() >= MIN_SAMPLES_FOR_ADAPTATION {
            same_regime.iter().map(|o| o.won).collect()
        } else if self.history.len() >= MIN_SAMPLES_FOR_ADAPTATION {
            self.history.iter().map(|o| o.won).collect()
        } else {
            return 1.0;
        };

        let win_rate = sample.iter().filter(|w| **w).count() as f64 / sample.len() as f64;
        (0.5 + win_rate).clamp(0.5, 1.5)
    }

    pub fn sample_count(&self) -> usize {
        self.history.len()
    }
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VolRegime;

    fn regime(trend: TrendRegime) -> Regime {
        Regime { trend, vol: VolRegime::Mid, vol_level: 0.01, vol_expanding: false }
    }

    #[test]
    fn returns_neutral_factor_before_enough_samples() {
        let mut t = PerformanceTracker::new();
        t.record(true, regime(TrendRegime::Trend));
        assert_eq!(t.adaptive_factor(regime(TrendRegime::Trend)), 1.0);
    }

    #[test]
    fn all_losses_floors_at_half() {
        let mut t = PerformanceTracker::new();
        for _ in 0..MIN_SAMPLES_FOR_ADAPTATION {
            t.record(false, regime(TrendRegime::Trend));
        }
        assert_eq!(t.adaptive_factor(regime(TrendRegime::Trend)), 0.5);
    }

    #[test]
    fn all_wins_caps_at_one_point_five() {
        let mut t = PerformanceTracker::new();
        for _ in 0..MIN_SAMPLES_FOR_ADAPTATION {
            t.record(true, regime(TrendRegime::Trend));
        }
        assert_eq!(t.adaptive_factor(regime(TrendRegime::Trend)), 1.5);
    }
}
