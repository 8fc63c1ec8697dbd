use std::collections::HashMap;

use chrono::{Timelike, Utc};

const MIN_SAMPLES_FOR_ADAPTATION: usize = 8;

#[derive(Default)]
struct HourStats {
    wins: u32,
    total: u32,
}

/// Learns a per-UTC-hour win-rate multiplier from closed trades, clamped to
/// [0.70, 1.15] so no single hour can swing sizing outside a narrow band.
pub struct SessionMultiplier {
    by_hour: HashMap<u32, HourStats>,
}

impl SessionMultiplier {
    pub fn new() -> Self {
        Self { by_hour: HashMap::new() }
    }

    pub fn record(&mut self, hour_utc: u32, won: bool) {
        let stats = self.by_hour.entry(hour_utc).or_default();
        stats.total += 1;
        if won {
            stats.wins += 1;
        }
    }

    pub fn multiplier_for_hour(&self, hour_utc: u32) -> f64 {
        match self.by_hour.get(&hour_utc) {
            Some(stats) if stats.total as usize >= MIN_SAMPLES_FOR_ADAPTATION => {
                let win_rate = stats.wins as f64 / stats.total as f64;
                (0.70 + win_rate * 0.45).clamp(0.70, 1.15)
            }
            _ => 1.0,
        }
    }

    pub fn current_multiplier(&self) -> f64 {
        self.multiplier_for_hour(Utc::now().hour())
    }
}

impl Default for SessionMultiplier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseen_hour_stays_neutral() {
        let session = SessionMultiplier::new();
        assert_eq!(session.multiplier_for_hour(3), 1.0);
    }

    #[test]
    fn strong_hour_win_rate_raises_multiplier_above_neutral() {
        let mut session = SessionMultiplier::new();
        for _ in 0..10 {
            session.record(14, true);
        }
        assert!(session.multiplier_for_hour(14) > 1.0);
        assert!(session.multiplier_for_hour(14) <= 1.15);
    }

    #[test]
    fn weak_hour_win_rate_floors_at_seventy_percent() {
        let mut session = SessionMultiplier::new();
        for _ in 0..10 {
            session.record(3, false);
        }
        assert_eq!(session.multiplier_for_hour(3), 0.70);
    }
}
