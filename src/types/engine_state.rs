use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineState {
    pub running: bool,
    pub paused: bool,
    pub auto_pause_reason: Option<String>,
    pub killed: bool,
    pub ws_connected: bool,
    pub stale_counter_per_pair: HashMap<String, u32>,
    pub scan_count: u64,
    pub started_at: DateTime<Utc>,
}

impl EngineState {
    pub fn new() -> Self {
        Self {
            running: false,
            paused: false,
            auto_pause_reason: None,
            killed: false,
            ws_connected: false,
            stale_counter_per_pair: HashMap::new(),
            scan_count: 0,
            started_at: Utc::now(),
        }
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }

    /// Entries are blocked while paused, auto-paused, or killed.
    pub fn accepts_new_entries(&self) -> bool {
        self.running && !self.killed && !self.paused && self.auto_pause_reason.is_none()
    }

    pub fn kill(&mut self) {
        self.killed = true;
        self.running = false;
    }

    pub fn auto_pause(&mut self, reason: &str) {
        if self.auto_pause_reason.is_none() {
            self.auto_pause_reason = Some(reason.to_string());
        }
    }

    /// Operator resume clears both manual pause and any auto-pause reason.
    pub fn resume(&mut self) {
        self.paused = false;
        self.auto_pause_reason = None;
    }
}

impl Default for EngineState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn killed_implies_not_running() {
        let mut state = EngineState::new();
        state.running = true;
        state.kill();
        assert!(state.killed);
        assert!(!state.running);
    }

    #[test]
    fn auto_pause_blocks_entries_until_resume() {
        let mut state = EngineState::new();
        state.running = true;
        assert!(state.accepts_new_entries());
        state.auto_pause("stale_data");
        assert!(!state.accepts_new_entries());
        state.resume();
        assert!(state.accepts_new_entries());
    }
}
