//! Control-plane surface: pause/resume/kill plus a status snapshot for the
//! CLI's `status` subcommand. Generalizes `engine::controller::BotController`'s
//! atomics-plus-broadcast shape onto the richer `EngineState`, which already
//! carries its own running/paused/killed bits behind a single lock rather
//! than a handful of independent atomics.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};

use crate::types::EngineState;

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub running: bool,
    pub paused: bool,
    pub auto_pause_reason: Option<String>,
    pub ws_connected: bool,
    pub killed: bool,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: i64,
    pub open_trade_count: usize,
    pub bankroll: Decimal,
    pub daily_pnl: Decimal,
}

pub struct ControlPlane {
    state: Arc<RwLock<EngineState>>,
    status_tx: broadcast::Sender<String>,
}

impl ControlPlane {
    pub fn new(state: Arc<RwLock<EngineState>>, status_tx: broadcast::Sender<String>) -> Self {
        Self { state, status_tx }
    }

    pub async fn pause(&self) {
        let mut state = self.state.write().await;
        state.paused = true;
        drop(state);
        self.status_tx.send("paused".to_string()).ok();
    }

    pub async fn resume(&self) {
        let mut state = self.state.write().await;
        state.resume();
        drop(state);
        self.status_tx.send("running".to_string()).ok();
    }

    pub async fn kill(&self) {
        let mut state = self.state.write().await;
        state.kill();
        drop(state);
        self.status_tx.send("killed".to_string()).ok();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.status_tx.subscribe()
    }
}
