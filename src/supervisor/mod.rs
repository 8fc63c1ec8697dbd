#![allow(dead_code)]
//! Process lifecycle and scheduling (C8): `init -> warmup -> run -> stop`,
//! single-instance lock, event-driven scan queue, restart rehydration,
//! circuit breakers, and the control-plane surface (`pause`/`resume`/
//! `close_all`/`kill`/`status`). Grounded on the teacher's `main.rs` event
//! loop and `engine::controller::BotController`'s atomics+broadcast shape,
//! generalized into the full task table the spec calls for.

pub mod control;
pub mod scan_queue;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{anyhow, Context, Result};
use fslock::LockFile;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::analytics::{AnalyticsEvent, AnalyticsSink, RollingStats};
use crate::confluence::ConfluenceEngine;
use crate::config::RuntimeConfig;
use crate::exchange::{BinanceWebSocket, ExchangeAdapter, MarketEvent};
use crate::executor::Executor;
use crate::indicators::IndicatorCache;
use crate::ledger::Ledger;
use crate::market_data::{BookLevel, BookSnapshot, MarketDataCache};
use crate::risk::RiskManager;
use crate::strategies::default_strategies;
use crate::types::{EngineState, Pair, TimeFrame};

pub use control::{ControlPlane, StatusSnapshot};
use scan_queue::ScanQueue;

fn parse_timeframe(label: &str) -> Option<TimeFrame> {
    match label {
        "1" => Some(TimeFrame::M1),
        "5" => Some(TimeFrame::M5),
        "15" => Some(TimeFrame::M15),
        "60" => Some(TimeFrame::H1),
        _ => None,
    }
}

struct StaleTracker {
    consecutive_checks: HashMap<String, u32>,
}

impl StaleTracker {
    fn new() -> Self {
        Self { consecutive_checks: HashMap::new() }
    }

    fn record(&mut self, pair: &Pair, stale: bool) -> u32 {
        let entry = self.consecutive_checks.entry(pair.canonical()).or_insert(0);
        if stale {
            *entry += 1;
        } else {
            *entry = 0;
        }
        *entry
    }
}

/// Owns every long-lived collaborator and the task table that drives them.
/// One process per `Supervisor`; the `fslock` guard makes a second instance
/// against the same data directory fail fast instead of corrupting state.
pub struct Supervisor<E: ExchangeAdapter + 'static> {
    config: Arc<RwLock<RuntimeConfig>>,
    engine_state: Arc<RwLock<EngineState>>,
    exchange: Arc<E>,
    market: Arc<MarketDataCache>,
    ledger: Arc<Ledger>,
    risk: Arc<RiskManager>,
    confluence: Arc<RwLock<ConfluenceEngine>>,
    indicator_cache: Arc<Mutex<IndicatorCache>>,
    executor: Arc<Executor<E>>,
    pairs: Vec<Pair>,
    scan_queue: Arc<ScanQueue>,
    last_scanned_price: Mutex<HashMap<String, Decimal>>,
    stale_tracker: Mutex<StaleTracker>,
    consecutive_ws_disconnect_since: Mutex<Option<chrono::DateTime<chrono::Utc>>>,
    status_tx: broadcast::Sender<String>,
    scan_failures: AtomicU32,
    analytics: AnalyticsSink,
    rolling_stats: Arc<RwLock<RollingStats>>,
    _lock: LockFile,
}

impl<E: ExchangeAdapter + 'static> Supervisor<E> {
    pub async fn init(config: RuntimeConfig, exchange: Arc<E>, data_dir: &str) -> Result<Arc<Self>> {
        std::fs::create_dir_all(data_dir).ok();
        let lock_path = format!("{}/novapulse.lock", data_dir);
        let mut lock = LockFile::open(&lock_path).context("opening instance lock file")?;
        let acquired = lock.try_lock().context("acquiring instance lock")?;
        if !acquired {
            return Err(anyhow!("another instance already holds the lock at {}", lock_path));
        }

        let pairs: Vec<Pair> = config
            .trading
            .pairs
            .iter()
            .filter_map(|s| s.parse::<Pair>().map_err(|e| warn!(pair = %s, error = %e, "skipping unparseable pair")).ok())
            .collect();
        if pairs.is_empty() {
            return Err(anyhow!("no valid pairs configured"));
        }

        let config = Arc::new(RwLock::new(config));
        let config_snapshot = config.read().await.clone();

        let db_path = format!("{}/novapulse.db", data_dir);
        let ledger = Arc::new(Ledger::new(&db_path).await?);
        let risk = Arc::new(RiskManager::new(Arc::clone(&config), config_snapshot.risk.initial_bankroll));
        let market = MarketDataCache::new(config_snapshot.trading.warmup_bars * 4, dec!(0.20));
        let confluence = Arc::new(RwLock::new(ConfluenceEngine::new(default_strategies())));
        let indicator_cache = Arc::new(Mutex::new(IndicatorCache::new()));
        let executor = Arc::new(Executor::new(Arc::clone(&exchange), Arc::clone(&ledger), Arc::clone(&risk), Arc::clone(&market), Arc::clone(&config)));

        let (status_tx, _) = broadcast::channel(64);
        let (analytics, rolling_stats) = crate::analytics::spawn();

        Ok(Arc::new(Self {
            config,
            engine_state: Arc::new(RwLock::new(EngineState::new())),
            exchange,
            market,
            ledger,
            risk,
            confluence,
            indicator_cache,
            executor,
            pairs,
            scan_queue: Arc::new(ScanQueue::new()),
            last_scanned_price: Mutex::new(HashMap::new()),
            stale_tracker: Mutex::new(StaleTracker::new()),
            consecutive_ws_disconnect_since: Mutex::new(None),
            status_tx,
            scan_failures: AtomicU32::new(0),
            analytics,
            rolling_stats,
            _lock: lock,
        }))
    }

    /// Backfills candles to satisfy the largest configured timeframe's
    /// warmup window, seeds the cache, subscribes to streams, and rehydrates
    /// any `status=open` trades left over from a previous run.
    pub async fn warmup(self: &Arc<Self>) -> Result<mpsc::Receiver<MarketEvent>> {
        self.reconcile_startup_state().await;

        let config = self.config.read().await.clone();
        let warmup_bars = config.trading.warmup_bars as u32;

        for pair in &self.pairs {
            for label in &config.trading.timeframes {
                let Some(tf) = parse_timeframe(label) else { continue };
                let now = chrono::Utc::now().timestamp();
                let start = now - (warmup_bars as i64) * tf.to_seconds();
                match self.exchange.get_historical_candles(pair, tf, start, now).await {
                    Ok(candles) => {
                        let count = candles.len();
                        for candle in candles {
                            self.market.update_candle(pair, tf, candle).await;
                        }
                        info!(pair = %pair, timeframe = label, bars = count, "warmup backfill complete");
                    }
                    Err(e) => warn!(pair = %pair, timeframe = label, error = %e, "warmup backfill failed"),
                }
            }
        }

        self.rehydrate().await?;

        let mut ws = BinanceWebSocket::new();
        for pair in &self.pairs {
            ws.subscribe_book_ticker(pair);
            for label in &config.trading.timeframes {
                if let Some(tf) = parse_timeframe(label) {
                    ws.subscribe_kline(pair, tf);
                }
            }
        }
        let rx = ws.connect().await?;
        self.engine_state.write().await.ws_connected = true;
        Ok(rx)
    }

    /// Checks exchange clock drift and logs the available quote balance.
    /// Informational only — neither discrepancy blocks startup, since paper
    /// mode has no real balance and modest clock drift is tolerable for a
    /// 5-minute-scale strategy.
    async fn reconcile_startup_state(&self) {
        match self.exchange.get_server_time().await {
            Ok(server_time) => {
                let drift = chrono::Utc::now().timestamp_millis() - server_time;
                if drift.abs() > 5000 {
                    warn!(drift_ms = drift, "local clock drifts from exchange server time");
                } else {
                    info!(drift_ms = drift, "exchange clock check passed");
                }
            }
            Err(e) => warn!(error = %e, "could not fetch exchange server time"),
        }

        for pair in &self.pairs {
            if let Ok(balance) = self.exchange.get_balance(pair.quote()).await {
                info!(asset = pair.quote(), balance = %balance, "available quote balance");
            }
        }
    }

    async fn rehydrate(&self) -> Result<()> {
        let open_trades = self.ledger.get_open_trades().await?;
        for trade in &open_trades {
            self.risk.register_open(&trade.trade_id, &trade.pair, true, trade.notional()).await;
            info!(trade_id = %trade.trade_id, pair = %trade.pair, "rehydrated open trade from ledger");
        }
        Ok(())
    }

    /// Marks the process running and spawns the task table. Blocks until
    /// `kill()` is called or a task exits unexpectedly.
    pub async fn run(self: Arc<Self>, mut market_events: mpsc::Receiver<MarketEvent>) -> Result<()> {
        self.engine_state.write().await.running = true;
        self.status_tx.send("running".to_string()).ok();

        let stream_consumer = {
            let this = Arc::clone(&self);
            tokio::spawn(async move { this.stream_consumer_task(&mut market_events).await })
        };
        let scan_loop = {
            let this = Arc::clone(&self);
            tokio::spawn(async move { this.scan_loop_task().await })
        };
        let position_loop = {
            let this = Arc::clone(&self);
            tokio::spawn(async move { this.position_loop_task().await })
        };
        let health_monitor = {
            let this = Arc::clone(&self);
            tokio::spawn(async move { this.health_monitor_task().await })
        };
        let reconcile = {
            let this = Arc::clone(&self);
            tokio::spawn(async move { this.reconcile_task().await })
        };
        let cleanup = {
            let this = Arc::clone(&self);
            tokio::spawn(async move { this.cleanup_task().await })
        };

        tokio::select! {
            _ = stream_consumer => warn!("stream-consumer task exited"),
            _ = scan_loop => warn!("scan-loop task exited"),
            _ = position_loop => warn!("position-loop task exited"),
            _ = health_monitor => warn!("health-monitor task exited"),
            _ = reconcile => warn!("reconcile task exited"),
            _ = cleanup => warn!("cleanup task exited"),
            _ = self.wait_for_kill() => info!("kill requested, draining tasks"),
        }

        Ok(())
    }

    async fn wait_for_kill(&self) {
        let mut interval = interval(StdDuration::from_millis(500));
        loop {
            interval.tick().await;
            if self.engine_state.read().await.killed {
                return;
            }
        }
    }

    // -- tasks ---------------------------------------------------------------

    async fn stream_consumer_task(self: &Arc<Self>, events: &mut mpsc::Receiver<MarketEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                MarketEvent::Candle(pair, tf, candle) => {
                    let closed = candle.is_closed;
                    self.market.update_candle(&pair, tf, candle).await;
                    if closed {
                        self.scan_queue.enqueue(pair);
                    }
                }
                MarketEvent::BookTicker(book) => {
                    let (pair, ticker) = crate::exchange::BinanceWebSocket::ticker_from_book(&book);
                    self.market.update_ticker(&pair, ticker).await;

                    let snapshot = BookSnapshot {
                        bids: vec![BookLevel { price: book.bid_price, size: book.bid_qty }],
                        asks: vec![BookLevel { price: book.ask_price, size: book.ask_qty }],
                        ts: chrono::Utc::now(),
                    };
                    self.market.update_book(&pair, snapshot, 1).await;

                    let config = self.config.read().await;
                    let mut last_prices = self.last_scanned_price.lock().await;
                    let last = last_prices.get(&pair.canonical()).copied();
                    let moved_enough = last.map(|p| {
                        if p.is_zero() { return false; }
                        ((ticker.mid_price() - p) / p).abs() >= config.trading.event_price_move_pct / Decimal::from(100)
                    }).unwrap_or(true);
                    drop(config);
                    if moved_enough {
                        last_prices.insert(pair.canonical(), ticker.mid_price());
                        drop(last_prices);
                        self.scan_queue.enqueue(pair);
                    }
                }
                MarketEvent::Ticker(pair, ticker) => {
                    self.market.update_ticker(&pair, ticker).await;
                }
                MarketEvent::Disconnected => {
                    self.engine_state.write().await.ws_connected = false;
                    let mut since = self.consecutive_ws_disconnect_since.lock().await;
                    if since.is_none() {
                        *since = Some(chrono::Utc::now());
                    }
                }
                MarketEvent::Error(e) => {
                    warn!(error = %e, "websocket stream error");
                }
            }
        }
    }

    async fn scan_loop_task(self: &Arc<Self>) {
        let scan_interval = self.config.read().await.trading.scan_interval_seconds;
        let mut fallback = interval(StdDuration::from_secs(scan_interval.max(1)));
        loop {
            tokio::select! {
                Some(pair) = self.scan_queue.recv() => {
                    self.scan_one(&pair).await;
                }
                _ = fallback.tick() => {
                    for pair in self.pairs.clone() {
                        self.scan_queue.enqueue(pair);
                    }
                }
            }
        }
    }

    async fn scan_one(self: &Arc<Self>, pair: &Pair) {
        let config = self.config.read().await.clone();
        if !self.engine_state.read().await.accepts_new_entries() {
            return;
        }

        let signal = {
            let confluence = self.confluence.read().await;
            let mut cache = self.indicator_cache.lock().await;
            confluence.evaluate(pair, &self.market, &mut cache, &config).await
        };
        let Some(signal) = signal else { return };
        if !signal.direction.is_actionable() {
            return;
        }

        let candles = self.market.get_candles(pair, TimeFrame::M5, 60).await;
        let regime = crate::confluence::detect_regime(&candles, &config.regime);
        let strategy_label = if signal.is_sure_fire { "sure_fire" } else { "confluence" };

        self.analytics.record(AnalyticsEvent::SignalEvaluated {
            pair: pair.clone(),
            confluence_count: signal.confluence_count,
            is_sure_fire: signal.is_sure_fire,
        });
        self.ledger.insert_signal(pair, &signal, None).await.ok();

        let engine_state = self.engine_state.read().await.clone();
        match self.executor.enter(&signal, strategy_label, regime, &engine_state).await {
            Ok(crate::executor::ExecutionOutcome::Entered { trade_id, fill_price }) => {
                info!(pair = %pair, trade_id, price = %fill_price, "scan produced a new entry");
            }
            Ok(crate::executor::ExecutionOutcome::Skipped(reason)) => {
                self.ledger.log_thought(Some(pair), "debug", &format!("entry skipped: {reason}")).await.ok();
            }
            Ok(_) => {}
            Err(e) => {
                self.scan_failures.fetch_add(1, Ordering::Relaxed);
                error!(pair = %pair, error = %e, "scan entry attempt failed");
            }
        }
    }

    async fn position_loop_task(self: &Arc<Self>) {
        let check_interval = self.config.read().await.trading.position_check_interval_seconds;
        let mut ticker = interval(StdDuration::from_secs(check_interval.max(1)));
        loop {
            ticker.tick().await;
            let open_trades = match self.ledger.get_open_trades().await {
                Ok(trades) => trades,
                Err(e) => {
                    error!(error = %e, "position loop could not list open trades");
                    continue;
                }
            };
            for trade in open_trades {
                let pair = trade.pair.clone();
                match self.executor.manage(&trade.trade_id).await {
                    Ok(Some(crate::executor::ExecutionOutcome::Exited { pnl, reason, .. })) => {
                        self.analytics.record(AnalyticsEvent::TradeClosed {
                            pair,
                            strategy: trade.strategy.clone(),
                            pnl,
                            reason,
                            closed_at: chrono::Utc::now(),
                        });
                    }
                    Ok(_) => {}
                    Err(e) => error!(trade_id = %trade.trade_id, error = %e, "position management pass failed"),
                }
            }
        }
    }

    async fn health_monitor_task(self: &Arc<Self>) {
        let health_interval = self.config.read().await.monitoring.health_interval_seconds;
        let mut ticker = interval(StdDuration::from_secs(health_interval.max(1)));
        loop {
            ticker.tick().await;
            let config = self.config.read().await.clone();
            let mut tracker = self.stale_tracker.lock().await;

            for pair in &self.pairs {
                let stale = self.market.is_stale(pair, 60).await;
                let consecutive = tracker.record(pair, stale);
                if consecutive >= config.monitoring.stale_data_pause_after_checks {
                    self.auto_pause("stale_data", &config).await;
                }
            }
            drop(tracker);

            if let Some(since) = *self.consecutive_ws_disconnect_since.lock().await {
                let down_for = (chrono::Utc::now() - since).num_seconds();
                if down_for >= config.monitoring.ws_disconnect_pause_after_seconds {
                    self.auto_pause("ws_disconnected", &config).await;
                }
            }

            let risk_state = self.risk.state_snapshot().await;
            if risk_state.consecutive_losses >= config.monitoring.consecutive_losses_pause_threshold {
                self.auto_pause("consecutive_losses", &config).await;
            }
            if risk_state.drawdown_pct() >= config.monitoring.drawdown_pause_pct * Decimal::from(100) {
                self.auto_pause("drawdown", &config).await;
            }
        }
    }

    async fn auto_pause(&self, reason: &str, config: &RuntimeConfig) {
        let mut state = self.engine_state.write().await;
        let was_already_paused = state.auto_pause_reason.is_some();
        state.auto_pause(reason);
        drop(state);
        if !was_already_paused {
            warn!(reason, "auto-pause triggered");
            self.status_tx.send(format!("auto_pause:{reason}")).ok();
            if config.monitoring.emergency_close_on_auto_pause {
                self.close_all_inner().await;
            }
        }
    }

    async fn reconcile_task(self: &Arc<Self>) {
        let mut ticker = interval(StdDuration::from_secs(300));
        loop {
            ticker.tick().await;
            match self.executor.reconcile().await {
                Ok(findings) if findings.is_empty() => {}
                Ok(findings) => {
                    for finding in findings {
                        warn!(%finding, "reconciliation discrepancy");
                        self.ledger.log_thought(None, "warn", &finding).await.ok();
                    }
                }
                Err(e) => error!(error = %e, "reconciliation pass failed"),
            }
        }
    }

    async fn cleanup_task(self: &Arc<Self>) {
        let mut ticker = interval(StdDuration::from_secs(3600));
        loop {
            ticker.tick().await;
            self.ledger.record_metric("scan_failures_total", self.scan_failures.load(Ordering::Relaxed) as f64).await.ok();
        }
    }

    // -- control plane ---------------------------------------------------

    pub fn control(&self) -> ControlPlane {
        ControlPlane::new(Arc::clone(&self.engine_state), self.status_tx.clone())
    }

    pub async fn status(&self) -> StatusSnapshot {
        let state = self.engine_state.read().await;
        let risk_state = self.risk.state_snapshot().await;
        let open_trade_count = self.ledger.get_open_trades().await.map(|t| t.len()).unwrap_or(0);
        StatusSnapshot {
            running: state.running,
            paused: state.paused,
            auto_pause_reason: state.auto_pause_reason.clone(),
            ws_connected: state.ws_connected,
            killed: state.killed,
            started_at: state.started_at,
            uptime_seconds: state.uptime_seconds(),
            open_trade_count,
            bankroll: risk_state.bankroll,
            daily_pnl: risk_state.daily_pnl,
        }
    }

    pub async fn close_all(&self) {
        self.close_all_inner().await;
    }

    async fn close_all_inner(&self) {
        let open_trades = match self.ledger.get_open_trades().await {
            Ok(trades) => trades,
            Err(e) => {
                error!(error = %e, "close_all could not list open trades");
                return;
            }
        };
        for mut trade in open_trades {
            let mark_price = self.market.get_ticker(&trade.pair).await.map(|t| t.last).unwrap_or(trade.entry_price);
            if let Err(e) = self.executor.exit(&mut trade, mark_price, crate::types::CloseReason::OperatorClose).await {
                error!(trade_id = %trade.trade_id, error = %e, "close_all failed to exit a position");
            }
        }
    }
}
