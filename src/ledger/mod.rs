#![allow(dead_code)]
//! Durable append-oriented store (C9). SQLite via `sqlx`, mirroring the
//! teacher's `database` module's style (raw SQL, string-serialized
//! `Decimal`/`DateTime`), generalized to the new schema and wrapped with a
//! single-writer lock so concurrent callers serialize instead of racing
//! SQLite's own locking.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::market_data::BookAnalysis;
use crate::types::{CloseReason, ConfluenceSignal, Pair, Trade, TradeStatus, TrailingState};

const WRITER_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// A daily win/loss/pnl rollup, unique per `(date, tenant)`.
#[derive(Debug, Clone)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub tenant: String,
    pub trades_closed: i64,
    pub wins: i64,
    pub losses: i64,
    pub realized_pnl: Decimal,
}

/// Append-oriented SQLite store. All mutating calls go through
/// `with_writer_lock`, which escalates to a hard error if the lock isn't
/// free within [`WRITER_LOCK_TIMEOUT`] — a stuck writer is a fault, not
/// something to silently queue behind.
pub struct Ledger {
    pool: SqlitePool,
    writer: Mutex<()>,
}

impl Ledger {
    pub async fn new(db_path: &str) -> Result<Self> {
        info!(path = db_path, "opening ledger database");

        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }

        let options = SqliteConnectOptions::from_str(db_path)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;

        let ledger = Self { pool, writer: Mutex::new(()) };
        ledger.create_schema().await?;
        info!("ledger schema ready");
        Ok(ledger)
    }

    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await?;
        let ledger = Self { pool, writer: Mutex::new(()) };
        ledger.create_schema().await?;
        Ok(ledger)
    }

    async fn with_writer_lock<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let _guard = timeout(WRITER_LOCK_TIMEOUT, self.writer.lock())
            .await
            .map_err(|_| anyhow!("ledger writer lock timed out after {:?}", WRITER_LOCK_TIMEOUT))?;
        f().await
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                trade_id TEXT PRIMARY KEY,
                pair TEXT NOT NULL,
                side TEXT NOT NULL,
                status TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                exit_price TEXT,
                quantity TEXT NOT NULL,
                entry_fee TEXT NOT NULL,
                exit_fee TEXT NOT NULL,
                pnl TEXT,
                pnl_pct TEXT,
                strategy TEXT NOT NULL,
                confidence TEXT NOT NULL,
                stop_loss TEXT NOT NULL,
                take_profit TEXT NOT NULL,
                trailing_state TEXT NOT NULL,
                entry_time TEXT NOT NULL,
                exit_time TEXT,
                close_reason TEXT,
                metadata TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS thought_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts TEXT NOT NULL,
                pair TEXT,
                level TEXT NOT NULL,
                message TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts TEXT NOT NULL,
                name TEXT NOT NULL,
                value REAL NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ml_features (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trade_id TEXT NOT NULL,
                ts TEXT NOT NULL,
                features TEXT NOT NULL,
                label REAL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS order_book_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts TEXT NOT NULL,
                pair TEXT NOT NULL,
                obi TEXT NOT NULL,
                book_score TEXT NOT NULL,
                spread_pct TEXT NOT NULL,
                whale_flag INTEGER NOT NULL,
                liquidity_score TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts TEXT NOT NULL,
                pair TEXT NOT NULL,
                direction TEXT NOT NULL,
                confidence TEXT NOT NULL,
                confluence_count INTEGER NOT NULL,
                is_sure_fire INTEGER NOT NULL,
                entry TEXT NOT NULL,
                sl TEXT NOT NULL,
                tp TEXT NOT NULL,
                event_id TEXT UNIQUE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_summary (
                date TEXT NOT NULL,
                tenant TEXT NOT NULL,
                trades_closed INTEGER NOT NULL,
                wins INTEGER NOT NULL,
                losses INTEGER NOT NULL,
                realized_pnl TEXT NOT NULL,
                PRIMARY KEY (date, tenant)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS system_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // -- trades ----------------------------------------------------------

    /// Inserts a newly-opened trade. `trade_id` is the idempotency key: a
    /// retried insert for the same id is rejected by the primary key
    /// constraint rather than duplicating the row.
    pub async fn insert_trade_open(&self, trade: &Trade) -> Result<()> {
        self.with_writer_lock(|| async {
            let trailing = serde_json::to_string(&trade.trailing_state)?;
            let metadata = serde_json::to_string(&trade.metadata)?;
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO trades
                    (trade_id, pair, side, status, entry_price, exit_price, quantity,
                     entry_fee, exit_fee, pnl, pnl_pct, strategy, confidence,
                     stop_loss, take_profit, trailing_state, entry_time, exit_time,
                     close_reason, metadata)
                VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
                "#,
            )
            .bind(&trade.trade_id)
            .bind(trade.pair.canonical())
            .bind(format!("{:?}", trade.side))
            .bind("open")
            .bind(trade.entry_price.to_string())
            .bind(trade.exit_price.map(|p| p.to_string()))
            .bind(trade.quantity.to_string())
            .bind(trade.entry_fee.to_string())
            .bind(trade.exit_fee.to_string())
            .bind(trade.pnl.map(|p| p.to_string()))
            .bind(trade.pnl_pct.map(|p| p.to_string()))
            .bind(&trade.strategy)
            .bind(trade.confidence.to_string())
            .bind(trade.stop_loss.to_string())
            .bind(trade.take_profit.to_string())
            .bind(trailing)
            .bind(trade.entry_time.to_rfc3339())
            .bind(trade.exit_time.map(|t| t.to_rfc3339()))
            .bind(trade.close_reason.map(|r| r.as_str().to_string()))
            .bind(metadata)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                warn!(trade_id = %trade.trade_id, "ignored duplicate trade-open insert");
            }
            Ok(())
        })
        .await
    }

    /// Idempotent: a trade already in a terminal status is left untouched,
    /// matching the ledger's `open -> closed|error` transition guarantee.
    pub async fn close_trade(&self, trade: &Trade) -> Result<()> {
        self.with_writer_lock(|| async {
            let trailing = serde_json::to_string(&trade.trailing_state)?;
            let metadata = serde_json::to_string(&trade.metadata)?;
            sqlx::query(
                r#"
                UPDATE trades SET
                    status = ?, exit_price = ?, pnl = ?, pnl_pct = ?,
                    exit_time = ?, close_reason = ?, trailing_state = ?,
                    exit_fee = ?, metadata = ?
                WHERE trade_id = ? AND status = 'open'
                "#,
            )
            .bind(match trade.status {
                TradeStatus::Closed => "closed",
                TradeStatus::Error => "error",
                TradeStatus::Cancelled => "cancelled",
                TradeStatus::Open => "open",
            })
            .bind(trade.exit_price.map(|p| p.to_string()))
            .bind(trade.pnl.map(|p| p.to_string()))
            .bind(trade.pnl_pct.map(|p| p.to_string()))
            .bind(trade.exit_time.map(|t| t.to_rfc3339()))
            .bind(trade.close_reason.map(|r| r.as_str().to_string()))
            .bind(trailing)
            .bind(trade.exit_fee.to_string())
            .bind(metadata)
            .bind(&trade.trade_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    /// Updates the forward-compatible metadata blob in place (exchange stop
    /// order id, partial exits, fee rates) without touching status/pnl.
    pub async fn update_metadata(&self, trade_id: &str, metadata: &crate::types::TradeMetadata) -> Result<()> {
        self.with_writer_lock(|| async {
            let json = serde_json::to_string(metadata)?;
            sqlx::query("UPDATE trades SET metadata = ? WHERE trade_id = ? AND status = 'open'")
                .bind(json)
                .bind(trade_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    pub async fn update_trailing_state(&self, trade_id: &str, trailing: &TrailingState) -> Result<()> {
        self.with_writer_lock(|| async {
            let json = serde_json::to_string(trailing)?;
            sqlx::query("UPDATE trades SET trailing_state = ? WHERE trade_id = ? AND status = 'open'")
                .bind(json)
                .bind(trade_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    /// Every still-`open` trade, used to rehydrate `RiskManager` and the
    /// executor's position-management loop after a restart.
    pub async fn get_open_trades(&self) -> Result<Vec<Trade>> {
        let rows = sqlx::query("SELECT * FROM trades WHERE status = 'open'").fetch_all(&self.pool).await?;
        rows.iter().map(row_to_trade).collect()
    }

    pub async fn get_trade(&self, trade_id: &str) -> Result<Option<Trade>> {
        let row = sqlx::query("SELECT * FROM trades WHERE trade_id = ?").bind(trade_id).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_trade).transpose()
    }

    // -- thought log / metrics / ml features / book snapshots ------------

    pub async fn log_thought(&self, pair: Option<&Pair>, level: &str, message: &str) -> Result<()> {
        self.with_writer_lock(|| async {
            sqlx::query("INSERT INTO thought_log (ts, pair, level, message) VALUES (?,?,?,?)")
                .bind(Utc::now().to_rfc3339())
                .bind(pair.map(|p| p.canonical()))
                .bind(level)
                .bind(message)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    pub async fn record_metric(&self, name: &str, value: f64) -> Result<()> {
        self.with_writer_lock(|| async {
            sqlx::query("INSERT INTO metrics (ts, name, value) VALUES (?,?,?)")
                .bind(Utc::now().to_rfc3339())
                .bind(name)
                .bind(value)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    /// Captures a feature vector at entry; `label` is filled in later via
    /// `label_ml_features` once the trade closes.
    pub async fn insert_ml_features(&self, trade_id: &str, features_json: &str) -> Result<()> {
        self.with_writer_lock(|| async {
            sqlx::query("INSERT INTO ml_features (trade_id, ts, features, label) VALUES (?,?,?,NULL)")
                .bind(trade_id)
                .bind(Utc::now().to_rfc3339())
                .bind(features_json)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    pub async fn label_ml_features(&self, trade_id: &str, label: f64) -> Result<()> {
        self.with_writer_lock(|| async {
            sqlx::query("UPDATE ml_features SET label = ? WHERE trade_id = ?")
                .bind(label)
                .bind(trade_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    pub async fn insert_book_snapshot(&self, pair: &Pair, analysis: &BookAnalysis) -> Result<()> {
        self.with_writer_lock(|| async {
            sqlx::query(
                r#"
                INSERT INTO order_book_snapshots
                    (ts, pair, obi, book_score, spread_pct, whale_flag, liquidity_score)
                VALUES (?,?,?,?,?,?,?)
                "#,
            )
            .bind(analysis.ts.to_rfc3339())
            .bind(pair.canonical())
            .bind(analysis.obi.to_string())
            .bind(analysis.book_score.to_string())
            .bind(analysis.spread_pct.to_string())
            .bind(analysis.whale_flag as i64)
            .bind(analysis.liquidity_score.to_string())
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    /// Insert-or-ignore on `event_id` gives webhook-style idempotency for
    /// signals that originate from an external trigger.
    pub async fn insert_signal(&self, pair: &Pair, signal: &ConfluenceSignal, event_id: Option<&str>) -> Result<()> {
        self.with_writer_lock(|| async {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO signals
                    (ts, pair, direction, confidence, confluence_count, is_sure_fire, entry, sl, tp, event_id)
                VALUES (?,?,?,?,?,?,?,?,?,?)
                "#,
            )
            .bind(signal.ts.to_rfc3339())
            .bind(pair.canonical())
            .bind(format!("{:?}", signal.direction))
            .bind(signal.confidence.to_string())
            .bind(signal.confluence_count as i64)
            .bind(signal.is_sure_fire as i64)
            .bind(signal.entry.to_string())
            .bind(signal.sl.to_string())
            .bind(signal.tp.to_string())
            .bind(event_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    // -- daily summary / system state -------------------------------------

    pub async fn upsert_daily_summary(&self, tenant: &str, date: NaiveDate, pnl_delta: Decimal, won: bool) -> Result<()> {
        self.with_writer_lock(|| async {
            let existing = sqlx::query("SELECT trades_closed, wins, losses, realized_pnl FROM daily_summary WHERE date = ? AND tenant = ?")
                .bind(date.to_string())
                .bind(tenant)
                .fetch_optional(&self.pool)
                .await?;

            let (trades_closed, wins, losses, realized_pnl) = match existing {
                Some(row) => {
                    let prev_pnl = Decimal::from_str(row.get::<String, _>("realized_pnl").as_str()).unwrap_or(Decimal::ZERO);
                    (
                        row.get::<i64, _>("trades_closed") + 1,
                        row.get::<i64, _>("wins") + if won { 1 } else { 0 },
                        row.get::<i64, _>("losses") + if won { 0 } else { 1 },
                        prev_pnl + pnl_delta,
                    )
                }
                None => (1, if won { 1 } else { 0 }, if won { 0 } else { 1 }, pnl_delta),
            };

            sqlx::query(
                r#"
                INSERT INTO daily_summary (date, tenant, trades_closed, wins, losses, realized_pnl)
                VALUES (?,?,?,?,?,?)
                ON CONFLICT(date, tenant) DO UPDATE SET
                    trades_closed = excluded.trades_closed,
                    wins = excluded.wins,
                    losses = excluded.losses,
                    realized_pnl = excluded.realized_pnl
                "#,
            )
            .bind(date.to_string())
            .bind(tenant)
            .bind(trades_closed)
            .bind(wins)
            .bind(losses)
            .bind(realized_pnl.to_string())
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    pub async fn get_system_state(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM system_state WHERE key = ?").bind(key).fetch_optional(&self.pool).await?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    pub async fn set_system_state(&self, key: &str, value: &str) -> Result<()> {
        self.with_writer_lock(|| async {
            sqlx::query(
                r#"
                INSERT INTO system_state (key, value, updated_at) VALUES (?,?,?)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                "#,
            )
            .bind(key)
            .bind(value)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }
}

fn row_to_trade(row: &sqlx::sqlite::SqliteRow) -> Result<Trade> {
    use crate::types::{Side, TradeMetadata};

    let pair_str: String = row.get("pair");
    let pair = Pair::from_str(&pair_str).context("corrupt pair in trades row")?;
    let side_str: String = row.get("side");
    let side = if side_str == "Buy" { Side::Buy } else { Side::Sell };
    let status_str: String = row.get("status");
    let status = match status_str.as_str() {
        "open" => TradeStatus::Open,
        "closed" => TradeStatus::Closed,
        "cancelled" => TradeStatus::Cancelled,
        _ => TradeStatus::Error,
    };

    let parse_dec = |s: String| Decimal::from_str(&s).unwrap_or(Decimal::ZERO);
    let entry_price = parse_dec(row.get::<String, _>("entry_price"));
    let exit_price: Option<String> = row.get("exit_price");
    let quantity = parse_dec(row.get::<String, _>("quantity"));
    let entry_fee = parse_dec(row.get::<String, _>("entry_fee"));
    let exit_fee = parse_dec(row.get::<String, _>("exit_fee"));
    let pnl: Option<String> = row.get("pnl");
    let pnl_pct: Option<String> = row.get("pnl_pct");
    let confidence = parse_dec(row.get::<String, _>("confidence"));
    let stop_loss = parse_dec(row.get::<String, _>("stop_loss"));
    let take_profit = parse_dec(row.get::<String, _>("take_profit"));

    let trailing_state: TrailingState =
        serde_json::from_str(&row.get::<String, _>("trailing_state")).context("corrupt trailing_state json")?;
    let metadata: TradeMetadata = serde_json::from_str(&row.get::<String, _>("metadata")).context("corrupt metadata json")?;

    let entry_time: DateTime<Utc> =
        DateTime::parse_from_rfc3339(&row.get::<String, _>("entry_time")).context("corrupt entry_time")?.with_timezone(&Utc);
    let exit_time_str: Option<String> = row.get("exit_time");
    let exit_time = exit_time_str.map(|s| DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc))).transpose()?;

    let close_reason_str: Option<String> = row.get("close_reason");
    let close_reason = close_reason_str.map(|s| match s.as_str() {
        "stop_loss" => CloseReason::StopLoss,
        "take_profit" => CloseReason::TakeProfit,
        "trailing" => CloseReason::Trailing,
        "operator_close" => CloseReason::OperatorClose,
        "max_duration" => CloseReason::MaxDuration,
        _ => CloseReason::SmartExitTier(0),
    });

    Ok(Trade {
        trade_id: row.get("trade_id"),
        pair,
        side,
        status,
        entry_price,
        exit_price: exit_price.map(parse_dec),
        quantity,
        entry_fee,
        exit_fee,
        pnl: pnl.map(parse_dec),
        pnl_pct: pnl_pct.map(parse_dec),
        strategy: row.get("strategy"),
        confidence,
        stop_loss,
        take_profit,
        trailing_state,
        entry_time,
        exit_time,
        close_reason,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Regime, Side, TrendRegime, VolRegime};
    use rust_decimal_macros::dec;

    fn sample_trade() -> Trade {
        let regime = Regime { trend: TrendRegime::Trend, vol: VolRegime::Mid, vol_level: 0.4, vol_expanding: false };
        Trade::open(Pair::new("BTC", "USDT"), Side::Buy, dec!(100), dec!(1), "trend", dec!(0.7), dec!(97), dec!(106), regime)
    }

    #[tokio::test]
    async fn inserting_the_same_trade_twice_is_a_no_op() {
        let ledger = Ledger::in_memory().await.unwrap();
        let trade = sample_trade();
        ledger.insert_trade_open(&trade).await.unwrap();
        ledger.insert_trade_open(&trade).await.unwrap();

        let open = ledger.get_open_trades().await.unwrap();
        assert_eq!(open.len(), 1);
    }

    #[tokio::test]
    async fn closing_an_already_closed_trade_leaves_the_first_close_intact() {
        let ledger = Ledger::in_memory().await.unwrap();
        let mut trade = sample_trade();
        ledger.insert_trade_open(&trade).await.unwrap();

        trade.close(dec!(105), CloseReason::TakeProfit);
        ledger.close_trade(&trade).await.unwrap();

        let mut second_attempt = trade.clone();
        second_attempt.status = TradeStatus::Open; // simulate a stale in-memory copy retried
        second_attempt.close(dec!(999), CloseReason::OperatorClose);
        ledger.close_trade(&second_attempt).await.unwrap();

        let stored = ledger.get_trade(&trade.trade_id).await.unwrap().unwrap();
        assert_eq!(stored.pnl, trade.pnl);
        assert_eq!(stored.close_reason, Some(CloseReason::TakeProfit));
    }

    #[tokio::test]
    async fn rehydration_only_returns_open_trades() {
        let ledger = Ledger::in_memory().await.unwrap();
        let mut open_trade = sample_trade();
        open_trade.trade_id = "open-1".to_string();
        ledger.insert_trade_open(&open_trade).await.unwrap();

        let mut closed_trade = sample_trade();
        closed_trade.trade_id = "closed-1".to_string();
        ledger.insert_trade_open(&closed_trade).await.unwrap();
        closed_trade.close(dec!(110), CloseReason::TakeProfit);
        ledger.close_trade(&closed_trade).await.unwrap();

        let open = ledger.get_open_trades().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].trade_id, "open-1");
    }

    #[tokio::test]
    async fn daily_summary_accumulates_across_calls() {
        let ledger = Ledger::in_memory().await.unwrap();
        let date = Utc::now().date_naive();
        ledger.upsert_daily_summary("default", date, dec!(50), true).await.unwrap();
        ledger.upsert_daily_summary("default", date, dec!(-20), false).await.unwrap();

        let row = sqlx::query("SELECT * FROM daily_summary WHERE date = ? AND tenant = 'default'")
            .bind(date.to_string())
            .fetch_one(&ledger.pool)
            .await
            .unwrap();
        assert_eq!(row.get::<i64, _>("trades_closed"), 2);
        assert_eq!(row.get::<i64, _>("wins"), 1);
        assert_eq!(row.get::<i64, _>("losses"), 1);
    }

    #[tokio::test]
    async fn system_state_upserts_in_place() {
        let ledger = Ledger::in_memory().await.unwrap();
        ledger.set_system_state("last_scan_ts", "100").await.unwrap();
        ledger.set_system_state("last_scan_ts", "200").await.unwrap();
        assert_eq!(ledger.get_system_state("last_scan_ts").await.unwrap(), Some("200".to_string()));
    }
}
