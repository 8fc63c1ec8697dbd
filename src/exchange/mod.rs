#![allow(dead_code)]
pub mod binance;
pub mod error;
pub mod websocket;

pub use binance::BinanceAdapter;
pub use error::ExchangeError;
pub use websocket::{BinanceWebSocket, MarketEvent};

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::{Candle, OcoOrderRequest, OcoOrderResult, Order, OrderRequest, Pair, TimeFrame, Ticker};

/// Everything the supervisor and executor need from a venue. One
/// implementation per exchange; `BinanceAdapter` is the only one wired up.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn get_ticker(&self, pair: &Pair) -> Result<Ticker, ExchangeError>;

    async fn get_candles(&self, pair: &Pair, timeframe: TimeFrame, limit: u32) -> Result<Vec<Candle>, ExchangeError>;

    /// Paginated backfill between two epoch-second bounds, newest-last.
    async fn get_historical_candles(
        &self,
        pair: &Pair,
        timeframe: TimeFrame,
        start_time: i64,
        end_time: i64,
    ) -> Result<Vec<Candle>, ExchangeError>;

    async fn place_order(&self, request: &OrderRequest) -> Result<Order, ExchangeError>;

    async fn place_oco_order(&self, request: &OcoOrderRequest) -> Result<OcoOrderResult, ExchangeError>;

    async fn cancel_order(&self, pair: &Pair, client_order_id: &str) -> Result<(), ExchangeError>;

    async fn cancel_oco_order(&self, pair: &Pair, list_client_order_id: &str) -> Result<(), ExchangeError>;

    async fn get_order(&self, pair: &Pair, client_order_id: &str) -> Result<Order, ExchangeError>;

    async fn get_open_orders(&self, pair: &Pair) -> Result<Vec<Order>, ExchangeError>;

    async fn get_balance(&self, asset: &str) -> Result<Decimal, ExchangeError>;

    async fn get_server_time(&self) -> Result<i64, ExchangeError>;
}
