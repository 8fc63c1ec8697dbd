#![allow(dead_code)]
use std::collections::{HashMap, VecDeque};
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use chrono::{TimeZone, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, info, warn};

use crate::exchange::{ExchangeAdapter, ExchangeError};
use crate::types::{
    Candle, OcoOrderRequest, OcoOrderResult, Order, OrderKind, OrderRequest, OrderStatus, Pair, Side, Ticker,
    TimeFrame,
};

const BINANCE_US_API: &str = "https://api.binance.us";
const BINANCE_US_TESTNET: &str = "https://testnet.binance.vision";
const RECV_WINDOW_MS: i64 = 5_000;
const CLIENT_ORDER_ID_MEMORY: usize = 500;

type HmacSha256 = Hmac<Sha256>;
type Limiter = RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>;

fn wire_symbol(pair: &Pair) -> String {
    format!("{}{}", pair.base(), pair.quote())
}

fn dec(s: &str) -> Result<Decimal, ExchangeError> {
    Decimal::from_str(s).map_err(|e| ExchangeError::Transient(format!("unparsable decimal '{}': {}", s, e)))
}

/// REST client for Binance's spot API. Signs private endpoints with
/// HMAC-SHA256 over the query string, rate-limits every call through a
/// shared token bucket, and de-dups client order ids against a bounded
/// in-memory window so a retried submit never double-places an order.
pub struct BinanceAdapter {
    client: Client,
    api_key: String,
    secret_key: String,
    base_url: String,
    limiter: Limiter,
    last_nonce_ms: AtomicI64,
    seen_client_order_ids: Mutex<VecDeque<String>>,
}

impl BinanceAdapter {
    pub fn new(api_key: String, secret_key: String, use_testnet: bool) -> Self {
        let base_url = if use_testnet {
            BINANCE_US_TESTNET.to_string()
        } else {
            BINANCE_US_API.to_string()
        };

        Self {
            client: Client::new(),
            api_key,
            secret_key,
            base_url,
            limiter: RateLimiter::direct(Quota::per_second(NonZeroU32::new(10).unwrap())),
            last_nonce_ms: AtomicI64::new(0),
            seen_client_order_ids: Mutex::new(VecDeque::with_capacity(CLIENT_ORDER_ID_MEMORY)),
        }
    }

    pub fn public_only() -> Self {
        Self::new(String::new(), String::new(), false)
    }

    fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret_key.as_bytes()).expect("HMAC can take a key of any size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Strictly-increasing millisecond timestamp. Binance rejects a signed
    /// request whose `timestamp` doesn't advance, which a fast retry loop or
    /// a backwards clock step could otherwise produce.
    fn next_timestamp_ms(&self) -> i64 {
        let wall_clock = Utc::now().timestamp_millis();
        loop {
            let prev = self.last_nonce_ms.load(Ordering::SeqCst);
            let next = wall_clock.max(prev + 1);
            if self
                .last_nonce_ms
                .compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return next;
            }
        }
    }

    fn build_signed_query(&self, params: &HashMap<&str, String>) -> String {
        let timestamp = self.next_timestamp_ms();
        let mut query_parts: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        query_parts.sort();
        query_parts.push(format!("recvWindow={}", RECV_WINDOW_MS));
        query_parts.push(format!("timestamp={}", timestamp));
        let query = query_parts.join("&");
        let signature = self.sign(&query);
        format!("{}&signature={}", query, signature)
    }

    /// Returns `true` the first time this id is seen, `false` on a repeat —
    /// the caller should treat a repeat as "already submitted, don't resend".
    fn remember_client_order_id(&self, id: &str) -> bool {
        let mut seen = self.seen_client_order_ids.lock().unwrap();
        if seen.iter().any(|s| s == id) {
            return false;
        }
        seen.push_back(id.to_string());
        while seen.len() > CLIENT_ORDER_ID_MEMORY {
            seen.pop_front();
        }
        true
    }

    async fn throttle(&self) {
        self.limiter.until_ready().await;
    }

    async fn error_from_response(resp: reqwest::Response) -> ExchangeError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        ExchangeError::from_binance_response(status, &body)
    }

    fn parse_klines(pair: &Pair, timeframe: TimeFrame, raw: Vec<Vec<serde_json::Value>>) -> Result<Vec<Candle>, ExchangeError> {
        raw.into_iter()
            .map(|k| {
                let open_time_ms = k.get(0).and_then(|v| v.as_i64()).unwrap_or(0);
                let open = k.get(1).and_then(|v| v.as_str()).unwrap_or("0");
                let high = k.get(2).and_then(|v| v.as_str()).unwrap_or("0");
                let low = k.get(3).and_then(|v| v.as_str()).unwrap_or("0");
                let close = k.get(4).and_then(|v| v.as_str()).unwrap_or("0");
                let volume = k.get(5).and_then(|v| v.as_str()).unwrap_or("0");

                Ok(Candle::new(
                    pair,
                    timeframe,
                    open_time_ms / 1000,
                    dec(open)?,
                    dec(high)?,
                    dec(low)?,
                    dec(close)?,
                    dec(volume)?,
                    true,
                ))
            })
            .collect()
    }

    fn convert_order_response(resp: OrderResponse, pair: Pair) -> Result<Order, ExchangeError> {
        let status = match resp.status.as_str() {
            "NEW" => OrderStatus::Open,
            "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
            "FILLED" => OrderStatus::Filled,
            "CANCELED" => OrderStatus::Cancelled,
            "REJECTED" => OrderStatus::Rejected,
            "EXPIRED" => OrderStatus::Expired,
            _ => OrderStatus::Pending,
        };

        let kind = match resp.order_type.as_str() {
            "MARKET" => OrderKind::Market,
            "LIMIT" => OrderKind::Limit,
            "STOP_LOSS" | "STOP_LOSS_LIMIT" => OrderKind::StopLoss,
            _ => OrderKind::Market,
        };

        let side = match resp.side.as_str() {
            "BUY" => Side::Buy,
            _ => Side::Sell,
        };

        let quote_qty = resp.cummulative_quote_qty.as_ref().and_then(|q| Decimal::from_str(q).ok());
        let executed_qty = dec(&resp.executed_qty)?;
        let average_fill_price = resp
            .avg_price
            .as_ref()
            .and_then(|p| Decimal::from_str(p).ok())
            .filter(|p| !p.is_zero())
            .or_else(|| quote_qty.filter(|_| !executed_qty.is_zero()).map(|q| q / executed_qty));

        Ok(Order {
            id: resp.order_id.to_string(),
            client_order_id: resp.client_order_id,
            exchange_order_id: Some(resp.order_id.to_string()),
            pair,
            side,
            kind,
            status,
            quantity: dec(&resp.orig_qty)?,
            filled_quantity: executed_qty,
            price: resp.price.as_ref().and_then(|p| Decimal::from_str(p).ok()),
            average_fill_price,
            stop_price: resp.stop_price.as_ref().and_then(|p| Decimal::from_str(p).ok()),
            created_at: resp
                .transact_time
                .and_then(|t| Utc.timestamp_millis_opt(t).single())
                .unwrap_or_else(Utc::now),
            updated_at: Utc::now(),
        })
    }
}

#[async_trait::async_trait]
impl ExchangeAdapter for BinanceAdapter {
    async fn get_ticker(&self, pair: &Pair) -> Result<Ticker, ExchangeError> {
        self.throttle().await;
        let url = format!("{}/api/v3/ticker/bookTicker?symbol={}", self.base_url, wire_symbol(pair));
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        let body: BookTickerResponse = resp.json().await?;
        let bid = dec(&body.bid_price)?;
        let ask = dec(&body.ask_price)?;
        Ok(Ticker {
            bid,
            ask,
            last: (bid + ask) / Decimal::from(2),
            ts: Utc::now(),
        })
    }

    async fn get_candles(&self, pair: &Pair, timeframe: TimeFrame, limit: u32) -> Result<Vec<Candle>, ExchangeError> {
        self.throttle().await;
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            wire_symbol(pair),
            binance_interval(timeframe),
            limit
        );
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        let raw: Vec<Vec<serde_json::Value>> = resp.json().await?;
        Self::parse_klines(pair, timeframe, raw)
    }

    async fn get_historical_candles(
        &self,
        pair: &Pair,
        timeframe: TimeFrame,
        start_time: i64,
        end_time: i64,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let mut all_candles = Vec::new();
        let mut cursor_ms = start_time * 1000;
        let end_ms = end_time * 1000;

        info!(pair = %pair, "backfilling candles from {} to {}", start_time, end_time);

        loop {
            self.throttle().await;
            let url = format!(
                "{}/api/v3/klines?symbol={}&interval={}&startTime={}&endTime={}&limit=1000",
                self.base_url,
                wire_symbol(pair),
                binance_interval(timeframe),
                cursor_ms,
                end_ms
            );
            let resp = self.client.get(&url).send().await?;
            if !resp.status().is_success() {
                return Err(Self::error_from_response(resp).await);
            }
            let raw: Vec<Vec<serde_json::Value>> = resp.json().await?;
            if raw.is_empty() {
                break;
            }
            let batch_len = raw.len();
            let batch = Self::parse_klines(pair, timeframe, raw)?;

            if let Some(last) = batch.last() {
                cursor_ms = (last.close_time + 1) * 1000;
            }
            all_candles.extend(batch);

            if batch_len < 1000 || cursor_ms >= end_ms {
                break;
            }
        }

        debug!(pair = %pair, count = all_candles.len(), "backfill complete");
        Ok(all_candles)
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<Order, ExchangeError> {
        if !self.remember_client_order_id(&request.client_order_id) {
            warn!(client_order_id = %request.client_order_id, "duplicate order submission suppressed");
            return self.get_order(&request.pair, &request.client_order_id).await;
        }

        self.throttle().await;
        let url = format!("{}/api/v3/order", self.base_url);
        let mut params: HashMap<&str, String> = HashMap::new();
        params.insert("symbol", wire_symbol(&request.pair));
        params.insert("side", if request.side == Side::Buy { "BUY".into() } else { "SELL".into() });
        params.insert("type", request.kind.as_str().to_string());
        params.insert("quantity", request.quantity.to_string());
        params.insert("newClientOrderId", request.client_order_id.clone());
        if let Some(price) = request.price {
            params.insert("price", price.to_string());
            params.insert("timeInForce", if request.post_only { "GTX".to_string() } else { "GTC".to_string() });
        }
        if let Some(stop_price) = request.stop_price {
            params.insert("stopPrice", stop_price.to_string());
        }

        let query = self.build_signed_query(&params);
        let full_url = format!("{}?{}", url, query);

        debug!(?request, "placing order");
        let resp = self.client.post(&full_url).header("X-MBX-APIKEY", &self.api_key).send().await?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        let order_resp: OrderResponse = resp.json().await?;
        Self::convert_order_response(order_resp, request.pair.clone())
    }

    async fn place_oco_order(&self, request: &OcoOrderRequest) -> Result<OcoOrderResult, ExchangeError> {
        if !self.remember_client_order_id(&request.list_client_order_id) {
            warn!(list_client_order_id = %request.list_client_order_id, "duplicate OCO submission suppressed");
            return Ok(OcoOrderResult {
                list_order_id: String::new(),
                list_client_order_id: request.list_client_order_id.clone(),
            });
        }

        self.throttle().await;
        let url = format!("{}/api/v3/orderList/oco", self.base_url);
        let mut params: HashMap<&str, String> = HashMap::new();
        params.insert("symbol", wire_symbol(&request.pair));
        params.insert("side", if request.side == Side::Buy { "BUY".into() } else { "SELL".into() });
        params.insert("quantity", request.quantity.to_string());
        params.insert("price", request.take_profit_price.to_string());
        params.insert("stopPrice", request.stop_price.to_string());
        params.insert("stopLimitPrice", request.stop_limit_price.to_string());
        params.insert("stopLimitTimeInForce", "GTC".to_string());
        params.insert("listClientOrderId", request.list_client_order_id.clone());

        let query = self.build_signed_query(&params);
        let full_url = format!("{}?{}", url, query);

        debug!(?request, "placing OCO order");
        let resp = self.client.post(&full_url).header("X-MBX-APIKEY", &self.api_key).send().await?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        let body: serde_json::Value = resp.json().await?;
        let list_order_id = body["orderListId"].as_u64().map(|id| id.to_string()).unwrap_or_default();

        info!(
            list_order_id = %list_order_id,
            tp = %request.take_profit_price,
            sl = %request.stop_price,
            "OCO order placed"
        );

        Ok(OcoOrderResult {
            list_order_id,
            list_client_order_id: request.list_client_order_id.clone(),
        })
    }

    async fn cancel_order(&self, pair: &Pair, client_order_id: &str) -> Result<(), ExchangeError> {
        self.throttle().await;
        let url = format!("{}/api/v3/order", self.base_url);
        let mut params: HashMap<&str, String> = HashMap::new();
        params.insert("symbol", wire_symbol(pair));
        params.insert("origClientOrderId", client_order_id.to_string());

        let query = self.build_signed_query(&params);
        let full_url = format!("{}?{}", url, query);
        let resp = self.client.delete(&full_url).header("X-MBX-APIKEY", &self.api_key).send().await?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        info!(client_order_id, "order cancelled");
        Ok(())
    }

    async fn cancel_oco_order(&self, pair: &Pair, list_client_order_id: &str) -> Result<(), ExchangeError> {
        self.throttle().await;
        let url = format!("{}/api/v3/orderList", self.base_url);
        let mut params: HashMap<&str, String> = HashMap::new();
        params.insert("symbol", wire_symbol(pair));
        params.insert("listClientOrderId", list_client_order_id.to_string());

        let query = self.build_signed_query(&params);
        let full_url = format!("{}?{}", url, query);
        let resp = self.client.delete(&full_url).header("X-MBX-APIKEY", &self.api_key).send().await?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        info!(list_client_order_id, "OCO order cancelled");
        Ok(())
    }

    async fn get_order(&self, pair: &Pair, client_order_id: &str) -> Result<Order, ExchangeError> {
        self.throttle().await;
        let url = format!("{}/api/v3/order", self.base_url);
        let mut params: HashMap<&str, String> = HashMap::new();
        params.insert("symbol", wire_symbol(pair));
        params.insert("origClientOrderId", client_order_id.to_string());

        let query = self.build_signed_query(&params);
        let full_url = format!("{}?{}", url, query);
        let resp = self.client.get(&full_url).header("X-MBX-APIKEY", &self.api_key).send().await?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        let order_resp: OrderResponse = resp.json().await?;
        Self::convert_order_response(order_resp, pair.clone())
    }

    async fn get_open_orders(&self, pair: &Pair) -> Result<Vec<Order>, ExchangeError> {
        self.throttle().await;
        let url = format!("{}/api/v3/openOrders", self.base_url);
        let mut params: HashMap<&str, String> = HashMap::new();
        params.insert("symbol", wire_symbol(pair));

        let query = self.build_signed_query(&params);
        let full_url = format!("{}?{}", url, query);
        let resp = self.client.get(&full_url).header("X-MBX-APIKEY", &self.api_key).send().await?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        let order_resps: Vec<OrderResponse> = resp.json().await?;
        order_resps.into_iter().map(|o| Self::convert_order_response(o, pair.clone())).collect()
    }

    async fn get_balance(&self, asset: &str) -> Result<Decimal, ExchangeError> {
        self.throttle().await;
        let url = format!("{}/api/v3/account", self.base_url);
        let params: HashMap<&str, String> = HashMap::new();
        let query = self.build_signed_query(&params);
        let full_url = format!("{}?{}", url, query);
        let resp = self.client.get(&full_url).header("X-MBX-APIKEY", &self.api_key).send().await?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        let account: AccountResponse = resp.json().await?;
        for balance in account.balances {
            if balance.asset == asset {
                return dec(&balance.free);
            }
        }
        Ok(Decimal::ZERO)
    }

    async fn get_server_time(&self) -> Result<i64, ExchangeError> {
        self.throttle().await;
        let url = format!("{}/api/v3/time", self.base_url);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        let body: ServerTimeResponse = resp.json().await?;
        Ok(body.server_time)
    }
}

fn binance_interval(timeframe: TimeFrame) -> &'static str {
    match timeframe {
        TimeFrame::M1 => "1m",
        TimeFrame::M5 => "5m",
        TimeFrame::M15 => "15m",
        TimeFrame::H1 => "1h",
    }
}

#[derive(Debug, Deserialize)]
struct ServerTimeResponse {
    #[serde(rename = "serverTime")]
    server_time: i64,
}

#[derive(Debug, Deserialize)]
struct BookTickerResponse {
    #[serde(rename = "bidPrice")]
    bid_price: String,
    #[serde(rename = "askPrice")]
    ask_price: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(rename = "orderId")]
    order_id: u64,
    #[serde(rename = "clientOrderId")]
    client_order_id: String,
    status: String,
    #[serde(rename = "type")]
    order_type: String,
    side: String,
    #[serde(rename = "origQty")]
    orig_qty: String,
    #[serde(rename = "executedQty")]
    executed_qty: String,
    price: Option<String>,
    #[serde(rename = "avgPrice")]
    avg_price: Option<String>,
    #[serde(rename = "cummulativeQuoteQty")]
    cummulative_quote_qty: Option<String>,
    #[serde(rename = "stopPrice")]
    stop_price: Option<String>,
    #[serde(rename = "transactTime")]
    transact_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    balances: Vec<BalanceResponse>,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    asset: String,
    free: String,
    locked: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_symbol_concatenates_base_and_quote() {
        let pair = Pair::new("btc", "usdt");
        assert_eq!(wire_symbol(&pair), "BTCUSDT");
    }

    #[test]
    fn timestamps_strictly_increase_even_under_clock_skew() {
        let adapter = BinanceAdapter::public_only();
        adapter.last_nonce_ms.store(Utc::now().timestamp_millis() + 10_000, Ordering::SeqCst);
        let first = adapter.next_timestamp_ms();
        let second = adapter.next_timestamp_ms();
        assert!(second > first);
    }

    #[test]
    fn client_order_id_memory_flags_repeats() {
        let adapter = BinanceAdapter::public_only();
        assert!(adapter.remember_client_order_id("abc"));
        assert!(!adapter.remember_client_order_id("abc"));
        assert!(adapter.remember_client_order_id("def"));
    }
}
