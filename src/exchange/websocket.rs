use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use chrono::Utc;
use futures_util::StreamExt;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::types::{Candle, Pair, Ticker, TimeFrame};

const BINANCE_US_WS: &str = "wss://stream.binance.us:9443/ws";
const BINANCE_US_STREAM: &str = "wss://stream.binance.us:9443/stream";
const RECONNECT_DELAY_SECS: u64 = 5;
const PING_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub enum MarketEvent {
    Ticker(Pair, Ticker),
    Candle(Pair, TimeFrame, Candle),
    BookTicker(BookTickerEvent),
    Disconnected,
    Error(String),
}

#[derive(Debug, Clone)]
pub struct BookTickerEvent {
    pub pair: Pair,
    pub bid_price: Decimal,
    pub bid_qty: Decimal,
    pub ask_price: Decimal,
    pub ask_qty: Decimal,
}

fn wire_symbol(pair: &Pair) -> String {
    format!("{}{}", pair.base(), pair.quote())
}

/// Subscription builder for Binance's combined-stream websocket. Each
/// subscribed pair is remembered by its wire symbol so inbound frames (which
/// only carry that symbol, not our canonical `BASE/QUOTE` form) can be
/// resolved back to a `Pair`.
pub struct BinanceWebSocket {
    streams: Vec<String>,
    symbols: HashMap<String, Pair>,
}

impl BinanceWebSocket {
    pub fn new() -> Self {
        Self { streams: Vec::new(), symbols: HashMap::new() }
    }

    fn register(&mut self, pair: &Pair) -> String {
        let symbol = wire_symbol(pair);
        self.symbols.insert(symbol.clone(), pair.clone());
        symbol
    }

    pub fn subscribe_ticker(&mut self, pair: &Pair) -> &mut Self {
        let symbol = self.register(pair);
        self.streams.push(format!("{}@bookTicker", symbol.to_lowercase()));
        self
    }

    pub fn subscribe_kline(&mut self, pair: &Pair, timeframe: TimeFrame) -> &mut Self {
        let symbol = self.register(pair);
        self.streams.push(format!("{}@kline_{}", symbol.to_lowercase(), binance_interval(timeframe)));
        self
    }

    pub fn subscribe_book_ticker(&mut self, pair: &Pair) -> &mut Self {
        let symbol = self.register(pair);
        self.streams.push(format!("{}@bookTicker", symbol.to_lowercase()));
        self
    }

    pub async fn connect(self) -> Result<mpsc::Receiver<MarketEvent>> {
        let (tx, rx) = mpsc::channel(1000);

        if self.streams.is_empty() {
            return Err(anyhow!("no streams subscribed"));
        }

        let url = if self.streams.len() == 1 {
            format!("{}/{}", BINANCE_US_WS, self.streams[0])
        } else {
            format!("{}?streams={}", BINANCE_US_STREAM, self.streams.join("/"))
        };
        let symbols = self.symbols;

        info!(url = %url, "connecting to exchange websocket");

        tokio::spawn(async move {
            loop {
                match Self::run_connection(&url, &symbols, tx.clone()).await {
                    Ok(_) => warn!("websocket connection closed, reconnecting"),
                    Err(e) => {
                        error!(error = %e, "websocket error, reconnecting");
                        if tx.send(MarketEvent::Error(e.to_string())).await.is_err() {
                            return;
                        }
                    }
                }
                if tx.send(MarketEvent::Disconnected).await.is_err() {
                    return;
                }
                tokio::time::sleep(tokio::time::Duration::from_secs(RECONNECT_DELAY_SECS)).await;
            }
        });

        Ok(rx)
    }

    async fn run_connection(url: &str, symbols: &HashMap<String, Pair>, tx: mpsc::Sender<MarketEvent>) -> Result<()> {
        let (ws_stream, _) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        info!("websocket connected");

        let ping_handle = tokio::spawn(async move {
            use futures_util::SinkExt;
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(PING_INTERVAL_SECS));
            loop {
                interval.tick().await;
                if write.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
                debug!("sent keepalive ping");
            }
        });

        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if let Some(event) = Self::parse_message(&text, symbols) {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(Message::Close(_)) => {
                    info!("websocket closed by server");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "websocket read error");
                    break;
                }
                _ => {}
            }
        }

        ping_handle.abort();
        Ok(())
    }

    fn parse_message(text: &str, symbols: &HashMap<String, Pair>) -> Option<MarketEvent> {
        if let Ok(combined) = serde_json::from_str::<CombinedStreamMessage>(text) {
            return Self::parse_stream_data(&combined.stream, &combined.data, symbols);
        }

        if let Ok(kline) = serde_json::from_str::<WsKlineMessage>(text) {
            if kline.event_type == "kline" {
                return Self::parse_kline(&kline, symbols);
            }
        }

        if let Ok(book) = serde_json::from_str::<WsBookTickerMessage>(text) {
            return Self::parse_book_ticker(&book, symbols);
        }

        debug!(message = %text, "unrecognized websocket message");
        None
    }

    fn parse_stream_data(stream: &str, data: &serde_json::Value, symbols: &HashMap<String, Pair>) -> Option<MarketEvent> {
        if stream.contains("@kline") {
            let kline: WsKlineMessage = serde_json::from_value(data.clone()).ok()?;
            return Self::parse_kline(&kline, symbols);
        }
        if stream.contains("@bookTicker") {
            let book: WsBookTickerMessage = serde_json::from_value(data.clone()).ok()?;
            return Self::parse_book_ticker(&book, symbols);
        }
        None
    }

    fn parse_kline(msg: &WsKlineMessage, symbols: &HashMap<String, Pair>) -> Option<MarketEvent> {
        let pair = symbols.get(&msg.symbol)?.clone();
        let k = &msg.kline;
        let timeframe = match k.interval.as_str() {
            "1m" => TimeFrame::M1,
            "5m" => TimeFrame::M5,
            "15m" => TimeFrame::M15,
            "1h" => TimeFrame::H1,
            _ => return None,
        };

        let candle = Candle::new(
            &pair,
            timeframe,
            k.start_time / 1000,
            Decimal::from_str(&k.open).ok()?,
            Decimal::from_str(&k.high).ok()?,
            Decimal::from_str(&k.low).ok()?,
            Decimal::from_str(&k.close).ok()?,
            Decimal::from_str(&k.volume).ok()?,
            k.is_closed,
        );

        Some(MarketEvent::Candle(pair, timeframe, candle))
    }

    fn parse_book_ticker(msg: &WsBookTickerMessage, symbols: &HashMap<String, Pair>) -> Option<MarketEvent> {
        let pair = symbols.get(&msg.symbol)?.clone();
        let bid_price = Decimal::from_str(&msg.bid_price).ok()?;
        let ask_price = Decimal::from_str(&msg.ask_price).ok()?;
        let bid_qty = Decimal::from_str(&msg.bid_qty).ok()?;
        let ask_qty = Decimal::from_str(&msg.ask_qty).ok()?;

        Some(MarketEvent::BookTicker(BookTickerEvent {
            pair: pair.clone(),
            bid_price,
            bid_qty,
            ask_price,
            ask_qty,
        }))
    }

    /// Synthesizes a plain ticker event from the book-ticker stream, which is
    /// the only per-symbol price stream this adapter subscribes to.
    pub fn ticker_from_book(event: &BookTickerEvent) -> (Pair, Ticker) {
        (
            event.pair.clone(),
            Ticker {
                bid: event.bid_price,
                ask: event.ask_price,
                last: (event.bid_price + event.ask_price) / Decimal::from(2),
                ts: Utc::now(),
            },
        )
    }
}

impl Default for BinanceWebSocket {
    fn default() -> Self {
        Self::new()
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
struct CombinedStreamMessage {
    stream: String,
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WsKlineMessage {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: WsKlineData,
}

#[derive(Debug, Deserialize)]
struct WsKlineData {
    #[serde(rename = "t")]
    start_time: i64,
    #[serde(rename = "i")]
    interval: String,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "x")]
    is_closed: bool,
}

#[derive(Debug, Deserialize)]
struct WsBookTickerMessage {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "b")]
    bid_price: String,
    #[serde(rename = "B")]
    bid_qty: String,
    #[serde(rename = "a")]
    ask_price: String,
    #[serde(rename = "A")]
    ask_qty: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribing_registers_the_wire_symbol() {
        let pair = Pair::new("eth", "usdt");
        let mut ws = BinanceWebSocket::new();
        ws.subscribe_kline(&pair, TimeFrame::M5);
        assert_eq!(ws.symbols.get("ETHUSDT"), Some(&pair));
        assert_eq!(ws.streams, vec!["ethusdt@kline_5m".to_string()]);
    }

    #[test]
    fn book_ticker_parses_into_the_registered_pair() {
        let pair = Pair::new("btc", "usdt");
        let mut symbols = HashMap::new();
        symbols.insert("BTCUSDT".to_string(), pair.clone());

        let msg = WsBookTickerMessage {
            symbol: "BTCUSDT".to_string(),
            bid_price: "50000".to_string(),
            bid_qty: "1.0".to_string(),
            ask_price: "50010".to_string(),
            ask_qty: "0.8".to_string(),
        };

        let event = BinanceWebSocket::parse_book_ticker(&msg, &symbols).unwrap();
        match event {
            MarketEvent::BookTicker(b) => assert_eq!(b.pair, pair),
            _ => panic!("expected BookTicker"),
        }
    }
}
