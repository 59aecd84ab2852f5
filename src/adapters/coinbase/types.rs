//! Coinbase Types
//!
//! Wire types for the public Coinbase Exchange REST API and WebSocket feed.
//! Like Binance, prices and sizes arrive as JSON strings and are parsed to
//! `f64` here. Candles are the exception: plain numeric arrays.
//!
//! Docs: https://docs.cdp.coinbase.com/exchange/docs/welcome

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::adapters::types::{Kline, OrderBook, OrderBookLevel, Ticker, Trade, TradeSide};

/// Quote currencies recognised when splitting a compact symbol.
/// Longer codes come first so `USDT` wins over `USD`.
const KNOWN_QUOTES: [&str; 8] = ["USDT", "USDC", "EUR", "GBP", "USD", "DAI", "BTC", "ETH"];

/// Parse a string-encoded decimal
fn de_str_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse::<f64>().map_err(serde::de::Error::custom)
}

/// Parse `[["price", "size", num_orders], ...]` level-2 entries
fn de_levels<'de, D>(deserializer: D) -> Result<Vec<OrderBookLevel>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<(String, String, serde_json::Value)>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(p, q, _)| {
            let price = p.parse::<f64>().map_err(serde::de::Error::custom)?;
            let quantity = q.parse::<f64>().map_err(serde::de::Error::custom)?;
            Ok(OrderBookLevel::new(price, quantity))
        })
        .collect()
}

fn to_ms(time: &DateTime<Utc>) -> u64 {
    time.timestamp_millis().max(0) as u64
}

/// Coinbase product id for a symbol: `BTC-USD` passes through,
/// `BTCUSDT` becomes `BTC-USDT`.
pub fn product_id(symbol: &str) -> String {
    let upper = symbol.to_ascii_uppercase();
    if upper.contains('-') {
        return upper;
    }
    KNOWN_QUOTES
        .iter()
        .find(|quote| upper.len() > quote.len() && upper.ends_with(*quote))
        .map(|quote| format!("{}-{}", &upper[..upper.len() - quote.len()], quote))
        .unwrap_or(upper)
}

/// Candle width in seconds for an interval label, `None` if Coinbase has no such granularity
pub fn granularity_secs(interval: &str) -> Option<u64> {
    match interval {
        "1m" => Some(60),
        "5m" => Some(300),
        "15m" => Some(900),
        "1h" => Some(3600),
        "6h" => Some(21_600),
        "1d" => Some(86_400),
        _ => None,
    }
}

/// The reported side is the maker's; the taker took the other one
fn taker_side(maker_side: &str) -> TradeSide {
    if maker_side.eq_ignore_ascii_case("buy") {
        TradeSide::Sell
    } else {
        TradeSide::Buy
    }
}

// =============================================================================
// REST Types
// =============================================================================

/// Error body returned with non-2xx statuses
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub message: String,
}

/// `GET /products/{id}/ticker`
#[derive(Debug, Clone, Deserialize)]
pub struct RestTicker {
    #[serde(deserialize_with = "de_str_f64")]
    pub price: f64,
    #[serde(deserialize_with = "de_str_f64")]
    pub bid: f64,
    #[serde(deserialize_with = "de_str_f64")]
    pub ask: f64,
    #[serde(deserialize_with = "de_str_f64")]
    pub volume: f64,
    pub time: DateTime<Utc>,
}

/// `GET /products/{id}/stats`
#[derive(Debug, Clone, Deserialize)]
pub struct RestStats {
    #[serde(deserialize_with = "de_str_f64")]
    pub open: f64,
    #[serde(deserialize_with = "de_str_f64")]
    pub high: f64,
    #[serde(deserialize_with = "de_str_f64")]
    pub low: f64,
}

/// Build one ticker from the ticker and 24h stats endpoints
pub fn combine_ticker(exchange: &Arc<str>, symbol: &str, ticker: RestTicker, stats: RestStats) -> Ticker {
    let change = ticker.price - stats.open;
    let change_percent = if stats.open > 0.0 {
        change / stats.open * 100.0
    } else {
        0.0
    };
    Ticker {
        exchange: exchange.clone(),
        symbol: Arc::from(symbol),
        last_price: ticker.price,
        bid_price: ticker.bid,
        ask_price: ticker.ask,
        volume_24h: ticker.volume,
        quote_volume_24h: ticker.volume * ticker.price,
        change_24h: change,
        change_percent_24h: change_percent,
        high_24h: stats.high,
        low_24h: stats.low,
        open_price: stats.open,
        trade_count: 0,
        timestamp_ms: to_ms(&ticker.time),
    }
}

/// `GET /products/{id}/book?level=2`
#[derive(Debug, Clone, Deserialize)]
pub struct RestBook {
    pub sequence: u64,
    #[serde(deserialize_with = "de_levels")]
    pub bids: Vec<OrderBookLevel>,
    #[serde(deserialize_with = "de_levels")]
    pub asks: Vec<OrderBookLevel>,
}

impl RestBook {
    pub fn into_order_book(self, exchange: &Arc<str>, symbol: &str, timestamp_ms: u64) -> OrderBook {
        OrderBook {
            exchange: exchange.clone(),
            symbol: Arc::from(symbol),
            bids: self.bids,
            asks: self.asks,
            timestamp_ms,
            last_update_id: self.sequence,
        }
    }
}

/// `GET /products/{id}/trades`
#[derive(Debug, Clone, Deserialize)]
pub struct RestTrade {
    pub trade_id: u64,
    #[serde(deserialize_with = "de_str_f64")]
    pub price: f64,
    #[serde(deserialize_with = "de_str_f64")]
    pub size: f64,
    pub side: String,
    pub time: DateTime<Utc>,
}

impl RestTrade {
    pub fn into_trade(self, exchange: &Arc<str>, symbol: &str) -> Trade {
        Trade {
            id: self.trade_id.to_string(),
            exchange: exchange.clone(),
            symbol: Arc::from(symbol),
            price: self.price,
            quantity: self.size,
            side: taker_side(&self.side),
            is_maker: self.side.eq_ignore_ascii_case("buy"),
            timestamp_ms: to_ms(&self.time),
        }
    }
}

/// One row of `GET /products/{id}/candles`: `[time, low, high, open, close, volume]`
#[derive(Debug, Clone, Deserialize)]
pub struct RestCandle(pub u64, pub f64, pub f64, pub f64, pub f64, pub f64);

impl RestCandle {
    pub fn into_kline(self, exchange: &Arc<str>, symbol: &str, interval: &str, granularity: u64) -> Kline {
        let RestCandle(time, low, high, open, close, volume) = self;
        let open_time_ms = time * 1000;
        Kline {
            exchange: exchange.clone(),
            symbol: Arc::from(symbol),
            interval: interval.to_string(),
            open_time_ms,
            // last millisecond of the bucket, as Binance reports it
            close_time_ms: open_time_ms + granularity * 1000 - 1,
            open,
            high,
            low,
            close,
            volume,
            quote_volume: volume * close,
            trade_count: 0,
            taker_buy_base_volume: 0.0,
            taker_buy_quote_volume: 0.0,
            is_closed: true,
        }
    }
}

// =============================================================================
// WebSocket Types
// =============================================================================

/// Feed messages, tagged by `type`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    Ticker(WsTicker),
    #[serde(rename = "match", alias = "last_match")]
    Match(WsMatch),
    Subscriptions(serde_json::Value),
    Error {
        message: String,
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(other)]
    Other,
}

/// `ticker` channel update
#[derive(Debug, Clone, Deserialize)]
pub struct WsTicker {
    pub product_id: String,
    #[serde(deserialize_with = "de_str_f64")]
    pub price: f64,
    #[serde(deserialize_with = "de_str_f64")]
    pub best_bid: f64,
    #[serde(deserialize_with = "de_str_f64")]
    pub best_ask: f64,
    #[serde(deserialize_with = "de_str_f64")]
    pub volume_24h: f64,
    #[serde(deserialize_with = "de_str_f64")]
    pub open_24h: f64,
    #[serde(deserialize_with = "de_str_f64")]
    pub high_24h: f64,
    #[serde(deserialize_with = "de_str_f64")]
    pub low_24h: f64,
    /// Absent on the snapshot sent right after subscribing
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

impl WsTicker {
    /// `symbol` is the caller's spelling, not the product id
    pub fn into_ticker(self, exchange: &Arc<str>, symbol: &str, received_ms: u64) -> Ticker {
        let change = self.price - self.open_24h;
        let change_percent = if self.open_24h > 0.0 {
            change / self.open_24h * 100.0
        } else {
            0.0
        };
        Ticker {
            exchange: exchange.clone(),
            symbol: Arc::from(symbol),
            last_price: self.price,
            bid_price: self.best_bid,
            ask_price: self.best_ask,
            volume_24h: self.volume_24h,
            quote_volume_24h: self.volume_24h * self.price,
            change_24h: change,
            change_percent_24h: change_percent,
            high_24h: self.high_24h,
            low_24h: self.low_24h,
            open_price: self.open_24h,
            trade_count: 0,
            timestamp_ms: self.time.as_ref().map(to_ms).unwrap_or(received_ms),
        }
    }
}

/// `matches` channel update
#[derive(Debug, Clone, Deserialize)]
pub struct WsMatch {
    pub product_id: String,
    pub trade_id: u64,
    #[serde(deserialize_with = "de_str_f64")]
    pub price: f64,
    #[serde(deserialize_with = "de_str_f64")]
    pub size: f64,
    pub side: String,
    pub time: DateTime<Utc>,
}

impl WsMatch {
    pub fn into_trade(self, exchange: &Arc<str>, symbol: &str) -> Trade {
        Trade {
            id: self.trade_id.to_string(),
            exchange: exchange.clone(),
            symbol: Arc::from(symbol),
            price: self.price,
            quantity: self.size,
            side: taker_side(&self.side),
            is_maker: self.side.eq_ignore_ascii_case("buy"),
            timestamp_ms: to_ms(&self.time),
        }
    }
}

/// Subscribe request for one product on one channel
pub fn subscribe_message(product_id: &str, channel: &str) -> String {
    serde_json::json!({
        "type": "subscribe",
        "product_ids": [product_id],
        "channels": [channel],
    })
    .to_string()
}

// =============================================================================
// Tests
// =============================================================================
