//! Binance Types
//!
//! Wire types for the public REST and raw-stream WebSocket APIs.
//! Binance encodes prices and quantities as JSON strings; they are parsed
//! to `f64` during deserialization and never leave this module raw.
//!
//! Docs: https://developers.binance.com/docs/binance-spot-api-docs

use std::sync::Arc;

use serde::{Deserialize, Deserializer};

use crate::adapters::types::{Kline, OrderBook, OrderBookLevel, Ticker, Trade, TradeSide};

/// Binance error code for an unknown symbol
pub const ERR_INVALID_SYMBOL: i64 = -1121;

/// Parse a string-encoded decimal
fn de_str_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse::<f64>().map_err(serde::de::Error::custom)
}

/// Parse `[["price", "qty"], ...]` depth levels
fn de_levels<'de, D>(deserializer: D) -> Result<Vec<OrderBookLevel>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<(String, String)>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(p, q)| {
            let price = p.parse::<f64>().map_err(serde::de::Error::custom)?;
            let quantity = q.parse::<f64>().map_err(serde::de::Error::custom)?;
            Ok(OrderBookLevel::new(price, quantity))
        })
        .collect()
}

// =============================================================================
// REST Types
// =============================================================================

/// Error body returned with non-2xx statuses
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub code: i64,
    pub msg: String,
}

/// `GET /api/v3/ticker/24hr`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestTicker24h {
    pub symbol: String,
    #[serde(deserialize_with = "de_str_f64")]
    pub price_change: f64,
    #[serde(deserialize_with = "de_str_f64")]
    pub price_change_percent: f64,
    #[serde(deserialize_with = "de_str_f64")]
    pub last_price: f64,
    #[serde(deserialize_with = "de_str_f64")]
    pub bid_price: f64,
    #[serde(deserialize_with = "de_str_f64")]
    pub ask_price: f64,
    #[serde(deserialize_with = "de_str_f64")]
    pub open_price: f64,
    #[serde(deserialize_with = "de_str_f64")]
    pub high_price: f64,
    #[serde(deserialize_with = "de_str_f64")]
    pub low_price: f64,
    #[serde(deserialize_with = "de_str_f64")]
    pub volume: f64,
    #[serde(deserialize_with = "de_str_f64")]
    pub quote_volume: f64,
    pub close_time: u64,
    pub count: u64,
}

impl RestTicker24h {
    pub fn into_ticker(self, exchange: &Arc<str>) -> Ticker {
        Ticker {
            exchange: exchange.clone(),
            symbol: Arc::from(self.symbol.as_str()),
            last_price: self.last_price,
            bid_price: self.bid_price,
            ask_price: self.ask_price,
            volume_24h: self.volume,
            quote_volume_24h: self.quote_volume,
            change_24h: self.price_change,
            change_percent_24h: self.price_change_percent,
            high_24h: self.high_price,
            low_24h: self.low_price,
            open_price: self.open_price,
            trade_count: self.count,
            timestamp_ms: self.close_time,
        }
    }
}

/// `GET /api/v3/depth`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthSnapshot {
    pub last_update_id: u64,
    #[serde(deserialize_with = "de_levels")]
    pub bids: Vec<OrderBookLevel>,
    #[serde(deserialize_with = "de_levels")]
    pub asks: Vec<OrderBookLevel>,
}

impl DepthSnapshot {
    /// The payload carries no symbol or time; both come from the caller
    pub fn into_order_book(self, exchange: &Arc<str>, symbol: &str, timestamp_ms: u64) -> OrderBook {
        OrderBook {
            exchange: exchange.clone(),
            symbol: Arc::from(symbol),
            bids: self.bids,
            asks: self.asks,
            timestamp_ms,
            last_update_id: self.last_update_id,
        }
    }
}

/// `GET /api/v3/trades`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestTrade {
    pub id: u64,
    #[serde(deserialize_with = "de_str_f64")]
    pub price: f64,
    #[serde(deserialize_with = "de_str_f64")]
    pub qty: f64,
    pub time: u64,
    pub is_buyer_maker: bool,
}

impl RestTrade {
    pub fn into_trade(self, exchange: &Arc<str>, symbol: &str) -> Trade {
        Trade {
            id: self.id.to_string(),
            exchange: exchange.clone(),
            symbol: Arc::from(symbol),
            price: self.price,
            quantity: self.qty,
            side: taker_side(self.is_buyer_maker),
            is_maker: self.is_buyer_maker,
            timestamp_ms: self.time,
        }
    }
}

/// One row of `GET /api/v3/klines` (a positional JSON array)
#[derive(Debug, Clone, Deserialize)]
pub struct RestKline(
    pub u64,    // open time
    pub String, // open
    pub String, // high
    pub String, // low
    pub String, // close
    pub String, // volume
    pub u64,    // close time
    pub String, // quote asset volume
    pub u64,    // number of trades
    pub String, // taker buy base volume
    pub String, // taker buy quote volume
    pub serde_json::Value, // unused
);

impl RestKline {
    pub fn into_kline(
        self,
        exchange: &Arc<str>,
        symbol: &str,
        interval: &str,
    ) -> Result<Kline, std::num::ParseFloatError> {
        Ok(Kline {
            exchange: exchange.clone(),
            symbol: Arc::from(symbol),
            interval: interval.to_string(),
            open_time_ms: self.0,
            close_time_ms: self.6,
            open: self.1.parse()?,
            high: self.2.parse()?,
            low: self.3.parse()?,
            close: self.4.parse()?,
            volume: self.5.parse()?,
            quote_volume: self.7.parse()?,
            trade_count: self.8,
            taker_buy_base_volume: self.9.parse()?,
            taker_buy_quote_volume: self.10.parse()?,
            is_closed: true,
        })
    }
}

// =============================================================================
// WebSocket Types (raw streams: payload is the event itself)
// =============================================================================

/// `<symbol>@ticker`
#[derive(Debug, Clone, Deserialize)]
pub struct WsTicker {
    #[serde(rename = "E")]
    pub event_time: u64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "p", deserialize_with = "de_str_f64")]
    pub price_change: f64,
    #[serde(rename = "P", deserialize_with = "de_str_f64")]
    pub price_change_percent: f64,
    #[serde(rename = "c", deserialize_with = "de_str_f64")]
    pub last_price: f64,
    #[serde(rename = "b", deserialize_with = "de_str_f64")]
    pub bid_price: f64,
    #[serde(rename = "a", deserialize_with = "de_str_f64")]
    pub ask_price: f64,
    #[serde(rename = "o", deserialize_with = "de_str_f64")]
    pub open_price: f64,
    #[serde(rename = "h", deserialize_with = "de_str_f64")]
    pub high_price: f64,
    #[serde(rename = "l", deserialize_with = "de_str_f64")]
    pub low_price: f64,
    #[serde(rename = "v", deserialize_with = "de_str_f64")]
    pub volume: f64,
    #[serde(rename = "q", deserialize_with = "de_str_f64")]
    pub quote_volume: f64,
    #[serde(rename = "n")]
    pub count: u64,
}

impl WsTicker {
    pub fn into_ticker(self, exchange: &Arc<str>) -> Ticker {
        Ticker {
            exchange: exchange.clone(),
            symbol: Arc::from(self.symbol.as_str()),
            last_price: self.last_price,
            bid_price: self.bid_price,
            ask_price: self.ask_price,
            volume_24h: self.volume,
            quote_volume_24h: self.quote_volume,
            change_24h: self.price_change,
            change_percent_24h: self.price_change_percent,
            high_24h: self.high_price,
            low_24h: self.low_price,
            open_price: self.open_price,
            trade_count: self.count,
            timestamp_ms: self.event_time,
        }
    }
}

/// `<symbol>@trade`
#[derive(Debug, Clone, Deserialize)]
pub struct WsTrade {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "t")]
    pub trade_id: u64,
    #[serde(rename = "p", deserialize_with = "de_str_f64")]
    pub price: f64,
    #[serde(rename = "q", deserialize_with = "de_str_f64")]
    pub quantity: f64,
    #[serde(rename = "T")]
    pub trade_time: u64,
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

impl WsTrade {
    pub fn into_trade(self, exchange: &Arc<str>) -> Trade {
        Trade {
            id: self.trade_id.to_string(),
            exchange: exchange.clone(),
            symbol: Arc::from(self.symbol.as_str()),
            price: self.price,
            quantity: self.quantity,
            side: taker_side(self.is_buyer_maker),
            is_maker: self.is_buyer_maker,
            timestamp_ms: self.trade_time,
        }
    }
}

/// `<symbol>@kline_<interval>`
#[derive(Debug, Clone, Deserialize)]
pub struct WsKlineEvent {
    #[serde(rename = "k")]
    pub kline: WsKline,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsKline {
    #[serde(rename = "t")]
    pub open_time: u64,
    #[serde(rename = "T")]
    pub close_time: u64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "i")]
    pub interval: String,
    #[serde(rename = "o", deserialize_with = "de_str_f64")]
    pub open: f64,
    #[serde(rename = "c", deserialize_with = "de_str_f64")]
    pub close: f64,
    #[serde(rename = "h", deserialize_with = "de_str_f64")]
    pub high: f64,
    #[serde(rename = "l", deserialize_with = "de_str_f64")]
    pub low: f64,
    #[serde(rename = "v", deserialize_with = "de_str_f64")]
    pub volume: f64,
    #[serde(rename = "q", deserialize_with = "de_str_f64")]
    pub quote_volume: f64,
    #[serde(rename = "V", deserialize_with = "de_str_f64")]
    pub taker_buy_base_volume: f64,
    #[serde(rename = "Q", deserialize_with = "de_str_f64")]
    pub taker_buy_quote_volume: f64,
    #[serde(rename = "n")]
    pub trade_count: u64,
    #[serde(rename = "x")]
    pub is_closed: bool,
}

impl WsKline {
    pub fn into_kline(self, exchange: &Arc<str>) -> Kline {
        Kline {
            exchange: exchange.clone(),
            symbol: Arc::from(self.symbol.as_str()),
            interval: self.interval,
            open_time_ms: self.open_time,
            close_time_ms: self.close_time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            quote_volume: self.quote_volume,
            trade_count: self.trade_count,
            taker_buy_base_volume: self.taker_buy_base_volume,
            taker_buy_quote_volume: self.taker_buy_quote_volume,
            is_closed: self.is_closed,
        }
    }
}

/// Buyer-is-maker means the taker sold
fn taker_side(is_buyer_maker: bool) -> TradeSide {
    if is_buyer_maker {
        TradeSide::Sell
    } else {
        TradeSide::Buy
    }
}

/// Binance symbols are uppercase on REST and lowercase in stream names
pub fn stream_symbol(symbol: &str) -> String {
    symbol.to_ascii_lowercase()
}

// =============================================================================
// Tests
// =============================================================================
