//! Core data types shared by every exchange client
//!
//! Exchange adapters translate their wire payloads into these types;
//! nothing exchange-specific leaks past this module.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// =============================================================================
// HTTP Client Constants
// =============================================================================

/// HTTP request timeout (seconds)
pub const HTTP_TIMEOUT_SECS: u64 = 5;
/// HTTP connection timeout (milliseconds), fail fast if host unreachable
const HTTP_CONNECT_TIMEOUT_MS: u64 = 1500;
/// Max idle connections per host in connection pool
const HTTP_POOL_MAX_IDLE: usize = 5;
/// How long idle connections stay in the pool (seconds)
const HTTP_POOL_IDLE_TIMEOUT_SECS: u64 = 60;
/// TCP keepalive interval (seconds)
const HTTP_TCP_KEEPALIVE_SECS: u64 = 30;

/// Create a pooled HTTP client for REST market-data requests
pub fn create_http_client(exchange_name: &str) -> reqwest::Client {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .pool_max_idle_per_host(HTTP_POOL_MAX_IDLE)
        .pool_idle_timeout(Duration::from_secs(HTTP_POOL_IDLE_TIMEOUT_SECS))
        .tcp_keepalive(Duration::from_secs(HTTP_TCP_KEEPALIVE_SECS))
        .connect_timeout(Duration::from_millis(HTTP_CONNECT_TIMEOUT_MS))
        .tcp_nodelay(true)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new());
    tracing::info!(
        phase = "init",
        exchange = %exchange_name,
        timeout_s = HTTP_TIMEOUT_SECS,
        connect_timeout_ms = HTTP_CONNECT_TIMEOUT_MS,
        pool_max_idle = HTTP_POOL_MAX_IDLE,
        "HTTP client configured"
    );
    client
}

/// Pseudo-exchange name used for merged order books
pub const AGGREGATED_EXCHANGE: &str = "aggregated";

/// Get current time in milliseconds since epoch.
#[inline]
pub fn current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// =============================================================================
// Connection Status
// =============================================================================

/// Connection status reported by an exchange client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Last connection attempt failed; see `last_error()`
    Failed,
}

impl ConnectionStatus {
    pub fn to_u8(self) -> u8 {
        match self {
            ConnectionStatus::Disconnected => 0,
            ConnectionStatus::Connecting => 1,
            ConnectionStatus::Connected => 2,
            ConnectionStatus::Reconnecting => 3,
            ConnectionStatus::Failed => 4,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionStatus::Connecting,
            2 => ConnectionStatus::Connected,
            3 => ConnectionStatus::Reconnecting,
            4 => ConnectionStatus::Failed,
            _ => ConnectionStatus::Disconnected,
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// Ticker
// =============================================================================

/// Point-in-time price/volume snapshot for one symbol on one exchange.
///
/// Immutable once built; a refresh replaces the whole value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    /// Exchange identifier (e.g. "binance")
    pub exchange: Arc<str>,
    /// Exchange-agnostic symbol (e.g. "BTCUSDT")
    pub symbol: Arc<str>,
    pub last_price: f64,
    pub bid_price: f64,
    pub ask_price: f64,
    /// 24h volume in base asset
    pub volume_24h: f64,
    /// 24h volume in quote asset
    pub quote_volume_24h: f64,
    pub change_24h: f64,
    pub change_percent_24h: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub open_price: f64,
    /// Number of trades in the 24h window
    pub trade_count: u64,
    /// Timestamp in Unix milliseconds
    pub timestamp_ms: u64,
}

impl Ticker {
    /// Midpoint of bid and ask, `None` if either side is missing
    pub fn mid_price(&self) -> Option<f64> {
        if self.bid_price > 0.0 && self.ask_price > 0.0 {
            Some((self.bid_price + self.ask_price) / 2.0)
        } else {
            None
        }
    }
}

// =============================================================================
// Orderbook Types
// =============================================================================

/// A single level in the order book (price + quantity)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct OrderBookLevel {
    /// Price at this level
    pub price: f64,
    /// Quantity available at this price
    pub quantity: f64,
}

impl OrderBookLevel {
    /// Create a new order book level
    pub fn new(price: f64, quantity: f64) -> Self {
        Self { price, quantity }
    }
}

/// Order book snapshot for one exchange, or the merged "aggregated" book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub exchange: Arc<str>,
    pub symbol: Arc<str>,
    /// Bid levels sorted descending by price (best bid first)
    pub bids: Vec<OrderBookLevel>,
    /// Ask levels sorted ascending by price (best ask first)
    pub asks: Vec<OrderBookLevel>,
    /// Timestamp in Unix milliseconds
    pub timestamp_ms: u64,
    /// Exchange sequence number, 0 when not provided
    pub last_update_id: u64,
}

impl OrderBook {
    /// Create an empty book for an exchange and symbol
    pub fn new(exchange: &str, symbol: &str) -> Self {
        Self {
            exchange: Arc::from(exchange),
            symbol: Arc::from(symbol),
            bids: Vec::new(),
            asks: Vec::new(),
            timestamp_ms: 0,
            last_update_id: 0,
        }
    }

    /// Get the best bid price (highest bid)
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    /// Get the best ask price (lowest ask)
    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    /// Calculate mid price
    pub fn mid_price(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => None,
        }
    }
}

// =============================================================================
// Trades and Candles
// =============================================================================

/// Taker side of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// A completed trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub exchange: Arc<str>,
    pub symbol: Arc<str>,
    pub price: f64,
    pub quantity: f64,
    pub side: TradeSide,
    pub is_maker: bool,
    pub timestamp_ms: u64,
}

/// Candlestick (OHLCV) for one interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub exchange: Arc<str>,
    pub symbol: Arc<str>,
    /// Interval label, e.g. "1m", "1h", "1d"
    pub interval: String,
    pub open_time_ms: u64,
    pub close_time_ms: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub trade_count: u64,
    pub taker_buy_base_volume: f64,
    pub taker_buy_quote_volume: f64,
    /// False while the candle is still forming (streaming only)
    pub is_closed: bool,
}
