//! Exchange client trait definition
//!
//! The ExchangeClient trait is the uniform contract every exchange
//! adapter implements. The aggregation core only ever sees
//! `Arc<dyn ExchangeClient>` and the shared types from `adapters::types`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::adapters::errors::ExchangeResult;
use crate::adapters::types::{ConnectionStatus, Kline, OrderBook, Ticker, Trade};
use crate::adapters::{KlineCallback, OrderBookCallback, TickerCallback, TradeCallback};

/// Common trait for all exchange clients
///
/// All methods take `&self`: one client is shared by many concurrent
/// per-tick requests, so implementations keep their state behind
/// atomics or locks.
///
/// # Example Implementation
///
/// ```ignore
/// #[async_trait]
/// impl ExchangeClient for BinanceClient {
///     fn exchange_name(&self) -> &str { "binance" }
///
///     async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
///         let raw: RawTicker24h = self.get_json("/api/v3/ticker/24hr", &[("symbol", symbol)]).await?;
///         raw.into_ticker("binance")
///     }
///     // ... other methods
/// }
/// ```
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Stable exchange identifier used as the key in every aggregate
    fn exchange_name(&self) -> &str;

    /// Establish connectivity and mark the client `Connected`
    ///
    /// On failure the client is left `Failed` with `last_error()` set.
    async fn connect(&self) -> ExchangeResult<()>;

    /// Disconnect and cancel every active stream subscription
    async fn disconnect(&self) -> ExchangeResult<()>;

    /// Round-trip health check against the exchange
    async fn ping(&self) -> ExchangeResult<()>;

    /// Fetch the current 24h ticker for one symbol
    async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Ticker>;

    /// Fetch tickers for several symbols in one request
    async fn get_tickers(&self, symbols: &[String]) -> ExchangeResult<Vec<Ticker>>;

    /// Fetch an order book snapshot bounded to `depth` levels per side
    /// (`0` returns every level the exchange sends)
    async fn get_order_book(&self, symbol: &str, depth: usize) -> ExchangeResult<OrderBook>;

    /// Fetch up to `limit` most recent public trades
    async fn get_recent_trades(&self, symbol: &str, limit: usize) -> ExchangeResult<Vec<Trade>>;

    /// Fetch candlesticks for `interval` (e.g. "1m", "1h") over an optional range
    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<u32>,
    ) -> ExchangeResult<Vec<Kline>>;

    /// Push ticker updates for `symbol` to `callback`
    async fn subscribe_ticker(&self, symbol: &str, callback: TickerCallback)
        -> ExchangeResult<()>;

    /// Push trades for `symbol` to `callback`
    async fn subscribe_trades(&self, symbol: &str, callback: TradeCallback) -> ExchangeResult<()>;

    /// Push order book snapshots for `symbol` to `callback`
    async fn subscribe_order_book(
        &self,
        symbol: &str,
        callback: OrderBookCallback,
    ) -> ExchangeResult<()>;

    /// Push candlestick updates for `symbol` at `interval` to `callback`
    async fn subscribe_klines(
        &self,
        symbol: &str,
        interval: &str,
        callback: KlineCallback,
    ) -> ExchangeResult<()>;

    /// Cancel every stream subscription; polling keeps working
    async fn unsubscribe_all(&self) -> ExchangeResult<()>;

    /// Current connection status
    fn status(&self) -> ConnectionStatus;

    /// Message of the most recent failure, if any
    fn last_error(&self) -> Option<String>;
}
