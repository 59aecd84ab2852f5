//! Exchange clients for market-data aggregation
//!
//! This module provides the uniform client contract, the shared
//! exchange-agnostic data model, and the concrete exchange adapters.

use std::sync::Arc;

pub mod binance;
pub mod coinbase;
pub mod errors;
pub mod factory;
pub mod shared;
pub mod traits;
pub mod types;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types for convenience
pub use binance::{BinanceClient, BinanceConfig};
pub use coinbase::{CoinbaseClient, CoinbaseConfig};
pub use errors::{ErrorKind, ExchangeError, ExchangeResult};
pub use factory::{create_client, create_client_by_name, create_clients, SUPPORTED_EXCHANGES};
pub use traits::ExchangeClient;
pub use types::{
    ConnectionStatus, Kline, OrderBook, OrderBookLevel, Ticker, Trade, TradeSide,
    AGGREGATED_EXCHANGE,
};

/// Callback invoked for every pushed ticker
pub type TickerCallback = Arc<dyn Fn(Ticker) + Send + Sync>;
/// Callback invoked for every pushed trade
pub type TradeCallback = Arc<dyn Fn(Trade) + Send + Sync>;
/// Callback invoked for every pushed order book snapshot
pub type OrderBookCallback = Arc<dyn Fn(OrderBook) + Send + Sync>;
/// Callback invoked for every pushed candlestick update
pub type KlineCallback = Arc<dyn Fn(Kline) + Send + Sync>;
