//! Binance exchange client module
//!
//! Public spot market data over REST and raw WebSocket streams.

pub mod client;
pub mod config;
pub mod types;

pub use client::BinanceClient;
pub use config::BinanceConfig;
