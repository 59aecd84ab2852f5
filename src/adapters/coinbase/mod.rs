//! Coinbase exchange client module
//!
//! Public market data from the Coinbase Exchange REST API and WebSocket feed.

pub mod client;
pub mod config;
pub mod types;

pub use client::CoinbaseClient;
pub use config::CoinbaseConfig;
