//! Multi-exchange market data aggregation
//!
//! - Exchange adapters (Binance) behind one client contract
//! - Validation and per-exchange data quality scoring
//! - Consolidated tickers, merged order books and arbitrage detection

pub mod adapters;
pub mod config;
pub mod core;
pub mod error;

pub use error::AppError;
