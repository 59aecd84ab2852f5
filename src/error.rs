//! Application-wide error types using thiserror
//!
//! Per-exchange failures stay inside the collection workers; only the
//! variants below ever reach a caller of the aggregation service.

use thiserror::Error;

use crate::adapters::errors::ExchangeError;
use crate::core::validator::ValidationError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// No exchange produced any data for the symbol
    #[error("No data available for symbol {symbol}")]
    NoData { symbol: String },

    /// Data exists, but every entry was rejected by validation
    #[error("No valid data available for symbol {symbol}")]
    NoValidData { symbol: String },

    #[error("No arbitrage opportunity for symbol {symbol}")]
    NoOpportunity { symbol: String },

    #[error("No quality metrics for {exchange}/{symbol}")]
    NoQualityMetrics { exchange: String, symbol: String },

    #[error("Aggregation service is already running")]
    AlreadyRunning,

    #[error("Aggregation service is not running")]
    NotRunning,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// True for the "nothing to report" family of errors
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AppError::NoData { .. }
                | AppError::NoValidData { .. }
                | AppError::NoOpportunity { .. }
                | AppError::NoQualityMetrics { .. }
        )
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
