//! Exchange client error types
//!
//! All exchange-related errors are wrapped in the `ExchangeError` enum.
//! The aggregation core treats every variant the same way ("no answer
//! this round"); `kind()` only feeds metrics and logs.

use serde::Serialize;
use thiserror::Error;

/// Coarse classification of an exchange failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Network, TLS, WebSocket or timeout failure
    Transport,
    /// Credentials rejected by the exchange
    Authentication,
    /// Exchange answered, but with an error (rate limit, bad symbol, ...)
    Exchange,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Transport => write!(f, "transport"),
            ErrorKind::Authentication => write!(f, "authentication"),
            ErrorKind::Exchange => write!(f, "exchange"),
        }
    }
}

/// Exchange-specific error types for client operations
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// Connection to exchange failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation attempted while the client is not connected
    #[error("Not connected to {0}")]
    NotConnected(String),

    /// Network operation timed out
    #[error("Network timeout after {0}ms")]
    NetworkTimeout(u64),

    /// WebSocket protocol error (boxed to reduce enum size)
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// Credentials missing or rejected
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Request weight or order rate exceeded
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Symbol unknown to the exchange
    #[error("Unknown symbol: {0}")]
    BadSymbol(String),

    /// Any other error status reported by the exchange
    #[error("Exchange API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Invalid or unexpected response from exchange
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Subscription to market data failed
    #[error("Subscription failed for {symbol}: {reason}")]
    SubscriptionFailed { symbol: String, reason: String },
}

impl ExchangeError {
    /// Classify the error as transport, authentication or exchange-reported
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExchangeError::ConnectionFailed(_)
            | ExchangeError::NotConnected(_)
            | ExchangeError::NetworkTimeout(_)
            | ExchangeError::WebSocket(_) => ErrorKind::Transport,
            ExchangeError::Authentication(_) => ErrorKind::Authentication,
            ExchangeError::RateLimited(_)
            | ExchangeError::BadSymbol(_)
            | ExchangeError::Api { .. }
            | ExchangeError::InvalidResponse(_)
            | ExchangeError::SubscriptionFailed { .. } => ErrorKind::Exchange,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ExchangeError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ExchangeError::WebSocket(Box::new(e))
    }
}

/// Result type alias for exchange operations
pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;
