//! Coinbase Configuration
//!
//! Endpoints and stream settings for the public Coinbase Exchange API.

use crate::adapters::shared::ReconnectConfig;
use crate::config::constants::stream_queue_capacity;

// =============================================================================
// Constants
// =============================================================================

/// Production REST base URL
const PRODUCTION_REST_URL: &str = "https://api.exchange.coinbase.com";
/// Production WebSocket feed
const PRODUCTION_WS_URL: &str = "wss://ws-feed.exchange.coinbase.com";
/// Sandbox REST base URL
const SANDBOX_REST_URL: &str = "https://api-public.sandbox.exchange.coinbase.com";
/// Sandbox WebSocket feed
const SANDBOX_WS_URL: &str = "wss://ws-feed-public.sandbox.exchange.coinbase.com";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for a Coinbase client (public market data only)
#[derive(Debug, Clone)]
pub struct CoinbaseConfig {
    /// Name reported by `exchange_name()`
    pub name: String,
    pub rest_url: String,
    /// Single feed endpoint; channels are chosen by the subscribe message
    pub ws_url: String,
    /// Bounded queue size per stream subscription
    pub stream_queue_capacity: usize,
    /// Backoff for `connect()` pings
    pub connect_retry: ReconnectConfig,
    /// Backoff for stream reconnects (unbounded by default)
    pub stream_retry: ReconnectConfig,
}

impl Default for CoinbaseConfig {
    fn default() -> Self {
        Self {
            name: "coinbase".to_string(),
            rest_url: PRODUCTION_REST_URL.to_string(),
            ws_url: PRODUCTION_WS_URL.to_string(),
            stream_queue_capacity: stream_queue_capacity(),
            connect_retry: ReconnectConfig::default(),
            stream_retry: ReconnectConfig::default().unbounded(),
        }
    }
}

impl CoinbaseConfig {
    /// Create configuration from environment variables
    ///
    /// `COINBASE_SANDBOX=true` switches both endpoints to the sandbox;
    /// `COINBASE_REST_URL` / `COINBASE_WS_URL` override either one.
    pub fn from_env() -> Self {
        let sandbox = std::env::var("COINBASE_SANDBOX")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(false);

        let mut config = Self::default();
        if sandbox {
            config.rest_url = SANDBOX_REST_URL.to_string();
            config.ws_url = SANDBOX_WS_URL.to_string();
        }
        if let Ok(url) = std::env::var("COINBASE_REST_URL") {
            config.rest_url = url;
        }
        if let Ok(url) = std::env::var("COINBASE_WS_URL") {
            config.ws_url = url;
        }
        config
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_rest_url(mut self, url: impl Into<String>) -> Self {
        self.rest_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_connect_retry(mut self, retry: ReconnectConfig) -> Self {
        self.connect_retry = retry;
        self
    }

    pub fn with_stream_retry(mut self, retry: ReconnectConfig) -> Self {
        self.stream_retry = retry;
        self
    }
}
