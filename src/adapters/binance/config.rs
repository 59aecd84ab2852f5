//! Binance Configuration
//!
//! Endpoints and stream settings for the public Binance spot market-data API.

use crate::adapters::shared::ReconnectConfig;
use crate::config::constants::stream_queue_capacity;

// =============================================================================
// Constants
// =============================================================================

/// Mainnet REST base URL
const MAINNET_REST_URL: &str = "https://api.binance.com";
/// Mainnet raw-stream WebSocket base URL
const MAINNET_WS_URL: &str = "wss://stream.binance.com:9443/ws";
/// Testnet REST base URL
const TESTNET_REST_URL: &str = "https://testnet.binance.vision";
/// Testnet raw-stream WebSocket base URL
const TESTNET_WS_URL: &str = "wss://testnet.binance.vision/ws";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for a Binance client (public market data only)
#[derive(Debug, Clone)]
pub struct BinanceConfig {
    /// Name reported by `exchange_name()`
    pub name: String,
    pub rest_url: String,
    pub ws_url: String,
    /// Bounded queue size per stream subscription
    pub stream_queue_capacity: usize,
    /// Backoff for `connect()` pings
    pub connect_retry: ReconnectConfig,
    /// Backoff for stream reconnects (unbounded by default)
    pub stream_retry: ReconnectConfig,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            name: "binance".to_string(),
            rest_url: MAINNET_REST_URL.to_string(),
            ws_url: MAINNET_WS_URL.to_string(),
            stream_queue_capacity: stream_queue_capacity(),
            connect_retry: ReconnectConfig::default(),
            stream_retry: ReconnectConfig::default().unbounded(),
        }
    }
}

impl BinanceConfig {
    /// Create configuration from environment variables
    ///
    /// `BINANCE_TESTNET=true` switches both endpoints to the testnet;
    /// `BINANCE_REST_URL` / `BINANCE_WS_URL` override either one.
    pub fn from_env() -> Self {
        let testnet = std::env::var("BINANCE_TESTNET")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(false);

        let mut config = Self::default();
        if testnet {
            config.rest_url = TESTNET_REST_URL.to_string();
            config.ws_url = TESTNET_WS_URL.to_string();
        }
        if let Ok(url) = std::env::var("BINANCE_REST_URL") {
            config.rest_url = url;
        }
        if let Ok(url) = std::env::var("BINANCE_WS_URL") {
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

    /// Raw-stream URL for one stream name, e.g. `btcusdt@ticker`
    pub fn stream_url(&self, stream: &str) -> String {
        format!("{}/{}", self.ws_url, stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_config_default() {
        let config = BinanceConfig::default();
        assert_eq!(config.name, "binance");
        assert_eq!(config.rest_url, "https://api.binance.com");
        assert_eq!(
            config.stream_url("btcusdt@ticker"),
            "wss://stream.binance.com:9443/ws/btcusdt@ticker"
        );
        assert_eq!(config.stream_retry.max_attempts, None);
    }

    #[test]
    fn test_builder_trims_trailing_slash() {
        let config = BinanceConfig::default()
            .with_name("binance-test")
            .with_rest_url("http://127.0.0.1:1234/")
            .with_ws_url("ws://127.0.0.1:9/ws/");
        assert_eq!(config.name, "binance-test");
        assert_eq!(config.rest_url, "http://127.0.0.1:1234");
        assert_eq!(config.stream_url("a@trade"), "ws://127.0.0.1:9/ws/a@trade");
    }

    #[test]
    #[serial]
    fn test_from_env_testnet_and_override() {
        std::env::set_var("BINANCE_TESTNET", "true");
        std::env::set_var("BINANCE_WS_URL", "wss://example.test/ws");
        let config = BinanceConfig::from_env();
        std::env::remove_var("BINANCE_TESTNET");
        std::env::remove_var("BINANCE_WS_URL");

        assert_eq!(config.rest_url, "https://testnet.binance.vision");
        assert_eq!(config.ws_url, "wss://example.test/ws");
    }
}
