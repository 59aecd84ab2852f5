//! Client factory for configured exchanges
//!
//! Creates `ExchangeClient` trait objects from the `exchanges:` section of
//! the YAML configuration. Clients are created but NOT connected; the
//! aggregation service connects them on `start()`.

use std::sync::Arc;

use crate::adapters::binance::{BinanceClient, BinanceConfig};
use crate::adapters::coinbase::{CoinbaseClient, CoinbaseConfig};
use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::adapters::traits::ExchangeClient;
use crate::config::{ExchangeConfig, ExchangeKind};

/// Exchange kinds accepted in configuration
pub const SUPPORTED_EXCHANGES: &[&str] = &["binance", "coinbase"];

/// Create a client for one configured exchange
///
/// Environment settings (`BINANCE_TESTNET`, `COINBASE_SANDBOX`, ...) form the base; explicit
/// `name` / `rest_url` / `ws_url` values from the file win over them.
pub fn create_client(config: &ExchangeConfig) -> Arc<dyn ExchangeClient> {
    match config.kind {
        ExchangeKind::Binance => {
            let mut binance = BinanceConfig::from_env().with_name(config.display_name());
            if let Some(url) = &config.rest_url {
                binance = binance.with_rest_url(url.as_str());
            }
            if let Some(url) = &config.ws_url {
                binance = binance.with_ws_url(url.as_str());
            }
            Arc::new(BinanceClient::new(binance))
        }
        ExchangeKind::Coinbase => {
            let mut coinbase = CoinbaseConfig::from_env().with_name(config.display_name());
            if let Some(url) = &config.rest_url {
                coinbase = coinbase.with_rest_url(url.as_str());
            }
            if let Some(url) = &config.ws_url {
                coinbase = coinbase.with_ws_url(url.as_str());
            }
            Arc::new(CoinbaseClient::new(coinbase))
        }
    }
}

/// Create a client from a bare exchange name, e.g. from the command line
pub fn create_client_by_name(name: &str) -> ExchangeResult<Arc<dyn ExchangeClient>> {
    match name {
        "binance" => Ok(create_client(&ExchangeConfig::new(ExchangeKind::Binance))),
        "coinbase" => Ok(create_client(&ExchangeConfig::new(ExchangeKind::Coinbase))),
        _ => Err(ExchangeError::ConnectionFailed(format!(
            "Unknown exchange: '{}'. Supported: {}",
            name,
            SUPPORTED_EXCHANGES.join(", ")
        ))),
    }
}

/// Create one client per configured exchange, preserving order
pub fn create_clients(configs: &[ExchangeConfig]) -> Vec<Arc<dyn ExchangeClient>> {
    configs.iter().map(create_client).collect()
}
