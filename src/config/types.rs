//! Configuration types for the aggregation service
//!
//! This module defines the configuration structs loaded from YAML.
//! Everything here is fixed at construction; nothing is hot-reloaded.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::validator::ValidatorConfig;
use crate::error::AppError;

// ============================================================================
// Enums
// ============================================================================

/// Supported exchange client implementations
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    Binance,
    Coinbase,
}

impl std::fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExchangeKind::Binance => write!(f, "binance"),
            ExchangeKind::Coinbase => write!(f, "coinbase"),
        }
    }
}

// ============================================================================
// Serde Defaults
// ============================================================================

fn default_update_interval_ms() -> u64 {
    1000
}
fn default_arbitrage_threshold() -> f64 {
    0.1
}
fn default_data_quality_threshold() -> f64 {
    0.5
}
fn default_max_price_deviation() -> f64 {
    5.0
}
fn default_cache_ttl_ms() -> u64 {
    30_000
}
fn default_request_timeout_ms() -> u64 {
    3000
}
fn default_fee_rate() -> f64 {
    0.001
}
fn default_true() -> bool {
    true
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Aggregation service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Collection loop period; the arbitrage loop runs at twice this
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
    /// Minimum profit (percent) for an arbitrage opportunity
    #[serde(default = "default_arbitrage_threshold")]
    pub arbitrage_threshold: f64,
    /// Exchanges scoring below this (0-1) are left out of query results
    #[serde(default = "default_data_quality_threshold")]
    pub data_quality_threshold: f64,
    /// Max deviation (percent) of a last price from the cross-exchange median
    #[serde(default = "default_max_price_deviation")]
    pub max_price_deviation: f64,
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
    /// Per-request timeout for every exchange call in a tick
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Fee rate charged per leg by execution cost estimates (0.001 = 0.1%)
    #[serde(default = "default_fee_rate")]
    pub fee_rate: f64,
    #[serde(default = "default_true")]
    pub enable_arbitrage: bool,
    #[serde(default = "default_true")]
    pub enable_validation: bool,
    /// Subscribe to ticker pushes in addition to polling
    #[serde(default)]
    pub enable_streaming: bool,
    /// Symbols to aggregate (e.g. "BTCUSDT")
    pub symbols: Vec<String>,
}

impl AggregationConfig {
    /// Defaults for everything except the symbol list
    pub fn with_symbols(symbols: Vec<String>) -> Self {
        Self {
            update_interval_ms: default_update_interval_ms(),
            arbitrage_threshold: default_arbitrage_threshold(),
            data_quality_threshold: default_data_quality_threshold(),
            max_price_deviation: default_max_price_deviation(),
            cache_ttl_ms: default_cache_ttl_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            fee_rate: default_fee_rate(),
            enable_arbitrage: true,
            enable_validation: true,
            enable_streaming: false,
            symbols,
        }
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn arbitrage_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms.saturating_mul(2))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// Validate aggregation configuration rules
    pub fn validate(&self) -> Result<(), AppError> {
        if self.symbols.is_empty() {
            return Err(AppError::Config(
                "aggregation.symbols must contain at least one symbol".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for symbol in &self.symbols {
            if symbol.trim().is_empty() {
                return Err(AppError::Config("Symbol cannot be empty".to_string()));
            }
            if !seen.insert(symbol.to_uppercase()) {
                return Err(AppError::Config(format!("Duplicate symbol '{}'", symbol)));
            }
        }

        if self.update_interval_ms == 0 {
            return Err(AppError::Config(
                "update_interval_ms must be > 0".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(AppError::Config(
                "request_timeout_ms must be > 0".to_string(),
            ));
        }

        if !self.arbitrage_threshold.is_finite() || self.arbitrage_threshold < 0.0 {
            return Err(AppError::Config(format!(
                "arbitrage_threshold must be a finite percentage >= 0 (got {})",
                self.arbitrage_threshold
            )));
        }

        if !(0.0..=1.0).contains(&self.data_quality_threshold) {
            return Err(AppError::Config(format!(
                "data_quality_threshold must be within [0, 1] (got {})",
                self.data_quality_threshold
            )));
        }

        if !self.max_price_deviation.is_finite() || self.max_price_deviation <= 0.0 {
            return Err(AppError::Config(format!(
                "max_price_deviation must be a finite percentage > 0 (got {})",
                self.max_price_deviation
            )));
        }

        if !(0.0..1.0).contains(&self.fee_rate) {
            return Err(AppError::Config(format!(
                "fee_rate must be within [0, 1) (got {})",
                self.fee_rate
            )));
        }

        Ok(())
    }
}

/// One configured exchange client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub kind: ExchangeKind,
    /// Reported exchange name, defaults to the kind ("binance")
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub rest_url: Option<String>,
    #[serde(default)]
    pub ws_url: Option<String>,
}

impl ExchangeConfig {
    pub fn new(kind: ExchangeKind) -> Self {
        Self {
            kind,
            name: None,
            rest_url: None,
            ws_url: None,
        }
    }

    /// Name the client will report, used as its key in every aggregate
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.kind.to_string())
    }
}

/// Root application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub validation: ValidatorConfig,
    pub exchanges: Vec<ExchangeConfig>,
}

impl AppConfig {
    /// Validate all configuration rules
    pub fn validate(&self) -> Result<(), AppError> {
        self.aggregation.validate()?;
        self.validation.validate()?;

        if self.exchanges.is_empty() {
            return Err(AppError::Config(
                "Configuration must contain at least one exchange".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for exchange in &self.exchanges {
            let name = exchange.display_name();
            if name.trim().is_empty() {
                return Err(AppError::Config("Exchange name cannot be empty".to_string()));
            }
            if !names.insert(name.clone()) {
                return Err(AppError::Config(format!(
                    "Duplicate exchange name '{}' (set a distinct `name`)",
                    name
                )));
            }
        }

        Ok(())
    }
}
