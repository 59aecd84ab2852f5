//! Configuration module for aggregation settings and YAML loading
//!
//! This module provides:
//! - Configuration types (`AppConfig`, `AggregationConfig`, `ExchangeConfig`)
//! - YAML loading functionality (`load_config`)
//! - Capacities and intervals with environment variable overrides
//! - Logging bootstrap

pub mod constants;
pub mod logging;
mod loader;
mod types;

// Re-export types
pub use types::{AggregationConfig, AppConfig, ExchangeConfig, ExchangeKind};

// Re-export loader functions
pub use loader::{load_config, load_config_from_str};
