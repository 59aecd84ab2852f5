//! Core module - validation, quality scoring, aggregation, arbitrage, service
//!
//! # Module Architecture
//!
//! This module uses **explicit re-exports** instead of glob exports (`pub use module::*`)
//! to provide better API visibility and prevent accidental public API changes.
//!
//! ## Usage
//! Prefer importing from `crate::core`:
//! ```ignore
//! use market_aggregator::core::{AggregationService, ArbitrageDetector, MarketSummary};
//! ```

pub mod aggregator;
pub mod detector;
pub mod quality;
pub mod service;
pub mod sinks;
pub mod store;
pub mod types;
pub mod validator;

// Explicit re-exports for types module
pub use types::{
    ArbitrageOpportunity, DataQualityMetrics, ExchangePrice, ExchangeStatusReport, MarketEvent,
    MarketSummary,
};

// Explicit re-exports for validator module
pub use validator::{calculate_data_quality, quality_score, DataValidator, ValidationError, ValidatorConfig};

// Explicit re-exports for quality module
pub use quality::Attempt;

// Explicit re-exports for aggregator module
pub use aggregator::{
    best_bid_ask, median_price, merge_order_books, spread, total_volume, volume_weights,
    weighted_price,
};

// Explicit re-exports for detector module
pub use detector::ArbitrageDetector;

// Explicit re-exports for store module
pub use store::{MarketStore, SymbolSnapshot};

// Explicit re-exports for sinks module
pub use sinks::{
    BroadcastPublisher, CacheManager, EventPublisher, InMemoryMetrics, MemoryCache,
    MetricsCollector, MetricsSnapshot, OperationStats, Sinks,
};

// Explicit re-exports for service module
pub use service::{AggregationService, ServiceState};
