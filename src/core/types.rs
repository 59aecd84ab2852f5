//! Value types produced by the aggregation core
//!
//! Everything here is a snapshot: built fresh by a query or scan and
//! handed to the caller by value.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::adapters::types::{ConnectionStatus, Ticker};

pub use crate::adapters::types::current_time_ms;

/// A best price tagged with the exchange quoting it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePrice {
    pub exchange: Arc<str>,
    pub price: f64,
    /// 24h base volume of the quoting exchange
    pub volume: f64,
    pub timestamp_ms: u64,
}

/// Cross-exchange price gap exceeding the profit threshold, before costs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrageOpportunity {
    /// Time-ordered identifier (UUID v7)
    pub id: Uuid,
    pub symbol: Arc<str>,
    pub buy_exchange: Arc<str>,
    pub sell_exchange: Arc<str>,
    /// Ask on the buying exchange
    pub buy_price: f64,
    /// Bid on the selling exchange
    pub sell_price: f64,
    pub price_difference: f64,
    /// (sell - buy) / buy * 100
    pub profit_percent: f64,
    /// min of both exchanges' 24h volumes
    pub volume: f64,
    /// 0-1, higher is better
    pub confidence: f64,
    /// 0-1, higher is riskier
    pub risk: f64,
    pub timestamp_ms: u64,
}

/// Rolling reliability score for one (exchange, symbol) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQualityMetrics {
    pub exchange: Arc<str>,
    pub symbol: Arc<str>,
    /// Time of the last fetch attempt (success or failure)
    pub last_update_ms: u64,
    /// Latency of the last attempt
    pub latency_ms: f64,
    /// EMA of failures, 0-1
    pub error_rate: f64,
    /// EMA of successes, 0-1
    pub availability: f64,
    /// Composite score, 0-1
    pub quality_score: f64,
    /// Number of attempts folded into the averages
    pub samples: u64,
}

/// Consolidated view of one symbol across exchanges
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSummary {
    pub symbol: String,
    pub best_bid: Option<ExchangePrice>,
    pub best_ask: Option<ExchangePrice>,
    pub weighted_price: f64,
    pub median_price: f64,
    pub total_volume_24h: f64,
    /// best ask - best bid
    pub spread: f64,
    /// spread / midpoint * 100
    pub spread_percent: f64,
    /// Each exchange's share of total volume
    pub volume_weights: BTreeMap<String, f64>,
    /// Raw stored tickers keyed by exchange, including ones filtered out
    /// of the aggregates above
    pub exchange_prices: BTreeMap<String, Ticker>,
    pub arbitrage: Option<ArbitrageOpportunity>,
    /// Mean quality score over every exchange with a stored ticker
    pub data_quality: f64,
    pub timestamp_ms: u64,
}

/// Connection state of one configured client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeStatusReport {
    pub status: ConnectionStatus,
    pub last_error: Option<String>,
}

/// Events fanned out to subscribers of the service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketEvent {
    Ticker(Ticker),
    Arbitrage(ArbitrageOpportunity),
}
