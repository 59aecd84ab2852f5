//! Data validation and quality scoring
//!
//! Sanity checks for one exchange's ticker or order book, plus the
//! composite 0-1 quality score. These checks are a heuristic safety net:
//! they reject obviously broken data and leave pricing to the aggregator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapters::types::{current_time_ms, OrderBook, OrderBookLevel, Ticker};
use crate::core::types::DataQualityMetrics;
use crate::error::AppError;

// =============================================================================
// Quality score weights
// =============================================================================

const AVAILABILITY_WEIGHT: f64 = 0.4;
const LATENCY_WEIGHT: f64 = 0.3;
const ERROR_RATE_WEIGHT: f64 = 0.2;
const FRESHNESS_WEIGHT: f64 = 0.1;
/// Latency at which the latency component bottoms out
const LATENCY_CEILING_MS: f64 = 5000.0;
/// Staleness at which the freshness component bottoms out
const STALENESS_CEILING_MIN: f64 = 60.0;

/// Quote assets treated as worth 1 USD for the stablecoin band
const USD_ASSETS: &[&str] = &["USD", "USDT", "USDC", "BUSD", "FDUSD", "TUSD", "USDP", "DAI"];

// =============================================================================
// Errors
// =============================================================================

/// The sanity rule a ticker or order book failed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("price must be positive (got {0})")]
    NonPositivePrice(f64),

    #[error("price {price} outside [{min}, {max}]")]
    PriceOutOfRange { price: f64, min: f64, max: f64 },

    #[error("{symbol} price {price} deviates from 1.0 by more than {band_percent}%")]
    StablecoinDeviation {
        symbol: String,
        price: f64,
        band_percent: f64,
    },

    #[error("volume must be finite and non-negative (got {0})")]
    InvalidVolume(f64),

    #[error("volume {volume} exceeds ceiling {max}")]
    VolumeTooLarge { volume: f64, max: f64 },

    #[error("data is {age_ms}ms old")]
    Stale { age_ms: u64 },

    #[error("timestamp is {ahead_ms}ms in the future")]
    FutureTimestamp { ahead_ms: u64 },

    #[error("ask {ask} is not above bid {bid}")]
    CrossedQuote { bid: f64, ask: f64 },

    #[error("last price {last} outside quote band [{low}, {high}]")]
    LastOutsideQuote { last: f64, low: f64, high: f64 },

    #[error("24h high {high} below low {low}")]
    InvertedRange { high: f64, low: f64 },

    #[error("last price {last} outside 24h range band [{low}, {high}]")]
    LastOutsideRange { last: f64, low: f64, high: f64 },

    #[error("order book has no levels")]
    EmptyBook,

    #[error("{side} level {index} is out of order")]
    UnorderedBook { side: &'static str, index: usize },

    #[error("{side} level {index} has non-positive quantity {quantity}")]
    InvalidLevelQuantity {
        side: &'static str,
        index: usize,
        quantity: f64,
    },

    #[error("best ask {ask} is not above best bid {bid}")]
    CrossedBook { bid: f64, ask: f64 },

    #[error("spread is {ratio_percent:.2}% of the midpoint")]
    SpreadTooWide { ratio_percent: f64 },
}

// =============================================================================
// Configuration
// =============================================================================

fn default_min_price() -> f64 {
    1e-6
}
fn default_max_price() -> f64 {
    1e6
}
fn default_max_volume() -> f64 {
    1e12
}
fn default_max_age_ms() -> u64 {
    5 * 60 * 1000
}
fn default_max_future_ms() -> u64 {
    60 * 1000
}
fn default_stablecoin_band_percent() -> f64 {
    5.0
}
fn default_max_spread_percent() -> f64 {
    50.0
}

/// Tolerances used by `DataValidator`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    #[serde(default = "default_min_price")]
    pub min_price: f64,
    #[serde(default = "default_max_price")]
    pub max_price: f64,
    #[serde(default = "default_max_volume")]
    pub max_volume: f64,
    /// Oldest accepted ticker
    #[serde(default = "default_max_age_ms")]
    pub max_age_ms: u64,
    /// Furthest accepted clock skew into the future
    #[serde(default = "default_max_future_ms")]
    pub max_future_ms: u64,
    /// Allowed distance (percent) of a stable pair from 1.0
    #[serde(default = "default_stablecoin_band_percent")]
    pub stablecoin_band_percent: f64,
    /// Max book spread as a percentage of the midpoint
    #[serde(default = "default_max_spread_percent")]
    pub max_spread_percent: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_price: default_min_price(),
            max_price: default_max_price(),
            max_volume: default_max_volume(),
            max_age_ms: default_max_age_ms(),
            max_future_ms: default_max_future_ms(),
            stablecoin_band_percent: default_stablecoin_band_percent(),
            max_spread_percent: default_max_spread_percent(),
        }
    }
}

impl ValidatorConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if !(self.min_price > 0.0 && self.min_price < self.max_price) {
            return Err(AppError::Config(format!(
                "validation.min_price must be > 0 and below max_price (got {} / {})",
                self.min_price, self.max_price
            )));
        }
        if !(self.max_volume > 0.0) {
            return Err(AppError::Config(
                "validation.max_volume must be > 0".to_string(),
            ));
        }
        if !(self.stablecoin_band_percent > 0.0) || !(self.max_spread_percent > 0.0) {
            return Err(AppError::Config(
                "validation percentages must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Validator
// =============================================================================

/// Stateless sanity checks over tickers and order books
#[derive(Debug, Clone, Default)]
pub struct DataValidator {
    config: ValidatorConfig,
}

impl DataValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Check a price against the global range and symbol-specific bands
    pub fn validate_price(&self, symbol: &str, price: f64) -> Result<(), ValidationError> {
        if !(price > 0.0) {
            return Err(ValidationError::NonPositivePrice(price));
        }
        if price < self.config.min_price || price > self.config.max_price {
            return Err(ValidationError::PriceOutOfRange {
                price,
                min: self.config.min_price,
                max: self.config.max_price,
            });
        }
        if is_stable_pair(symbol) {
            let band = self.config.stablecoin_band_percent / 100.0;
            if (price - 1.0).abs() > band {
                return Err(ValidationError::StablecoinDeviation {
                    symbol: symbol.to_string(),
                    price,
                    band_percent: self.config.stablecoin_band_percent,
                });
            }
        }
        Ok(())
    }

    pub fn validate_volume(&self, volume: f64) -> Result<(), ValidationError> {
        if !volume.is_finite() || volume < 0.0 {
            return Err(ValidationError::InvalidVolume(volume));
        }
        if volume >= self.config.max_volume {
            return Err(ValidationError::VolumeTooLarge {
                volume,
                max: self.config.max_volume,
            });
        }
        Ok(())
    }

    pub fn validate_ticker(&self, ticker: &Ticker) -> Result<(), ValidationError> {
        self.validate_ticker_at(ticker, current_time_ms())
    }

    /// `validate_ticker` against an explicit clock
    pub fn validate_ticker_at(&self, ticker: &Ticker, now_ms: u64) -> Result<(), ValidationError> {
        self.validate_timestamp(ticker.timestamp_ms, now_ms)?;

        let symbol = &*ticker.symbol;
        self.validate_price(symbol, ticker.last_price)?;
        self.validate_price(symbol, ticker.bid_price)?;
        self.validate_price(symbol, ticker.ask_price)?;

        if ticker.ask_price <= ticker.bid_price {
            return Err(ValidationError::CrossedQuote {
                bid: ticker.bid_price,
                ask: ticker.ask_price,
            });
        }

        let (low, high) = (ticker.bid_price * 0.95, ticker.ask_price * 1.05);
        if ticker.last_price < low || ticker.last_price > high {
            return Err(ValidationError::LastOutsideQuote {
                last: ticker.last_price,
                low,
                high,
            });
        }

        if ticker.high_24h > 0.0 && ticker.low_24h > 0.0 {
            if ticker.high_24h < ticker.low_24h {
                return Err(ValidationError::InvertedRange {
                    high: ticker.high_24h,
                    low: ticker.low_24h,
                });
            }
            let (low, high) = (ticker.low_24h * 0.9, ticker.high_24h * 1.1);
            if ticker.last_price < low || ticker.last_price > high {
                return Err(ValidationError::LastOutsideRange {
                    last: ticker.last_price,
                    low,
                    high,
                });
            }
        }

        self.validate_volume(ticker.volume_24h)?;
        self.validate_volume(ticker.quote_volume_24h)?;
        Ok(())
    }

    /// Both sides ordered and level-valid, not crossed, spread bounded
    ///
    /// A one-sided book is accepted; a book with no levels at all is not.
    pub fn validate_order_book(&self, book: &OrderBook) -> Result<(), ValidationError> {
        if book.bids.is_empty() && book.asks.is_empty() {
            return Err(ValidationError::EmptyBook);
        }

        self.validate_side(&book.symbol, "bid", &book.bids, |prev, next| next < prev)?;
        self.validate_side(&book.symbol, "ask", &book.asks, |prev, next| next > prev)?;

        if let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) {
            if ask <= bid {
                return Err(ValidationError::CrossedBook { bid, ask });
            }
            let mid = (bid + ask) / 2.0;
            let ratio_percent = (ask - bid) / mid * 100.0;
            if ratio_percent > self.config.max_spread_percent {
                return Err(ValidationError::SpreadTooWide { ratio_percent });
            }
        }
        Ok(())
    }

    fn validate_side(
        &self,
        symbol: &str,
        side: &'static str,
        levels: &[OrderBookLevel],
        in_order: impl Fn(f64, f64) -> bool,
    ) -> Result<(), ValidationError> {
        for (index, level) in levels.iter().enumerate() {
            self.validate_price(symbol, level.price)?;
            if !(level.quantity > 0.0) || !level.quantity.is_finite() {
                return Err(ValidationError::InvalidLevelQuantity {
                    side,
                    index,
                    quantity: level.quantity,
                });
            }
            if index > 0 && !in_order(levels[index - 1].price, level.price) {
                return Err(ValidationError::UnorderedBook { side, index });
            }
        }
        Ok(())
    }

    fn validate_timestamp(&self, timestamp_ms: u64, now_ms: u64) -> Result<(), ValidationError> {
        if timestamp_ms > now_ms {
            let ahead_ms = timestamp_ms - now_ms;
            if ahead_ms > self.config.max_future_ms {
                return Err(ValidationError::FutureTimestamp { ahead_ms });
            }
        } else {
            let age_ms = now_ms - timestamp_ms;
            if age_ms > self.config.max_age_ms {
                return Err(ValidationError::Stale { age_ms });
            }
        }
        Ok(())
    }
}

/// True for pairs of two USD-pegged assets, e.g. "USDCUSDT" or "DAI-USD"
fn is_stable_pair(symbol: &str) -> bool {
    let normalized: String = symbol
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_uppercase();

    USD_ASSETS.iter().any(|base| {
        normalized
            .strip_prefix(base)
            .is_some_and(|quote| USD_ASSETS.contains(&quote))
    })
}

// =============================================================================
// Quality score
// =============================================================================

/// Composite 0-1 score from the four quality components
///
/// Non-decreasing in `availability`; non-increasing in latency, error
/// rate and staleness.
pub fn quality_score(
    availability: f64,
    latency_ms: f64,
    error_rate: f64,
    minutes_since_update: f64,
) -> f64 {
    let availability = availability.clamp(0.0, 1.0);
    let latency = (latency_ms.max(0.0) / LATENCY_CEILING_MS).min(1.0);
    let errors = error_rate.clamp(0.0, 1.0);
    let staleness = (minutes_since_update.max(0.0) / STALENESS_CEILING_MIN).min(1.0);

    let score = AVAILABILITY_WEIGHT * availability
        + LATENCY_WEIGHT * (1.0 - latency)
        + ERROR_RATE_WEIGHT * (1.0 - errors)
        + FRESHNESS_WEIGHT * (1.0 - staleness);

    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Quality score of a metrics record as of `now_ms`
pub fn calculate_data_quality(metrics: &DataQualityMetrics, now_ms: u64) -> f64 {
    let minutes = now_ms.saturating_sub(metrics.last_update_ms) as f64 / 60_000.0;
    quality_score(
        metrics.availability,
        metrics.latency_ms,
        metrics.error_rate,
        minutes,
    )
}
