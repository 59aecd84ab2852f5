//! Rolling data-quality tracking per (exchange, symbol)
//!
//! Availability and error rate are exponential moving averages with a
//! fixed 0.95/0.05 decay. Records are created on the first fetch attempt
//! and updated on every attempt after that.

use std::sync::Arc;

use crate::core::types::DataQualityMetrics;
use crate::core::validator::calculate_data_quality;

/// Weight kept from the previous average
pub const EMA_DECAY: f64 = 0.95;
/// Weight given to the newest sample
pub const EMA_WEIGHT: f64 = 1.0 - EMA_DECAY;

/// Outcome of one fetch attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Attempt {
    Success { latency_ms: f64 },
    Failure { latency_ms: f64 },
}

impl DataQualityMetrics {
    /// Fresh record: fully available, no errors, not yet scored
    ///
    /// `last_update_ms` starts at creation and afterwards only moves on
    /// successful attempts.
    pub fn new(exchange: Arc<str>, symbol: Arc<str>, now_ms: u64) -> Self {
        Self {
            exchange,
            symbol,
            last_update_ms: now_ms,
            latency_ms: 0.0,
            error_rate: 0.0,
            availability: 1.0,
            quality_score: 1.0,
            samples: 0,
        }
    }

    /// Fold one attempt into the averages and rescore
    pub fn record(&mut self, attempt: Attempt, now_ms: u64) {
        let (hit, latency_ms) = match attempt {
            Attempt::Success { latency_ms } => (1.0, latency_ms),
            Attempt::Failure { latency_ms } => (0.0, latency_ms),
        };

        self.availability = ema(self.availability, hit);
        self.error_rate = ema(self.error_rate, 1.0 - hit);
        self.latency_ms = latency_ms.max(0.0);
        // freshness tracks the last delivered data, not the last attempt
        if matches!(attempt, Attempt::Success { .. }) {
            self.last_update_ms = now_ms;
        }
        self.samples += 1;
        self.quality_score = calculate_data_quality(self, now_ms);
    }

    /// Score recomputed against `now_ms`, so idle pairs decay
    pub fn current_score(&self, now_ms: u64) -> f64 {
        calculate_data_quality(self, now_ms)
    }
}

#[inline]
fn ema(previous: f64, sample: f64) -> f64 {
    EMA_DECAY * previous + EMA_WEIGHT * sample
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> DataQualityMetrics {
        DataQualityMetrics::new("binance".into(), "BTCUSDT".into(), 1_000)
    }

    #[test]
    fn test_new_record_is_fully_available() {
        let m = metrics();
        assert_eq!(m.availability, 1.0);
        assert_eq!(m.error_rate, 0.0);
        assert_eq!(m.samples, 0);
    }

    #[test]
    fn test_failure_strictly_lowers_availability() {
        let mut m = metrics();
        m.record(Attempt::Success { latency_ms: 10.0 }, 2_000);
        let before = m.availability;
        let score_before = m.quality_score;

        m.record(Attempt::Failure { latency_ms: 10.0 }, 2_000);
        assert!(m.availability < before);
        assert!((m.availability - 0.95).abs() < 1e-12);
        assert!((m.error_rate - 0.05).abs() < 1e-12);
        assert!(m.quality_score < score_before);
    }

    #[test]
    fn test_repeated_successes_converge() {
        let mut m = metrics();
        for _ in 0..5 {
            m.record(Attempt::Failure { latency_ms: 100.0 }, 1_000);
        }
        let low = m.availability;
        for _ in 0..500 {
            m.record(Attempt::Success { latency_ms: 100.0 }, 1_000);
        }
        assert!(m.availability > low);
        assert!((m.availability - 1.0).abs() < 1e-6);
        assert!(m.error_rate < 1e-6);
        // 0.4 + 0.3 * (1 - 100/5000) + 0.2 + 0.1
        assert!((m.quality_score - 0.994).abs() < 1e-6);
        assert_eq!(m.samples, 505);
    }

    #[test]
    fn test_failures_do_not_refresh_last_update() {
        let mut m = metrics();
        m.record(Attempt::Success { latency_ms: 0.0 }, 0);
        let hour = 60 * 60_000;
        m.record(Attempt::Failure { latency_ms: 0.0 }, hour);

        assert_eq!(m.last_update_ms, 0);
        // 0.4 * 0.95 + 0.3 + 0.2 * 0.95 + 0.1 * 0 (an hour stale)
        assert!((m.quality_score - 0.87).abs() < 1e-9);

        m.record(Attempt::Success { latency_ms: 0.0 }, hour + 1);
        assert_eq!(m.last_update_ms, hour + 1);
    }

    #[test]
    fn test_current_score_decays_with_idle_time() {
        let mut m = metrics();
        m.record(Attempt::Success { latency_ms: 0.0 }, 0);
        assert!(m.current_score(30 * 60_000) < m.current_score(0));
    }
}
