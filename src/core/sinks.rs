//! Outbound collaborators of the aggregation service
//!
//! - `EventPublisher`: fan-out of tickers and opportunities
//! - `MetricsCollector`: per-exchange latency, success and error counters
//! - `CacheManager`: optional TTL cache of stored tickers
//!
//! Each comes with an in-process implementation. The service works without
//! any of them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::adapters::errors::{ErrorKind, ExchangeError};
use crate::adapters::types::Ticker;
use crate::core::types::{ArbitrageOpportunity, MarketEvent};

// =============================================================================
// Events
// =============================================================================

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_ticker(&self, ticker: &Ticker);
    async fn publish_arbitrage(&self, opportunity: &ArbitrageOpportunity);
}

/// Broadcast fan-out of `MarketEvent`s
///
/// Slow subscribers lag and lose the oldest events; publishing with no
/// subscriber is not an error.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<MarketEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
        self.tx.subscribe()
    }

    fn send(&self, event: MarketEvent) {
        if self.tx.send(event).is_err() {
            trace!("No event subscribers");
        }
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    async fn publish_ticker(&self, ticker: &Ticker) {
        self.send(MarketEvent::Ticker(ticker.clone()));
    }

    async fn publish_arbitrage(&self, opportunity: &ArbitrageOpportunity) {
        self.send(MarketEvent::Arbitrage(opportunity.clone()));
    }
}

// =============================================================================
// Metrics
// =============================================================================

pub trait MetricsCollector: Send + Sync {
    fn record_latency(&self, exchange: &str, operation: &str, latency: Duration);
    fn record_error(&self, exchange: &str, operation: &str, error: &ExchangeError);
    fn record_success(&self, exchange: &str, operation: &str);
    fn record_arbitrage_opportunity(&self, opportunity: &ArbitrageOpportunity);
}

/// Counters for one (exchange, operation) pair
#[derive(Debug, Clone, Default, Serialize)]
pub struct OperationStats {
    pub successes: u64,
    pub errors: u64,
    /// EMA of observed latency, 0 until the first sample
    pub avg_latency_ms: f64,
    pub errors_by_kind: HashMap<ErrorKind, u64>,
}

/// Copy of all counters at one point in time
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    /// Keyed by "exchange/operation"
    pub operations: HashMap<String, OperationStats>,
    pub opportunities: u64,
    pub best_profit_percent: f64,
}

impl MetricsSnapshot {
    pub fn operation(&self, exchange: &str, operation: &str) -> Option<&OperationStats> {
        self.operations.get(&format!("{}/{}", exchange, operation))
    }
}

/// Process-local metrics store
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    inner: Mutex<MetricsSnapshot>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MetricsSnapshot> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_op(&self, exchange: &str, operation: &str, f: impl FnOnce(&mut OperationStats)) {
        let mut inner = self.lock();
        let stats = inner
            .operations
            .entry(format!("{}/{}", exchange, operation))
            .or_default();
        f(stats);
    }
}

impl MetricsCollector for InMemoryMetrics {
    fn record_latency(&self, exchange: &str, operation: &str, latency: Duration) {
        let ms = latency.as_secs_f64() * 1000.0;
        self.with_op(exchange, operation, |s| {
            s.avg_latency_ms = if s.avg_latency_ms == 0.0 {
                ms
            } else {
                0.95 * s.avg_latency_ms + 0.05 * ms
            };
        });
    }

    fn record_error(&self, exchange: &str, operation: &str, error: &ExchangeError) {
        let kind = error.kind();
        self.with_op(exchange, operation, |s| {
            s.errors += 1;
            *s.errors_by_kind.entry(kind).or_insert(0) += 1;
        });
    }

    fn record_success(&self, exchange: &str, operation: &str) {
        self.with_op(exchange, operation, |s| s.successes += 1);
    }

    fn record_arbitrage_opportunity(&self, opportunity: &ArbitrageOpportunity) {
        let mut inner = self.lock();
        inner.opportunities += 1;
        if opportunity.profit_percent > inner.best_profit_percent {
            inner.best_profit_percent = opportunity.profit_percent;
        }
    }
}

// =============================================================================
// Cache
// =============================================================================

pub trait CacheManager: Send + Sync {
    fn put_ticker(&self, ticker: &Ticker, ttl: Duration);
    fn get_ticker(&self, exchange: &str, symbol: &str) -> Option<Ticker>;
}

/// TTL cache keyed by (exchange, symbol); expired entries vanish on read
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<(String, String), (Ticker, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, (_, expires)| *expires > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), (Ticker, Instant)>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CacheManager for MemoryCache {
    fn put_ticker(&self, ticker: &Ticker, ttl: Duration) {
        let key = (ticker.exchange.to_string(), ticker.symbol.to_string());
        self.lock().insert(key, (ticker.clone(), Instant::now() + ttl));
    }

    fn get_ticker(&self, exchange: &str, symbol: &str) -> Option<Ticker> {
        let key = (exchange.to_string(), symbol.to_string());
        let mut entries = self.lock();
        match entries.get(&key) {
            Some((ticker, expires)) if *expires > Instant::now() => Some(ticker.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }
}

/// Optional collaborators handed to the service
#[derive(Clone, Default)]
pub struct Sinks {
    pub events: Option<Arc<dyn EventPublisher>>,
    pub metrics: Option<Arc<dyn MetricsCollector>>,
    pub cache: Option<Arc<dyn CacheManager>>,
}

impl Sinks {
    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_utils::ticker;
    use crate::core::detector::ArbitrageDetector;

    fn opportunity(profit_gap: f64) -> ArbitrageOpportunity {
        let a = ticker("a", "X", 99.0, 100.0, 1.0);
        let b = ticker("b", "X", 100.0 + profit_gap, 101.0 + profit_gap, 1.0);
        ArbitrageDetector::new(0.0, 0.0).best(&[a, b]).unwrap()
    }

    #[tokio::test]
    async fn test_broadcast_publisher_delivers_events() {
        let publisher = BroadcastPublisher::new(8);
        let mut rx = publisher.subscribe();

        publisher.publish_ticker(&ticker("a", "X", 1.0, 2.0, 1.0)).await;
        publisher.publish_arbitrage(&opportunity(1.0)).await;

        assert!(matches!(rx.recv().await.unwrap(), MarketEvent::Ticker(_)));
        assert!(matches!(rx.recv().await.unwrap(), MarketEvent::Arbitrage(_)));
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_fine() {
        let publisher = BroadcastPublisher::new(1);
        publisher.publish_ticker(&ticker("a", "X", 1.0, 2.0, 1.0)).await;
    }

    #[test]
    fn test_metrics_counts() {
        let metrics = InMemoryMetrics::new();
        metrics.record_success("binance", "get_ticker");
        metrics.record_success("binance", "get_ticker");
        metrics.record_error("binance", "get_ticker", &ExchangeError::NetworkTimeout(100));
        metrics.record_error("binance", "get_ticker", &ExchangeError::BadSymbol("X".into()));
        metrics.record_latency("binance", "get_ticker", Duration::from_millis(100));
        metrics.record_latency("binance", "get_ticker", Duration::from_millis(200));

        let snapshot = metrics.snapshot();
        let stats = snapshot.operation("binance", "get_ticker").unwrap();
        assert_eq!(stats.successes, 2);
        assert_eq!(stats.errors, 2);
        assert_eq!(stats.errors_by_kind[&ErrorKind::Transport], 1);
        assert_eq!(stats.errors_by_kind[&ErrorKind::Exchange], 1);
        assert!((stats.avg_latency_ms - 105.0).abs() < 1e-6);
        assert!(snapshot.operation("binance", "get_order_book").is_none());
    }

    #[test]
    fn test_metrics_tracks_best_opportunity() {
        let metrics = InMemoryMetrics::new();
        metrics.record_arbitrage_opportunity(&opportunity(1.0));
        metrics.record_arbitrage_opportunity(&opportunity(3.0));
        metrics.record_arbitrage_opportunity(&opportunity(2.0));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.opportunities, 3);
        assert!((snapshot.best_profit_percent - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_cache_ttl() {
        let cache = MemoryCache::new();
        cache.put_ticker(&ticker("a", "X", 1.0, 2.0, 1.0), Duration::from_secs(60));
        cache.put_ticker(&ticker("b", "X", 1.0, 2.0, 1.0), Duration::ZERO);

        assert!(cache.get_ticker("a", "X").is_some());
        assert!(cache.get_ticker("b", "X").is_none());
        assert!(cache.get_ticker("c", "X").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_purge_expired() {
        let cache = MemoryCache::new();
        cache.put_ticker(&ticker("a", "X", 1.0, 2.0, 1.0), Duration::ZERO);
        cache.put_ticker(&ticker("b", "X", 1.0, 2.0, 1.0), Duration::from_secs(60));
        assert_eq!(cache.purge_expired(), 1);
        assert!(!cache.is_empty());
    }
}
