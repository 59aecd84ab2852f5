//! Per-symbol market state shared between collectors and queries
//!
//! One `RwLock` guards every map. Writers hold it only for a map update;
//! readers copy what they need out and release it before computing.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::adapters::types::{OrderBook, Ticker};
use crate::core::aggregator::by_exchange;
use crate::core::quality::Attempt;
use crate::core::types::DataQualityMetrics;

/// Keyed by symbol, then exchange
type BySymbol<T> = HashMap<String, HashMap<String, T>>;

#[derive(Debug, Default)]
struct MarketState {
    tickers: BySymbol<Ticker>,
    order_books: BySymbol<OrderBook>,
    quality: BySymbol<DataQualityMetrics>,
}

/// Copy of one symbol's state taken under a single read lock
#[derive(Debug, Clone, Default)]
pub struct SymbolSnapshot {
    /// Latest ticker per exchange, ordered by exchange name
    pub tickers: Vec<Ticker>,
    /// Quality metrics per exchange
    pub quality: HashMap<String, DataQualityMetrics>,
}

/// Locked store of the latest tickers, order books and quality metrics
#[derive(Debug, Default)]
pub struct MarketStore {
    inner: RwLock<MarketState>,
}

impl MarketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the exchange's ticker for its symbol (last write wins)
    pub async fn put_ticker(&self, ticker: Ticker) {
        let mut state = self.inner.write().await;
        state
            .tickers
            .entry(ticker.symbol.to_string())
            .or_default()
            .insert(ticker.exchange.to_string(), ticker);
    }

    /// Replace the exchange's order book for its symbol (last write wins)
    pub async fn put_order_book(&self, book: OrderBook) {
        let mut state = self.inner.write().await;
        state
            .order_books
            .entry(book.symbol.to_string())
            .or_default()
            .insert(book.exchange.to_string(), book);
    }

    /// Fold one fetch attempt into the pair's quality record
    ///
    /// The record is created on the first attempt. Returns a copy of the
    /// updated record.
    pub async fn record_attempt(
        &self,
        exchange: &Arc<str>,
        symbol: &str,
        attempt: Attempt,
        now_ms: u64,
    ) -> DataQualityMetrics {
        let mut state = self.inner.write().await;
        let metrics = state
            .quality
            .entry(symbol.to_string())
            .or_default()
            .entry(exchange.to_string())
            .or_insert_with(|| DataQualityMetrics::new(Arc::clone(exchange), Arc::from(symbol), now_ms));
        metrics.record(attempt, now_ms);
        metrics.clone()
    }

    pub async fn snapshot(&self, symbol: &str) -> SymbolSnapshot {
        let state = self.inner.read().await;
        let mut tickers: Vec<Ticker> = state
            .tickers
            .get(symbol)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        let quality = state.quality.get(symbol).cloned().unwrap_or_default();
        drop(state);

        tickers.sort_by(by_exchange);
        SymbolSnapshot { tickers, quality }
    }

    /// Latest tickers for `symbol`, ordered by exchange name
    pub async fn tickers(&self, symbol: &str) -> Vec<Ticker> {
        self.snapshot(symbol).await.tickers
    }

    pub async fn ticker(&self, exchange: &str, symbol: &str) -> Option<Ticker> {
        let state = self.inner.read().await;
        state.tickers.get(symbol)?.get(exchange).cloned()
    }

    pub async fn order_book(&self, exchange: &str, symbol: &str) -> Option<OrderBook> {
        let state = self.inner.read().await;
        state.order_books.get(symbol)?.get(exchange).cloned()
    }

    pub async fn quality(&self, exchange: &str, symbol: &str) -> Option<DataQualityMetrics> {
        let state = self.inner.read().await;
        state.quality.get(symbol)?.get(exchange).cloned()
    }

    /// Number of (symbol, exchange) ticker slots filled
    pub async fn ticker_count(&self) -> usize {
        let state = self.inner.read().await;
        state.tickers.values().map(HashMap::len).sum()
    }

    /// Drop all state
    pub async fn clear(&self) {
        let mut state = self.inner.write().await;
        state.tickers.clear();
        state.order_books.clear();
        state.quality.clear();
    }
}
