//! Shared test utilities for client and service testing
//!
//! Provides a configurable `TestMockClient` and ticker/book builders so the
//! core modules don't each carry their own mock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::adapters::traits::ExchangeClient;
use crate::adapters::types::{
    current_time_ms, ConnectionStatus, Kline, OrderBook, OrderBookLevel, Ticker, Trade,
};
use crate::adapters::{KlineCallback, OrderBookCallback, TickerCallback, TradeCallback};

/// Build a ticker that passes default validation
///
/// `last` sits at the midpoint; the 24h range brackets bid/ask by 1%.
pub fn ticker(exchange: &str, symbol: &str, bid: f64, ask: f64, volume: f64) -> Ticker {
    let last = (bid + ask) / 2.0;
    Ticker {
        exchange: Arc::from(exchange),
        symbol: Arc::from(symbol),
        last_price: last,
        bid_price: bid,
        ask_price: ask,
        volume_24h: volume,
        quote_volume_24h: volume * last,
        change_24h: 0.0,
        change_percent_24h: 0.0,
        high_24h: ask * 1.01,
        low_24h: bid * 0.99,
        open_price: last,
        trade_count: 100,
        timestamp_ms: current_time_ms(),
    }
}

/// Build an order book from (price, quantity) pairs, best levels first
pub fn order_book(exchange: &str, symbol: &str, bids: &[(f64, f64)], asks: &[(f64, f64)]) -> OrderBook {
    let mut book = OrderBook::new(exchange, symbol);
    book.bids = bids.iter().map(|&(p, q)| OrderBookLevel::new(p, q)).collect();
    book.asks = asks.iter().map(|&(p, q)| OrderBookLevel::new(p, q)).collect();
    book.timestamp_ms = current_time_ms();
    book
}

/// Configurable in-memory exchange client
pub struct TestMockClient {
    name: String,
    tickers: Mutex<HashMap<String, Ticker>>,
    books: Mutex<HashMap<String, OrderBook>>,
    klines: Mutex<Vec<Kline>>,
    ticker_callbacks: Mutex<Vec<(String, TickerCallback)>>,
    status: AtomicU8,
    /// When true, every data request fails with a transport error
    pub should_fail: AtomicBool,
    /// When true, `connect()` fails
    pub fail_connect: AtomicBool,
    delay_ms: AtomicU64,
    /// Number of `get_ticker` calls
    pub ticker_calls: AtomicU64,
    /// Number of `disconnect` calls
    pub disconnect_calls: AtomicU64,
}

impl TestMockClient {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tickers: Mutex::new(HashMap::new()),
            books: Mutex::new(HashMap::new()),
            klines: Mutex::new(Vec::new()),
            ticker_callbacks: Mutex::new(Vec::new()),
            status: AtomicU8::new(ConnectionStatus::Disconnected.to_u8()),
            should_fail: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
            ticker_calls: AtomicU64::new(0),
            disconnect_calls: AtomicU64::new(0),
        }
    }

    /// Mock that fails every data request
    pub fn failing(name: &str) -> Self {
        let mock = Self::new(name);
        mock.should_fail.store(true, Ordering::SeqCst);
        mock
    }

    pub fn with_ticker(self, symbol: &str, bid: f64, ask: f64, volume: f64) -> Self {
        self.set_ticker(ticker(&self.name, symbol, bid, ask, volume));
        self
    }

    pub fn with_order_book(self, symbol: &str, bids: &[(f64, f64)], asks: &[(f64, f64)]) -> Self {
        let book = order_book(&self.name, symbol, bids, asks);
        self.lock_books().insert(symbol.to_string(), book);
        self
    }

    pub fn with_klines(self, klines: Vec<Kline>) -> Self {
        *self.klines.lock().unwrap_or_else(|e| e.into_inner()) = klines;
        self
    }

    /// Delay every data request by `delay`
    pub fn with_delay(self, delay: Duration) -> Self {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    pub fn set_ticker(&self, ticker: Ticker) {
        self.lock_tickers().insert(ticker.symbol.to_string(), ticker);
    }

    pub fn set_failing(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    /// Deliver a ticker to every callback subscribed to its symbol
    pub fn push_ticker(&self, ticker: Ticker) -> usize {
        let callbacks: Vec<TickerCallback> = self
            .ticker_callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(s, _)| s.as_str() == &*ticker.symbol)
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for cb in &callbacks {
            cb(ticker.clone());
        }
        callbacks.len()
    }

    pub fn ticker_subscriptions(&self) -> usize {
        self.ticker_callbacks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn lock_tickers(&self) -> std::sync::MutexGuard<'_, HashMap<String, Ticker>> {
        self.tickers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_books(&self) -> std::sync::MutexGuard<'_, HashMap<String, OrderBook>> {
        self.books.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn simulate(&self) -> ExchangeResult<()> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(ExchangeError::ConnectionFailed(format!(
                "{}: simulated failure",
                self.name
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ExchangeClient for TestMockClient {
    fn exchange_name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> ExchangeResult<()> {
        if self.fail_connect.load(Ordering::SeqCst) {
            self.status
                .store(ConnectionStatus::Failed.to_u8(), Ordering::SeqCst);
            return Err(ExchangeError::ConnectionFailed("simulated connect failure".into()));
        }
        self.status
            .store(ConnectionStatus::Connected.to_u8(), Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> ExchangeResult<()> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.ticker_callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.status
            .store(ConnectionStatus::Disconnected.to_u8(), Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&self) -> ExchangeResult<()> {
        self.simulate().await
    }

    async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        self.ticker_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate().await?;
        let mut ticker = self
            .lock_tickers()
            .get(symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::BadSymbol(symbol.to_string()))?;
        ticker.timestamp_ms = current_time_ms();
        Ok(ticker)
    }

    async fn get_tickers(&self, symbols: &[String]) -> ExchangeResult<Vec<Ticker>> {
        let mut out = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            out.push(self.get_ticker(symbol).await?);
        }
        Ok(out)
    }

    async fn get_order_book(&self, symbol: &str, depth: usize) -> ExchangeResult<OrderBook> {
        self.simulate().await?;
        let mut book = self
            .lock_books()
            .get(symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::BadSymbol(symbol.to_string()))?;
        if depth > 0 {
            book.bids.truncate(depth);
            book.asks.truncate(depth);
        }
        Ok(book)
    }

    async fn get_recent_trades(&self, _symbol: &str, _limit: usize) -> ExchangeResult<Vec<Trade>> {
        self.simulate().await?;
        Ok(Vec::new())
    }

    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        _start: Option<DateTime<Utc>>,
        _end: Option<DateTime<Utc>>,
        _limit: Option<u32>,
    ) -> ExchangeResult<Vec<Kline>> {
        self.simulate().await?;
        Ok(self
            .klines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|k| &*k.symbol == symbol && k.interval == interval)
            .cloned()
            .collect())
    }

    async fn subscribe_ticker(&self, symbol: &str, callback: TickerCallback) -> ExchangeResult<()> {
        self.ticker_callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((symbol.to_string(), callback));
        Ok(())
    }

    async fn subscribe_trades(&self, _symbol: &str, _callback: TradeCallback) -> ExchangeResult<()> {
        Ok(())
    }

    async fn subscribe_order_book(
        &self,
        _symbol: &str,
        _callback: OrderBookCallback,
    ) -> ExchangeResult<()> {
        Ok(())
    }

    async fn subscribe_klines(
        &self,
        _symbol: &str,
        _interval: &str,
        _callback: KlineCallback,
    ) -> ExchangeResult<()> {
        Ok(())
    }

    async fn unsubscribe_all(&self) -> ExchangeResult<()> {
        self.ticker_callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        Ok(())
    }

    fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    fn last_error(&self) -> Option<String> {
        if self.should_fail.load(Ordering::SeqCst) {
            Some("simulated failure".to_string())
        } else {
            None
        }
    }
}
