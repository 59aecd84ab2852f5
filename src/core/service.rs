//! Aggregation service
//!
//! Owns the per-symbol market state, runs the periodic collection and
//! arbitrage loops, and answers queries over the collected snapshot.
//!
//! # Lifecycle
//! `Stopped -> Starting -> Running -> Stopping -> Stopped`
//!
//! # Tasks
//! - collection loop: every `update_interval`, one task per
//!   (symbol, exchange) pair, all awaited before the tick completes
//! - arbitrage loop (optional): every `2 * update_interval`
//! - ingest loop (optional): drains pushed tickers from stream subscriptions

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::adapters::traits::ExchangeClient;
use crate::adapters::types::{current_time_ms, Kline, OrderBook, Ticker};
use crate::adapters::TickerCallback;
use crate::config::constants::ingest_queue_capacity;
use crate::config::AggregationConfig;
use crate::core::aggregator;
use crate::core::detector::ArbitrageDetector;
use crate::core::quality::Attempt;
use crate::core::sinks::Sinks;
use crate::core::store::{MarketStore, SymbolSnapshot};
use crate::core::types::{
    ArbitrageOpportunity, DataQualityMetrics, ExchangeStatusReport, MarketSummary,
};
use crate::core::validator::{DataValidator, ValidatorConfig};
use crate::error::{AppError, Result};

/// Quality reported for a summary when no contributing exchange is tracked yet
const DEFAULT_DATA_QUALITY: f64 = 0.5;
/// Minimum ticker count before outliers are dropped against the median
const MIN_TICKERS_FOR_DEVIATION: usize = 3;

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl ServiceState {
    fn to_u8(self) -> u8 {
        match self {
            ServiceState::Stopped => 0,
            ServiceState::Starting => 1,
            ServiceState::Running => 2,
            ServiceState::Stopping => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ServiceState::Starting,
            2 => ServiceState::Running,
            3 => ServiceState::Stopping,
            _ => ServiceState::Stopped,
        }
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceState::Stopped => write!(f, "stopped"),
            ServiceState::Starting => write!(f, "starting"),
            ServiceState::Running => write!(f, "running"),
            ServiceState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Background tasks of one `start()`..`stop()` run
struct Runtime {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Everything the background tasks share with the query side
struct ServiceInner {
    config: AggregationConfig,
    /// Sorted by exchange name
    clients: Vec<Arc<dyn ExchangeClient>>,
    store: MarketStore,
    validator: DataValidator,
    detector: ArbitrageDetector,
    sinks: Sinks,
    ingest_dropped: Arc<AtomicU64>,
}

pub struct AggregationService {
    inner: Arc<ServiceInner>,
    state: AtomicU8,
    runtime: Mutex<Option<Runtime>>,
}

impl AggregationService {
    /// Build a stopped service over `clients`
    ///
    /// Fails on invalid aggregation settings or duplicate exchange names.
    pub fn new(
        config: AggregationConfig,
        validation: ValidatorConfig,
        mut clients: Vec<Arc<dyn ExchangeClient>>,
        sinks: Sinks,
    ) -> Result<Self> {
        config.validate()?;
        validation.validate()?;

        let mut names = HashSet::new();
        for client in &clients {
            if !names.insert(client.exchange_name().to_string()) {
                return Err(AppError::Config(format!(
                    "Duplicate exchange client '{}'",
                    client.exchange_name()
                )));
            }
        }
        clients.sort_by(|a, b| a.exchange_name().cmp(b.exchange_name()));

        let detector = ArbitrageDetector::new(config.arbitrage_threshold, config.fee_rate);
        Ok(Self {
            inner: Arc::new(ServiceInner {
                config,
                clients,
                store: MarketStore::new(),
                validator: DataValidator::new(validation),
                detector,
                sinks,
                ingest_dropped: Arc::new(AtomicU64::new(0)),
            }),
            state: AtomicU8::new(ServiceState::Stopped.to_u8()),
            runtime: Mutex::new(None),
        })
    }

    pub fn state(&self) -> ServiceState {
        ServiceState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.inner.config
    }

    pub fn detector(&self) -> &ArbitrageDetector {
        &self.inner.detector
    }

    /// Configured exchange names, sorted
    pub fn exchanges(&self) -> Vec<String> {
        self.inner
            .clients
            .iter()
            .map(|c| c.exchange_name().to_string())
            .collect()
    }

    /// Pushed tickers dropped because the ingest queue was full
    pub fn ingest_dropped(&self) -> u64 {
        self.inner.ingest_dropped.load(Ordering::Relaxed)
    }

    /// Number of (symbol, exchange) ticker slots currently filled
    pub async fn ticker_count(&self) -> usize {
        self.inner.store.ticker_count().await
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Connect every client and launch the background loops
    ///
    /// Individual connect failures are logged; that client simply yields no
    /// data until it recovers. Starting a service that is not stopped fails
    /// with `AlreadyRunning`.
    pub async fn start(&self) -> Result<()> {
        self.transition(ServiceState::Stopped, ServiceState::Starting)
            .map_err(|_| AppError::AlreadyRunning)?;

        info!(
            exchanges = self.inner.clients.len(),
            symbols = self.inner.config.symbols.len(),
            "Aggregation service starting"
        );

        let connects = self.inner.clients.iter().map(|client| async move {
            match client.connect().await {
                Ok(()) => info!(exchange = %client.exchange_name(), "Exchange connected"),
                Err(e) => warn!(
                    exchange = %client.exchange_name(),
                    error = %e,
                    "Exchange connect failed; continuing without it"
                ),
            }
        });
        join_all(connects).await;

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        if self.inner.config.enable_streaming {
            let rx = self.subscribe_streams().await;
            tasks.push(tokio::spawn(ingest_loop(
                Arc::clone(&self.inner),
                rx,
                cancel.clone(),
            )));
        }

        tasks.push(tokio::spawn(collection_loop(
            Arc::clone(&self.inner),
            cancel.clone(),
        )));

        if self.inner.config.enable_arbitrage {
            tasks.push(tokio::spawn(arbitrage_loop(
                Arc::clone(&self.inner),
                cancel.clone(),
            )));
        }

        *self.lock_runtime() = Some(Runtime { cancel, tasks });
        self.state
            .store(ServiceState::Running.to_u8(), Ordering::SeqCst);
        info!("Aggregation service running");
        Ok(())
    }

    /// Cancel the loops, wait for in-flight work, disconnect every client
    /// and clear the shared state
    ///
    /// Stopping a service that is not running fails with `NotRunning` and
    /// changes nothing.
    pub async fn stop(&self) -> Result<()> {
        self.transition(ServiceState::Running, ServiceState::Stopping)
            .map_err(|_| AppError::NotRunning)?;

        info!("Aggregation service stopping");

        let runtime = self.lock_runtime().take();
        if let Some(runtime) = runtime {
            runtime.cancel.cancel();
            for task in runtime.tasks {
                if let Err(e) = task.await {
                    warn!(error = %e, "Background task ended abnormally");
                }
            }
        }

        for client in &self.inner.clients {
            if let Err(e) = client.disconnect().await {
                warn!(exchange = %client.exchange_name(), error = %e, "Disconnect failed");
            }
        }

        self.inner.store.clear().await;
        self.state
            .store(ServiceState::Stopped.to_u8(), Ordering::SeqCst);
        info!("Aggregation service stopped");
        Ok(())
    }

    fn transition(
        &self,
        from: ServiceState,
        to: ServiceState,
    ) -> std::result::Result<(), ServiceState> {
        self.state
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(ServiceState::from_u8)
    }

    fn lock_runtime(&self) -> std::sync::MutexGuard<'_, Option<Runtime>> {
        self.runtime.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Subscribe every client to ticker pushes for every symbol
    ///
    /// Callbacks never block: a full ingest queue drops the ticker.
    async fn subscribe_streams(&self) -> mpsc::Receiver<Ticker> {
        let (tx, rx) = mpsc::channel(ingest_queue_capacity().max(1));

        for client in &self.inner.clients {
            let exchange: Arc<str> = Arc::from(client.exchange_name());
            for symbol in &self.inner.config.symbols {
                let tx = tx.clone();
                let dropped = Arc::clone(&self.inner.ingest_dropped);
                let exchange_key = Arc::clone(&exchange);
                let symbol_key: Arc<str> = Arc::from(symbol.as_str());
                let callback: TickerCallback = Arc::new(move |mut ticker: Ticker| {
                    ticker.exchange = Arc::clone(&exchange_key);
                    ticker.symbol = Arc::clone(&symbol_key);
                    if tx.try_send(ticker).is_err() {
                        dropped.fetch_add(1, Ordering::Relaxed);
                        trace!(exchange = %exchange_key, "Ingest queue full, pushed ticker dropped");
                    }
                });

                if let Err(e) = client.subscribe_ticker(symbol, callback).await {
                    warn!(exchange = %exchange, symbol = %symbol, error = %e, "Ticker subscription failed");
                }
            }
        }
        rx
    }

    // =========================================================================
    // Collection
    // =========================================================================

    /// Run one collection tick now
    pub async fn refresh(&self) {
        self.inner.collect_once().await;
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Consolidated view of `symbol` across every usable exchange
    pub async fn get_aggregated_ticker(&self, symbol: &str) -> Result<MarketSummary> {
        let snapshot = self.inner.store.snapshot(symbol).await;
        if snapshot.tickers.is_empty() {
            return Err(AppError::NoData {
                symbol: symbol.to_string(),
            });
        }

        let now = current_time_ms();
        let tickers = self.inner.usable_tickers(&snapshot, now);
        if tickers.is_empty() {
            return Err(AppError::NoValidData {
                symbol: symbol.to_string(),
            });
        }

        let (best_bid, best_ask) = aggregator::best_bid_ask(&tickers);
        let (spread, spread_percent) = match (&best_bid, &best_ask) {
            (Some(bid), Some(ask)) => aggregator::spread(bid.price, ask.price),
            _ => (0.0, 0.0),
        };
        let arbitrage = if self.inner.config.enable_arbitrage {
            self.inner.detector.best(&tickers)
        } else {
            None
        };
        let data_quality = mean_quality(&snapshot, now);

        Ok(MarketSummary {
            symbol: symbol.to_string(),
            weighted_price: aggregator::weighted_price(&tickers),
            median_price: aggregator::median_price(&tickers),
            total_volume_24h: aggregator::total_volume(&tickers),
            volume_weights: aggregator::volume_weights(&tickers),
            best_bid,
            best_ask,
            spread,
            spread_percent,
            exchange_prices: snapshot
                .tickers
                .into_iter()
                .map(|t| (t.exchange.to_string(), t))
                .collect(),
            arbitrage,
            data_quality,
            timestamp_ms: now,
        })
    }

    /// Best bid and ask across exchanges (same view as the aggregated ticker)
    pub async fn get_best_prices(&self, symbol: &str) -> Result<MarketSummary> {
        self.get_aggregated_ticker(symbol).await
    }

    /// Opportunities across `symbols`, best profit first
    ///
    /// Symbols with fewer than two usable tickers contribute nothing.
    pub async fn find_arbitrage_opportunities(&self, symbols: &[String]) -> Vec<ArbitrageOpportunity> {
        self.inner.find_opportunities(symbols).await
    }

    /// Best opportunity for one symbol
    pub async fn get_arbitrage_opportunity(&self, symbol: &str) -> Result<ArbitrageOpportunity> {
        self.find_arbitrage_opportunities(&[symbol.to_string()])
            .await
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NoOpportunity {
                symbol: symbol.to_string(),
            })
    }

    pub async fn get_data_quality(&self, exchange: &str, symbol: &str) -> Result<DataQualityMetrics> {
        self.inner
            .store
            .quality(exchange, symbol)
            .await
            .ok_or_else(|| AppError::NoQualityMetrics {
                exchange: exchange.to_string(),
                symbol: symbol.to_string(),
            })
    }

    /// Connection status and last error of every configured client
    pub fn get_exchange_status(&self) -> BTreeMap<String, ExchangeStatusReport> {
        self.inner
            .clients
            .iter()
            .map(|c| {
                (
                    c.exchange_name().to_string(),
                    ExchangeStatusReport {
                        status: c.status(),
                        last_error: c.last_error(),
                    },
                )
            })
            .collect()
    }

    /// Fetch books from every exchange now and merge them
    ///
    /// Books are fetched concurrently with the request timeout, validated
    /// when validation is enabled, and recorded per exchange before merging.
    pub async fn get_aggregated_order_book(&self, symbol: &str, depth: usize) -> Result<OrderBook> {
        let fetches = self.inner.clients.iter().map(|client| {
            let inner = &self.inner;
            async move {
                let result = inner
                    .timed(client.exchange_name(), "get_order_book", client.get_order_book(symbol, depth))
                    .await;
                (client, result)
            }
        });

        let mut books = Vec::new();
        for (client, result) in join_all(fetches).await {
            let mut book = match result {
                Ok(book) => book,
                Err(e) => {
                    warn!(exchange = %client.exchange_name(), symbol = %symbol, error = %e, "Order book fetch failed");
                    continue;
                }
            };
            book.exchange = Arc::from(client.exchange_name());
            book.symbol = Arc::from(symbol);

            if self.inner.config.enable_validation {
                if let Err(e) = self.inner.validator.validate_order_book(&book) {
                    debug!(exchange = %client.exchange_name(), symbol = %symbol, error = %e, "Order book rejected");
                    continue;
                }
            }
            self.inner.store.put_order_book(book.clone()).await;
            books.push(book);
        }

        if books.is_empty() {
            return Err(AppError::NoData {
                symbol: symbol.to_string(),
            });
        }
        Ok(aggregator::merge_order_books(symbol, &books, depth))
    }

    /// Book most recently fetched from `exchange` by `get_aggregated_order_book`
    pub async fn latest_order_book(&self, exchange: &str, symbol: &str) -> Option<OrderBook> {
        self.inner.store.order_book(exchange, symbol).await
    }

    /// Klines from the first exchange (by name) that answers
    pub async fn get_historical_data(
        &self,
        symbol: &str,
        interval: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Kline>> {
        for client in &self.inner.clients {
            let result = self
                .inner
                .timed(
                    client.exchange_name(),
                    "get_klines",
                    client.get_klines(symbol, interval, Some(start), Some(end), None),
                )
                .await;
            match result {
                Ok(klines) => return Ok(klines),
                Err(e) => {
                    debug!(exchange = %client.exchange_name(), symbol = %symbol, error = %e, "Kline fetch failed, trying next exchange");
                }
            }
        }
        Err(AppError::NoData {
            symbol: symbol.to_string(),
        })
    }

    /// Sum of the stored 24h base volumes for `symbol`
    pub async fn get_aggregated_volume(&self, symbol: &str) -> Result<f64> {
        let tickers = self.inner.store.tickers(symbol).await;
        if tickers.is_empty() {
            return Err(AppError::NoData {
                symbol: symbol.to_string(),
            });
        }
        Ok(aggregator::total_volume(&tickers))
    }
}

// =============================================================================
// Shared internals
// =============================================================================

impl ServiceInner {
    /// Bound `fut` by the request timeout and record metrics for it
    async fn timed<T>(
        &self,
        exchange: &str,
        operation: &str,
        fut: impl std::future::Future<Output = ExchangeResult<T>>,
    ) -> ExchangeResult<T> {
        let started = Instant::now();
        let result = match timeout(self.config.request_timeout(), fut).await {
            Ok(result) => result,
            Err(_) => Err(ExchangeError::NetworkTimeout(self.config.request_timeout_ms)),
        };

        if let Some(metrics) = &self.sinks.metrics {
            match &result {
                Ok(_) => {
                    metrics.record_success(exchange, operation);
                    metrics.record_latency(exchange, operation, started.elapsed());
                }
                Err(e) => metrics.record_error(exchange, operation, e),
            }
        }
        result
    }

    /// One tick: every (symbol, exchange) pair fetched concurrently
    async fn collect_once(self: &Arc<Self>) {
        let started = Instant::now();
        let mut workers = JoinSet::new();

        for symbol in &self.config.symbols {
            for client in &self.clients {
                let inner = Arc::clone(self);
                let client = Arc::clone(client);
                let symbol = symbol.clone();
                workers.spawn(async move { inner.fetch_ticker(client, symbol).await });
            }
        }

        let (mut ok, mut failed) = (0usize, 0usize);
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(true) => ok += 1,
                Ok(false) => failed += 1,
                Err(e) => {
                    failed += 1;
                    warn!(error = %e, "Collection worker panicked");
                }
            }
        }

        debug!(
            ok,
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Collection tick complete"
        );
    }

    /// Fetch, score and store one ticker; returns whether it succeeded
    async fn fetch_ticker(&self, client: Arc<dyn ExchangeClient>, symbol: String) -> bool {
        let exchange: Arc<str> = Arc::from(client.exchange_name());
        let started = Instant::now();
        let result = self
            .timed(&exchange, "get_ticker", client.get_ticker(&symbol))
            .await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        let now = current_time_ms();

        match result {
            Ok(mut ticker) => {
                self.store
                    .record_attempt(&exchange, &symbol, Attempt::Success { latency_ms }, now)
                    .await;
                ticker.exchange = Arc::clone(&exchange);
                ticker.symbol = Arc::from(symbol.as_str());
                self.accept_ticker(ticker).await;
                true
            }
            Err(e) => {
                warn!(
                    exchange = %exchange,
                    symbol = %symbol,
                    kind = %e.kind(),
                    error = %e,
                    "Ticker fetch failed"
                );
                self.store
                    .record_attempt(&exchange, &symbol, Attempt::Failure { latency_ms }, now)
                    .await;
                false
            }
        }
    }

    /// Store a ticker and hand it to the cache and event sinks
    async fn accept_ticker(&self, ticker: Ticker) {
        if let Some(cache) = &self.sinks.cache {
            cache.put_ticker(&ticker, self.config.cache_ttl());
        }
        if let Some(events) = &self.sinks.events {
            events.publish_ticker(&ticker).await;
        }
        self.store.put_ticker(ticker).await;
    }

    /// Tickers that pass validation, quality and deviation filters
    fn usable_tickers(&self, snapshot: &SymbolSnapshot, now_ms: u64) -> Vec<Ticker> {
        if !self.config.enable_validation {
            return snapshot.tickers.clone();
        }

        let mut tickers: Vec<Ticker> = snapshot
            .tickers
            .iter()
            .filter(|t| match self.validator.validate_ticker_at(t, now_ms) {
                Ok(()) => true,
                Err(e) => {
                    debug!(exchange = %t.exchange, symbol = %t.symbol, error = %e, "Ticker rejected");
                    false
                }
            })
            .filter(|t| {
                snapshot
                    .quality
                    .get(&*t.exchange)
                    .map_or(true, |q| q.current_score(now_ms) >= self.config.data_quality_threshold)
            })
            .cloned()
            .collect();

        if tickers.len() >= MIN_TICKERS_FOR_DEVIATION {
            let median = aggregator::median_price(&tickers);
            let max_deviation = self.config.max_price_deviation;
            tickers.retain(|t| {
                let deviation = (t.last_price - median).abs() / median * 100.0;
                let keep = deviation <= max_deviation;
                if !keep {
                    debug!(exchange = %t.exchange, symbol = %t.symbol, deviation, "Ticker deviates from median");
                }
                keep
            });
        }
        tickers
    }

    async fn find_opportunities(&self, symbols: &[String]) -> Vec<ArbitrageOpportunity> {
        let now = current_time_ms();
        let mut all = Vec::new();
        for symbol in symbols {
            let snapshot = self.store.snapshot(symbol).await;
            if snapshot.tickers.len() < 2 {
                continue;
            }
            let tickers = self.usable_tickers(&snapshot, now);
            all.extend(self.detector.detect(&tickers));
        }
        all.sort_by(|a, b| b.profit_percent.total_cmp(&a.profit_percent));
        all
    }
}

/// Mean current quality of every exchange with a stored ticker
fn mean_quality(snapshot: &SymbolSnapshot, now_ms: u64) -> f64 {
    let scores: Vec<f64> = snapshot
        .tickers
        .iter()
        .filter_map(|t| snapshot.quality.get(&*t.exchange))
        .map(|q| q.current_score(now_ms))
        .collect();
    if scores.is_empty() {
        DEFAULT_DATA_QUALITY
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}

// =============================================================================
// Background loops
// =============================================================================

async fn collection_loop(inner: Arc<ServiceInner>, cancel: CancellationToken) {
    let mut ticks = interval(inner.config.update_interval());
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticks.tick() => inner.collect_once().await,
        }
    }
    debug!("Collection loop stopped");
}

async fn arbitrage_loop(inner: Arc<ServiceInner>, cancel: CancellationToken) {
    let mut ticks = interval(inner.config.arbitrage_interval());
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticks.tick() => {
                let opportunities = inner.find_opportunities(&inner.config.symbols).await;
                for opp in &opportunities {
                    info!(
                        symbol = %opp.symbol,
                        buy = %opp.buy_exchange,
                        sell = %opp.sell_exchange,
                        profit_percent = opp.profit_percent,
                        confidence = opp.confidence,
                        "Arbitrage opportunity detected"
                    );
                    if let Some(events) = &inner.sinks.events {
                        events.publish_arbitrage(opp).await;
                    }
                    if let Some(metrics) = &inner.sinks.metrics {
                        metrics.record_arbitrage_opportunity(opp);
                    }
                }
            }
        }
    }
    debug!("Arbitrage loop stopped");
}

async fn ingest_loop(inner: Arc<ServiceInner>, mut rx: mpsc::Receiver<Ticker>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            pushed = rx.recv() => {
                let Some(ticker) = pushed else { break };
                let exchange = Arc::clone(&ticker.exchange);
                let symbol = ticker.symbol.to_string();
                inner
                    .store
                    .record_attempt(&exchange, &symbol, Attempt::Success { latency_ms: 0.0 }, current_time_ms())
                    .await;
                inner.accept_ticker(ticker).await;
            }
        }
    }
    debug!("Ingest loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_utils::{ticker, TestMockClient};
    use crate::core::sinks::{BroadcastPublisher, CacheManager, InMemoryMetrics, MemoryCache};
    use crate::core::types::MarketEvent;
    use std::time::Duration;

    fn config(symbols: &[&str]) -> AggregationConfig {
        let mut config =
            AggregationConfig::with_symbols(symbols.iter().map(|s| s.to_string()).collect());
        config.update_interval_ms = 50;
        config.request_timeout_ms = 200;
        config
    }

    fn service_with(config: AggregationConfig, clients: Vec<Arc<TestMockClient>>) -> AggregationService {
        let clients: Vec<Arc<dyn ExchangeClient>> = clients
            .into_iter()
            .map(|c| c as Arc<dyn ExchangeClient>)
            .collect();
        AggregationService::new(config, ValidatorConfig::default(), clients, Sinks::default()).unwrap()
    }

    #[tokio::test]
    async fn test_lifecycle_state_errors() {
        let mock = Arc::new(TestMockClient::new("a").with_ticker("BTCUSDT", 100.0, 101.0, 1.0));
        let service = service_with(config(&["BTCUSDT"]), vec![Arc::clone(&mock)]);

        assert_eq!(service.state(), ServiceState::Stopped);
        assert!(matches!(service.stop().await, Err(AppError::NotRunning)));
        assert_eq!(mock.disconnect_calls.load(Ordering::SeqCst), 0);

        service.start().await.unwrap();
        assert_eq!(service.state(), ServiceState::Running);
        assert!(matches!(service.start().await, Err(AppError::AlreadyRunning)));
        assert_eq!(service.state(), ServiceState::Running);

        service.stop().await.unwrap();
        assert_eq!(service.state(), ServiceState::Stopped);
        assert_eq!(mock.disconnect_calls.load(Ordering::SeqCst), 1);
        assert_eq!(service.ticker_count().await, 0);

        // restartable
        service.start().await.unwrap();
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_client_names_rejected() {
        let clients: Vec<Arc<dyn ExchangeClient>> = vec![
            Arc::new(TestMockClient::new("a")),
            Arc::new(TestMockClient::new("a")),
        ];
        let result = AggregationService::new(
            config(&["BTCUSDT"]),
            ValidatorConfig::default(),
            clients,
            Sinks::default(),
        );
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn test_refresh_isolates_failing_exchange() {
        let good = Arc::new(TestMockClient::new("good").with_ticker("BTCUSDT", 100.0, 101.0, 2.0));
        let bad = Arc::new(TestMockClient::failing("bad"));
        let service = service_with(config(&["BTCUSDT"]), vec![good, bad]);

        service.refresh().await;

        let summary = service.get_aggregated_ticker("BTCUSDT").await.unwrap();
        assert_eq!(summary.exchange_prices.len(), 1);
        assert!(summary.exchange_prices.contains_key("good"));
        assert_eq!(summary.best_bid.unwrap().price, 100.0);

        let bad_quality = service.get_data_quality("bad", "BTCUSDT").await.unwrap();
        assert!(bad_quality.availability < 1.0);
        assert!(bad_quality.error_rate > 0.0);
        let good_quality = service.get_data_quality("good", "BTCUSDT").await.unwrap();
        assert_eq!(good_quality.availability, 1.0);
    }

    #[tokio::test]
    async fn test_slow_exchange_times_out_without_blocking() {
        let fast = Arc::new(TestMockClient::new("fast").with_ticker("BTCUSDT", 100.0, 101.0, 1.0));
        let slow = Arc::new(
            TestMockClient::new("slow")
                .with_ticker("BTCUSDT", 100.0, 101.0, 1.0)
                .with_delay(Duration::from_secs(5)),
        );
        let service = service_with(config(&["BTCUSDT"]), vec![fast, slow]);

        let started = Instant::now();
        service.refresh().await;
        assert!(started.elapsed() < Duration::from_secs(2));

        let summary = service.get_aggregated_ticker("BTCUSDT").await.unwrap();
        assert_eq!(summary.exchange_prices.len(), 1);
        assert!(service.get_data_quality("slow", "BTCUSDT").await.unwrap().error_rate > 0.0);
    }

    #[tokio::test]
    async fn test_no_data_and_no_valid_data() {
        let mock = Arc::new(TestMockClient::new("a"));
        let service = service_with(config(&["BTCUSDT"]), vec![Arc::clone(&mock)]);

        assert!(matches!(
            service.get_aggregated_ticker("BTCUSDT").await,
            Err(AppError::NoData { .. })
        ));

        let mut crossed = ticker("a", "BTCUSDT", 100.0, 101.0, 1.0);
        crossed.ask_price = 99.0;
        mock.set_ticker(crossed);
        service.refresh().await;

        let err = service.get_aggregated_ticker("BTCUSDT").await.unwrap_err();
        assert!(matches!(err, AppError::NoValidData { .. }));
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_validation_disabled_keeps_invalid_tickers() {
        let mock = Arc::new(TestMockClient::new("a"));
        let mut crossed = ticker("a", "BTCUSDT", 100.0, 101.0, 1.0);
        crossed.ask_price = 99.0;
        mock.set_ticker(crossed);

        let mut cfg = config(&["BTCUSDT"]);
        cfg.enable_validation = false;
        let service = service_with(cfg, vec![mock]);
        service.refresh().await;
        assert!(service.get_aggregated_ticker("BTCUSDT").await.is_ok());
    }

    #[tokio::test]
    async fn test_outlier_dropped_against_median() {
        let clients = vec![
            Arc::new(TestMockClient::new("a").with_ticker("BTCUSDT", 100.0, 101.0, 1.0)),
            Arc::new(TestMockClient::new("b").with_ticker("BTCUSDT", 100.2, 101.2, 1.0)),
            Arc::new(TestMockClient::new("c").with_ticker("BTCUSDT", 130.0, 131.0, 1.0)),
        ];
        let service = service_with(config(&["BTCUSDT"]), clients);
        service.refresh().await;

        let summary = service.get_aggregated_ticker("BTCUSDT").await.unwrap();
        let contributing: Vec<&String> = summary.volume_weights.keys().collect();
        assert_eq!(contributing, vec!["a", "b"]);
        assert_eq!(summary.total_volume_24h, 2.0);
        // raw tickers still listed
        assert_eq!(summary.exchange_prices.len(), 3);
        assert!(summary.arbitrage.is_none());
        assert!(summary.data_quality > 0.9);
    }

    #[tokio::test]
    async fn test_rejected_tickers_stay_in_exchange_prices() {
        let a = Arc::new(TestMockClient::new("a").with_ticker("BTCUSDT", 100.0, 101.0, 1.0));
        let b = Arc::new(TestMockClient::new("b"));
        let mut crossed = ticker("b", "BTCUSDT", 100.0, 101.0, 4.0);
        crossed.ask_price = 99.0;
        b.set_ticker(crossed);
        let service = service_with(config(&["BTCUSDT"]), vec![a, b]);
        service.refresh().await;

        let summary = service.get_aggregated_ticker("BTCUSDT").await.unwrap();
        let listed: Vec<&String> = summary.exchange_prices.keys().collect();
        assert_eq!(listed, vec!["a", "b"]);
        assert_eq!(summary.exchange_prices["b"].ask_price, 99.0);

        // aggregates only use the valid ticker
        assert_eq!(summary.total_volume_24h, 1.0);
        assert_eq!(&*summary.best_ask.as_ref().unwrap().exchange, "a");
        assert!(!summary.volume_weights.contains_key("b"));
    }

    #[tokio::test]
    async fn test_summary_quality_covers_rejected_exchanges() {
        let good = Arc::new(TestMockClient::new("good").with_ticker("BTCUSDT", 100.0, 101.0, 1.0));
        let flaky = Arc::new(TestMockClient::new("flaky").with_ticker("BTCUSDT", 100.0, 101.0, 1.0));
        let service = service_with(config(&["BTCUSDT"]), vec![good, Arc::clone(&flaky)]);
        service.refresh().await;

        // flaky keeps its stored ticker but starts failing
        flaky.set_failing(true);
        for _ in 0..3 {
            service.refresh().await;
        }

        let summary = service.get_aggregated_ticker("BTCUSDT").await.unwrap();
        let good_score = service.get_data_quality("good", "BTCUSDT").await.unwrap().quality_score;
        let flaky_score = service.get_data_quality("flaky", "BTCUSDT").await.unwrap().quality_score;
        assert!(flaky_score < good_score);
        assert!(summary.data_quality < good_score);
        assert!(summary.data_quality > flaky_score);
    }

    #[tokio::test]
    async fn test_summary_aggregates_and_detects_arbitrage() {
        let clients = vec![
            Arc::new(TestMockClient::new("a").with_ticker("BTCUSDT", 99.0, 100.0, 1.0)),
            Arc::new(TestMockClient::new("b").with_ticker("BTCUSDT", 101.0, 102.0, 3.0)),
        ];
        let service = service_with(config(&["BTCUSDT"]), clients);
        service.refresh().await;

        let summary = service.get_aggregated_ticker("BTCUSDT").await.unwrap();
        assert_eq!(&*summary.best_bid.as_ref().unwrap().exchange, "b");
        assert_eq!(&*summary.best_ask.as_ref().unwrap().exchange, "a");
        assert_eq!(summary.total_volume_24h, 4.0);
        assert_eq!(summary.volume_weights["b"], 0.75);
        // (99.5 * 1 + 101.5 * 3) / 4
        assert!((summary.weighted_price - 101.0).abs() < 1e-9);
        // best bid 101 > best ask 100
        assert!(summary.spread < 0.0);

        let arb = summary.arbitrage.unwrap();
        assert_eq!(&*arb.buy_exchange, "a");
        assert_eq!(&*arb.sell_exchange, "b");

        let best = service.get_arbitrage_opportunity("BTCUSDT").await.unwrap();
        assert!((best.profit_percent - 1.0).abs() < 1e-9);
        assert!(matches!(
            service.get_arbitrage_opportunity("ETHUSDT").await,
            Err(AppError::NoOpportunity { .. })
        ));
    }

    #[tokio::test]
    async fn test_aggregated_order_book_merges_and_records() {
        let clients = vec![
            Arc::new(TestMockClient::new("x").with_order_book("BTCUSDT", &[(100.0, 1.0)], &[(102.0, 1.0)])),
            Arc::new(TestMockClient::new("y").with_order_book("BTCUSDT", &[(101.0, 2.0)], &[(103.0, 1.0)])),
            Arc::new(TestMockClient::failing("z")),
        ];
        let service = service_with(config(&["BTCUSDT"]), clients);

        let book = service.get_aggregated_order_book("BTCUSDT", 2).await.unwrap();
        let bids: Vec<f64> = book.bids.iter().map(|l| l.price).collect();
        let asks: Vec<f64> = book.asks.iter().map(|l| l.price).collect();
        assert_eq!(bids, vec![101.0, 100.0]);
        assert_eq!(asks, vec![102.0, 103.0]);

        let recorded = service.latest_order_book("y", "BTCUSDT").await.unwrap();
        assert_eq!(recorded.best_bid(), Some(101.0));
        assert!(service.latest_order_book("z", "BTCUSDT").await.is_none());

        assert!(matches!(
            service.get_aggregated_order_book("ETHUSDT", 5).await,
            Err(AppError::NoData { .. })
        ));
    }

    #[tokio::test]
    async fn test_aggregated_order_book_zero_depth_merges_everything() {
        let clients = vec![
            Arc::new(TestMockClient::new("x").with_order_book(
                "BTCUSDT",
                &[(100.0, 1.0), (99.0, 1.0), (98.0, 1.0)],
                &[(102.0, 1.0)],
            )),
            Arc::new(TestMockClient::new("y").with_order_book("BTCUSDT", &[(101.0, 2.0)], &[(103.0, 1.0)])),
        ];
        let service = service_with(config(&["BTCUSDT"]), clients);

        let book = service.get_aggregated_order_book("BTCUSDT", 0).await.unwrap();
        assert_eq!(book.bids.len(), 4);
        assert_eq!(book.asks.len(), 2);
        assert_eq!(book.best_bid(), Some(101.0));
    }

    #[tokio::test]
    async fn test_crossed_book_rejected_when_validating() {
        let clients = vec![
            Arc::new(TestMockClient::new("x").with_order_book("BTCUSDT", &[(105.0, 1.0)], &[(102.0, 1.0)])),
            Arc::new(TestMockClient::new("y").with_order_book("BTCUSDT", &[(101.0, 2.0)], &[(103.0, 1.0)])),
        ];
        let service = service_with(config(&["BTCUSDT"]), clients);
        let book = service.get_aggregated_order_book("BTCUSDT", 10).await.unwrap();
        assert_eq!(book.bids.len(), 1);
        assert_eq!(book.bids[0].price, 101.0);
    }

    #[tokio::test]
    async fn test_exchange_status_and_volume() {
        let a = Arc::new(TestMockClient::new("a").with_ticker("BTCUSDT", 100.0, 101.0, 2.0));
        let b = Arc::new(TestMockClient::new("b").with_ticker("BTCUSDT", 100.0, 101.0, 3.0));
        b.fail_connect.store(true, Ordering::SeqCst);
        let service = service_with(config(&["BTCUSDT"]), vec![a, b]);

        service.start().await.unwrap();
        let status = service.get_exchange_status();
        assert_eq!(status["a"].status, crate::adapters::ConnectionStatus::Connected);
        assert_eq!(status["b"].status, crate::adapters::ConnectionStatus::Failed);

        service.refresh().await;
        assert_eq!(service.get_aggregated_volume("BTCUSDT").await.unwrap(), 5.0);
        assert!(service.get_aggregated_volume("ETHUSDT").await.is_err());
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_historical_data_first_answering_exchange() {
        let kline = crate::adapters::Kline {
            exchange: "b".into(),
            symbol: "BTCUSDT".into(),
            interval: "1m".into(),
            open_time_ms: 0,
            close_time_ms: 59_999,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 10.0,
            quote_volume: 15.0,
            trade_count: 3,
            taker_buy_base_volume: 5.0,
            taker_buy_quote_volume: 7.5,
            is_closed: true,
        };
        let clients = vec![
            Arc::new(TestMockClient::failing("a")),
            Arc::new(TestMockClient::new("b").with_klines(vec![kline])),
        ];
        let service = service_with(config(&["BTCUSDT"]), clients);

        let end = Utc::now();
        let start = end - chrono::Duration::hours(1);
        let klines = service
            .get_historical_data("BTCUSDT", "1m", start, end)
            .await
            .unwrap();
        assert_eq!(klines.len(), 1);
        assert_eq!(&*klines[0].exchange, "b");
    }

    #[tokio::test]
    async fn test_sinks_receive_tickers() {
        let publisher = Arc::new(BroadcastPublisher::new(16));
        let mut events = publisher.subscribe();
        let metrics = Arc::new(InMemoryMetrics::new());
        let cache = Arc::new(MemoryCache::new());
        let sinks = Sinks::default()
            .with_events(publisher.clone())
            .with_metrics(metrics.clone())
            .with_cache(cache.clone());

        let clients: Vec<Arc<dyn ExchangeClient>> = vec![
            Arc::new(TestMockClient::new("a").with_ticker("BTCUSDT", 100.0, 101.0, 1.0)),
            Arc::new(TestMockClient::failing("b")),
        ];
        let service =
            AggregationService::new(config(&["BTCUSDT"]), ValidatorConfig::default(), clients, sinks)
                .unwrap();
        service.refresh().await;

        assert!(matches!(events.try_recv().unwrap(), MarketEvent::Ticker(_)));
        assert!(cache.get_ticker("a", "BTCUSDT").is_some());
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.operation("a", "get_ticker").unwrap().successes, 1);
        assert_eq!(snapshot.operation("b", "get_ticker").unwrap().errors, 1);
    }

    #[tokio::test]
    async fn test_arbitrage_loop_publishes_opportunities() {
        let publisher = Arc::new(BroadcastPublisher::new(64));
        let mut events = publisher.subscribe();
        let clients: Vec<Arc<dyn ExchangeClient>> = vec![
            Arc::new(TestMockClient::new("a").with_ticker("BTCUSDT", 99.0, 100.0, 1.0)),
            Arc::new(TestMockClient::new("b").with_ticker("BTCUSDT", 101.0, 102.0, 1.0)),
        ];
        let service = AggregationService::new(
            config(&["BTCUSDT"]),
            ValidatorConfig::default(),
            clients,
            Sinks::default().with_events(publisher.clone()),
        )
        .unwrap();

        service.start().await.unwrap();
        let found = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(MarketEvent::Arbitrage(opp)) = events.recv().await {
                    return opp;
                }
            }
        })
        .await
        .unwrap();
        service.stop().await.unwrap();

        assert_eq!(&*found.buy_exchange, "a");
    }

    #[tokio::test]
    async fn test_streaming_ingest_stores_pushed_tickers() {
        let mock = Arc::new(TestMockClient::new("a"));
        let mut cfg = config(&["BTCUSDT"]);
        cfg.enable_streaming = true;
        cfg.update_interval_ms = 60_000;
        let service = service_with(cfg, vec![Arc::clone(&mock)]);

        service.start().await.unwrap();
        assert_eq!(mock.ticker_subscriptions(), 1);

        // pushed ticker carries a foreign exchange name; the service re-keys it
        assert_eq!(mock.push_ticker(ticker("other", "BTCUSDT", 200.0, 201.0, 1.0)), 1);

        let stored = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(summary) = service.get_aggregated_ticker("BTCUSDT").await {
                    return summary;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(stored.exchange_prices.contains_key("a"));
        assert_eq!(stored.best_bid.unwrap().price, 200.0);

        service.stop().await.unwrap();
        assert_eq!(mock.ticker_subscriptions(), 0);
    }
}
