//! Binance market-data client
//!
//! REST polling for tickers, depth, trades and candles, plus raw-stream
//! WebSocket subscriptions. Every subscription runs its own listener
//! task (see `adapters::shared::stream`); `unsubscribe_all` cancels them
//! through a shared parent token.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::adapters::shared::{
    connect_tls, reconnect_with_backoff, run_stream_listener, text_frames, StreamDispatcher,
    StreamState,
};
use crate::adapters::traits::ExchangeClient;
use crate::adapters::types::{
    create_http_client, current_time_ms, ConnectionStatus, Kline, OrderBook, Ticker, Trade,
    HTTP_TIMEOUT_SECS,
};
use crate::adapters::{KlineCallback, OrderBookCallback, TickerCallback, TradeCallback};

use super::config::BinanceConfig;
use super::types::{
    stream_symbol, ApiErrorBody, DepthSnapshot, RestKline, RestTicker24h, RestTrade, WsKlineEvent,
    WsTicker, WsTrade, ERR_INVALID_SYMBOL,
};

/// Depth limits accepted by `GET /api/v3/depth`
const REST_DEPTH_LIMITS: [usize; 8] = [5, 10, 20, 50, 100, 500, 1000, 5000];
/// Levels carried by the partial-depth stream
const STREAM_DEPTH_LEVELS: usize = 20;
/// Upper bound for `GET /api/v3/trades`
const MAX_TRADES_LIMIT: usize = 1000;

/// Binance public market-data client
pub struct BinanceClient {
    config: BinanceConfig,
    name: Arc<str>,
    http: reqwest::Client,
    status: AtomicU8,
    last_error: Mutex<Option<String>>,
    /// Parent token of every active stream listener
    streams: Mutex<CancellationToken>,
    /// (stream name, listener state) per subscription
    stream_states: Mutex<Vec<(String, watch::Receiver<StreamState>)>>,
}

impl BinanceClient {
    pub fn new(config: BinanceConfig) -> Self {
        let name: Arc<str> = Arc::from(config.name.as_str());
        let http = create_http_client(&config.name);
        Self {
            config,
            name,
            http,
            status: AtomicU8::new(ConnectionStatus::Disconnected.to_u8()),
            last_error: Mutex::new(None),
            streams: Mutex::new(CancellationToken::new()),
            stream_states: Mutex::new(Vec::new()),
        }
    }

    /// Current state of every stream subscribed since the last `unsubscribe_all`
    pub fn stream_states(&self) -> Vec<(String, StreamState)> {
        let states = self.stream_states.lock().unwrap_or_else(|e| e.into_inner());
        states
            .iter()
            .map(|(name, rx)| (name.clone(), *rx.borrow()))
            .collect()
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.store(status.to_u8(), Ordering::SeqCst);
    }

    fn set_last_error(&self, error: Option<String>) {
        let mut slot = self.last_error.lock().unwrap_or_else(|e| e.into_inner());
        *slot = error;
    }

    /// Remember the failure message before handing the result back
    fn track<T>(&self, result: ExchangeResult<T>) -> ExchangeResult<T> {
        if let Err(e) = &result {
            self.set_last_error(Some(e.to_string()));
        }
        result
    }

    // =========================================================================
    // REST
    // =========================================================================

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> ExchangeResult<T> {
        let url = format!("{}{}", self.config.rest_url, path);
        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(map_transport_error)?;

        if !status.is_success() {
            let err = map_status_error(status.as_u16(), &body);
            tracing::warn!(
                exchange = %self.name,
                path = %path,
                status = status.as_u16(),
                error = %err,
                "REST request rejected"
            );
            return Err(err);
        }

        serde_json::from_str(&body)
            .map_err(|e| ExchangeError::InvalidResponse(format!("{}: {}", path, e)))
    }

    // =========================================================================
    // Streams
    // =========================================================================

    fn stream_token(&self) -> CancellationToken {
        self.streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .child_token()
    }

    /// Spawn a listener for one raw stream, converting each payload `W` into `T`
    fn spawn_stream<W, T, F>(&self, stream: String, callback: Arc<dyn Fn(T) + Send + Sync>, convert: F)
    where
        W: DeserializeOwned + Send + 'static,
        T: Send + 'static,
        F: Fn(W) -> T + Send + Sync + 'static,
    {
        let url = self.config.stream_url(&stream);
        let label = format!("{}:{}", self.name, stream);
        let dispatcher = StreamDispatcher::spawn(&label, self.config.stream_queue_capacity, callback);
        let (state_tx, state_rx) = watch::channel(StreamState::Connecting);
        let cancel = self.stream_token();
        let convert = Arc::new(convert);

        self.stream_states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((stream.clone(), state_rx));

        let connect_label = label.clone();
        let connect = move || {
            let url = url.clone();
            let label = connect_label.clone();
            let convert = convert.clone();
            async move {
                let ws = connect_tls(&url).await?;
                let items = text_frames(ws, label.clone())
                    .filter_map(move |text| {
                        let item = match serde_json::from_str::<W>(&text) {
                            Ok(payload) => Some(convert(payload)),
                            Err(e) => {
                                tracing::debug!(stream = %label, error = %e, "Unparseable stream payload skipped");
                                None
                            }
                        };
                        futures_util::future::ready(item)
                    })
                    .boxed();
                Ok::<_, ExchangeError>(items)
            }
        };

        tokio::spawn(run_stream_listener(
            label,
            self.config.stream_retry.clone(),
            cancel,
            state_tx,
            dispatcher,
            connect,
        ));
    }
}

/// Smallest accepted REST depth limit covering `depth`
fn rest_depth_limit(depth: usize) -> usize {
    REST_DEPTH_LIMITS
        .iter()
        .copied()
        .find(|&limit| limit >= depth)
        .unwrap_or(REST_DEPTH_LIMITS[REST_DEPTH_LIMITS.len() - 1])
}

fn map_transport_error(e: reqwest::Error) -> ExchangeError {
    if e.is_timeout() {
        ExchangeError::NetworkTimeout(HTTP_TIMEOUT_SECS * 1000)
    } else if e.is_decode() {
        ExchangeError::InvalidResponse(e.to_string())
    } else {
        ExchangeError::ConnectionFailed(e.to_string())
    }
}

fn map_status_error(status: u16, body: &str) -> ExchangeError {
    let parsed = serde_json::from_str::<ApiErrorBody>(body).ok();
    let message = parsed
        .as_ref()
        .map(|b| b.msg.clone())
        .unwrap_or_else(|| body.chars().take(200).collect());

    match status {
        429 | 418 => ExchangeError::RateLimited(message),
        401 | 403 => ExchangeError::Authentication(message),
        400 if parsed.as_ref().map(|b| b.code) == Some(ERR_INVALID_SYMBOL) => {
            ExchangeError::BadSymbol(message)
        }
        _ => ExchangeError::Api { status, message },
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    fn exchange_name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> ExchangeResult<()> {
        self.set_status(ConnectionStatus::Connecting);

        let result = reconnect_with_backoff(self.config.connect_retry.clone(), &self.name, || {
            self.ping()
        })
        .await;

        match result {
            Ok(()) => {
                self.set_status(ConnectionStatus::Connected);
                self.set_last_error(None);
                tracing::info!(exchange = %self.name, url = %self.config.rest_url, "Connected");
                Ok(())
            }
            Err(e) => {
                self.set_status(ConnectionStatus::Failed);
                self.set_last_error(Some(e.to_string()));
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> ExchangeResult<()> {
        self.unsubscribe_all().await?;
        self.set_status(ConnectionStatus::Disconnected);
        tracing::info!(exchange = %self.name, "Disconnected");
        Ok(())
    }

    async fn ping(&self) -> ExchangeResult<()> {
        let result = self
            .get_json::<serde_json::Value>("/api/v3/ping", &[])
            .await
            .map(|_| ());
        self.track(result)
    }

    async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        let result = self
            .get_json::<RestTicker24h>("/api/v3/ticker/24hr", &[("symbol", symbol.to_uppercase())])
            .await
            .map(|raw| raw.into_ticker(&self.name));
        self.track(result)
    }

    async fn get_tickers(&self, symbols: &[String]) -> ExchangeResult<Vec<Ticker>> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        let upper: Vec<String> = symbols.iter().map(|s| s.to_uppercase()).collect();
        let param = serde_json::to_string(&upper)
            .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))?;

        let result: ExchangeResult<Vec<Ticker>> = self
            .get_json::<Vec<RestTicker24h>>("/api/v3/ticker/24hr", &[("symbols", param)])
            .await
            .map(|raw| raw.into_iter().map(|t| t.into_ticker(&self.name)).collect());
        self.track(result)
    }

    async fn get_order_book(&self, symbol: &str, depth: usize) -> ExchangeResult<OrderBook> {
        let symbol = symbol.to_uppercase();
        // depth 0: no limit parameter, the server default depth is kept whole
        let mut query = vec![("symbol", symbol.clone())];
        if depth > 0 {
            query.push(("limit", rest_depth_limit(depth).to_string()));
        }
        let result = self
            .get_json::<DepthSnapshot>("/api/v3/depth", &query)
            .await
            .map(|raw| {
                let mut book = raw.into_order_book(&self.name, &symbol, current_time_ms());
                if depth > 0 {
                    book.bids.truncate(depth);
                    book.asks.truncate(depth);
                }
                book
            });
        self.track(result)
    }

    async fn get_recent_trades(&self, symbol: &str, limit: usize) -> ExchangeResult<Vec<Trade>> {
        let symbol = symbol.to_uppercase();
        let limit = limit.clamp(1, MAX_TRADES_LIMIT);
        let result: ExchangeResult<Vec<Trade>> = self
            .get_json::<Vec<RestTrade>>(
                "/api/v3/trades",
                &[("symbol", symbol.clone()), ("limit", limit.to_string())],
            )
            .await
            .map(|raw| raw.into_iter().map(|t| t.into_trade(&self.name, &symbol)).collect());
        self.track(result)
    }

    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<u32>,
    ) -> ExchangeResult<Vec<Kline>> {
        let symbol = symbol.to_uppercase();
        let mut query = vec![("symbol", symbol.clone()), ("interval", interval.to_string())];
        if let Some(start) = start {
            query.push(("startTime", start.timestamp_millis().to_string()));
        }
        if let Some(end) = end {
            query.push(("endTime", end.timestamp_millis().to_string()));
        }
        if let Some(limit) = limit.filter(|l| *l > 0) {
            query.push(("limit", limit.to_string()));
        }

        let result: ExchangeResult<Vec<Kline>> = match self.get_json::<Vec<RestKline>>("/api/v3/klines", &query).await {
            Ok(rows) => rows
                .into_iter()
                .map(|row| {
                    row.into_kline(&self.name, &symbol, interval)
                        .map_err(|e| ExchangeError::InvalidResponse(format!("kline: {}", e)))
                })
                .collect(),
            Err(e) => Err(e),
        };
        self.track(result)
    }

    async fn subscribe_ticker(&self, symbol: &str, callback: TickerCallback) -> ExchangeResult<()> {
        let exchange = self.name.clone();
        self.spawn_stream(
            format!("{}@ticker", stream_symbol(symbol)),
            callback,
            move |raw: WsTicker| raw.into_ticker(&exchange),
        );
        Ok(())
    }

    async fn subscribe_trades(&self, symbol: &str, callback: TradeCallback) -> ExchangeResult<()> {
        let exchange = self.name.clone();
        self.spawn_stream(
            format!("{}@trade", stream_symbol(symbol)),
            callback,
            move |raw: WsTrade| raw.into_trade(&exchange),
        );
        Ok(())
    }

    async fn subscribe_order_book(
        &self,
        symbol: &str,
        callback: OrderBookCallback,
    ) -> ExchangeResult<()> {
        let exchange = self.name.clone();
        let upper = symbol.to_uppercase();
        self.spawn_stream(
            format!("{}@depth{}@100ms", stream_symbol(symbol), STREAM_DEPTH_LEVELS),
            callback,
            move |raw: DepthSnapshot| raw.into_order_book(&exchange, &upper, current_time_ms()),
        );
        Ok(())
    }

    async fn subscribe_klines(
        &self,
        symbol: &str,
        interval: &str,
        callback: KlineCallback,
    ) -> ExchangeResult<()> {
        let exchange = self.name.clone();
        self.spawn_stream(
            format!("{}@kline_{}", stream_symbol(symbol), interval),
            callback,
            move |raw: WsKlineEvent| raw.kline.into_kline(&exchange),
        );
        Ok(())
    }

    async fn unsubscribe_all(&self) -> ExchangeResult<()> {
        let previous = {
            let mut token = self.streams.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *token, CancellationToken::new())
        };
        previous.cancel();

        let count = {
            let mut states = self.stream_states.lock().unwrap_or_else(|e| e.into_inner());
            let count = states.len();
            states.clear();
            count
        };
        if count > 0 {
            tracing::info!(exchange = %self.name, streams = count, "Unsubscribed all streams");
        }
        Ok(())
    }

    fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
