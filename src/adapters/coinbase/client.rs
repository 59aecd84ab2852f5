//! Coinbase market-data client
//!
//! REST polling for tickers, level-2 books, trades and candles, plus the
//! `ticker` and `matches` channels of the WebSocket feed. The feed has a
//! single endpoint, so each subscription opens its own socket and sends a
//! subscribe message before reading.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
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

use super::config::CoinbaseConfig;
use super::types::{
    combine_ticker, granularity_secs, product_id, subscribe_message, ApiErrorBody, RestBook,
    RestCandle, RestStats, RestTicker, RestTrade, WsMessage,
};

/// Upper bound for `GET /products/{id}/trades`
const MAX_TRADES_LIMIT: usize = 1000;
/// Granularity used when an interval has no Coinbase equivalent
const DEFAULT_GRANULARITY_SECS: u64 = 3600;

/// Coinbase public market-data client
pub struct CoinbaseClient {
    config: CoinbaseConfig,
    name: Arc<str>,
    http: reqwest::Client,
    status: AtomicU8,
    last_error: Mutex<Option<String>>,
    /// Parent token of every active stream listener
    streams: Mutex<CancellationToken>,
    /// (channel:product, listener state) per subscription
    stream_states: Mutex<Vec<(String, watch::Receiver<StreamState>)>>,
}

impl CoinbaseClient {
    pub fn new(config: CoinbaseConfig) -> Self {
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

    async fn fetch_ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        let product = product_id(symbol);
        let ticker_path = format!("/products/{}/ticker", product);
        let stats_path = format!("/products/{}/stats", product);
        let (ticker, stats) = tokio::try_join!(
            self.get_json::<RestTicker>(&ticker_path, &[]),
            self.get_json::<RestStats>(&stats_path, &[]),
        )?;
        Ok(combine_ticker(&self.name, &symbol.to_uppercase(), ticker, stats))
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

    /// Spawn a listener for one channel of one product. `convert` picks the
    /// messages it cares about out of the feed; everything else is skipped.
    fn spawn_feed<T, F>(
        &self,
        channel: &str,
        symbol: &str,
        callback: Arc<dyn Fn(T) + Send + Sync>,
        convert: F,
    ) where
        T: Send + 'static,
        F: Fn(WsMessage, &str) -> Option<T> + Send + Sync + 'static,
    {
        let product = product_id(symbol);
        let stream = format!("{}:{}", channel, product);
        let label = format!("{}:{}", self.name, stream);
        let dispatcher = StreamDispatcher::spawn(&label, self.config.stream_queue_capacity, callback);
        let (state_tx, state_rx) = watch::channel(StreamState::Connecting);
        let cancel = self.stream_token();
        let convert = Arc::new(convert);
        let subscribe = subscribe_message(&product, channel);
        let symbol: Arc<str> = Arc::from(symbol.to_uppercase().as_str());

        self.stream_states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((stream, state_rx));

        let url = self.config.ws_url.clone();
        let connect_label = label.clone();
        let connect = move || {
            let url = url.clone();
            let label = connect_label.clone();
            let subscribe = subscribe.clone();
            let convert = convert.clone();
            let symbol = symbol.clone();
            async move {
                let mut ws = connect_tls(&url).await?;
                ws.send(Message::Text(subscribe))
                    .await
                    .map_err(|e| ExchangeError::WebSocket(Box::new(e)))?;
                let items = text_frames(ws, label.clone())
                    .filter_map(move |text| {
                        let item = match serde_json::from_str::<WsMessage>(&text) {
                            Ok(WsMessage::Error { message, reason }) => {
                                tracing::warn!(
                                    stream = %label,
                                    message = %message,
                                    reason = reason.as_deref().unwrap_or("-"),
                                    "Feed reported an error"
                                );
                                None
                            }
                            Ok(msg) => convert(msg, &*symbol),
                            Err(e) => {
                                tracing::debug!(stream = %label, error = %e, "Unparseable feed message skipped");
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

    fn unsupported_stream(&self, symbol: &str, what: &str) -> ExchangeResult<()> {
        self.track(Err(ExchangeError::SubscriptionFailed {
            symbol: symbol.to_string(),
            reason: format!("{} streaming is not available on the public Coinbase feed", what),
        }))
    }
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
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| body.chars().take(200).collect());

    match status {
        429 => ExchangeError::RateLimited(message),
        401 | 403 => ExchangeError::Authentication(message),
        404 => ExchangeError::BadSymbol(message),
        _ => ExchangeError::Api { status, message },
    }
}

fn rfc3339(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl ExchangeClient for CoinbaseClient {
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
            .get_json::<serde_json::Value>("/time", &[])
            .await
            .map(|_| ());
        self.track(result)
    }

    async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        let result = self.fetch_ticker(symbol).await;
        self.track(result)
    }

    /// One product per request pair; failed products are skipped
    async fn get_tickers(&self, symbols: &[String]) -> ExchangeResult<Vec<Ticker>> {
        let mut tickers = Vec::with_capacity(symbols.len());
        let mut last_err = None;
        for symbol in symbols {
            match self.fetch_ticker(symbol).await {
                Ok(ticker) => tickers.push(ticker),
                Err(e) => {
                    tracing::debug!(exchange = %self.name, symbol = %symbol, error = %e, "Ticker skipped");
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) if tickers.is_empty() => self.track(Err(e)),
            _ => Ok(tickers),
        }
    }

    async fn get_order_book(&self, symbol: &str, depth: usize) -> ExchangeResult<OrderBook> {
        let path = format!("/products/{}/book", product_id(symbol));
        let symbol = symbol.to_uppercase();
        let result = self
            .get_json::<RestBook>(&path, &[("level", "2".to_string())])
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
        let path = format!("/products/{}/trades", product_id(symbol));
        let symbol = symbol.to_uppercase();
        let limit = limit.clamp(1, MAX_TRADES_LIMIT);
        let result: ExchangeResult<Vec<Trade>> = self
            .get_json::<Vec<RestTrade>>(&path, &[("limit", limit.to_string())])
            .await
            .map(|raw| raw.into_iter().map(|t| t.into_trade(&self.name, &symbol)).collect());
        self.track(result)
    }

    /// Candles come back newest first; they are returned oldest first and
    /// `limit` keeps the newest ones.
    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<u32>,
    ) -> ExchangeResult<Vec<Kline>> {
        let granularity = granularity_secs(interval).unwrap_or_else(|| {
            tracing::warn!(
                exchange = %self.name,
                interval = %interval,
                fallback_secs = DEFAULT_GRANULARITY_SECS,
                "Unsupported candle interval"
            );
            DEFAULT_GRANULARITY_SECS
        });
        let path = format!("/products/{}/candles", product_id(symbol));
        let symbol = symbol.to_uppercase();

        let mut query = vec![("granularity", granularity.to_string())];
        if let Some(start) = start {
            query.push(("start", rfc3339(start)));
        }
        if let Some(end) = end {
            query.push(("end", rfc3339(end)));
        }

        let result = self
            .get_json::<Vec<RestCandle>>(&path, &query)
            .await
            .map(|rows| {
                let mut klines: Vec<Kline> = rows
                    .into_iter()
                    .map(|row| row.into_kline(&self.name, &symbol, interval, granularity))
                    .collect();
                klines.sort_by_key(|k| k.open_time_ms);
                if let Some(limit) = limit.filter(|l| *l > 0) {
                    let excess = klines.len().saturating_sub(limit as usize);
                    klines.drain(..excess);
                }
                klines
            });
        self.track(result)
    }

    async fn subscribe_ticker(&self, symbol: &str, callback: TickerCallback) -> ExchangeResult<()> {
        let exchange = self.name.clone();
        self.spawn_feed("ticker", symbol, callback, move |msg, symbol| match msg {
            WsMessage::Ticker(raw) => Some(raw.into_ticker(&exchange, symbol, current_time_ms())),
            _ => None,
        });
        Ok(())
    }

    async fn subscribe_trades(&self, symbol: &str, callback: TradeCallback) -> ExchangeResult<()> {
        let exchange = self.name.clone();
        self.spawn_feed("matches", symbol, callback, move |msg, symbol| match msg {
            WsMessage::Match(raw) => Some(raw.into_trade(&exchange, symbol)),
            _ => None,
        });
        Ok(())
    }

    async fn subscribe_order_book(
        &self,
        symbol: &str,
        _callback: OrderBookCallback,
    ) -> ExchangeResult<()> {
        // level2 now requires an authenticated feed
        self.unsupported_stream(symbol, "Order book")
    }

    async fn subscribe_klines(
        &self,
        symbol: &str,
        _interval: &str,
        _callback: KlineCallback,
    ) -> ExchangeResult<()> {
        self.unsupported_stream(symbol, "Candle")
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
