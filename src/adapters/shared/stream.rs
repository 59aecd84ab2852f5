//! Push-subscription plumbing
//!
//! Every stream subscription is one listener task feeding a bounded
//! queue, drained by a dedicated dispatcher task that invokes the
//! registered callback. The listener never waits on the queue: a full
//! queue drops the message and bumps a counter.
//!
//! Listener state machine:
//!
//! ```text
//! Connecting ──ok──▶ Streaming ──end/error──▶ Backoff{n} ──delay──▶ Connecting
//!     │                                            ▲
//!     └──────────────────err───────────────────────┘
//! any state ──cancel / attempts exhausted──▶ Stopped
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::adapters::errors::ExchangeResult;
use crate::adapters::shared::reconnect::{backoff_delay_ms, ReconnectConfig};

// =============================================================================
// Dispatcher
// =============================================================================

/// Bounded queue + dispatcher task delivering items to a callback
pub struct StreamDispatcher<T> {
    tx: mpsc::Sender<T>,
    dropped: Arc<AtomicU64>,
    label: Arc<str>,
}

impl<T: Send + 'static> StreamDispatcher<T> {
    /// Spawn the dispatcher task; it exits once every sender is dropped
    /// and the queue is drained.
    pub fn spawn(label: &str, capacity: usize, callback: Arc<dyn Fn(T) + Send + Sync>) -> Self {
        let (tx, mut rx) = mpsc::channel::<T>(capacity.max(1));
        let label: Arc<str> = Arc::from(label);

        let task_label = label.clone();
        tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                callback(item);
            }
            tracing::debug!(stream = %task_label, "Dispatcher drained");
        });

        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            label,
        }
    }

    /// Enqueue without waiting. Returns false if the item was dropped.
    pub fn offer(&self, item: T) -> bool {
        match self.tx.try_send(item) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::trace!(stream = %self.label, dropped_total = total, "Queue full, message dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Number of items dropped so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Shared handle on the drop counter
    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        self.dropped.clone()
    }
}

// =============================================================================
// Listener
// =============================================================================

/// Observable state of one stream listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Connecting,
    Streaming,
    /// Waiting before reconnect attempt `attempt` (1-based)
    Backoff { attempt: u32 },
    Stopped,
}

/// Drive one stream subscription until cancelled or out of attempts.
///
/// `connect` opens the upstream and returns the parsed item stream. The
/// attempt counter resets whenever a connection succeeds, so only
/// failures since the last good connection count towards
/// `config.max_attempts`.
pub async fn run_stream_listener<T, C, Fut>(
    label: String,
    config: ReconnectConfig,
    cancel: CancellationToken,
    state_tx: watch::Sender<StreamState>,
    dispatcher: StreamDispatcher<T>,
    mut connect: C,
) where
    T: Send + 'static,
    C: FnMut() -> Fut,
    Fut: Future<Output = ExchangeResult<BoxStream<'static, T>>>,
{
    let mut attempt: u32 = 0;

    'outer: loop {
        state_tx.send_replace(StreamState::Connecting);

        let connected = tokio::select! {
            _ = cancel.cancelled() => break 'outer,
            result = connect() => result,
        };

        match connected {
            Ok(mut stream) => {
                attempt = 0;
                state_tx.send_replace(StreamState::Streaming);
                tracing::info!(stream = %label, "Stream connected");

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break 'outer,
                        next = stream.next() => match next {
                            Some(item) => {
                                dispatcher.offer(item);
                            }
                            None => {
                                tracing::warn!(
                                    stream = %label,
                                    dropped = dispatcher.dropped(),
                                    "Stream ended, reconnecting"
                                );
                                break;
                            }
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(stream = %label, error = %e, "Stream connect failed");
            }
        }

        attempt += 1;
        if config.exhausted(attempt) {
            tracing::error!(stream = %label, attempts = attempt, "Stream reconnect attempts exhausted");
            break;
        }

        state_tx.send_replace(StreamState::Backoff { attempt });
        let delay_ms = backoff_delay_ms(&config, attempt - 1);
        tracing::debug!(stream = %label, attempt = attempt, delay_ms = delay_ms, "Stream backoff");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
        }
    }

    state_tx.send_replace(StreamState::Stopped);
    tracing::info!(stream = %label, dropped = dispatcher.dropped(), "Stream listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::errors::ExchangeError;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    fn fast_config(max_attempts: Option<u32>) -> ReconnectConfig {
        ReconnectConfig {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 5,
        }
    }

    fn collecting_callback() -> (Arc<Mutex<Vec<u32>>>, Arc<dyn Fn(u32) + Send + Sync>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cb: Arc<dyn Fn(u32) + Send + Sync> = Arc::new(move |v| sink.lock().unwrap().push(v));
        (seen, cb)
    }

    #[tokio::test]
    async fn test_dispatcher_drops_when_full() {
        let (seen, cb) = collecting_callback();
        let dispatcher = StreamDispatcher::spawn("test", 2, cb);

        // Current-thread runtime: the dispatcher cannot drain until we yield
        let accepted: Vec<bool> = (0..5).map(|i| dispatcher.offer(i)).collect();
        assert_eq!(accepted, vec![true, true, false, false, false]);
        assert_eq!(dispatcher.dropped(), 3);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_dispatcher_preserves_order() {
        let (seen, cb) = collecting_callback();
        let dispatcher = StreamDispatcher::spawn("test", 16, cb);
        for i in 0..10 {
            assert!(dispatcher.offer(i));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
        assert_eq!(dispatcher.dropped(), 0);
    }

    #[tokio::test]
    async fn test_listener_gives_up_after_max_attempts() {
        let (_seen, cb) = collecting_callback();
        let dispatcher = StreamDispatcher::spawn("test", 4, cb);
        let (state_tx, state_rx) = watch::channel(StreamState::Connecting);
        let calls = Arc::new(AtomicU32::new(0));

        let c = calls.clone();
        run_stream_listener(
            "test".into(),
            fast_config(Some(3)),
            CancellationToken::new(),
            state_tx,
            dispatcher,
            move || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err::<BoxStream<'static, u32>, _>(ExchangeError::ConnectionFailed("down".into())) }
            },
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(*state_rx.borrow(), StreamState::Stopped);
    }

    #[tokio::test]
    async fn test_listener_delivers_and_reconnects_after_stream_end() {
        let (seen, cb) = collecting_callback();
        let dispatcher = StreamDispatcher::spawn("test", 16, cb);
        let (state_tx, state_rx) = watch::channel(StreamState::Connecting);
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let c = calls.clone();
        let handle = tokio::spawn(run_stream_listener(
            "test".into(),
            fast_config(None),
            cancel.clone(),
            state_tx,
            dispatcher,
            move || {
                let n = c.fetch_add(1, Ordering::SeqCst);
                async move {
                    let items = vec![n * 10, n * 10 + 1];
                    Ok::<_, ExchangeError>(futures_util::stream::iter(items).boxed())
                }
            },
        ));

        // Backoff is at most 1ms + 199ms jitter
        tokio::time::sleep(Duration::from_millis(500)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(calls.load(Ordering::SeqCst) >= 2, "listener should reconnect");
        let seen = seen.lock().unwrap();
        assert_eq!(&seen[..4], &[0, 1, 10, 11]);
        assert_eq!(*state_rx.borrow(), StreamState::Stopped);
    }

    #[tokio::test]
    async fn test_attempt_counter_resets_after_successful_connect() {
        // Alternates: fail, succeed (empty stream), fail, succeed...
        // The counter never passes 2 because every success resets it.
        let (_seen, cb) = collecting_callback();
        let dispatcher = StreamDispatcher::spawn("test", 4, cb);
        let (state_tx, _state_rx) = watch::channel(StreamState::Connecting);
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let c = calls.clone();
        let handle = tokio::spawn(run_stream_listener(
            "test".into(),
            fast_config(Some(3)),
            cancel.clone(),
            state_tx,
            dispatcher,
            move || {
                let n = c.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n % 2 == 0 {
                        Err(ExchangeError::ConnectionFailed("flaky".into()))
                    } else {
                        Ok(futures_util::stream::empty::<u32>().boxed())
                    }
                }
            },
        ));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(!handle.is_finished(), "listener gave up despite successes");
        cancel.cancel();
        handle.await.unwrap();
        assert!(calls.load(Ordering::SeqCst) > 2);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_stops() {
        let (_seen, cb) = collecting_callback();
        let dispatcher = StreamDispatcher::spawn("test", 4, cb);
        let (state_tx, mut state_rx) = watch::channel(StreamState::Connecting);
        let cancel = CancellationToken::new();

        let slow = ReconnectConfig {
            max_attempts: None,
            initial_delay_ms: 10_000,
            max_delay_ms: 10_000,
        };
        let handle = tokio::spawn(run_stream_listener(
            "test".into(),
            slow,
            cancel.clone(),
            state_tx,
            dispatcher,
            || async { Err::<BoxStream<'static, u32>, _>(ExchangeError::NetworkTimeout(1)) },
        ));

        state_rx
            .wait_for(|s| matches!(s, StreamState::Backoff { attempt: 1 }))
            .await
            .unwrap();
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("listener should stop promptly")
            .unwrap();
        assert_eq!(*state_rx.borrow(), StreamState::Stopped);
    }
}
