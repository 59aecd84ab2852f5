//! Shared reconnection logic with exponential backoff
//!
//! Backoff delay for attempt `n` is `min(initial * 2^n, max)` plus
//! 0-199ms of random jitter so that many streams dropped by the same
//! network blip do not reconnect in lockstep.

use std::time::Duration;

use crate::adapters::errors::ExchangeResult;

/// Maximum random jitter added to every backoff delay (exclusive, ms)
pub const JITTER_MS: u64 = 200;

/// Configuration for reconnection attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Maximum number of attempts, `None` retries until cancelled
    pub max_attempts: Option<u32>,
    /// Initial delay in milliseconds (doubles each attempt)
    pub initial_delay_ms: u64,
    /// Maximum delay cap in milliseconds
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: Some(3),
            initial_delay_ms: 500,
            max_delay_ms: 5000,
        }
    }
}

impl ReconnectConfig {
    /// Same delays, no attempt limit (long-lived streams)
    pub fn unbounded(self) -> Self {
        Self {
            max_attempts: None,
            ..self
        }
    }

    /// True once `attempt` failures have used up the budget
    pub fn exhausted(&self, attempt: u32) -> bool {
        matches!(self.max_attempts, Some(max) if attempt >= max)
    }
}

/// Deterministic part of the backoff delay for a 0-based attempt
pub fn base_backoff_ms(config: &ReconnectConfig, attempt: u32) -> u64 {
    let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
    config
        .initial_delay_ms
        .saturating_mul(factor)
        .min(config.max_delay_ms)
}

/// Backoff delay for a 0-based attempt, jitter included
pub fn backoff_delay_ms(config: &ReconnectConfig, attempt: u32) -> u64 {
    base_backoff_ms(config, attempt) + rand::random::<u64>() % JITTER_MS
}

/// Run `connect_fn` until it succeeds or the attempt budget runs out
///
/// The first attempt runs immediately; each failure is followed by
/// `backoff_delay_ms(attempt)` before the next one.
///
/// # Returns
/// * `Ok(())` - An attempt succeeded
/// * `Err(ExchangeError)` - The last error once all attempts failed
///
/// # Example
/// ```ignore
/// reconnect_with_backoff(ReconnectConfig::default(), "binance", || async {
///     client.ping().await
/// })
/// .await?;
/// ```
pub async fn reconnect_with_backoff<F, Fut>(
    config: ReconnectConfig,
    exchange_name: &str,
    mut connect_fn: F,
) -> ExchangeResult<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ExchangeResult<()>>,
{
    let mut attempt: u32 = 0;

    loop {
        match connect_fn().await {
            Ok(()) => {
                if attempt > 0 {
                    tracing::info!(
                        exchange = %exchange_name,
                        attempts = attempt + 1,
                        "Connected after retry"
                    );
                }
                return Ok(());
            }
            Err(e) => {
                attempt += 1;
                if config.exhausted(attempt) {
                    tracing::warn!(
                        exchange = %exchange_name,
                        attempts = attempt,
                        error = %e,
                        "Connect attempts exhausted"
                    );
                    return Err(e);
                }

                let backoff_ms = backoff_delay_ms(&config, attempt - 1);
                tracing::warn!(
                    exchange = %exchange_name,
                    attempt = attempt,
                    backoff_ms = backoff_ms,
                    error = %e,
                    "Connect attempt failed, backing off"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
        }
    }
}
