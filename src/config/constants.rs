//! Application-wide constants and configuration defaults
//!
//! Capacities and intervals that are not part of the YAML file. Values can
//! be overridden via environment variables.

use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

// =============================================================================
// Streaming
// =============================================================================

/// Bounded queue size per stream subscription (default: 100 messages)
///
/// Environment variable: `STREAM_QUEUE_CAPACITY`
pub fn stream_queue_capacity() -> usize {
    env_or("STREAM_QUEUE_CAPACITY", 100)
}

/// Bounded queue between pushed tickers and the service ingest task
/// (default: 1024 tickers)
///
/// Environment variable: `INGEST_QUEUE_CAPACITY`
pub fn ingest_queue_capacity() -> usize {
    env_or("INGEST_QUEUE_CAPACITY", 1024)
}

// =============================================================================
// Events & Monitoring
// =============================================================================

/// Market event broadcast channel capacity (default: 256 events)
///
/// Environment variable: `EVENT_CHANNEL_CAPACITY`
pub fn event_channel_capacity() -> usize {
    env_or("EVENT_CHANNEL_CAPACITY", 256)
}

/// Period of the summary log line emitted by the binary (default: 30 seconds)
///
/// Environment variable: `STATS_INTERVAL_SECS`
pub fn stats_interval() -> Duration {
    Duration::from_secs(env_or("STATS_INTERVAL_SECS", 30))
}

/// Order book depth used by the periodic summary (default: 10 levels)
///
/// Environment variable: `SUMMARY_BOOK_DEPTH`
pub fn summary_book_depth() -> usize {
    env_or("SUMMARY_BOOK_DEPTH", 10)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial(env)]
    fn test_default_values() {
        std::env::remove_var("STREAM_QUEUE_CAPACITY");
        std::env::remove_var("EVENT_CHANNEL_CAPACITY");
        std::env::remove_var("STATS_INTERVAL_SECS");
        assert_eq!(stream_queue_capacity(), 100);
        assert_eq!(event_channel_capacity(), 256);
        assert_eq!(stats_interval(), Duration::from_secs(30));
    }

    #[test]
    #[serial(env)]
    fn test_env_override() {
        std::env::set_var("STREAM_QUEUE_CAPACITY", "8");
        assert_eq!(stream_queue_capacity(), 8);
        std::env::remove_var("STREAM_QUEUE_CAPACITY");
    }

    #[test]
    #[serial(env)]
    fn test_unparseable_env_falls_back() {
        std::env::set_var("EVENT_CHANNEL_CAPACITY", "lots");
        assert_eq!(event_channel_capacity(), 256);
        std::env::remove_var("EVENT_CHANNEL_CAPACITY");
    }
}
