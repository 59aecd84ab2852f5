//! Market aggregator entry point
//!
//! 1. Loads configuration
//! 2. Builds one client per configured exchange
//! 3. Starts the aggregation service (polling, optional streaming, arbitrage)
//! 4. Logs a stats line periodically until Ctrl+C

use std::path::PathBuf;
use std::sync::Arc;

use tokio::signal;
use tracing::{error, info, warn};

use market_aggregator::adapters::create_clients;
use market_aggregator::config::{self, constants, logging};
use market_aggregator::core::{
    AggregationService, BroadcastPublisher, InMemoryMetrics, MemoryCache, Sinks,
};

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenvy::dotenv().ok();

    logging::init_logging();

    info!("🚀 Market aggregator starting...");

    let config_path = PathBuf::from(
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string()),
    );
    info!("📁 Loading configuration from {}...", config_path.display());
    let config = match config::load_config(&config_path) {
        Ok(cfg) => {
            info!(
                "[CONFIG] {} exchanges, symbols: {:?}",
                cfg.exchanges.len(),
                cfg.aggregation.symbols
            );
            cfg
        }
        Err(e) => {
            error!("[ERROR] Configuration failed: {}", e);
            std::process::exit(1);
        }
    };

    info!("📊 Aggregation settings:");
    info!("   Update interval: {}ms", config.aggregation.update_interval_ms);
    info!("   Request timeout: {}ms", config.aggregation.request_timeout_ms);
    info!("   Arbitrage threshold: {}%", config.aggregation.arbitrage_threshold);
    info!("   Quality threshold: {}", config.aggregation.data_quality_threshold);
    info!("   Streaming: {}", config.aggregation.enable_streaming);

    let clients = create_clients(&config.exchanges);

    let publisher = Arc::new(BroadcastPublisher::new(constants::event_channel_capacity()));
    let metrics = Arc::new(InMemoryMetrics::new());
    let cache = Arc::new(MemoryCache::new());
    let sinks = Sinks::default()
        .with_events(publisher.clone())
        .with_metrics(metrics.clone())
        .with_cache(cache.clone());

    let service = AggregationService::new(config.aggregation, config.validation, clients, sinks)?;
    service.start().await?;

    info!("⏳ Aggregation running. Press Ctrl+C to stop.");

    let mut stats = tokio::time::interval(constants::stats_interval());
    // first tick completes immediately
    stats.tick().await;

    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(err) = result {
                    warn!("[SHUTDOWN] Failed to listen for Ctrl+C: {}", err);
                }
                info!("[SHUTDOWN] Graceful shutdown initiated");
                break;
            }
            _ = stats.tick() => {
                let snapshot = metrics.snapshot();
                let (successes, errors) = snapshot
                    .operations
                    .values()
                    .fold((0, 0), |(s, e), op| (s + op.successes, e + op.errors));
                let purged = cache.purge_expired();
                info!(
                    tickers = service.ticker_count().await,
                    successes,
                    errors,
                    opportunities = snapshot.opportunities,
                    best_profit_percent = snapshot.best_profit_percent,
                    ingest_dropped = service.ingest_dropped(),
                    cache_entries = cache.len(),
                    cache_purged = purged,
                    "[STATS] Aggregation stats"
                );
                for symbol in &service.config().symbols {
                    log_symbol_summary(&service, symbol).await;
                }
                for (exchange, report) in service.get_exchange_status() {
                    info!(
                        exchange = %exchange,
                        status = %report.status,
                        last_error = report.last_error.as_deref().unwrap_or("-"),
                        "[STATS] Exchange status"
                    );
                }
            }
        }
    }

    service.stop().await?;
    info!("[SHUTDOWN] Clean exit");
    Ok(())
}

async fn log_symbol_summary(service: &AggregationService, symbol: &str) {
    match service.get_aggregated_ticker(symbol).await {
        Ok(summary) => info!(
            symbol = %symbol,
            exchanges = summary.exchange_prices.len(),
            weighted_price = summary.weighted_price,
            median_price = summary.median_price,
            spread_percent = summary.spread_percent,
            volume_24h = summary.total_volume_24h,
            data_quality = summary.data_quality,
            "[STATS] Market summary"
        ),
        Err(e) => warn!(symbol = %symbol, error = %e, "[STATS] No market summary"),
    }

    match service
        .get_aggregated_order_book(symbol, constants::summary_book_depth())
        .await
    {
        Ok(book) => info!(
            symbol = %symbol,
            bids = book.bids.len(),
            asks = book.asks.len(),
            best_bid = book.best_bid().unwrap_or(0.0),
            best_ask = book.best_ask().unwrap_or(0.0),
            "[STATS] Merged order book"
        ),
        Err(e) => warn!(symbol = %symbol, error = %e, "[STATS] No merged order book"),
    }
}
