//! Price aggregation across exchanges
//!
//! Pure, stateless functions over a set of same-symbol tickers or order
//! books. Callers pass a snapshot; nothing here touches shared state.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::adapters::types::{current_time_ms, OrderBook, OrderBookLevel, Ticker, AGGREGATED_EXCHANGE};
use crate::core::types::ExchangePrice;

/// Volume-weighted last price
///
/// Tickers with zero volume are left out of the weighted sum. When no
/// ticker has volume the arithmetic mean is used; an empty set yields 0.
#[must_use]
pub fn weighted_price(tickers: &[Ticker]) -> f64 {
    if tickers.is_empty() {
        return 0.0;
    }

    let (weighted_sum, total_volume) = tickers
        .iter()
        .filter(|t| t.volume_24h > 0.0)
        .fold((0.0, 0.0), |(sum, vol), t| {
            (sum + t.last_price * t.volume_24h, vol + t.volume_24h)
        });

    if total_volume > 0.0 {
        weighted_sum / total_volume
    } else {
        tickers.iter().map(|t| t.last_price).sum::<f64>() / tickers.len() as f64
    }
}

/// Median last price; mean of the two middle values for even counts
#[must_use]
pub fn median_price(tickers: &[Ticker]) -> f64 {
    let mut prices: Vec<f64> = tickers.iter().map(|t| t.last_price).collect();
    median(&mut prices)
}

pub(crate) fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Highest bid and lowest ask across tickers, each tagged with its source
///
/// Zero prices count as "no quote". Equal prices resolve to the
/// lexicographically smallest exchange name, so the result does not
/// depend on input order.
#[must_use]
pub fn best_bid_ask(tickers: &[Ticker]) -> (Option<ExchangePrice>, Option<ExchangePrice>) {
    let best_bid = tickers
        .iter()
        .filter(|t| t.bid_price > 0.0)
        .min_by(|a, b| {
            b.bid_price
                .total_cmp(&a.bid_price)
                .then_with(|| a.exchange.cmp(&b.exchange))
        })
        .map(|t| tag(t, t.bid_price));

    let best_ask = tickers
        .iter()
        .filter(|t| t.ask_price > 0.0)
        .min_by(|a, b| {
            a.ask_price
                .total_cmp(&b.ask_price)
                .then_with(|| a.exchange.cmp(&b.exchange))
        })
        .map(|t| tag(t, t.ask_price));

    (best_bid, best_ask)
}

fn tag(ticker: &Ticker, price: f64) -> ExchangePrice {
    ExchangePrice {
        exchange: Arc::clone(&ticker.exchange),
        price,
        volume: ticker.volume_24h,
        timestamp_ms: ticker.timestamp_ms,
    }
}

/// Absolute spread and spread as a percentage of the midpoint
///
/// Both are zero when either side is missing.
#[inline]
#[must_use]
pub fn spread(bid: f64, ask: f64) -> (f64, f64) {
    if bid <= 0.0 || ask <= 0.0 {
        return (0.0, 0.0);
    }
    let spread = ask - bid;
    let mid = (ask + bid) / 2.0;
    (spread, spread / mid * 100.0)
}

/// Sum of 24h base volumes
#[must_use]
pub fn total_volume(tickers: &[Ticker]) -> f64 {
    tickers.iter().map(|t| t.volume_24h.max(0.0)).sum()
}

/// Each exchange's share of total volume; equal shares when volume is zero
#[must_use]
pub fn volume_weights(tickers: &[Ticker]) -> BTreeMap<String, f64> {
    let mut weights = BTreeMap::new();
    if tickers.is_empty() {
        return weights;
    }

    let total = total_volume(tickers);
    let equal = 1.0 / tickers.len() as f64;
    for t in tickers {
        let share = if total > 0.0 {
            t.volume_24h.max(0.0) / total
        } else {
            equal
        };
        *weights.entry(t.exchange.to_string()).or_insert(0.0) += share;
    }
    weights
}

/// Merge per-exchange books into one "aggregated" book
///
/// Levels are not consolidated by price. Bids end up descending and asks
/// ascending, each truncated to `depth` levels (`0` keeps everything).
#[must_use]
pub fn merge_order_books(symbol: &str, books: &[OrderBook], depth: usize) -> OrderBook {
    let mut bids: Vec<OrderBookLevel> = books.iter().flat_map(|b| b.bids.iter().copied()).collect();
    let mut asks: Vec<OrderBookLevel> = books.iter().flat_map(|b| b.asks.iter().copied()).collect();

    bids.sort_by(|a, b| b.price.total_cmp(&a.price));
    asks.sort_by(|a, b| a.price.total_cmp(&b.price));

    if depth > 0 {
        bids.truncate(depth);
        asks.truncate(depth);
    }

    let mut merged = OrderBook::new(AGGREGATED_EXCHANGE, symbol);
    merged.bids = bids;
    merged.asks = asks;
    merged.timestamp_ms = current_time_ms();
    merged
}

/// Total order on tickers by (exchange, symbol), for stable output
pub(crate) fn by_exchange(a: &Ticker, b: &Ticker) -> Ordering {
    a.exchange.cmp(&b.exchange).then_with(|| a.symbol.cmp(&b.symbol))
}
