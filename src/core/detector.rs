//! Cross-exchange arbitrage detection
//!
//! Pairwise scan of same-symbol tickers: for every pair both directions
//! are tested (buy at one exchange's ask, sell at the other's bid).

use std::sync::Arc;

use uuid::Uuid;

use crate::adapters::types::{current_time_ms, Ticker};
use crate::core::types::ArbitrageOpportunity;

/// Profit percent at which the profit half of confidence saturates
const CONFIDENCE_PROFIT_SCALE: f64 = 5.0;
/// Volume at which the volume half of confidence saturates
const CONFIDENCE_VOLUME_SCALE: f64 = 500_000.0;
const RISK_PROFIT_SCALE: f64 = 10.0;
const RISK_VOLUME_SCALE: f64 = 1_000_000.0;

/// Scans tickers for price gaps above a profit threshold
#[derive(Debug, Clone)]
pub struct ArbitrageDetector {
    /// Minimum profit in percent; an opportunity must exceed it
    threshold_percent: f64,
    /// Flat fee rate per leg used by cost estimates
    fee_rate: f64,
}

impl ArbitrageDetector {
    pub fn new(threshold_percent: f64, fee_rate: f64) -> Self {
        Self {
            threshold_percent,
            fee_rate,
        }
    }

    pub fn threshold_percent(&self) -> f64 {
        self.threshold_percent
    }

    /// All opportunities among `tickers`, best profit first
    ///
    /// Tickers for different symbols, or from the same exchange, are never
    /// paired. Fewer than two tickers yields nothing.
    #[must_use]
    pub fn detect(&self, tickers: &[Ticker]) -> Vec<ArbitrageOpportunity> {
        let mut found = Vec::new();
        let now = current_time_ms();

        for (i, a) in tickers.iter().enumerate() {
            for b in &tickers[i + 1..] {
                if a.symbol != b.symbol || a.exchange == b.exchange {
                    continue;
                }
                if let Some(opp) = self.evaluate(a, b, now) {
                    found.push(opp);
                }
                if let Some(opp) = self.evaluate(b, a, now) {
                    found.push(opp);
                }
            }
        }

        found.sort_by(|x, y| {
            y.profit_percent
                .total_cmp(&x.profit_percent)
                .then_with(|| x.buy_exchange.cmp(&y.buy_exchange))
                .then_with(|| x.sell_exchange.cmp(&y.sell_exchange))
        });
        found
    }

    /// Highest-profit opportunity, if any
    #[must_use]
    pub fn best(&self, tickers: &[Ticker]) -> Option<ArbitrageOpportunity> {
        self.detect(tickers).into_iter().next()
    }

    /// Buy on `buy` at its ask, sell on `sell` at its bid
    fn evaluate(&self, buy: &Ticker, sell: &Ticker, now_ms: u64) -> Option<ArbitrageOpportunity> {
        let buy_price = buy.ask_price;
        let sell_price = sell.bid_price;
        if !(buy_price > 0.0 && sell_price > 0.0) {
            return None;
        }

        let profit_percent = (sell_price - buy_price) / buy_price * 100.0;
        if !(profit_percent > self.threshold_percent) {
            return None;
        }

        let volume = buy.volume_24h.min(sell.volume_24h).max(0.0);

        Some(ArbitrageOpportunity {
            id: Uuid::now_v7(),
            symbol: Arc::clone(&buy.symbol),
            buy_exchange: Arc::clone(&buy.exchange),
            sell_exchange: Arc::clone(&sell.exchange),
            buy_price,
            sell_price,
            price_difference: sell_price - buy_price,
            profit_percent,
            volume,
            confidence: confidence(profit_percent, volume),
            risk: risk(profit_percent, volume),
            timestamp_ms: now_ms,
        })
    }

    /// Fees for both legs: `volume * (buy + sell) * fee_rate`
    #[must_use]
    pub fn estimate_execution_cost(&self, opp: &ArbitrageOpportunity) -> f64 {
        opp.volume * (opp.buy_price + opp.sell_price) * self.fee_rate
    }

    /// Gross `volume * (sell - buy)` minus execution cost
    #[must_use]
    pub fn net_profit(&self, opp: &ArbitrageOpportunity) -> f64 {
        opp.volume * (opp.sell_price - opp.buy_price) - self.estimate_execution_cost(opp)
    }
}

/// `clamp((profit/5 + volume/500000) / 2, 0, 1)`
#[inline]
pub fn confidence(profit_percent: f64, volume: f64) -> f64 {
    let raw = (profit_percent / CONFIDENCE_PROFIT_SCALE + volume / CONFIDENCE_VOLUME_SCALE) / 2.0;
    raw.clamp(0.0, 1.0)
}

/// `clamp(1 - (profit/10 + volume/1e6), 0, 1)`
#[inline]
pub fn risk(profit_percent: f64, volume: f64) -> f64 {
    let raw = 1.0 - (profit_percent / RISK_PROFIT_SCALE + volume / RISK_VOLUME_SCALE);
    raw.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_utils::ticker;
    use proptest::prelude::*;

    #[test]
    fn test_single_direction_found() {
        let a = ticker("a", "BTCUSDT", 99.0, 100.0, 1000.0);
        let b = ticker("b", "BTCUSDT", 101.0, 102.0, 400.0);
        let opps = ArbitrageDetector::new(0.1, 0.001).detect(&[a, b]);

        assert_eq!(opps.len(), 1);
        let opp = &opps[0];
        assert_eq!(&*opp.buy_exchange, "a");
        assert_eq!(&*opp.sell_exchange, "b");
        assert_eq!(opp.buy_price, 100.0);
        assert_eq!(opp.sell_price, 101.0);
        assert_eq!(opp.price_difference, 1.0);
        assert!((opp.profit_percent - 1.0).abs() < 1e-12);
        assert_eq!(opp.volume, 400.0);
        assert_eq!(opp.id.get_version_num(), 7);
    }

    #[test]
    fn test_gap_below_threshold_ignored() {
        let a = ticker("a", "BTCUSDT", 99.0, 100.0, 1.0);
        let b = ticker("b", "BTCUSDT", 100.05, 101.0, 1.0);
        // 0.05% gap
        assert!(ArbitrageDetector::new(0.1, 0.0).detect(&[a.clone(), b.clone()]).is_empty());
        assert_eq!(ArbitrageDetector::new(0.01, 0.0).detect(&[a, b]).len(), 1);
    }

    #[test]
    fn test_reverse_direction_and_sorting() {
        let a = ticker("a", "X", 105.0, 106.0, 1.0);
        let b = ticker("b", "X", 99.0, 100.0, 1.0);
        let c = ticker("c", "X", 102.0, 103.0, 1.0);
        let opps = ArbitrageDetector::new(0.0, 0.0).detect(&[a, b, c]);

        // b->a 5%, b->c 2%, c->a ~1.94%
        let pairs: Vec<(&str, &str)> = opps
            .iter()
            .map(|o| (&*o.buy_exchange, &*o.sell_exchange))
            .collect();
        assert_eq!(pairs, vec![("b", "a"), ("b", "c"), ("c", "a")]);
        assert!(opps.windows(2).all(|w| w[0].profit_percent >= w[1].profit_percent));
    }

    #[test]
    fn test_different_symbols_and_same_exchange_not_paired() {
        let a = ticker("a", "X", 99.0, 100.0, 1.0);
        let b = ticker("b", "Y", 110.0, 111.0, 1.0);
        let a2 = ticker("a", "X", 110.0, 111.0, 1.0);
        let detector = ArbitrageDetector::new(0.0, 0.0);
        assert!(detector.detect(&[a.clone(), b]).is_empty());
        assert!(detector.detect(&[a.clone(), a2]).is_empty());
        assert!(detector.detect(&[a]).is_empty());
        assert!(detector.detect(&[]).is_empty());
    }

    #[test]
    fn test_confidence_and_risk() {
        // (1/5 + 250000/500000) / 2 = 0.35
        assert!((confidence(1.0, 250_000.0) - 0.35).abs() < 1e-12);
        assert_eq!(confidence(50.0, 1e9), 1.0);
        // 1 - (1/10 + 250000/1e6) = 0.65
        assert!((risk(1.0, 250_000.0) - 0.65).abs() < 1e-12);
        assert_eq!(risk(50.0, 0.0), 0.0);
    }

    #[test]
    fn test_execution_cost_and_net_profit() {
        let a = ticker("a", "X", 99.0, 100.0, 10.0);
        let b = ticker("b", "X", 102.0, 103.0, 10.0);
        let detector = ArbitrageDetector::new(0.1, 0.001);
        let opp = detector.best(&[a, b]).unwrap();

        // 10 * (100 + 102) * 0.001
        assert!((detector.estimate_execution_cost(&opp) - 2.02).abs() < 1e-9);
        // 10 * 2 - 2.02
        assert!((detector.net_profit(&opp) - 17.98).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn prop_scores_in_unit_interval(p in -100.0f64..100.0, v in 0.0f64..1e9) {
            prop_assert!((0.0..=1.0).contains(&confidence(p, v)));
            prop_assert!((0.0..=1.0).contains(&risk(p, v)));
        }

        #[test]
        fn prop_one_direction_for_separated_quotes(
            ask_a in 10.0f64..1000.0, gap in 0.5f64..50.0, spread in 0.01f64..5.0
        ) {
            let a = ticker("a", "X", ask_a - spread, ask_a, 1.0);
            let bid_b = ask_a + gap;
            let b = ticker("b", "X", bid_b, bid_b + spread, 1.0);
            let opps = ArbitrageDetector::new(0.0, 0.0).detect(&[a, b]);
            prop_assert_eq!(opps.len(), 1);
            let expected = (bid_b - ask_a) / ask_a * 100.0;
            prop_assert!((opps[0].profit_percent - expected).abs() < 1e-9);
        }
    }
}
