//! In-process price feed for demos and tests.
//!
//! Ticks are pushed by the caller and fanned out to every subscriber over a
//! broadcast channel. Quotes for on-demand lookups are seeded separately and
//! can be delayed or made to fail.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tracing::warn;

use crate::models::{normalize_symbol, PriceUpdate, Quote};

use super::{PriceFeed, PriceStream};

const CHANNEL_CAPACITY: usize = 256;

// Quotes kept per symbol for lookups
const QUOTE_HISTORY: usize = 256;

/// Scriptable price feed.
pub struct MockPriceFeed {
    tx: broadcast::Sender<PriceUpdate>,

    // Newest first per symbol
    quotes: RwLock<HashMap<String, VecDeque<Quote>>>,

    latency_ms: AtomicU64,
    fail_fetch: AtomicBool,
}

impl Default for MockPriceFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPriceFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            quotes: RwLock::new(HashMap::new()),
            latency_ms: AtomicU64::new(0),
            fail_fetch: AtomicBool::new(false),
        }
    }

    /// Delay every quote fetch by `latency`.
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
        self
    }

    /// Make quote fetches fail until switched off again.
    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    /// Record a quote so later fetches return it first.
    pub fn set_quote(&self, symbol: &str, price: Decimal) {
        let symbol = normalize_symbol(symbol);
        let quote = Quote::new(symbol.clone(), price, Utc::now().timestamp());
        if let Ok(mut quotes) = self.quotes.write() {
            let history = quotes.entry(symbol).or_default();
            history.push_front(quote);
            history.truncate(QUOTE_HISTORY);
        }
    }

    /// Broadcast a tick and record its prices as quotes.
    ///
    /// Returns the number of live subscribers that received it.
    pub fn push(&self, update: PriceUpdate) -> usize {
        for (symbol, price) in &update {
            self.set_quote(symbol, *price);
        }
        self.tx.send(update).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl PriceFeed for MockPriceFeed {
    fn subscribe(&self) -> PriceStream {
        let rx = self.tx.subscribe();
        futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(update) => return Some((update, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Price subscriber lagged, dropping stale ticks");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }

    async fn fetch_quotes(&self, symbol: &str, limit: usize) -> Result<Vec<Quote>> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.fail_fetch.load(Ordering::SeqCst) {
            anyhow::bail!("Mock feed quote fetch failed for {}", symbol);
        }

        let symbol = normalize_symbol(symbol);
        let quotes = self
            .quotes
            .read()
            .map_err(|_| anyhow::anyhow!("Mock quote store poisoned"))?;

        Ok(quotes
            .get(&symbol)
            .map(|q| q.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tick(symbol: &str, price: Decimal) -> PriceUpdate {
        [(symbol.to_string(), price)].into_iter().collect()
    }

    #[tokio::test]
    async fn test_push_reaches_subscriber() {
        let feed = MockPriceFeed::new();
        let mut stream = feed.subscribe();
        assert_eq!(feed.subscriber_count(), 1);

        assert_eq!(feed.push(tick("EURUSD", dec!(1.1))), 1);

        let update = stream.next().await.unwrap();
        assert_eq!(update.get("EURUSD"), Some(&dec!(1.1)));
    }

    #[tokio::test]
    async fn test_stream_ends_when_feed_dropped() {
        let feed = MockPriceFeed::new();
        let mut stream = feed.subscribe();
        drop(feed);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_fetch_quotes_newest_first() {
        let feed = MockPriceFeed::new();
        feed.set_quote("eurusd", dec!(1.1000));
        feed.set_quote("EURUSD", dec!(1.1005));

        let quotes = feed.fetch_quotes("EURUSD", 5).await.unwrap();
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].price, dec!(1.1005));

        assert_eq!(feed.latest_price("EURUSD", 1).await.unwrap(), Some(dec!(1.1005)));
        assert_eq!(feed.latest_price("GBPUSD", 1).await.unwrap(), None);
    }

    #[test]
    fn test_fetch_respects_limit() {
        let feed = MockPriceFeed::new();
        for price in [dec!(1.1001), dec!(1.1002), dec!(1.1003)] {
            feed.set_quote("EURUSD", price);
        }

        let quotes = tokio_test::block_on(feed.fetch_quotes("EURUSD", 2)).unwrap();
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].price, dec!(1.1003));
    }

    #[test]
    fn test_quote_history_is_bounded() {
        let feed = MockPriceFeed::new();
        for i in 0..(QUOTE_HISTORY as i64 + 50) {
            feed.set_quote("EURUSD", Decimal::new(110_000 + i, 5));
        }

        let quotes = tokio_test::block_on(feed.fetch_quotes("EURUSD", usize::MAX)).unwrap();
        assert_eq!(quotes.len(), QUOTE_HISTORY);
        assert_eq!(quotes[0].price, Decimal::new(110_000 + QUOTE_HISTORY as i64 + 49, 5));
    }

    #[tokio::test]
    async fn test_fetch_failure_injection() {
        let feed = MockPriceFeed::new();
        feed.set_quote("EURUSD", dec!(1.1));
        feed.set_fail_fetch(true);
        assert!(feed.fetch_quotes("EURUSD", 1).await.is_err());
        feed.set_fail_fetch(false);
        assert!(feed.fetch_quotes("EURUSD", 1).await.is_ok());
    }
}
