//! HTTP quote service client.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use futures::StreamExt;
use reqwest::Client;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::models::{freshest_price, normalize_symbol, PriceUpdate, Quote};

use super::types::QuoteResponse;
use super::{PriceFeed, PriceStream};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RETRY_ELAPSED: Duration = Duration::from_secs(5);
const MAX_QUOTE_LIMIT: usize = 100;

/// Polls `GET {base}/quotes/{symbol}?limit=N` for prices.
#[derive(Clone)]
pub struct HttpPriceFeed {
    client: Client,
    base_url: String,
    poll_interval: Duration,
    symbols: Vec<String>,
}

impl HttpPriceFeed {
    /// Create a feed that streams `symbols` every `poll_interval`.
    pub fn new(base_url: &str, poll_interval: Duration, symbols: Vec<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            poll_interval,
            symbols: symbols.iter().map(|s| normalize_symbol(s)).collect(),
        })
    }

    fn quotes_url(&self, symbol: &str, limit: usize) -> String {
        format!(
            "{}/quotes/{}?limit={}",
            self.base_url,
            normalize_symbol(symbol),
            limit.clamp(1, MAX_QUOTE_LIMIT)
        )
    }

    async fn request_quotes(&self, url: &str) -> Result<Vec<Quote>, backoff::Error<anyhow::Error>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to fetch quotes")
            .map_err(backoff::Error::transient)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = anyhow::anyhow!("Quote request failed: {} - {}", status, body);
            // Client errors will not improve on retry
            return Err(if status.is_client_error() {
                backoff::Error::permanent(err)
            } else {
                backoff::Error::transient(err)
            });
        }

        let items: Vec<QuoteResponse> = response
            .json()
            .await
            .context("Failed to parse quotes response")
            .map_err(backoff::Error::permanent)?;

        Ok(items.into_iter().map(Quote::from).collect())
    }

    /// One round of quote requests for every watched symbol.
    async fn poll_once(&self) -> PriceUpdate {
        let fetches = self.symbols.iter().map(|symbol| async move {
            match self.fetch_quotes(symbol, 1).await {
                Ok(quotes) => freshest_price(&quotes).map(|p| (symbol.clone(), p)),
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Quote poll failed");
                    None
                }
            }
        });

        futures::future::join_all(fetches)
            .await
            .into_iter()
            .flatten()
            .collect()
    }
}

#[async_trait]
impl PriceFeed for HttpPriceFeed {
    fn subscribe(&self) -> PriceStream {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        futures::stream::unfold((self.clone(), ticker), |(feed, mut ticker)| async move {
            loop {
                ticker.tick().await;
                let update = feed.poll_once().await;
                if !update.is_empty() {
                    return Some((update, (feed, ticker)));
                }
            }
        })
        .boxed()
    }

    async fn fetch_quotes(&self, symbol: &str, limit: usize) -> Result<Vec<Quote>> {
        let url = self.quotes_url(symbol, limit);
        debug!(url = %url, "Fetching quotes");

        let policy = ExponentialBackoff {
            max_elapsed_time: Some(MAX_RETRY_ELAPSED),
            ..ExponentialBackoff::default()
        };

        let mut quotes = backoff::future::retry(policy, || self.request_quotes(&url)).await?;
        quotes.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        quotes.truncate(limit.max(1));
        Ok(quotes)
    }
}
