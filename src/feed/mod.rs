//! Price sources for the ledger session.
//!
//! A feed does two things: streams [`PriceUpdate`] ticks for the session to
//! apply, and answers on-demand quote requests when a trade is opened.

mod http;
mod mock;
mod types;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use rust_decimal::Decimal;

use crate::models::{freshest_price, PriceUpdate, Quote};

pub use http::HttpPriceFeed;
pub use mock::MockPriceFeed;
pub use types::QuoteResponse;

/// Stream of price ticks. Ends when the feed shuts down.
pub type PriceStream = BoxStream<'static, PriceUpdate>;

/// Source of market prices.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Start receiving price ticks.
    fn subscribe(&self) -> PriceStream;

    /// Most recent quotes for a symbol, newest first.
    async fn fetch_quotes(&self, symbol: &str, limit: usize) -> Result<Vec<Quote>>;

    /// Newest valid price for a symbol, if the feed has one.
    async fn latest_price(&self, symbol: &str, lookback: usize) -> Result<Option<Decimal>> {
        let quotes = self.fetch_quotes(symbol, lookback.max(1)).await?;
        Ok(freshest_price(&quotes))
    }
}
