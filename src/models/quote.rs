//! Market quotes delivered by a price feed.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Latest price per instrument, as pushed by a feed on each tick.
pub type PriceUpdate = HashMap<String, Decimal>;

/// Single observed price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,

    pub price: Decimal,

    /// Epoch seconds
    pub timestamp: i64,
}

impl Quote {
    pub fn new(symbol: impl Into<String>, price: Decimal, timestamp: i64) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            timestamp,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.price > Decimal::ZERO
    }
}

/// Newest valid price among quotes ordered newest first.
pub fn freshest_price(quotes: &[Quote]) -> Option<Decimal> {
    quotes.iter().find(|q| q.is_valid()).map(|q| q.price)
}
