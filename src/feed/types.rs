//! Wire types for the HTTP quote service.

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::models::{normalize_symbol, Quote};

/// Quote entry from `/quotes/{symbol}`.
#[derive(Debug, Clone, Deserialize)]
pub struct QuoteResponse {
    pub symbol: String,
    pub price: Decimal,
    /// Epoch seconds; zero when the service omits it
    #[serde(default)]
    pub timestamp: i64,
}

impl From<QuoteResponse> for Quote {
    fn from(r: QuoteResponse) -> Self {
        Quote::new(normalize_symbol(&r.symbol), r.price, r.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_quotes_accepts_string_and_number_prices() {
        let body = r#"[
            {"symbol":"eurusd","price":"1.10025","timestamp":1700000001},
            {"symbol":"EURUSD","price":1.1002}
        ]"#;
        let parsed: Vec<QuoteResponse> = serde_json::from_str(body).unwrap();
        let quotes: Vec<Quote> = parsed.into_iter().map(Quote::from).collect();

        assert_eq!(quotes[0].symbol, "EURUSD");
        assert_eq!(quotes[0].price, dec!(1.10025));
        assert_eq!(quotes[1].timestamp, 0);
    }
}
