//! Trade requests coming from the terminal UI.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    /// Sign applied to a raw price move: +1 for longs, -1 for shorts.
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => Decimal::NEGATIVE_ONE,
        }
    }

    /// Parse "buy"/"sell" (any case), also accepting "long"/"short".
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "BUY" | "LONG" => Some(Side::Buy),
            "SELL" | "SHORT" => Some(Side::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to open a market position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenRequest {
    /// Instrument symbol, e.g. "EURUSD"
    pub symbol: String,

    /// Trade direction
    pub side: Side,

    /// Lot quantity
    pub size: Decimal,

    /// Optional protective stop
    #[serde(default)]
    pub stop_loss: Option<Decimal>,

    /// Optional profit target
    #[serde(default)]
    pub take_profit: Option<Decimal>,
}

impl OpenRequest {
    pub fn new(symbol: impl Into<String>, side: Side, size: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            size,
            stop_loss: None,
            take_profit: None,
        }
    }

    pub fn with_stop_loss(mut self, price: Decimal) -> Self {
        self.stop_loss = Some(price);
        self
    }

    pub fn with_take_profit(mut self, price: Decimal) -> Self {
        self.take_profit = Some(price);
        self
    }
}

/// Replacement stop-loss / take-profit levels. `None` clears a level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerUpdate {
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    #[serde(default)]
    pub take_profit: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_parse() {
        assert_eq!(Side::parse("buy"), Some(Side::Buy));
        assert_eq!(Side::parse(" SHORT "), Some(Side::Sell));
        assert_eq!(Side::parse("hold"), None);
    }

    #[test]
    fn test_side_serde_uppercase() {
        let json = serde_json::to_string(&Side::Sell).unwrap();
        assert_eq!(json, "\"SELL\"");
    }

    #[test]
    fn test_request_builder() {
        let req = OpenRequest::new("EURUSD", Side::Buy, dec!(0.10))
            .with_stop_loss(dec!(1.0950))
            .with_take_profit(dec!(1.1100));

        assert_eq!(req.stop_loss, Some(dec!(1.0950)));
        assert_eq!(req.take_profit, Some(dec!(1.1100)));
    }
}
