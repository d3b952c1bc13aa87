//! Instrument contract specifications.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Contract conventions for one tradable symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    /// Symbol, stored upper case
    pub symbol: String,

    /// Units of the underlying represented by one lot
    pub contract_size: Decimal,

    /// Price increment of one pip
    pub pip_size: Decimal,

    /// Decimal places used when displaying prices
    pub price_decimals: u32,
}

impl InstrumentSpec {
    pub fn new(
        symbol: impl Into<String>,
        contract_size: Decimal,
        pip_size: Decimal,
        price_decimals: u32,
    ) -> Self {
        Self {
            symbol: normalize_symbol(&symbol.into()),
            contract_size,
            pip_size,
            price_decimals,
        }
    }

    /// Standard currency pair: 100k units per lot, 4th-decimal pip.
    pub fn currency_pair(symbol: impl Into<String>) -> Self {
        Self::new(symbol, dec!(100000), dec!(0.0001), 5)
    }

    /// Round a price to this instrument's display precision.
    pub fn format_price(&self, price: Decimal) -> String {
        format!("{:.*}", self.price_decimals as usize, price.round_dp(self.price_decimals))
    }

    /// Absolute distance between two prices, in pips.
    pub fn pips_between(&self, a: Decimal, b: Decimal) -> Decimal {
        if self.pip_size.is_zero() {
            return Decimal::ZERO;
        }
        (b - a).abs() / self.pip_size
    }
}

/// Symbol -> contract spec lookup with a fallback for unknown symbols.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentTable {
    specs: HashMap<String, InstrumentSpec>,
    fallback: InstrumentSpec,
}

impl Default for InstrumentTable {
    fn default() -> Self {
        let mut table = Self::empty();
        for pair in ["EURUSD", "GBPUSD", "AUDUSD", "NZDUSD", "USDCAD", "USDCHF"] {
            table.insert(InstrumentSpec::currency_pair(pair));
        }
        table.insert(InstrumentSpec::new("USDJPY", dec!(100000), dec!(0.01), 3));
        table.insert(InstrumentSpec::new("XAUUSD", dec!(100), dec!(0.01), 2));
        table
    }
}

impl InstrumentTable {
    /// Table holding only the currency-pair fallback.
    pub fn empty() -> Self {
        Self {
            specs: HashMap::new(),
            fallback: InstrumentSpec::currency_pair("*"),
        }
    }

    /// Add or replace a spec.
    pub fn insert(&mut self, spec: InstrumentSpec) {
        self.specs.insert(spec.symbol.clone(), spec);
    }

    /// Spec for a symbol, falling back to currency-pair conventions.
    pub fn get(&self, symbol: &str) -> &InstrumentSpec {
        self.specs
            .get(&normalize_symbol(symbol))
            .unwrap_or(&self.fallback)
    }

    /// Whether the symbol has an explicit entry.
    pub fn contains(&self, symbol: &str) -> bool {
        self.specs.contains_key(&normalize_symbol(symbol))
    }

    pub fn contract_size(&self, symbol: &str) -> Decimal {
        self.get(symbol).contract_size
    }

    pub fn format_price(&self, symbol: &str, price: Decimal) -> String {
        self.get(symbol).format_price(price)
    }

    pub fn pips_between(&self, symbol: &str, a: Decimal, b: Decimal) -> Decimal {
        self.get(symbol).pips_between(a, b)
    }

    /// Explicit entries sorted by symbol.
    pub fn specs(&self) -> Vec<&InstrumentSpec> {
        let mut specs: Vec<_> = self.specs.values().collect();
        specs.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        specs
    }
}

/// Canonical symbol form used as map key.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}
