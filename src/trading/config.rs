//! Ledger and session configuration.

use std::time::Duration;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::models::{normalize_symbol, InstrumentSpec, InstrumentTable};

// Largest scale a Decimal can carry
const MAX_PRICE_DECIMALS: u32 = 28;

/// Configuration for the position ledger and the session around it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Starting realized balance
    pub initial_balance: Decimal,

    /// How long to wait for a fresh quote before falling back to the last known price
    pub quote_timeout_ms: u64,

    /// Number of recent quotes requested when resolving a price
    pub quote_lookback: usize,

    /// Base URL of the HTTP quote service; mock feed when unset
    pub feed_url: Option<String>,

    /// Polling cadence of the HTTP feed subscription
    pub feed_poll_ms: u64,

    /// Symbols the feed subscription streams
    pub watch_symbols: Vec<String>,

    /// SQLite URL for account snapshots
    pub database_url: String,

    /// Instrument overrides layered on top of the built-in table
    #[serde(default)]
    pub instruments: Vec<InstrumentSpec>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            initial_balance: dec!(10000),
            quote_timeout_ms: 2000,
            quote_lookback: 1,
            feed_url: None,
            feed_poll_ms: 1000,
            watch_symbols: vec!["EURUSD".to_string(), "XAUUSD".to_string()],
            database_url: "sqlite:./ledger.db?mode=rwc".to_string(),
            instruments: Vec::new(),
        }
    }
}

impl LedgerConfig {
    /// Build from `LEDGER_*` environment variables, defaulting anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("LEDGER_INITIAL_BALANCE") {
            config.initial_balance = v
                .trim()
                .parse()
                .context("Invalid LEDGER_INITIAL_BALANCE")?;
        }
        if let Ok(v) = std::env::var("LEDGER_QUOTE_TIMEOUT_MS") {
            config.quote_timeout_ms = v.trim().parse().context("Invalid LEDGER_QUOTE_TIMEOUT_MS")?;
        }
        if let Ok(v) = std::env::var("LEDGER_QUOTE_LOOKBACK") {
            config.quote_lookback = v.trim().parse().context("Invalid LEDGER_QUOTE_LOOKBACK")?;
        }
        if let Ok(v) = std::env::var("LEDGER_FEED_URL") {
            if !v.trim().is_empty() {
                config.feed_url = Some(v.trim().trim_end_matches('/').to_string());
            }
        }
        if let Ok(v) = std::env::var("LEDGER_FEED_POLL_MS") {
            config.feed_poll_ms = v.trim().parse().context("Invalid LEDGER_FEED_POLL_MS")?;
        }
        if let Ok(v) = std::env::var("LEDGER_WATCH_SYMBOLS") {
            config.watch_symbols = parse_symbol_list(&v);
        }
        if let Ok(v) = std::env::var("LEDGER_DATABASE_URL") {
            config.database_url = v;
        }
        if let Ok(v) = std::env::var("LEDGER_INSTRUMENTS") {
            config.instruments =
                serde_json::from_str(&v).context("Invalid LEDGER_INSTRUMENTS JSON")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the ledger cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.initial_balance < Decimal::ZERO {
            anyhow::bail!("initial balance must not be negative: {}", self.initial_balance);
        }
        if self.quote_lookback == 0 {
            anyhow::bail!("quote lookback must be at least 1");
        }
        if self.feed_poll_ms == 0 {
            anyhow::bail!("feed poll interval must be positive");
        }
        for spec in &self.instruments {
            if spec.contract_size <= Decimal::ZERO {
                anyhow::bail!("contract size for {} must be positive", spec.symbol);
            }
            if spec.price_decimals > MAX_PRICE_DECIMALS {
                anyhow::bail!(
                    "price decimals for {} must be at most {}, got {}",
                    spec.symbol,
                    MAX_PRICE_DECIMALS,
                    spec.price_decimals
                );
            }
        }
        Ok(())
    }

    pub fn quote_timeout(&self) -> Duration {
        Duration::from_millis(self.quote_timeout_ms)
    }

    pub fn feed_poll_interval(&self) -> Duration {
        Duration::from_millis(self.feed_poll_ms)
    }

    /// Built-in instruments with configured overrides applied.
    pub fn instrument_table(&self) -> InstrumentTable {
        let mut table = InstrumentTable::default();
        for spec in &self.instruments {
            table.insert(InstrumentSpec::new(
                spec.symbol.clone(),
                spec.contract_size,
                spec.pip_size,
                spec.price_decimals,
            ));
        }
        table
    }
}

fn parse_symbol_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(normalize_symbol)
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LedgerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.quote_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_parse_symbol_list() {
        assert_eq!(
            parse_symbol_list(" eurusd, XAUUSD ,,gbpusd"),
            vec!["EURUSD", "XAUUSD", "GBPUSD"]
        );
    }

    #[test]
    fn test_instrument_overrides_applied() {
        let config = LedgerConfig {
            instruments: serde_json::from_str(
                r#"[{"symbol":"xagusd","contract_size":"5000","pip_size":"0.001","price_decimals":3}]"#,
            )
            .unwrap(),
            ..LedgerConfig::default()
        };

        let table = config.instrument_table();
        assert_eq!(table.contract_size("XAGUSD"), dec!(5000));
        assert_eq!(table.contract_size("XAUUSD"), dec!(100));
    }

    #[test]
    fn test_zero_contract_size_rejected() {
        let mut config = LedgerConfig::default();
        config.instruments.push(InstrumentSpec::new("BAD", Decimal::ZERO, dec!(0.01), 2));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_price_decimals_bounded_by_decimal_scale() {
        let mut config = LedgerConfig::default();
        config.instruments.push(InstrumentSpec::new("BTCUSD", dec!(1), dec!(0.01), 28));
        assert!(config.validate().is_ok());

        config.instruments.push(InstrumentSpec::new("BAD", dec!(1), dec!(0.01), 1_000_000));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("BAD"), "{}", err);
    }
}
