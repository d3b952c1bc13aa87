//! Error types for ledger operations.

use thiserror::Error;

/// Errors a ledger operation can reject with. State is untouched on error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// No positive quote could be resolved for an open or close
    #[error("no price available for {symbol}")]
    PriceUnavailable {
        /// Instrument that lacked a quote
        symbol: String,
    },

    /// Referenced position is no longer open
    #[error("position not found: {0}")]
    PositionNotFound(String),

    /// Non-positive size or price supplied to open
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),
}

impl LedgerError {
    /// Whether the UI should show this error to the user.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, LedgerError::PositionNotFound(_))
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
