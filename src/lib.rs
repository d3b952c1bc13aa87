//! Position ledger and account equity model for a demo trading terminal.
//!
//! Tracks open positions against a live price feed, marks them to market,
//! closes them on stop-loss/take-profit triggers or on request, and keeps a
//! realized balance with a closed-trade history.

pub mod db;
pub mod error;
pub mod feed;
pub mod metrics;
pub mod models;
pub mod notify;
pub mod session;
pub mod trading;

pub use error::{LedgerError, LedgerResult};
pub use session::{Command, Session, SessionHandle, StopReason};
pub use trading::{BulkCloseOutcome, BulkFilter, LedgerConfig, PositionLedger};
