//! Trading logic: P&L, protective triggers, and the position ledger.

mod config;
mod ledger;
mod pnl;
mod triggers;

pub use config::LedgerConfig;
pub use ledger::{BulkCloseOutcome, BulkFilter, PositionLedger, SinkId};
pub use pnl::calculate_pnl;
pub use triggers::{evaluate, TriggerHit, TriggerKind};
