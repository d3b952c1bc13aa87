//! Data models for positions, instruments, quotes, and account state.

mod account;
mod instrument;
mod metrics;
mod position;
mod quote;
mod trade;

pub use account::{round_money, AccountSummary};
pub use instrument::{normalize_symbol, InstrumentSpec, InstrumentTable};
pub use metrics::HistoryStats;
pub use position::{CloseReason, ClosedPosition, Position};
pub use quote::{freshest_price, PriceUpdate, Quote};
pub use trade::{OpenRequest, Side, TriggerUpdate};
