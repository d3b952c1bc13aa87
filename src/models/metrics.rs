//! Performance statistics over the closed-position history.

use std::collections::HashMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{round_money, CloseReason};

/// Aggregate statistics for settled trades.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryStats {
    // === Basic Statistics ===
    /// Number of closed positions
    pub total_trades: u32,

    /// Sum of realized P&L
    pub total_pnl: Decimal,

    // === Win/Loss Metrics ===
    /// Trades closed with P&L > 0
    pub winning_trades: u32,

    /// Trades closed with P&L < 0
    pub losing_trades: u32,

    /// Win rate (0.0 to 1.0)
    pub win_rate: f64,

    pub gross_profit: Decimal,

    /// Absolute value of summed losses
    pub gross_loss: Decimal,

    /// Gross profit / gross loss; infinite when there are no losses
    pub profit_factor: f64,

    pub avg_win: Decimal,

    /// Average loss (absolute value)
    pub avg_loss: Decimal,

    pub largest_win: Decimal,

    /// Most negative realized P&L
    pub largest_loss: Decimal,

    // === Dispersion ===
    /// Sample standard deviation of per-trade P&L
    pub pnl_std_dev: f64,

    /// Mean holding time in seconds
    pub avg_holding_secs: f64,

    /// Trade counts by close reason
    pub by_reason: HashMap<CloseReason, u32>,
}

impl HistoryStats {
    pub fn count_for(&self, reason: CloseReason) -> u32 {
        self.by_reason.get(&reason).copied().unwrap_or(0)
    }
}

impl fmt::Display for HistoryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n{:=^50}", " HISTORY ")?;
        writeln!(f, "Total Trades:   {}", self.total_trades)?;
        writeln!(f, "Realized P&L:   ${:.2}", round_money(self.total_pnl))?;
        writeln!(f)?;
        writeln!(f, "--- Win/Loss ---")?;
        writeln!(f, "Winners:        {} ({:.1}%)", self.winning_trades, self.win_rate * 100.0)?;
        writeln!(f, "Losers:         {}", self.losing_trades)?;
        writeln!(f, "Avg Win:        ${:.2}", round_money(self.avg_win))?;
        writeln!(f, "Avg Loss:       ${:.2}", round_money(self.avg_loss))?;
        writeln!(f, "Largest Win:    ${:.2}", round_money(self.largest_win))?;
        writeln!(f, "Largest Loss:   ${:.2}", round_money(self.largest_loss))?;
        writeln!(f, "Profit Factor:  {:.2}", self.profit_factor)?;
        writeln!(f, "P&L Std Dev:    {:.2}", self.pnl_std_dev)?;
        writeln!(f)?;
        writeln!(f, "--- Exits ---")?;
        writeln!(f, "Manual:         {}", self.count_for(CloseReason::Manual))?;
        writeln!(f, "Stop Loss:      {}", self.count_for(CloseReason::StopLoss))?;
        writeln!(f, "Take Profit:    {}", self.count_for(CloseReason::TakeProfit))?;
        writeln!(f, "Bulk:           {}", self.count_for(CloseReason::Bulk))?;
        writeln!(f, "{:=^50}", "")?;
        Ok(())
    }
}
