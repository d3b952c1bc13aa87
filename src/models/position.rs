//! Open and closed position records.

use std::fmt;

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{round_money, Side};

/// An open trade being marked to market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Opaque unique identifier
    pub id: String,

    /// Instrument symbol (upper case)
    pub symbol: String,

    /// Trade direction
    pub side: Side,

    /// Lot quantity, always positive
    pub size: Decimal,

    /// Fill price at open
    pub entry_price: Decimal,

    /// Last marked price
    pub current_price: Decimal,

    /// P&L at `current_price` in account currency
    #[serde(default)]
    pub unrealized_pnl: Decimal,

    /// Open time, epoch seconds
    pub opened_at: i64,

    #[serde(default)]
    pub stop_loss: Option<Decimal>,

    #[serde(default)]
    pub take_profit: Option<Decimal>,
}

impl Position {
    /// Whether the last mark shows a non-negative P&L.
    pub fn is_profitable(&self) -> bool {
        self.unrealized_pnl >= Decimal::ZERO
    }

    fn opened_label(&self) -> String {
        Utc.timestamp_opt(self.opened_at, 0)
            .single()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| self.opened_at.to_string())
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<10} {:<4} {:>6} @ {} -> {} (P&L: ${:.2}) opened {}",
            self.symbol,
            self.side,
            self.size,
            self.entry_price,
            self.current_price,
            round_money(self.unrealized_pnl),
            self.opened_label()
        )?;
        if let Some(sl) = self.stop_loss {
            write!(f, " SL {}", sl)?;
        }
        if let Some(tp) = self.take_profit {
            write!(f, " TP {}", tp)?;
        }
        Ok(())
    }
}

/// Why a position left the open set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Manual,
    StopLoss,
    TakeProfit,
    Bulk,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Manual => "manual",
            CloseReason::StopLoss => "stop_loss",
            CloseReason::TakeProfit => "take_profit",
            CloseReason::Bulk => "bulk",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(CloseReason::Manual),
            "stop_loss" => Some(CloseReason::StopLoss),
            "take_profit" => Some(CloseReason::TakeProfit),
            "bulk" => Some(CloseReason::Bulk),
            _ => None,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settled trade in the account history.
///
/// Built once by the ledger's close path; fields are read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedPosition {
    position: Position,
    close_price: Decimal,
    closed_at: i64,
    realized_pnl: Decimal,
    reason: CloseReason,
}

impl ClosedPosition {
    pub(crate) fn new(
        mut position: Position,
        close_price: Decimal,
        closed_at: i64,
        realized_pnl: Decimal,
        reason: CloseReason,
    ) -> Self {
        position.current_price = close_price;
        position.unrealized_pnl = realized_pnl;
        Self {
            closed_at: closed_at.max(position.opened_at),
            position,
            close_price,
            realized_pnl,
            reason,
        }
    }

    pub fn id(&self) -> &str {
        &self.position.id
    }

    pub fn symbol(&self) -> &str {
        &self.position.symbol
    }

    pub fn side(&self) -> Side {
        self.position.side
    }

    pub fn size(&self) -> Decimal {
        self.position.size
    }

    pub fn entry_price(&self) -> Decimal {
        self.position.entry_price
    }

    pub fn opened_at(&self) -> i64 {
        self.position.opened_at
    }

    pub fn stop_loss(&self) -> Option<Decimal> {
        self.position.stop_loss
    }

    pub fn take_profit(&self) -> Option<Decimal> {
        self.position.take_profit
    }

    pub fn close_price(&self) -> Decimal {
        self.close_price
    }

    pub fn closed_at(&self) -> i64 {
        self.closed_at
    }

    /// Final P&L applied to the balance.
    pub fn realized_pnl(&self) -> Decimal {
        self.realized_pnl
    }

    pub fn reason(&self) -> CloseReason {
        self.reason
    }

    /// Seconds the position was held.
    pub fn holding_secs(&self) -> i64 {
        self.closed_at - self.position.opened_at
    }

    /// The position as it stood when it was closed.
    pub fn position(&self) -> &Position {
        &self.position
    }
}

impl fmt::Display for ClosedPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pnl = round_money(self.realized_pnl);
        let pnl_sign = if pnl >= Decimal::ZERO { "+" } else { "" };
        write!(
            f,
            "{:<10} {:<4} {:>6} @ {} -> {} ({}${:.2}) [{}]",
            self.position.symbol,
            self.position.side,
            self.position.size,
            self.position.entry_price,
            self.close_price,
            pnl_sign,
            pnl,
            self.reason
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample() -> Position {
        Position {
            id: "p-1".to_string(),
            symbol: "EURUSD".to_string(),
            side: Side::Buy,
            size: dec!(0.10),
            entry_price: dec!(1.10000),
            current_price: dec!(1.10000),
            unrealized_pnl: Decimal::ZERO,
            opened_at: 1_700_000_000,
            stop_loss: None,
            take_profit: None,
        }
    }

    #[test]
    fn test_closed_position_carries_final_mark() {
        let closed = ClosedPosition::new(
            sample(),
            dec!(1.10050),
            1_700_000_060,
            dec!(5.00),
            CloseReason::Manual,
        );

        assert_eq!(closed.close_price(), dec!(1.10050));
        assert_eq!(closed.position().current_price, dec!(1.10050));
        assert_eq!(closed.realized_pnl(), dec!(5.00));
        assert_eq!(closed.holding_secs(), 60);
    }

    #[test]
    fn test_display_rounds_pnl_to_cents() {
        let closed = ClosedPosition::new(
            sample(),
            dec!(1.10050),
            1_700_000_060,
            dec!(4.999),
            CloseReason::TakeProfit,
        );
        assert!(closed.to_string().contains("(+$5.00) [take_profit]"), "{}", closed);

        let mut open = sample();
        open.unrealized_pnl = dec!(-0.005);
        assert!(open.to_string().contains("(P&L: $-0.01)"), "{}", open);
    }

    #[test]
    fn test_close_time_never_precedes_open() {
        let closed = ClosedPosition::new(
            sample(),
            dec!(1.1),
            1_600_000_000,
            Decimal::ZERO,
            CloseReason::Manual,
        );
        assert_eq!(closed.closed_at(), closed.opened_at());
    }

    #[test]
    fn test_close_reason_round_trip_str() {
        for reason in [
            CloseReason::Manual,
            CloseReason::StopLoss,
            CloseReason::TakeProfit,
            CloseReason::Bulk,
        ] {
            assert_eq!(CloseReason::parse(reason.as_str()), Some(reason));
        }
    }
}
