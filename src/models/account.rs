//! Account summary derived from the ledger.

use std::fmt;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Round a cash amount to cents for display. Halves round away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    // Keep "-0.00" out of the output
    if rounded.is_zero() {
        Decimal::ZERO
    } else {
        rounded
    }
}

/// Point-in-time view of the account. Equity is derived, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    /// Realized cash, changes only when positions close
    pub balance: Decimal,

    /// Balance plus unrealized P&L of open positions
    pub equity: Decimal,

    /// Sum of unrealized P&L over open positions
    pub unrealized_pnl: Decimal,

    pub open_positions: usize,

    pub closed_positions: usize,
}

impl AccountSummary {
    pub fn new(
        balance: Decimal,
        unrealized_pnl: Decimal,
        open_positions: usize,
        closed_positions: usize,
    ) -> Self {
        Self {
            balance,
            equity: balance + unrealized_pnl,
            unrealized_pnl,
            open_positions,
            closed_positions,
        }
    }
}

impl fmt::Display for AccountSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n{:=^50}", " ACCOUNT ")?;
        writeln!(f, "Balance:          ${:.2}", round_money(self.balance))?;
        writeln!(f, "Equity:           ${:.2}", round_money(self.equity))?;
        writeln!(f, "Unrealized P&L:   ${:.2}", round_money(self.unrealized_pnl))?;
        writeln!(f, "Open Positions:   {}", self.open_positions)?;
        writeln!(f, "Closed Positions: {}", self.closed_positions)?;
        writeln!(f, "{:=^50}", "")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_equity_is_balance_plus_unrealized() {
        let summary = AccountSummary::new(dec!(10000), dec!(-12.5), 2, 0);
        assert_eq!(summary.equity, dec!(9987.5));
    }

    #[test]
    fn test_money_rounds_to_cents() {
        assert_eq!(round_money(dec!(4.999)), dec!(5.00));
        assert_eq!(round_money(dec!(-0.005)), dec!(-0.01));
        assert_eq!(round_money(dec!(2.345)), dec!(2.35));
        assert_eq!(format!("{:.2}", round_money(dec!(-0.004))), "0.00");
    }

    #[test]
    fn test_display_rounds_instead_of_truncating() {
        let summary = AccountSummary::new(dec!(9999.999), dec!(4.999), 1, 0);
        let text = summary.to_string();
        assert!(text.contains("Balance:          $10000.00"), "{}", text);
        assert!(text.contains("Unrealized P&L:   $5.00"), "{}", text);
        assert!(text.contains("Equity:           $10005.00"), "{}", text);
    }
}
