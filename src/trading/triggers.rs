//! Stop-loss and take-profit evaluation.
//!
//! Stop-loss is checked first; when it fires, take-profit is not looked at
//! for that position in the same pass. Exits happen at the trigger level,
//! not at the tick price that crossed it.

use rust_decimal::Decimal;

use crate::models::{CloseReason, Position, Side};

/// Which protective level fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    StopLoss,
    TakeProfit,
}

impl TriggerKind {
    pub fn close_reason(&self) -> CloseReason {
        match self {
            TriggerKind::StopLoss => CloseReason::StopLoss,
            TriggerKind::TakeProfit => CloseReason::TakeProfit,
        }
    }
}

/// A fired trigger and the price to close at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerHit {
    pub kind: TriggerKind,
    pub exit_price: Decimal,
}

/// Check a position's levels against an observed price.
///
/// Non-positive prices and non-positive levels never fire.
pub fn evaluate(position: &Position, price: Decimal) -> Option<TriggerHit> {
    if price <= Decimal::ZERO {
        return None;
    }

    if let Some(stop) = position.stop_loss.filter(|s| *s > Decimal::ZERO) {
        let hit = match position.side {
            Side::Buy => price <= stop,
            Side::Sell => price >= stop,
        };
        if hit {
            return Some(TriggerHit {
                kind: TriggerKind::StopLoss,
                exit_price: stop,
            });
        }
    }

    if let Some(target) = position.take_profit.filter(|t| *t > Decimal::ZERO) {
        let hit = match position.side {
            Side::Buy => price >= target,
            Side::Sell => price <= target,
        };
        if hit {
            return Some(TriggerHit {
                kind: TriggerKind::TakeProfit,
                exit_price: target,
            });
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_position(side: Side, sl: Option<Decimal>, tp: Option<Decimal>) -> Position {
        Position {
            id: "t".to_string(),
            symbol: "EURUSD".to_string(),
            side,
            size: dec!(0.1),
            entry_price: dec!(1.1000),
            current_price: dec!(1.1000),
            unrealized_pnl: Decimal::ZERO,
            opened_at: 0,
            stop_loss: sl,
            take_profit: tp,
        }
    }

    #[test]
    fn test_buy_stop_loss_exits_at_stop() {
        let pos = make_position(Side::Buy, Some(dec!(1.0950)), None);
        let hit = evaluate(&pos, dec!(1.0945)).unwrap();
        assert_eq!(hit.kind, TriggerKind::StopLoss);
        assert_eq!(hit.exit_price, dec!(1.0950));

        // Touching the level counts
        assert!(evaluate(&pos, dec!(1.0950)).is_some());
        assert!(evaluate(&pos, dec!(1.0951)).is_none());
    }

    #[test]
    fn test_sell_levels_are_mirrored() {
        let pos = make_position(Side::Sell, Some(dec!(1.1050)), Some(dec!(1.0900)));
        assert_eq!(evaluate(&pos, dec!(1.1060)).unwrap().kind, TriggerKind::StopLoss);
        assert_eq!(evaluate(&pos, dec!(1.0890)).unwrap().kind, TriggerKind::TakeProfit);
        assert!(evaluate(&pos, dec!(1.1000)).is_none());
    }

    #[test]
    fn test_stop_loss_has_priority() {
        // Crossed levels: any price satisfies both conditions
        let pos = make_position(Side::Buy, Some(dec!(1.1100)), Some(dec!(1.0900)));
        let hit = evaluate(&pos, dec!(1.1000)).unwrap();
        assert_eq!(hit.kind, TriggerKind::StopLoss);
        assert_eq!(hit.exit_price, dec!(1.1100));
    }

    #[test]
    fn test_invalid_inputs_never_fire() {
        let pos = make_position(Side::Sell, Some(dec!(-1)), Some(Decimal::ZERO));
        assert!(evaluate(&pos, dec!(1.2)).is_none());

        let pos = make_position(Side::Buy, Some(dec!(1.0950)), None);
        assert!(evaluate(&pos, Decimal::ZERO).is_none());
    }
}
