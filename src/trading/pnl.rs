//! Profit/loss of a position at a given price.

use rust_decimal::Decimal;

use crate::models::{InstrumentTable, Position};

/// Signed P&L of `position` if marked at `current_price`, in account currency.
///
/// `(current - entry) * contract_size * lots`, negated for shorts. A
/// non-positive price is not a valid mark; the stored P&L is returned as-is.
/// No rounding is applied.
pub fn calculate_pnl(
    position: &Position,
    current_price: Decimal,
    instruments: &InstrumentTable,
) -> Decimal {
    if current_price <= Decimal::ZERO {
        return position.unrealized_pnl;
    }

    let price_difference = current_price - position.entry_price;
    let contract_size = instruments.contract_size(&position.symbol);

    position.side.sign() * price_difference * contract_size * position.size
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;
    use rust_decimal_macros::dec;

    fn make_position(symbol: &str, side: Side, size: Decimal, entry: Decimal) -> Position {
        Position {
            id: "test".to_string(),
            symbol: symbol.to_string(),
            side,
            size,
            entry_price: entry,
            current_price: entry,
            unrealized_pnl: Decimal::ZERO,
            opened_at: 0,
            stop_loss: None,
            take_profit: None,
        }
    }

    #[test]
    fn test_currency_pair_buy() {
        let table = InstrumentTable::default();
        let pos = make_position("EURUSD", Side::Buy, dec!(0.10), dec!(1.10000));

        // 0.0005 * 100000 * 0.10 = 5
        assert_eq!(calculate_pnl(&pos, dec!(1.10050), &table), dec!(5.00));
        assert_eq!(calculate_pnl(&pos, dec!(1.09950), &table), dec!(-5.00));
    }

    #[test]
    fn test_metal_sell_profits_on_fall() {
        let table = InstrumentTable::default();
        let pos = make_position("XAUUSD", Side::Sell, dec!(0.05), dec!(2000.00));

        // -(1990 - 2000) * 100 * 0.05 = 50
        assert_eq!(calculate_pnl(&pos, dec!(1990.00), &table), dec!(50.00));
    }

    #[test]
    fn test_sell_is_negation_of_buy() {
        let table = InstrumentTable::default();
        let buy = make_position("GBPUSD", Side::Buy, dec!(1.3), dec!(1.25431));
        let sell = make_position("GBPUSD", Side::Sell, dec!(1.3), dec!(1.25431));

        for price in [dec!(1.2), dec!(1.25431), dec!(1.30017), dec!(0.00001)] {
            let long = calculate_pnl(&buy, price, &table);
            let short = calculate_pnl(&sell, price, &table);
            assert_eq!(long, -short);
            assert_eq!(long > Decimal::ZERO, price > buy.entry_price);
        }
    }

    #[test]
    fn test_invalid_price_keeps_stored_pnl() {
        let table = InstrumentTable::default();
        let mut pos = make_position("EURUSD", Side::Buy, dec!(1), dec!(1.1));
        pos.unrealized_pnl = dec!(42.5);

        assert_eq!(calculate_pnl(&pos, Decimal::ZERO, &table), dec!(42.5));
        assert_eq!(calculate_pnl(&pos, dec!(-1.1), &table), dec!(42.5));
    }

    #[test]
    fn test_no_rounding_applied() {
        let table = InstrumentTable::default();
        let pos = make_position("EURUSD", Side::Buy, dec!(0.01), dec!(1.10000));

        // 0.00001 * 100000 * 0.01 = 0.01; one more digit stays exact
        assert_eq!(calculate_pnl(&pos, dec!(1.100013), &table), dec!(0.013));
    }
}
