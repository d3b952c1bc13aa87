//! Calculator for closed-position statistics: win rate, profit factor, dispersion.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use statrs::statistics::Statistics;

use crate::models::{ClosedPosition, HistoryStats};

/// Computes [`HistoryStats`] from a ledger history.
pub struct StatsCalculator;

impl StatsCalculator {
    /// Calculate statistics over closed positions (any order).
    pub fn calculate<'a, I>(history: I) -> HistoryStats
    where
        I: IntoIterator<Item = &'a ClosedPosition>,
    {
        let history: Vec<&ClosedPosition> = history.into_iter().collect();
        let mut stats = HistoryStats::default();

        if history.is_empty() {
            return stats;
        }

        stats.total_trades = history.len() as u32;

        for closed in &history {
            *stats.by_reason.entry(closed.reason()).or_insert(0) += 1;
        }

        let pnls: Vec<Decimal> = history.iter().map(|c| c.realized_pnl()).collect();
        Self::calculate_pnl_metrics(&mut stats, &pnls);

        let holding: Vec<f64> = history.iter().map(|c| c.holding_secs() as f64).collect();
        stats.avg_holding_secs = holding.mean();

        stats
    }

    /// Win/loss split and profit factor.
    fn calculate_pnl_metrics(stats: &mut HistoryStats, pnls: &[Decimal]) {
        let wins: Vec<Decimal> = pnls.iter().copied().filter(|p| *p > Decimal::ZERO).collect();
        let losses: Vec<Decimal> = pnls.iter().copied().filter(|p| *p < Decimal::ZERO).collect();

        stats.winning_trades = wins.len() as u32;
        stats.losing_trades = losses.len() as u32;
        stats.total_pnl = pnls.iter().copied().sum();
        stats.win_rate = wins.len() as f64 / pnls.len() as f64;

        stats.gross_profit = wins.iter().copied().sum();
        stats.gross_loss = losses.iter().map(|l| l.abs()).sum();

        if !wins.is_empty() {
            stats.avg_win = stats.gross_profit / Decimal::from(wins.len() as u32);
            stats.largest_win = wins.iter().copied().max().unwrap_or(Decimal::ZERO);
        }
        if !losses.is_empty() {
            stats.avg_loss = stats.gross_loss / Decimal::from(losses.len() as u32);
            stats.largest_loss = losses.iter().copied().min().unwrap_or(Decimal::ZERO);
        }

        stats.profit_factor = if stats.gross_loss > Decimal::ZERO {
            stats.gross_profit.to_f64().unwrap_or(0.0) / stats.gross_loss.to_f64().unwrap_or(1.0)
        } else if stats.gross_profit > Decimal::ZERO {
            f64::INFINITY
        } else {
            0.0
        };

        if pnls.len() >= 2 {
            let values: Vec<f64> = pnls.iter().filter_map(|p| p.to_f64()).collect();
            stats.pnl_std_dev = values.std_dev();
        }
    }
}
