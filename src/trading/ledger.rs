//! Position ledger: open positions, realized balance, and closed history.
//!
//! Every position moves `OPEN -> CLOSED` exactly once. All operations either
//! apply their full state change or leave the ledger untouched and emit a
//! rejection notice; nothing is ever half-applied.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::metrics::StatsCalculator;
use crate::models::{
    normalize_symbol, AccountSummary, CloseReason, ClosedPosition, HistoryStats, InstrumentTable,
    OpenRequest, Position, PriceUpdate, TriggerUpdate,
};
use crate::notify::{Notification, NotificationSink};

use super::pnl::calculate_pnl;
use super::triggers;

/// Which open positions a bulk close selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkFilter {
    All,
    /// Live P&L >= 0
    Profitable,
    /// Live P&L < 0
    Losing,
}

impl BulkFilter {
    pub fn matches(&self, pnl: Decimal) -> bool {
        match self {
            BulkFilter::All => true,
            BulkFilter::Profitable => pnl >= Decimal::ZERO,
            BulkFilter::Losing => pnl < Decimal::ZERO,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "all" => Some(BulkFilter::All),
            "profitable" | "winning" => Some(BulkFilter::Profitable),
            "losing" => Some(BulkFilter::Losing),
            _ => None,
        }
    }
}

impl fmt::Display for BulkFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BulkFilter::All => write!(f, "all"),
            BulkFilter::Profitable => write!(f, "profitable"),
            BulkFilter::Losing => write!(f, "losing"),
        }
    }
}

/// Result of [`PositionLedger::bulk_close`].
#[derive(Debug, Clone, PartialEq)]
pub enum BulkCloseOutcome {
    /// The filter matched no open position
    NothingToClose,
    Closed {
        closed: Vec<ClosedPosition>,
        /// Selected positions that could not be priced
        failed: usize,
    },
}

impl BulkCloseOutcome {
    pub fn closed_count(&self) -> usize {
        match self {
            BulkCloseOutcome::NothingToClose => 0,
            BulkCloseOutcome::Closed { closed, .. } => closed.len(),
        }
    }

    pub fn realized(&self) -> Decimal {
        match self {
            BulkCloseOutcome::NothingToClose => Decimal::ZERO,
            BulkCloseOutcome::Closed { closed, .. } => {
                closed.iter().map(|c| c.realized_pnl()).sum()
            }
        }
    }
}

/// Handle returned by [`PositionLedger::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

/// Owns open positions, the realized balance, and the closed history.
pub struct PositionLedger {
    instruments: InstrumentTable,
    balance: Decimal,

    // Open positions in open order
    positions: Vec<Position>,

    // Most recent close first
    history: VecDeque<ClosedPosition>,

    // Latest positive price seen per symbol
    last_prices: HashMap<String, Decimal>,

    sinks: Vec<(SinkId, Arc<dyn NotificationSink>)>,
    next_sink_id: u64,
}

impl PositionLedger {
    /// Create an empty ledger with a starting balance.
    pub fn new(initial_balance: Decimal, instruments: InstrumentTable) -> Self {
        Self {
            instruments,
            balance: initial_balance,
            positions: Vec::new(),
            history: VecDeque::new(),
            last_prices: HashMap::new(),
            sinks: Vec::new(),
            next_sink_id: 1,
        }
    }

    /// Rebuild from a persisted balance and history (most recent first).
    pub fn restore(
        balance: Decimal,
        history: Vec<ClosedPosition>,
        instruments: InstrumentTable,
    ) -> Self {
        let mut ledger = Self::new(balance, instruments);
        ledger.history = history.into();
        ledger
    }

    // ==================== Observers ====================

    /// Register a notification sink; keep the id to unsubscribe later.
    pub fn subscribe(&mut self, sink: Arc<dyn NotificationSink>) -> SinkId {
        let id = SinkId(self.next_sink_id);
        self.next_sink_id += 1;
        self.sinks.push((id, sink));
        id
    }

    /// Remove a sink. Returns false when it was not registered.
    pub fn unsubscribe(&mut self, id: SinkId) -> bool {
        let before = self.sinks.len();
        self.sinks.retain(|(sid, _)| *sid != id);
        self.sinks.len() != before
    }

    fn emit(&self, notification: Notification) {
        for (_, sink) in &self.sinks {
            sink.notify(&notification);
        }
    }

    fn reject<T>(&self, action: &'static str, err: LedgerError) -> LedgerResult<T> {
        warn!(action, error = %err, "Ledger action rejected");
        if err.is_user_visible() {
            self.emit(Notification::Rejected {
                action,
                reason: err.to_string(),
            });
        }
        Err(err)
    }

    // ==================== Open ====================

    /// Open a position at a freshly fetched quote or the last known price.
    ///
    /// `fresh_quote` is used when positive; otherwise the latest price seen
    /// for the symbol. Fails with `PriceUnavailable` when neither exists.
    pub fn open(
        &mut self,
        request: OpenRequest,
        fresh_quote: Option<Decimal>,
    ) -> LedgerResult<Position> {
        let symbol = normalize_symbol(&request.symbol);

        if symbol.is_empty() {
            return self.reject(
                "open trade",
                LedgerError::InvalidQuantity("symbol must not be empty".to_string()),
            );
        }
        if request.size <= Decimal::ZERO {
            return self.reject(
                "open trade",
                LedgerError::InvalidQuantity(format!("size must be positive, got {}", request.size)),
            );
        }
        for (name, level) in [("stop loss", request.stop_loss), ("take profit", request.take_profit)] {
            if let Some(price) = level {
                if price <= Decimal::ZERO {
                    return self.reject(
                        "open trade",
                        LedgerError::InvalidQuantity(format!("{} must be positive, got {}", name, price)),
                    );
                }
            }
        }

        let entry_price = match fresh_quote
            .filter(|p| *p > Decimal::ZERO)
            .or_else(|| self.last_price(&symbol))
        {
            Some(price) => price,
            None => {
                return self.reject("open trade", LedgerError::PriceUnavailable { symbol });
            }
        };

        self.last_prices.insert(symbol.clone(), entry_price);

        let position = Position {
            id: Uuid::new_v4().to_string(),
            symbol,
            side: request.side,
            size: request.size,
            entry_price,
            current_price: entry_price,
            unrealized_pnl: Decimal::ZERO,
            opened_at: Utc::now().timestamp(),
            stop_loss: request.stop_loss,
            take_profit: request.take_profit,
        };

        info!(
            id = %position.id,
            symbol = %position.symbol,
            side = %position.side,
            size = %position.size,
            price = %position.entry_price,
            "Opened position"
        );

        self.positions.push(position.clone());
        self.emit(Notification::TradeOpened(position.clone()));

        Ok(position)
    }

    // ==================== Price Updates ====================

    /// Re-mark every open position whose symbol appears in `update`.
    ///
    /// Balance is not touched. Applying the same update twice is a no-op the
    /// second time.
    pub fn mark_to_market(&mut self, update: &PriceUpdate) {
        let prices = normalize_update(update);

        for (symbol, price) in &prices {
            self.last_prices.insert(symbol.clone(), *price);
        }

        for position in &mut self.positions {
            if let Some(&price) = prices.get(&position.symbol) {
                position.unrealized_pnl = calculate_pnl(position, price, &self.instruments);
                position.current_price = price;
            }
        }

        debug!(symbols = prices.len(), open = self.positions.len(), "Marked to market");
    }

    /// Close every position whose stop-loss or take-profit fires at the
    /// prices in `update`. At most one trigger per position per call; open
    /// order decides which position closes first.
    pub fn check_triggers(&mut self, update: &PriceUpdate) -> Vec<ClosedPosition> {
        let prices = normalize_update(update);

        let hits: Vec<(String, triggers::TriggerHit)> = self
            .positions
            .iter()
            .filter_map(|p| {
                let price = *prices.get(&p.symbol)?;
                triggers::evaluate(p, price).map(|hit| (p.id.clone(), hit))
            })
            .collect();

        let mut closed = Vec::with_capacity(hits.len());
        for (id, hit) in hits {
            warn!(
                id = %id,
                trigger = ?hit.kind,
                price = %hit.exit_price,
                "Protective level triggered"
            );
            if let Ok(Some(record)) =
                self.close_with_reason(&id, Some(hit.exit_price), hit.kind.close_reason())
            {
                closed.push(record);
            }
        }

        closed
    }

    /// Mark to market, then run the trigger check, for one feed tick.
    pub fn apply_price_update(&mut self, update: &PriceUpdate) -> Vec<ClosedPosition> {
        self.mark_to_market(update);
        self.check_triggers(update)
    }

    // ==================== Close ====================

    /// Manually close a position.
    ///
    /// See [`PositionLedger::close_with_reason`] for price resolution.
    pub fn close(
        &mut self,
        id: &str,
        close_price: Option<Decimal>,
    ) -> LedgerResult<Option<ClosedPosition>> {
        self.close_with_reason(id, close_price, CloseReason::Manual)
    }

    /// Shared close path for manual, trigger-driven, and bulk closes.
    ///
    /// Close price: a positive override, else the latest known price for the
    /// symbol, else the position's last mark. Returns `Ok(None)` when the id
    /// is not open (already closed or never existed).
    pub fn close_with_reason(
        &mut self,
        id: &str,
        close_price: Option<Decimal>,
        reason: CloseReason,
    ) -> LedgerResult<Option<ClosedPosition>> {
        // Closing something already settled is a silent no-op
        let index = match self.find_open(id) {
            Ok(index) => index,
            Err(e) => {
                debug!(error = %e, "Close ignored");
                return Ok(None);
            }
        };

        let position = &self.positions[index];
        let resolved = close_price
            .filter(|p| *p > Decimal::ZERO)
            .or_else(|| self.last_price(&position.symbol))
            .or_else(|| Some(position.current_price).filter(|p| *p > Decimal::ZERO));

        let Some(price) = resolved else {
            let symbol = position.symbol.clone();
            return self.reject("close trade", LedgerError::PriceUnavailable { symbol });
        };

        let final_pnl = calculate_pnl(position, price, &self.instruments);
        let position = self.positions.remove(index);
        let record = ClosedPosition::new(position, price, Utc::now().timestamp(), final_pnl, reason);

        self.balance += final_pnl;
        self.history.push_front(record.clone());

        info!(
            id = %record.id(),
            symbol = %record.symbol(),
            price = %price,
            pnl = %final_pnl,
            reason = %reason,
            balance = %self.balance,
            "Closed position"
        );

        self.emit(Notification::TradeClosed(record.clone()));
        Ok(Some(record))
    }

    /// Close every open position selected by `filter` at its known price.
    pub fn bulk_close(&mut self, filter: BulkFilter) -> BulkCloseOutcome {
        let selected: Vec<String> = self
            .positions
            .iter()
            .filter(|p| filter.matches(p.unrealized_pnl))
            .map(|p| p.id.clone())
            .collect();

        if selected.is_empty() {
            info!(filter = %filter, "Bulk close matched no positions");
            self.emit(Notification::NothingToClose { filter });
            return BulkCloseOutcome::NothingToClose;
        }

        let mut closed = Vec::with_capacity(selected.len());
        let mut failed = 0;

        for id in selected {
            match self.close_with_reason(&id, None, CloseReason::Bulk) {
                Ok(Some(record)) => closed.push(record),
                Ok(None) => {}
                Err(_) => failed += 1,
            }
        }

        let outcome = BulkCloseOutcome::Closed { closed, failed };
        self.emit(Notification::BulkClosed {
            filter,
            closed: outcome.closed_count(),
            failed,
            realized: outcome.realized(),
        });
        outcome
    }

    // ==================== Triggers ====================

    /// Replace stop-loss and take-profit on an open position.
    ///
    /// Returns false (and does nothing) when the position is not open.
    pub fn update_triggers(&mut self, id: &str, update: TriggerUpdate) -> bool {
        let index = match self.find_open(id) {
            Ok(index) => index,
            Err(e) => {
                debug!(error = %e, "Trigger update ignored");
                return false;
            }
        };
        let position = &mut self.positions[index];

        position.stop_loss = update.stop_loss;
        position.take_profit = update.take_profit;

        info!(
            id,
            stop_loss = ?update.stop_loss,
            take_profit = ?update.take_profit,
            "Updated protective levels"
        );

        self.emit(Notification::TriggersUpdated {
            id: id.to_string(),
            stop_loss: update.stop_loss,
            take_profit: update.take_profit,
        });
        true
    }

    fn find_open(&self, id: &str) -> LedgerResult<usize> {
        self.positions
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| LedgerError::PositionNotFound(id.to_string()))
    }

    // ==================== Accessors ====================

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn position(&self, id: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.id == id)
    }

    /// Closed positions, most recent first.
    pub fn history(&self) -> &VecDeque<ClosedPosition> {
        &self.history
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn total_unrealized_pnl(&self) -> Decimal {
        self.positions.iter().map(|p| p.unrealized_pnl).sum()
    }

    /// Balance plus unrealized P&L.
    pub fn equity(&self) -> Decimal {
        self.balance + self.total_unrealized_pnl()
    }

    pub fn summary(&self) -> AccountSummary {
        AccountSummary::new(
            self.balance,
            self.total_unrealized_pnl(),
            self.positions.len(),
            self.history.len(),
        )
    }

    pub fn stats(&self) -> HistoryStats {
        StatsCalculator::calculate(&self.history)
    }

    /// Latest positive price seen for a symbol.
    pub fn last_price(&self, symbol: &str) -> Option<Decimal> {
        self.last_prices.get(&normalize_symbol(symbol)).copied()
    }

    pub fn instruments(&self) -> &InstrumentTable {
        &self.instruments
    }
}

/// Upper-case keys and drop non-positive prices.
fn normalize_update(update: &PriceUpdate) -> HashMap<String, Decimal> {
    update
        .iter()
        .filter(|(_, price)| **price > Decimal::ZERO)
        .map(|(symbol, price)| (normalize_symbol(symbol), *price))
        .collect()
}
