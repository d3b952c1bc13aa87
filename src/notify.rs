//! User-visible notifications and the sinks that receive them.
//!
//! The ledger emits a [`Notification`] for every state change and every
//! rejected action. Delivery is fire-and-forget: sinks never report back.

use std::sync::Mutex;

use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::models::{round_money, CloseReason, ClosedPosition, Position};
use crate::trading::BulkFilter;

/// Event surfaced to the terminal UI.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    TradeOpened(Position),
    TradeClosed(ClosedPosition),
    TriggersUpdated {
        id: String,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    },
    BulkClosed {
        filter: BulkFilter,
        closed: usize,
        failed: usize,
        realized: Decimal,
    },
    NothingToClose { filter: BulkFilter },
    /// An action was refused and state left unchanged
    Rejected { action: &'static str, reason: String },
}

impl Notification {
    /// One-line message for display.
    pub fn message(&self) -> String {
        match self {
            Notification::TradeOpened(p) => format!(
                "Opened {} {} {} @ {}",
                p.side, p.size, p.symbol, p.entry_price
            ),
            Notification::TradeClosed(c) => {
                let prefix = match c.reason() {
                    CloseReason::StopLoss => "Stop loss hit:",
                    CloseReason::TakeProfit => "Take profit hit:",
                    CloseReason::Manual | CloseReason::Bulk => "Closed",
                };
                format!(
                    "{} {} {} {} @ {} (P&L ${:.2})",
                    prefix,
                    c.side(),
                    c.size(),
                    c.symbol(),
                    c.close_price(),
                    round_money(c.realized_pnl())
                )
            }
            Notification::TriggersUpdated { id, stop_loss, take_profit } => format!(
                "Updated {}: SL {} TP {}",
                id,
                stop_loss.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
                take_profit.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string())
            ),
            Notification::BulkClosed { filter, closed, failed, realized } => {
                if *failed > 0 {
                    format!(
                        "Closed {} {} positions (P&L ${:.2}), {} failed",
                        closed, filter, round_money(*realized), failed
                    )
                } else {
                    format!(
                        "Closed {} {} positions (P&L ${:.2})",
                        closed,
                        filter,
                        round_money(*realized)
                    )
                }
            }
            Notification::NothingToClose { filter } => {
                format!("No {} positions to close", filter)
            }
            Notification::Rejected { action, reason } => {
                format!("Could not {}: {}", action, reason)
            }
        }
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, Notification::Rejected { .. })
    }
}

/// Receiver of ledger notifications.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: &Notification);
}

/// Writes notifications to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, notification: &Notification) {
        if notification.is_rejection() {
            warn!(message = %notification.message(), "Action rejected");
        } else {
            info!(message = %notification.message(), "Notification");
        }
    }
}

/// Fans notifications out to any number of async UI subscribers.
///
/// Subscribers join with [`BroadcastSink::subscribe`] and leave by dropping
/// the receiver. Sending with no subscribers is not an error.
pub struct BroadcastSink {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl NotificationSink for BroadcastSink {
    fn notify(&self, notification: &Notification) {
        let _ = self.tx.send(notification.clone());
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    received: Mutex<Vec<Notification>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain collected notifications.
    pub fn take(&self) -> Vec<Notification> {
        self.received
            .lock()
            .map(|mut v| std::mem::take(&mut *v))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.received.lock().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NotificationSink for MemorySink {
    fn notify(&self, notification: &Notification) {
        if let Ok(mut v) = self.received.lock() {
            v.push(notification.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_broadcast_sink_delivers_to_subscribers() {
        let sink = BroadcastSink::new(8);
        let mut rx = sink.subscribe();
        assert_eq!(sink.subscriber_count(), 1);

        sink.notify(&Notification::Rejected {
            action: "open trade",
            reason: "no price available for EURUSD".to_string(),
        });

        let received = rx.recv().await.unwrap();
        assert!(received.is_rejection());

        drop(rx);
        assert_eq!(sink.subscriber_count(), 0);
        // No subscribers left; must not panic
        sink.notify(&Notification::BulkClosed {
            filter: BulkFilter::All,
            closed: 0,
            failed: 0,
            realized: dec!(0),
        });
    }

    #[test]
    fn test_memory_sink_take_drains() {
        let sink = MemorySink::new();
        sink.notify(&Notification::TriggersUpdated {
            id: "p1".to_string(),
            stop_loss: Some(dec!(1.09)),
            take_profit: None,
        });
        assert_eq!(sink.len(), 1);
        let taken = sink.take();
        assert_eq!(taken.len(), 1);
        assert!(sink.is_empty());
        assert_eq!(taken[0].message(), "Updated p1: SL 1.09 TP -");
    }
}
