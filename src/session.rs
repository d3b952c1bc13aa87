//! Session runner: owns the ledger and drives it from price ticks and user
//! commands.
//!
//! Handles:
//! - Applying feed ticks (mark to market, then stop-loss/take-profit)
//! - Opening and closing trades at freshly fetched quotes
//! - Bulk closes and protective level edits
//! - Persisting balance and history on shutdown
//!
//! All events funnel through one task, so each is fully applied before the
//! next one is looked at.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::db::SnapshotStore;
use crate::error::LedgerResult;
use crate::feed::PriceFeed;
use crate::models::{AccountSummary, ClosedPosition, OpenRequest, Position, PriceUpdate, TriggerUpdate};
use crate::notify::NotificationSink;
use crate::trading::{BulkCloseOutcome, BulkFilter, LedgerConfig, PositionLedger, SinkId};

/// Request sent to a running session.
#[derive(Debug)]
pub enum Command {
    Open {
        request: OpenRequest,
        reply: oneshot::Sender<LedgerResult<Position>>,
    },
    Close {
        id: String,
        price: Option<Decimal>,
        reply: oneshot::Sender<LedgerResult<Option<ClosedPosition>>>,
    },
    BulkClose {
        filter: BulkFilter,
        reply: oneshot::Sender<BulkCloseOutcome>,
    },
    UpdateTriggers {
        id: String,
        update: TriggerUpdate,
        reply: oneshot::Sender<bool>,
    },
    /// Apply a tick in order with the other commands; replies with the
    /// positions its triggers closed.
    ApplyPrices {
        update: PriceUpdate,
        reply: oneshot::Sender<Vec<ClosedPosition>>,
    },
    Summary {
        reply: oneshot::Sender<AccountSummary>,
    },
    Shutdown,
}

/// Why [`Session::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `Command::Shutdown` received
    Requested,
    /// Every command sender was dropped
    CommandsClosed,
    /// Ctrl-C
    Interrupted,
}

/// Owns the ledger and its price feed.
pub struct Session {
    config: LedgerConfig,
    ledger: PositionLedger,
    feed: Arc<dyn PriceFeed>,
    store: Option<SnapshotStore>,
}

impl Session {
    /// Create a session with a fresh ledger.
    pub fn new(config: LedgerConfig, feed: Arc<dyn PriceFeed>) -> Self {
        let ledger = PositionLedger::new(config.initial_balance, config.instrument_table());
        Self {
            config,
            ledger,
            feed,
            store: None,
        }
    }

    /// Create a session, restoring balance and history from `store` when a
    /// snapshot exists.
    pub async fn with_store(
        config: LedgerConfig,
        feed: Arc<dyn PriceFeed>,
        store: SnapshotStore,
    ) -> Result<Self> {
        let ledger = match store.load_balance().await? {
            Some(balance) => {
                let history = store
                    .load_history()
                    .await
                    .context("Failed to load closed history")?;
                info!(balance = %balance, history = history.len(), "Restored ledger snapshot");
                PositionLedger::restore(balance, history, config.instrument_table())
            }
            None => PositionLedger::new(config.initial_balance, config.instrument_table()),
        };

        Ok(Self {
            config,
            ledger,
            feed,
            store: Some(store),
        })
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    pub fn subscribe(&mut self, sink: Arc<dyn NotificationSink>) -> SinkId {
        self.ledger.subscribe(sink)
    }

    pub fn unsubscribe(&mut self, id: SinkId) -> bool {
        self.ledger.unsubscribe(id)
    }

    /// Newest valid quote for `symbol`, or `None` if the feed errors, has
    /// nothing, or does not answer within the configured timeout.
    async fn fetch_fresh_price(&self, symbol: &str) -> Option<Decimal> {
        let lookup = self.feed.latest_price(symbol, self.config.quote_lookback);

        match tokio::time::timeout(self.config.quote_timeout(), lookup).await {
            Ok(Ok(price)) => price,
            Ok(Err(e)) => {
                warn!(symbol, error = %e, "Quote fetch failed, using last known price");
                None
            }
            Err(_) => {
                warn!(
                    symbol,
                    timeout_ms = self.config.quote_timeout_ms,
                    "Quote fetch timed out, using last known price"
                );
                None
            }
        }
    }

    /// Open a trade at a fresh quote, falling back to the last known price.
    pub async fn open_trade(&mut self, request: OpenRequest) -> LedgerResult<Position> {
        let fresh = self.fetch_fresh_price(&request.symbol).await;
        self.ledger.open(request, fresh)
    }

    /// Close a trade. Without an explicit price a fresh quote is fetched
    /// first; the ledger's own resolution is used when none arrives.
    pub async fn close_trade(
        &mut self,
        id: &str,
        price: Option<Decimal>,
    ) -> LedgerResult<Option<ClosedPosition>> {
        let price = match price.filter(|p| *p > Decimal::ZERO) {
            Some(p) => Some(p),
            None => match self.ledger.position(id).map(|p| p.symbol.clone()) {
                Some(symbol) => self.fetch_fresh_price(&symbol).await,
                None => None,
            },
        };
        self.ledger.close(id, price)
    }

    /// Apply one feed tick.
    pub fn apply_price_update(&mut self, update: &PriceUpdate) -> Vec<ClosedPosition> {
        let closed = self.ledger.apply_price_update(update);
        if !closed.is_empty() {
            info!(closed = closed.len(), balance = %self.ledger.balance(), "Triggers closed positions");
        }
        closed
    }

    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Open { request, reply } => {
                let result = self.open_trade(request).await;
                let _ = reply.send(result);
            }
            Command::Close { id, price, reply } => {
                let result = self.close_trade(&id, price).await;
                let _ = reply.send(result);
            }
            Command::BulkClose { filter, reply } => {
                let _ = reply.send(self.ledger.bulk_close(filter));
            }
            Command::UpdateTriggers { id, update, reply } => {
                let _ = reply.send(self.ledger.update_triggers(&id, update));
            }
            Command::ApplyPrices { update, reply } => {
                let _ = reply.send(self.apply_price_update(&update));
            }
            Command::Summary { reply } => {
                let _ = reply.send(self.ledger.summary());
            }
            Command::Shutdown => return false,
        }
        true
    }

    /// Main run loop. Returns after shutdown has completed.
    pub async fn run(&mut self, mut commands: mpsc::Receiver<Command>) -> Result<StopReason> {
        info!(
            balance = %self.ledger.balance(),
            timeout_ms = self.config.quote_timeout_ms,
            "Starting session run loop"
        );

        let mut prices = self.feed.subscribe();
        let mut feed_open = true;

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        let reason = loop {
            tokio::select! {
                update = prices.next(), if feed_open => match update {
                    Some(update) => {
                        debug!(symbols = update.len(), "Price tick");
                        self.apply_price_update(&update);
                    }
                    None => {
                        warn!("Price feed ended; continuing without live prices");
                        feed_open = false;
                    }
                },
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command).await {
                            break StopReason::Requested;
                        }
                    }
                    None => break StopReason::CommandsClosed,
                },
                _ = &mut ctrl_c => {
                    info!("Shutdown signal received");
                    break StopReason::Interrupted;
                }
            }
        };

        if let Err(e) = self.shutdown().await {
            error!(error = %e, "Failed to persist ledger on shutdown");
            return Err(e);
        }

        Ok(reason)
    }

    /// Log the final account state and persist it if a store is attached.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down session...");

        let summary = self.ledger.summary();
        info!(
            balance = %summary.balance,
            equity = %summary.equity,
            open = summary.open_positions,
            closed = summary.closed_positions,
            "Final account state"
        );

        if let Some(store) = &self.store {
            store
                .save_snapshot(self.ledger.balance(), self.ledger.history())
                .await?;
        }

        info!("Session shutdown complete");
        Ok(())
    }
}

/// Cloneable front end for a running [`Session`].
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Command>,
}

impl SessionHandle {
    /// Create a handle and the receiver to pass to [`Session::run`].
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| anyhow::anyhow!("Session is not running"))?;
        rx.await.context("Session dropped the request")
    }

    pub async fn open(&self, request: OpenRequest) -> Result<Position> {
        Ok(self.request(|reply| Command::Open { request, reply }).await??)
    }

    pub async fn close(&self, id: &str, price: Option<Decimal>) -> Result<Option<ClosedPosition>> {
        let id = id.to_string();
        Ok(self.request(|reply| Command::Close { id, price, reply }).await??)
    }

    pub async fn bulk_close(&self, filter: BulkFilter) -> Result<BulkCloseOutcome> {
        self.request(|reply| Command::BulkClose { filter, reply }).await
    }

    pub async fn update_triggers(&self, id: &str, update: TriggerUpdate) -> Result<bool> {
        let id = id.to_string();
        self.request(|reply| Command::UpdateTriggers { id, update, reply })
            .await
    }

    /// Apply a tick after every command already queued. Returns once the
    /// ledger has marked it.
    pub async fn apply_prices(&self, update: PriceUpdate) -> Result<Vec<ClosedPosition>> {
        self.request(|reply| Command::ApplyPrices { update, reply }).await
    }

    pub async fn summary(&self) -> Result<AccountSummary> {
        self.request(|reply| Command::Summary { reply }).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.tx
            .send(Command::Shutdown)
            .await
            .map_err(|_| anyhow::anyhow!("Session is not running"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::MockPriceFeed;
    use crate::models::Side;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn config() -> LedgerConfig {
        LedgerConfig {
            quote_timeout_ms: 50,
            ..LedgerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_open_trade_uses_fresh_quote() {
        let feed = Arc::new(MockPriceFeed::new());
        feed.set_quote("EURUSD", dec!(1.10010));
        let mut session = Session::new(config(), feed.clone());

        let pos = session
            .open_trade(OpenRequest::new("EURUSD", Side::Buy, dec!(0.1)))
            .await
            .unwrap();
        assert_eq!(pos.entry_price, dec!(1.10010));
    }

    #[tokio::test]
    async fn test_open_trade_times_out_to_last_price() {
        let feed = Arc::new(MockPriceFeed::new().with_latency(Duration::from_millis(500)));
        let mut session = Session::new(config(), feed.clone());

        let tick: PriceUpdate = [("EURUSD".to_string(), dec!(1.09990))].into_iter().collect();
        session.apply_price_update(&tick);

        let pos = session
            .open_trade(OpenRequest::new("EURUSD", Side::Sell, dec!(1)))
            .await
            .unwrap();
        assert_eq!(pos.entry_price, dec!(1.09990));
    }

    #[tokio::test]
    async fn test_close_trade_fetch_failure_falls_back() {
        let feed = Arc::new(MockPriceFeed::new());
        feed.set_quote("XAUUSD", dec!(2000));
        let mut session = Session::new(config(), feed.clone());

        let pos = session
            .open_trade(OpenRequest::new("XAUUSD", Side::Buy, dec!(0.05)))
            .await
            .unwrap();

        feed.set_fail_fetch(true);
        let closed = session.close_trade(&pos.id, None).await.unwrap().unwrap();
        assert_eq!(closed.close_price(), dec!(2000));
        assert_eq!(closed.realized_pnl(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_run_processes_ticks_and_commands() {
        let feed = Arc::new(MockPriceFeed::new());
        feed.set_quote("EURUSD", dec!(1.10000));
        let mut session = Session::new(config(), feed.clone());
        let (handle, rx) = SessionHandle::channel(8);

        let task = tokio::spawn(async move {
            let reason = session.run(rx).await?;
            Ok::<_, anyhow::Error>((reason, session))
        });

        let pos = handle
            .open(OpenRequest::new("EURUSD", Side::Buy, dec!(0.10)).with_stop_loss(dec!(1.0950)))
            .await
            .unwrap();

        feed.push([("EURUSD".to_string(), dec!(1.0940))].into_iter().collect());

        // Summary is queued behind any tick already delivered; poll until applied
        let mut summary = handle.summary().await.unwrap();
        for _ in 0..50 {
            if summary.closed_positions == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            summary = handle.summary().await.unwrap();
        }
        assert_eq!(summary.closed_positions, 1);
        assert_eq!(summary.balance, dec!(9950.00));

        assert!(handle.close(&pos.id, None).await.unwrap().is_none());
        handle.shutdown().await.unwrap();

        let (reason, session) = task.await.unwrap().unwrap();
        assert_eq!(reason, StopReason::Requested);
        assert_eq!(session.ledger().history().len(), 1);
    }

    #[tokio::test]
    async fn test_queued_tick_applies_before_next_command() {
        let feed = Arc::new(MockPriceFeed::new());
        feed.set_quote("EURUSD", dec!(1.10000));
        let mut session = Session::new(config(), feed.clone());
        let (handle, rx) = SessionHandle::channel(8);

        let task = tokio::spawn(async move { session.run(rx).await });

        handle
            .open(OpenRequest::new("EURUSD", Side::Buy, dec!(0.10)).with_stop_loss(dec!(1.0950)))
            .await
            .unwrap();
        handle
            .open(OpenRequest::new("EURUSD", Side::Sell, dec!(0.10)))
            .await
            .unwrap();

        let closed = handle
            .apply_prices([("EURUSD".to_string(), dec!(1.0940))].into_iter().collect())
            .await
            .unwrap();
        assert_eq!(closed.len(), 1);

        // No polling: the tick is settled before these are handled
        let summary = handle.summary().await.unwrap();
        assert_eq!(summary.closed_positions, 1);
        assert_eq!(summary.balance, dec!(9950.00));
        assert_eq!(summary.unrealized_pnl, dec!(60.00));

        match handle.bulk_close(BulkFilter::Profitable).await.unwrap() {
            BulkCloseOutcome::Closed { closed, failed } => {
                assert_eq!(closed.len(), 1);
                assert_eq!(failed, 0);
            }
            BulkCloseOutcome::NothingToClose => panic!("expected the short to close"),
        }

        handle.shutdown().await.unwrap();
        assert_eq!(task.await.unwrap().unwrap(), StopReason::Requested);
    }

    #[tokio::test]
    async fn test_run_stops_when_handles_dropped() {
        let feed = Arc::new(MockPriceFeed::new());
        let mut session = Session::new(config(), feed);
        let (handle, rx) = SessionHandle::channel(1);
        drop(handle);

        assert_eq!(session.run(rx).await.unwrap(), StopReason::CommandsClosed);
    }

    #[tokio::test]
    async fn test_snapshot_restored_by_next_session() {
        let store = SnapshotStore::new("sqlite::memory:").await.unwrap();
        let feed = Arc::new(MockPriceFeed::new());
        feed.set_quote("EURUSD", dec!(1.1000));

        let mut session = Session::with_store(config(), feed.clone(), store).await.unwrap();
        let pos = session
            .open_trade(OpenRequest::new("EURUSD", Side::Buy, dec!(1)))
            .await
            .unwrap();
        session.close_trade(&pos.id, Some(dec!(1.1010))).await.unwrap();
        session.shutdown().await.unwrap();

        let Session { store, .. } = session;
        let store = store.unwrap();
        let restored = Session::with_store(config(), feed, store).await.unwrap();
        assert_eq!(restored.ledger().balance(), dec!(10100));
        assert_eq!(restored.ledger().history().len(), 1);
    }
}
