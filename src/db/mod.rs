//! SQLite snapshots of the ledger's account state.
//!
//! Stores what is needed to resume a session:
//! - Realized balance
//! - Closed position history
//!
//! Open positions are not persisted; a session always starts flat.
//! Decimals are stored as text so no precision is lost.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::{debug, info};

use crate::models::{CloseReason, ClosedPosition, Position, Side};

/// Database connection pool for ledger snapshots.
pub struct SnapshotStore {
    pool: SqlitePool,
}

/// Stored closed position row.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredClosedPosition {
    id: String,
    symbol: String,
    side: String,
    size: String,
    entry_price: String,
    close_price: String,
    realized_pnl: String,
    stop_loss: Option<String>,
    take_profit: Option<String>,
    reason: String,
    opened_at: i64,
    closed_at: i64,
}

impl StoredClosedPosition {
    fn into_closed(self) -> Result<ClosedPosition> {
        let parse = |field: &str, v: &str| -> Result<Decimal> {
            v.parse::<Decimal>()
                .with_context(|| format!("Invalid {} '{}' for position {}", field, v, self.id))
        };

        let side = Side::parse(&self.side)
            .with_context(|| format!("Invalid side '{}' for position {}", self.side, self.id))?;
        let reason = CloseReason::parse(&self.reason)
            .with_context(|| format!("Invalid reason '{}' for position {}", self.reason, self.id))?;
        let entry_price = parse("entry price", &self.entry_price)?;
        let close_price = parse("close price", &self.close_price)?;
        let realized_pnl = parse("realized pnl", &self.realized_pnl)?;
        let size = parse("size", &self.size)?;
        let stop_loss = self
            .stop_loss
            .as_deref()
            .map(|v| parse("stop loss", v))
            .transpose()?;
        let take_profit = self
            .take_profit
            .as_deref()
            .map(|v| parse("take profit", v))
            .transpose()?;

        let position = Position {
            id: self.id.clone(),
            symbol: self.symbol.clone(),
            side,
            size,
            entry_price,
            current_price: close_price,
            unrealized_pnl: realized_pnl,
            opened_at: self.opened_at,
            stop_loss,
            take_profit,
        };

        Ok(ClosedPosition::new(
            position,
            close_price,
            self.closed_at,
            realized_pnl,
            reason,
        ))
    }
}

impl SnapshotStore {
    /// Connect and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        // Each in-memory connection is a separate database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS account_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                balance TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS closed_positions (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                size TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                close_price TEXT NOT NULL,
                realized_pnl TEXT NOT NULL,
                stop_loss TEXT,
                take_profit TEXT,
                reason TEXT NOT NULL,
                opened_at INTEGER NOT NULL,
                closed_at INTEGER NOT NULL,
                seq INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_closed_positions_seq ON closed_positions(seq)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Account ====================

    /// Persist the realized balance.
    pub async fn save_balance(&self, balance: Decimal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO account_state (id, balance, updated_at)
            VALUES (1, ?, datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                balance = excluded.balance,
                updated_at = datetime('now')
            "#,
        )
        .bind(balance.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Last saved balance, if any snapshot exists.
    pub async fn load_balance(&self) -> Result<Option<Decimal>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT balance FROM account_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(b,)| b.parse::<Decimal>().context("Invalid stored balance"))
            .transpose()
    }

    // ==================== History ====================

    /// Append a closed position. Saving the same id twice keeps the first.
    pub async fn save_closed(&self, closed: &ClosedPosition) -> Result<()> {
        let (next_seq,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(seq), 0) + 1 FROM closed_positions")
                .fetch_one(&self.pool)
                .await?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO closed_positions
                (id, symbol, side, size, entry_price, close_price, realized_pnl,
                 stop_loss, take_profit, reason, opened_at, closed_at, seq)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(closed.id())
        .bind(closed.symbol())
        .bind(closed.side().as_str())
        .bind(closed.size().to_string())
        .bind(closed.entry_price().to_string())
        .bind(closed.close_price().to_string())
        .bind(closed.realized_pnl().to_string())
        .bind(closed.stop_loss().map(|p| p.to_string()))
        .bind(closed.take_profit().map(|p| p.to_string()))
        .bind(closed.reason().as_str())
        .bind(closed.opened_at())
        .bind(closed.closed_at())
        .bind(next_seq)
        .execute(&self.pool)
        .await?;

        debug!(id = %closed.id(), seq = next_seq, "Saved closed position");
        Ok(())
    }

    /// Closed history, most recent first.
    pub async fn load_history(&self) -> Result<Vec<ClosedPosition>> {
        let rows = sqlx::query_as::<_, StoredClosedPosition>(
            r#"
            SELECT id, symbol, side, size, entry_price, close_price, realized_pnl,
                   stop_loss, take_profit, reason, opened_at, closed_at
            FROM closed_positions
            ORDER BY seq DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredClosedPosition::into_closed).collect()
    }

    /// Persist balance and any history entries not yet stored.
    ///
    /// `history` is most recent first, as the ledger keeps it.
    pub async fn save_snapshot<'a, I>(&self, balance: Decimal, history: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a ClosedPosition>,
        I::IntoIter: DoubleEndedIterator,
    {
        self.save_balance(balance).await?;

        let mut saved = 0;
        for closed in history.into_iter().rev() {
            self.save_closed(closed).await?;
            saved += 1;
        }

        info!(balance = %balance, history = saved, "Saved ledger snapshot");
        Ok(())
    }

    pub async fn history_count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM closed_positions")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn closed(id: &str, pnl: Decimal, closed_at: i64) -> ClosedPosition {
        let position = Position {
            id: id.to_string(),
            symbol: "EURUSD".to_string(),
            side: Side::Sell,
            size: dec!(0.25),
            entry_price: dec!(1.10000),
            current_price: dec!(1.10000),
            unrealized_pnl: Decimal::ZERO,
            opened_at: 1_700_000_000,
            stop_loss: Some(dec!(1.10500)),
            take_profit: None,
        };
        ClosedPosition::new(position, dec!(1.09900), closed_at, pnl, CloseReason::StopLoss)
    }

    #[tokio::test]
    async fn test_balance_roundtrip() {
        let store = SnapshotStore::new("sqlite::memory:").await.unwrap();
        assert_eq!(store.load_balance().await.unwrap(), None);

        store.save_balance(dec!(10025.50)).await.unwrap();
        store.save_balance(dec!(9975.125)).await.unwrap();

        assert_eq!(store.load_balance().await.unwrap(), Some(dec!(9975.125)));
    }

    #[tokio::test]
    async fn test_history_keeps_order_and_precision() {
        let store = SnapshotStore::new("sqlite::memory:").await.unwrap();
        let older = closed("a", dec!(25.0000), 1_700_000_100);
        let newer = closed("b", dec!(-12.5), 1_700_000_200);

        // Ledger order: most recent first
        store
            .save_snapshot(dec!(10012.5), &vec![newer.clone(), older.clone()])
            .await
            .unwrap();
        // Saving again must not duplicate
        store
            .save_snapshot(dec!(10012.5), &vec![newer.clone(), older.clone()])
            .await
            .unwrap();

        let loaded = store.load_history().await.unwrap();
        assert_eq!(loaded, vec![newer, older]);
        assert_eq!(store.history_count().await.unwrap(), 2);
        assert_eq!(loaded[0].stop_loss(), Some(dec!(1.10500)));
        assert_eq!(loaded[0].take_profit(), None);
    }
}
