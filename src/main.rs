//! Demo trading terminal ledger
//!
//! Runs a scripted session against an in-process price feed, queries a live
//! quote service, and inspects persisted account history.

use std::sync::Arc;

use anyhow::Result;
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use terminal_ledger::db::SnapshotStore;
use terminal_ledger::feed::{HttpPriceFeed, MockPriceFeed, PriceFeed};
use terminal_ledger::metrics::StatsCalculator;
use terminal_ledger::models::{round_money, OpenRequest, PriceUpdate, Side, TriggerUpdate};
use terminal_ledger::notify::LogSink;
use terminal_ledger::{BulkCloseOutcome, BulkFilter, LedgerConfig, Session, SessionHandle};

/// Position ledger CLI.
#[derive(Parser)]
#[command(name = "ledgerctl")]
#[command(about = "Position ledger for a demo trading terminal", long_about = None)]
struct Cli {
    /// Database URL (overrides LEDGER_DATABASE_URL)
    #[arg(short, long)]
    database: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted session against a simulated feed
    Demo {
        /// Save balance and history to the database at the end
        #[arg(long)]
        persist: bool,
    },

    /// Fetch recent quotes from the configured quote service
    Quote {
        /// Instrument symbol, e.g. EURUSD
        symbol: String,

        /// Number of quotes to show
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// Follow the quote service and persist the account on Ctrl+C
    Watch,

    /// Show persisted closed positions and statistics
    History {
        /// Maximum number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// List known instruments
    Instruments,

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = LedgerConfig::from_env()?;
    if let Some(url) = cli.database {
        config.database_url = url;
    }

    match cli.command {
        Commands::Demo { persist } => run_demo(config, persist).await?,

        Commands::Quote { symbol, limit } => {
            let Some(url) = config.feed_url.as_deref() else {
                println!("No quote service configured. Set LEDGER_FEED_URL first.");
                return Ok(());
            };

            let feed = HttpPriceFeed::new(url, config.feed_poll_interval(), vec![symbol.clone()])?;
            let quotes = feed.fetch_quotes(&symbol, limit).await?;
            let table = config.instrument_table();

            if quotes.is_empty() {
                println!("No quotes for {}", symbol.to_uppercase());
                return Ok(());
            }

            println!("\n{:<10} {:>14} {:>22}", "SYMBOL", "PRICE", "TIME");
            println!("{}", "-".repeat(48));
            for q in &quotes {
                let time = Utc
                    .timestamp_opt(q.timestamp, 0)
                    .single()
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<10} {:>14} {:>22}",
                    q.symbol,
                    table.format_price(&q.symbol, q.price),
                    time
                );
            }
        }

        Commands::Watch => {
            let Some(url) = config.feed_url.clone() else {
                println!("No quote service configured. Set LEDGER_FEED_URL first.");
                return Ok(());
            };

            let feed = Arc::new(HttpPriceFeed::new(
                &url,
                config.feed_poll_interval(),
                config.watch_symbols.clone(),
            )?);
            let store = SnapshotStore::new(&config.database_url).await?;
            let symbols = config.watch_symbols.join(", ");

            let mut session = Session::with_store(config, feed, store).await?;
            session.subscribe(Arc::new(LogSink));

            println!("\n=== Watching {} ===", symbols);
            println!("Quote service: {}", url);
            println!("\nPress Ctrl+C to stop.\n");

            let (handle, commands) = SessionHandle::channel(8);
            let reason = session.run(commands).await?;
            drop(handle);

            info!(?reason, "Watch stopped");
            println!("\n{}", session.ledger().summary());
        }

        Commands::History { limit } => {
            let store = SnapshotStore::new(&config.database_url).await?;

            let Some(balance) = store.load_balance().await? else {
                println!("No saved session found. Run 'ledgerctl demo --persist' first.");
                return Ok(());
            };
            let history = store.load_history().await?;
            let table = config.instrument_table();

            println!("\n=== Account ===");
            println!("Balance:          ${:.2}", round_money(balance));
            println!("Closed Trades:    {}", history.len());

            if !history.is_empty() {
                println!(
                    "\n{:<10} {:<5} {:>8} {:>12} {:>12} {:>12} {:<12}",
                    "SYMBOL", "SIDE", "SIZE", "ENTRY", "EXIT", "P&L", "REASON"
                );
                println!("{}", "-".repeat(78));
                for c in history.iter().take(limit) {
                    println!(
                        "{:<10} {:<5} {:>8} {:>12} {:>12} {:>12.2} {:<12}",
                        truncate(c.symbol(), 10),
                        c.side(),
                        c.size(),
                        table.format_price(c.symbol(), c.entry_price()),
                        table.format_price(c.symbol(), c.close_price()),
                        round_money(c.realized_pnl()),
                        c.reason()
                    );
                }
            }

            println!("\n{}", StatsCalculator::calculate(&history));
        }

        Commands::Instruments => {
            let table = config.instrument_table();

            println!("\n{:<10} {:>14} {:>10} {:>9}", "SYMBOL", "CONTRACT", "PIP", "DECIMALS");
            println!("{}", "-".repeat(46));
            for spec in table.specs() {
                println!(
                    "{:<10} {:>14} {:>10} {:>9}",
                    spec.symbol, spec.contract_size, spec.pip_size, spec.price_decimals
                );
            }
            println!("\nUnlisted symbols use currency-pair defaults (100000 / 0.0001 / 5).");
        }

        Commands::Config => {
            println!("\n=== Ledger Configuration ===\n");
            println!("Account:");
            println!("  Initial Balance:      ${}", config.initial_balance);
            println!("  Database:             {}", config.database_url);

            println!("\nPrice Feed:");
            println!(
                "  Quote Service:        {}",
                config.feed_url.as_deref().unwrap_or("(simulated)")
            );
            println!("  Quote Timeout:        {}ms", config.quote_timeout_ms);
            println!("  Quote Lookback:       {}", config.quote_lookback);
            println!("  Poll Interval:        {}ms", config.feed_poll_ms);
            println!("  Watch Symbols:        {}", config.watch_symbols.join(", "));

            println!("\nInstrument Overrides:   {}", config.instruments.len());
        }
    }

    Ok(())
}

/// Scripted walk through the ledger: open, mark, trigger, edit, bulk close.
async fn run_demo(config: LedgerConfig, persist: bool) -> Result<()> {
    let feed = Arc::new(MockPriceFeed::new());
    let mut session = if persist {
        let store = SnapshotStore::new(&config.database_url).await?;
        Session::with_store(config, feed.clone(), store).await?
    } else {
        Session::new(config, feed.clone())
    };
    session.subscribe(Arc::new(LogSink));

    let (handle, commands) = SessionHandle::channel(32);
    let runner = tokio::spawn(async move {
        let reason = session.run(commands).await?;
        Ok::<_, anyhow::Error>((reason, session))
    });

    info!("Seeding demo prices");
    mark(&feed, &handle, &[("EURUSD", dec!(1.10000)), ("XAUUSD", dec!(2000.00))]).await?;

    let eur = handle
        .open(
            OpenRequest::new("EURUSD", Side::Buy, dec!(0.10))
                .with_stop_loss(dec!(1.09500))
                .with_take_profit(dec!(1.10500)),
        )
        .await?;
    let gold = handle
        .open(OpenRequest::new("XAUUSD", Side::Sell, dec!(0.05)).with_take_profit(dec!(1990.00)))
        .await?;
    let cable = handle
        .open(OpenRequest::new("GBPUSD", Side::Buy, dec!(0.20)))
        .await;
    if let Err(e) = cable {
        println!("GBPUSD not opened: {}", e);
    }

    mark(&feed, &handle, &[("EURUSD", dec!(1.10050)), ("XAUUSD", dec!(1995.00))]).await?;
    print_summary(&handle, "After first tick").await?;

    handle
        .update_triggers(
            &eur.id,
            TriggerUpdate {
                stop_loss: Some(dec!(1.10020)),
                take_profit: Some(dec!(1.10500)),
            },
        )
        .await?;

    // Gold hits its target; EURUSD dips through the raised stop
    mark(&feed, &handle, &[("EURUSD", dec!(1.10010)), ("XAUUSD", dec!(1988.50))]).await?;
    print_summary(&handle, "After trigger tick").await?;

    handle
        .open(OpenRequest::new("EURUSD", Side::Sell, dec!(0.30)))
        .await?;
    mark(&feed, &handle, &[("EURUSD", dec!(1.10040))]).await?;

    match handle.bulk_close(BulkFilter::Losing).await? {
        BulkCloseOutcome::NothingToClose => println!("No losing positions to close"),
        BulkCloseOutcome::Closed { closed, failed } => {
            println!("Bulk closed {} losing positions ({} failed)", closed.len(), failed);
        }
    }

    // Already settled by its trigger; closing again is a no-op
    if handle.close(&gold.id, None).await?.is_none() {
        println!("XAUUSD position already closed");
    }

    print_summary(&handle, "Final").await?;
    handle.shutdown().await?;

    let (reason, session) = runner.await??;
    info!(?reason, "Demo session stopped");

    let ledger = session.ledger();
    let table = ledger.instruments();
    println!("\n=== Closed Positions ===");
    for c in ledger.history() {
        println!(
            "  {} {} {} {} -> {} ({}) P&L ${:.2}",
            c.side(),
            c.size(),
            c.symbol(),
            table.format_price(c.symbol(), c.entry_price()),
            table.format_price(c.symbol(), c.close_price()),
            c.reason(),
            round_money(c.realized_pnl())
        );
    }
    println!("\n{}", ledger.stats());

    Ok(())
}

async fn print_summary(handle: &SessionHandle, label: &str) -> Result<()> {
    let summary = handle.summary().await?;
    println!("\n--- {} ---", label);
    println!("{}", summary);
    Ok(())
}

fn tick(prices: &[(&str, Decimal)]) -> PriceUpdate {
    prices.iter().map(|(s, p)| (s.to_string(), *p)).collect()
}

/// Seed the feed's quotes and apply the tick in line with queued commands.
async fn mark(
    feed: &MockPriceFeed,
    handle: &SessionHandle,
    prices: &[(&str, Decimal)],
) -> Result<()> {
    for (symbol, price) in prices {
        feed.set_quote(symbol, *price);
    }
    handle.apply_prices(tick(prices)).await?;
    Ok(())
}

/// Truncate string to max length in characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_symbol_untouched() {
        assert_eq!(truncate("EURUSD", 10), "EURUSD");
    }

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(truncate("ÉURUSD-FUTURE", 10), "ÉURUSD-...");
        assert_eq!(truncate("日本円ドル建て先物契約", 10), "日本円ドル建て...");
    }
}
