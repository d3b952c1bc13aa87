//! Statistics over settled trades.

mod calculator;

pub use calculator::StatsCalculator;
