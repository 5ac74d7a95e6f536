//! Performance statistics over equity curves and closed trades.

mod metrics;

pub use metrics::*;
