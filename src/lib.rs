//! # probtrader
//! Probabilistic position-decision engine for a single leveraged instrument.
//!
//! Long/short model probabilities come in once per bar; the
//! [`strategy::DecisionEngine`] turns them into one `OPEN` / `CLOSE` /
//! `REBALANCE` / `HOLD` decision sized by the [`risk::PositionSizer`]. The
//! [`backtest`] harness executes decisions through an
//! [`execution::ExecutionAdapter`] and keeps the engine synchronised with the
//! account.

pub use crate::utils::error::{Error, Result};

pub mod backtest;
pub mod config;
pub mod execution;
pub mod performance;
pub mod portfolio;
pub mod risk;
pub mod strategy;
pub mod utils;
