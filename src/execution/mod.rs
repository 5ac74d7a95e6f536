//! Execution adapter seam between the harness and a venue.
//!
//! Backtest and live loops drive the same [`DecisionEngine`](crate::strategy::DecisionEngine)
//! and differ only in the adapter they hand decisions to. Venue rejections
//! are explicit [`ExecutionError`] values consumed by the harness; the engine
//! never sees them.

use log::info;
use thiserror::Error;

use crate::portfolio::MarginAccount;
use crate::strategy::{Action, Decision};

/// Venue-side rejection of an order.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("order too small: {requested} < lot size {lot_size}")]
    OrderTooSmall { requested: f64, lot_size: f64 },

    #[error("insufficient margin: required {required:.2}, available {available:.2}")]
    InsufficientMargin { required: f64, available: f64 },

    #[error("cannot open {requested} against an opposite position of {current}")]
    OppositePosition { requested: f64, current: f64 },

    #[error("no position to close")]
    NoPosition,

    #[error("invalid price: {0}")]
    InvalidPrice(f64),
}

/// Executed quantity (signed) and its cost.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fill {
    pub qty: f64,
    pub price: f64,
    pub fee: f64,
}

/// Ground-truth position as reported by the venue.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionSnapshot {
    pub qty: f64,
    pub entry_price: f64,
}

/// Minimal venue interface shared by backtest and live modes.
pub trait ExecutionAdapter {
    /// Increase exposure by signed `qty` (+ buy, − sell) at reference `price`.
    fn open(&mut self, qty: f64, price: f64) -> Result<Fill, ExecutionError>;

    /// Reduce the absolute position by `qty` at reference `price`.
    fn close(&mut self, qty: f64, price: f64) -> Result<Fill, ExecutionError>;

    /// Account equity marked at `price`.
    fn equity(&self, price: f64) -> f64;

    fn position(&self) -> PositionSnapshot;
}

/// Translate a decision into adapter calls. `Hold` returns `Ok(None)`.
pub fn apply_decision<A: ExecutionAdapter + ?Sized>(
    adapter: &mut A,
    decision: &Decision,
    price: f64,
) -> Result<Option<Fill>, ExecutionError> {
    let delta = decision.delta_qty;
    let fill = match decision.action {
        Action::Hold => return Ok(None),
        Action::Open => adapter.open(delta, price)?,
        Action::Close => adapter.close(delta.abs(), price)?,
        Action::Rebalance => {
            let current = adapter.position().qty;
            if current == 0.0 || delta.signum() == current.signum() {
                adapter.open(delta, price)?
            } else {
                adapter.close(delta.abs(), price)?
            }
        }
    };
    info!(
        "{} ({}) filled {:.6} @ {:.4} fee {:.4}",
        decision.action, decision.reason, fill.qty, fill.price, fill.fee
    );
    Ok(Some(fill))
}

fn check_price(price: f64) -> Result<(), ExecutionError> {
    if price.is_finite() && price > 0.0 {
        Ok(())
    } else {
        Err(ExecutionError::InvalidPrice(price))
    }
}

impl ExecutionAdapter for MarginAccount {
    fn open(&mut self, qty: f64, price: f64) -> Result<Fill, ExecutionError> {
        check_price(price)?;
        let current = self.position.size;
        if current != 0.0 && qty.signum() != current.signum() {
            return Err(ExecutionError::OppositePosition { requested: qty, current });
        }
        let lots = self.round_to_lots(qty);
        if lots == 0.0 {
            return Err(ExecutionError::OrderTooSmall { requested: qty.abs(), lot_size: self.lot_size });
        }
        let fee = lots * price * self.fee_rate;
        let required = (current.abs() + lots) * price / self.leverage;
        let available = self.equity_at(price) - fee;
        if required > available {
            return Err(ExecutionError::InsufficientMargin { required, available });
        }
        let signed = lots * qty.signum();
        self.charge_fee(lots, price);
        self.position.update_on_add(signed, price);
        Ok(Fill { qty: signed, price, fee })
    }

    fn close(&mut self, qty: f64, price: f64) -> Result<Fill, ExecutionError> {
        check_price(price)?;
        let current = self.position.size;
        if current == 0.0 {
            return Err(ExecutionError::NoPosition);
        }
        let requested = qty.abs();
        // a full close is always allowed, even when the size is not a lot multiple
        let lots = if requested >= current.abs() { current.abs() } else { self.round_to_lots(requested) };
        if lots == 0.0 {
            return Err(ExecutionError::OrderTooSmall { requested, lot_size: self.lot_size });
        }
        let closed = self.realize(lots, price);
        let fee = self.charge_fee(closed, price);
        Ok(Fill { qty: -current.signum() * closed, price, fee })
    }

    fn equity(&self, price: f64) -> f64 {
        self.equity_at(price)
    }

    fn position(&self) -> PositionSnapshot {
        PositionSnapshot { qty: self.position.size, entry_price: self.position.average_entry_price }
    }
}
