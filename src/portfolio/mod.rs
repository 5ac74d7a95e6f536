//! Simulated margin account for a single leveraged instrument.
//! Used by the backtester as its execution venue; fills follow exchange-like
//! rules (lot rounding, margin checks, taker fees) so that the engine's
//! intended deltas and the account's actual position can diverge.

use serde::{Deserialize, Serialize};

/// Quantities below this are treated as flat.
const QTY_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Position {
    pub size: f64, // positive = long, negative = short
    pub average_entry_price: f64, // weighted avg
    pub realized_pnl: f64,
}

impl Position {
    /// Increase exposure by signed `qty` (same direction as the position, or from flat).
    pub fn update_on_add(&mut self, qty: f64, price: f64) {
        let new_size = self.size + qty;
        if new_size.abs() < QTY_EPSILON {
            self.size = 0.0;
            self.average_entry_price = 0.0;
            return;
        }
        self.average_entry_price = (self.size * self.average_entry_price + qty * price) / new_size;
        self.size = new_size;
    }

    /// Reduce exposure by `qty` (unsigned) and return `(closed_qty, pnl, return_pct)`.
    pub fn update_on_reduce(&mut self, qty: f64, price: f64) -> (f64, f64, f64) {
        let sign = self.size.signum();
        let close_qty = qty.abs().min(self.size.abs());
        let entry = self.average_entry_price;
        let pnl = (price - entry) * close_qty * sign;
        let return_pct = if entry > 0.0 { sign * (price - entry) / entry } else { 0.0 };
        self.size -= sign * close_qty;
        if self.size.abs() < QTY_EPSILON {
            self.size = 0.0;
            self.average_entry_price = 0.0;
        }
        self.realized_pnl += pnl;
        (close_qty, pnl, return_pct)
    }

    pub fn unrealized_pnl(&self, current_price: f64) -> f64 {
        if self.size == 0.0 {
            return 0.0;
        }
        (current_price - self.average_entry_price) * self.size
    }

    pub fn is_flat(&self) -> bool {
        self.size == 0.0
    }
}

/// A realized (partial or full) close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    /// Signed quantity that was closed (+ long, − short).
    pub qty: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub pnl: f64,
    /// Signed price return of the closed quantity, before fees.
    pub return_pct: f64,
}

/// A position's life from flat to flat, aggregated over its partial closes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundTrip {
    /// Signed quantity closed over the trip (+ long, − short).
    pub qty: f64,
    pub pnl: f64,
    /// Quantity-weighted mean of the partial closes' returns.
    pub return_pct: f64,
}

impl RoundTrip {
    fn add_close(&mut self, signed_qty: f64, pnl: f64, return_pct: f64) {
        // return_pct holds the weighted sum until `finish`
        self.return_pct += return_pct * signed_qty.abs();
        self.qty += signed_qty;
        self.pnl += pnl;
    }

    fn finish(mut self) -> Self {
        self.return_pct = if self.qty != 0.0 { self.return_pct / self.qty.abs() } else { 0.0 };
        self
    }
}

/// Margin account: realized balance plus one signed position.
#[derive(Debug, Clone)]
pub struct MarginAccount {
    pub balance: f64,
    pub position: Position,
    pub fee_rate: f64,
    pub leverage: f64,
    pub lot_size: f64,
    pub fees_paid: f64,
    /// Every reduction, partial or full.
    pub closed_trades: Vec<ClosedTrade>,
    /// One entry per flat-to-flat trip.
    pub round_trips: Vec<RoundTrip>,
    open_trip: RoundTrip,
}

impl MarginAccount {
    pub fn new(starting_balance: f64, fee_rate: f64, leverage: f64, lot_size: f64) -> Self {
        Self {
            balance: starting_balance,
            position: Position::default(),
            fee_rate,
            leverage,
            lot_size,
            fees_paid: 0.0,
            closed_trades: Vec::new(),
            round_trips: Vec::new(),
            open_trip: RoundTrip::default(),
        }
    }

    /// Balance plus unrealized PnL at `price`.
    pub fn equity_at(&self, price: f64) -> f64 {
        self.balance + self.position.unrealized_pnl(price)
    }

    /// Floor `qty` (unsigned) to a whole number of lots.
    pub fn round_to_lots(&self, qty: f64) -> f64 {
        if self.lot_size <= 0.0 {
            return qty.abs();
        }
        // tolerate representation error such as 0.87 / 0.01 = 86.999...
        let lots = (qty.abs() / self.lot_size + 1e-9).floor();
        lots * self.lot_size
    }

    /// Return fraction of every completed round trip, oldest first.
    /// Partial closes from rebalancing fold into their trip.
    pub fn trade_returns(&self) -> Vec<f64> {
        self.round_trips.iter().map(|t| t.return_pct).collect()
    }

    pub(crate) fn charge_fee(&mut self, qty: f64, price: f64) -> f64 {
        let fee = qty.abs() * price * self.fee_rate;
        self.balance -= fee;
        self.fees_paid += fee;
        fee
    }

    pub(crate) fn realize(&mut self, qty: f64, price: f64) -> f64 {
        let entry = self.position.average_entry_price;
        let sign = self.position.size.signum();
        let (closed, pnl, return_pct) = self.position.update_on_reduce(qty, price);
        self.balance += pnl;
        self.closed_trades.push(ClosedTrade { qty: sign * closed, entry_price: entry, exit_price: price, pnl, return_pct });
        self.open_trip.add_close(sign * closed, pnl, return_pct);
        if self.position.is_flat() {
            let trip = std::mem::take(&mut self.open_trip).finish();
            self.round_trips.push(trip);
        }
        closed
    }

    /// Export closed trades to CSV.
    /// CSV columns: qty,entry_price,exit_price,pnl,return_pct
    pub fn export_csv(&self, path: &std::path::Path) -> crate::Result<()> {
        let mut wtr = csv::Writer::from_path(path)?;
        for t in &self.closed_trades {
            wtr.serialize(t)?;
        }
        wtr.flush()?;
        Ok(())
    }
}
