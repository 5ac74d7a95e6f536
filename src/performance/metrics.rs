use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Running equity-curve statistics, updated once per bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityMetrics {
    pub starting_equity: f64,
    pub last_equity: f64,
    pub peak_equity: f64,
    pub max_drawdown: f64,
    pub current_drawdown: f64,
    /// Per-bar simple returns.
    pub returns: Vec<f64>,
}

impl EquityMetrics {
    pub fn new(starting_equity: f64) -> Self {
        Self {
            starting_equity,
            last_equity: starting_equity,
            peak_equity: starting_equity,
            max_drawdown: 0.0,
            current_drawdown: 0.0,
            returns: Vec::new(),
        }
    }

    /// Record the mark-to-market equity at the close of a bar.
    pub fn record(&mut self, equity: f64) {
        if self.last_equity > 0.0 {
            self.returns.push(equity / self.last_equity - 1.0);
        }
        self.last_equity = equity;

        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        self.current_drawdown = if self.peak_equity > 0.0 { (self.peak_equity - equity) / self.peak_equity } else { 0.0 };
        self.max_drawdown = self.max_drawdown.max(self.current_drawdown);
    }

    pub fn total_return(&self) -> f64 {
        if self.starting_equity > 0.0 {
            self.last_equity / self.starting_equity - 1.0
        } else {
            0.0
        }
    }

    pub fn sharpe_ratio(&self) -> f64 {
        sharpe_ratio(&self.returns)
    }
}

/// Mean over sample standard deviation of per-period returns, not annualised.
/// Zero when fewer than two returns exist or the series is flat.
pub fn sharpe_ratio(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.iter().mean();
    let std = returns.iter().std_dev();
    if std.is_finite() && std > 0.0 {
        mean / std
    } else {
        0.0
    }
}

/// Win/loss summary of closed trades.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeStats {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub gross_profit: f64,
    pub gross_loss: f64,
}

impl TradeStats {
    pub fn from_pnls(pnls: impl IntoIterator<Item = f64>) -> Self {
        let mut stats = Self::default();
        for pnl in pnls {
            stats.total_trades += 1;
            if pnl > 0.0 {
                stats.winning_trades += 1;
                stats.gross_profit += pnl;
            } else if pnl < 0.0 {
                stats.losing_trades += 1;
                stats.gross_loss += -pnl;
            }
        }
        stats
    }

    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            0.0
        } else {
            self.winning_trades as f64 / self.total_trades as f64
        }
    }

    /// Gross profit over gross loss; infinite when there are no losses.
    pub fn profit_factor(&self) -> f64 {
        if self.gross_loss > 0.0 {
            self.gross_profit / self.gross_loss
        } else if self.gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    }
}
