//! Rolling reward/risk estimate from realized trade returns.

use statrs::statistics::Statistics;

use crate::config::RewardRiskConfig;

const RR_FLOOR: f64 = 0.3;
const RR_CEIL: f64 = 3.0;

/// Average win over average loss across the most recent trades.
#[derive(Debug, Clone)]
pub struct RewardRiskEstimator {
    min_trades: usize,
    default_rr: f64,
    window: usize,
    trades: Vec<f64>,
}

impl Default for RewardRiskEstimator {
    fn default() -> Self {
        Self::new(20, 1.0)
    }
}

impl RewardRiskEstimator {
    /// Estimator over the last 100 trades.
    pub fn new(min_trades: usize, default_rr: f64) -> Self {
        Self { min_trades, default_rr, window: 100, trades: Vec::new() }
    }

    pub fn from_config(cfg: &RewardRiskConfig) -> Self {
        Self { min_trades: cfg.min_trades, default_rr: cfg.default_rr, window: cfg.window.max(1), trades: Vec::new() }
    }

    /// Replace the sample window with the most recent trade returns (fractions).
    pub fn batch_update(&mut self, trades: &[f64]) {
        let start = trades.len().saturating_sub(self.window);
        self.trades = trades[start..].to_vec();
    }

    pub fn samples(&self) -> &[f64] {
        &self.trades
    }

    /// Reward/risk ratio clamped to [0.3, 3.0], or `default_rr` when there are
    /// too few samples or only one side (wins or losses) is represented.
    pub fn estimate(&self) -> f64 {
        if self.trades.len() < self.min_trades {
            return self.default_rr;
        }

        let wins: Vec<f64> = self.trades.iter().copied().filter(|r| *r > 0.0).collect();
        let losses: Vec<f64> = self.trades.iter().filter(|r| **r < 0.0).map(|r| -r).collect();

        if wins.is_empty() || losses.is_empty() {
            return self.default_rr;
        }

        let avg_win = wins.iter().mean();
        let avg_loss = losses.iter().mean();
        (avg_win / avg_loss).clamp(RR_FLOOR, RR_CEIL)
    }
}
