//! Parameter grid search over the engine's entry and exit thresholds.
//!
//! Every combination gets its own [`Backtester`] (and therefore its own
//! engine and account); runs are spread across the rayon thread pool.

use std::path::Path;

use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{Backtester, Bar};
use crate::config::Config;
use crate::Result;

/// Candidate values for each tuned parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSearch {
    pub threshold_long: Vec<f64>,
    pub threshold_short: Vec<f64>,
    pub take_profit: Vec<f64>,
    pub stop_loss: Vec<f64>,
}

impl Default for GridSearch {
    fn default() -> Self {
        Self {
            threshold_long: vec![0.55, 0.6, 0.65],
            threshold_short: vec![0.35, 0.4, 0.45],
            take_profit: vec![0.02, 0.03, 0.04],
            stop_loss: vec![0.01, 0.015, 0.02],
        }
    }
}

/// Outcome of one parameter combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub threshold_long: f64,
    pub threshold_short: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub sharpe_ratio: f64,
    pub total_return: f64,
    pub max_drawdown: f64,
    pub total_trades: usize,
    pub win_rate: f64,
}

impl GridSearch {
    /// Every combination applied on top of `base`.
    pub fn candidates(&self, base: &Config) -> Vec<Config> {
        let mut out = Vec::with_capacity(
            self.threshold_long.len() * self.threshold_short.len() * self.take_profit.len() * self.stop_loss.len(),
        );
        for &tl in &self.threshold_long {
            for &ts in &self.threshold_short {
                for &tp in &self.take_profit {
                    for &sl in &self.stop_loss {
                        let mut cfg = base.clone();
                        cfg.strategy.threshold_long = tl;
                        cfg.strategy.threshold_short = ts;
                        cfg.strategy.take_profit = tp;
                        cfg.strategy.stop_loss = sl;
                        out.push(cfg);
                    }
                }
            }
        }
        out
    }

    /// Backtest every combination and return results sorted by Sharpe, best first.
    /// Combinations that fail validation are skipped with a warning.
    pub fn run(&self, base: &Config, bars: &[Bar]) -> Result<Vec<OptimizationResult>> {
        let candidates = self.candidates(base);
        info!("grid search over {} combinations, {} bars", candidates.len(), bars.len());

        let mut results: Vec<OptimizationResult> = candidates
            .into_par_iter()
            .filter_map(|cfg| {
                let s = &cfg.strategy;
                let label = format!(
                    "long={} short={} tp={} sl={}",
                    s.threshold_long, s.threshold_short, s.take_profit, s.stop_loss
                );
                match Backtester::new(cfg.clone()).and_then(|bt| bt.run(bars)) {
                    Ok(report) => Some(OptimizationResult {
                        threshold_long: cfg.strategy.threshold_long,
                        threshold_short: cfg.strategy.threshold_short,
                        take_profit: cfg.strategy.take_profit,
                        stop_loss: cfg.strategy.stop_loss,
                        sharpe_ratio: report.sharpe_ratio,
                        total_return: report.total_return(),
                        max_drawdown: report.max_drawdown,
                        total_trades: report.total_trades,
                        win_rate: report.winning_trades as f64 / report.total_trades.max(1) as f64,
                    }),
                    Err(e) => {
                        warn!("skipping {label}: {e}");
                        None
                    }
                }
            })
            .collect();

        results.sort_by(|a, b| b.sharpe_ratio.total_cmp(&a.sharpe_ratio));
        Ok(results)
    }
}

/// Write results to CSV, one row per combination.
pub fn export_results_csv(results: &[OptimizationResult], path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    for r in results {
        wtr.serialize(r)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trending_bars() -> Vec<Bar> {
        (0..40)
            .map(|i| Bar {
                timestamp: i,
                close: 100.0 + i as f64 * 0.5,
                long_prob: 0.7,
                short_prob: 0.2,
                money_flow_ratio: 5.0,
                volatility: 0.01,
            })
            .collect()
    }

    #[test]
    fn default_grid_has_81_candidates() {
        let grid = GridSearch::default();
        let cands = grid.candidates(&Config::default());
        assert_eq!(cands.len(), 81);
        assert_eq!(cands[0].strategy.threshold_long, 0.55);
        assert_eq!(cands[80].strategy.stop_loss, 0.02);
    }

    #[test]
    fn results_are_sorted_by_sharpe() {
        let grid = GridSearch {
            threshold_long: vec![0.6, 0.75],
            threshold_short: vec![0.4],
            take_profit: vec![0.02, 0.04],
            stop_loss: vec![0.01],
        };
        let mut base = Config::default();
        base.strategy.min_adjust_amount = 10.0;
        let results = grid.run(&base, &trending_bars()).unwrap();
        assert_eq!(results.len(), 4);
        assert!(results.windows(2).all(|w| w[0].sharpe_ratio >= w[1].sharpe_ratio));
        // long threshold 0.75 never triggers on 0.7 probabilities
        assert!(results.iter().filter(|r| r.threshold_long == 0.75).all(|r| r.total_trades == 0));
    }

    #[test]
    fn invalid_combinations_are_skipped() {
        let grid = GridSearch {
            threshold_long: vec![0.6, 1.5],
            threshold_short: vec![0.4],
            take_profit: vec![0.02],
            stop_loss: vec![0.01],
        };
        let results = grid.run(&Config::default(), &trending_bars()).unwrap();
        assert_eq!(results.len(), 1);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.csv");
        export_results_csv(&results, &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("threshold_long,threshold_short,take_profit,stop_loss,sharpe_ratio"));
    }
}
