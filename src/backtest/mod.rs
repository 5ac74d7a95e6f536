//! Backtesting harness.
//!
//! Replays historical bars through a [`DecisionEngine`] against a simulated
//! [`MarginAccount`]. Every bar follows the same contract as a live loop:
//! sync the engine from the account, decide once, execute, reconcile.

use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::execution::{apply_decision, ExecutionAdapter, ExecutionError, Fill};
use crate::performance::{EquityMetrics, TradeStats};
use crate::portfolio::{ClosedTrade, MarginAccount};
use crate::risk::{PositionSizer, RewardRiskEstimator};
use crate::strategy::{Action, Decision, DecisionEngine, PairSmoother, Reason, SignalPair};
use crate::Result;

pub mod optimizer;
pub mod providers;

pub use optimizer::{GridSearch, OptimizationResult};
pub use providers::{Bar, CSVHistoricalDataProvider, ModelOutputsProvider};

/// Trait for historical data providers
pub trait HistoricalDataProvider {
    fn load(&self, data_file: &Path) -> Result<Vec<Bar>>;
}

/// Result of one harness step.
#[derive(Debug, Clone, PartialEq)]
pub struct BarOutcome {
    pub decision: Decision,
    pub fill: Option<Fill>,
    pub rejected: Option<ExecutionError>,
}

/// Overwrite the engine's position belief with the adapter's ground truth,
/// keeping the engine's own hold counter.
pub fn sync_engine<A: ExecutionAdapter + ?Sized>(engine: &mut DecisionEngine, adapter: &A) -> Result<()> {
    let snapshot = adapter.position();
    let believed = engine.get_state().position;
    if (believed - snapshot.qty).abs() > 1e-12 {
        debug!("reconciling engine position {believed:.6} -> {:.6}", snapshot.qty);
    }
    if snapshot.qty == 0.0 {
        engine.set_state(0.0, 0.0, None)
    } else {
        engine.set_state(snapshot.qty, snapshot.entry_price, None)
    }
}

/// Run one bar through the engine and the adapter.
///
/// Venue rejections are logged and reported in the outcome; they do not
/// abort the run. Invalid bar data does.
pub fn step_bar<A: ExecutionAdapter + ?Sized>(
    engine: &mut DecisionEngine,
    adapter: &mut A,
    bar: &Bar,
    signals: SignalPair,
) -> Result<BarOutcome> {
    sync_engine(engine, adapter)?;
    let equity = adapter.equity(bar.close);
    let decision = engine.on_bar(&bar.to_input(equity, signals))?;

    let (fill, rejected) = match apply_decision(adapter, &decision, bar.close) {
        Ok(fill) => (fill, None),
        Err(e) => {
            warn!("[{}] {} ({}) rejected: {e}", bar.timestamp, decision.action, decision.reason);
            (None, Some(e))
        }
    };

    sync_engine(engine, adapter)?;
    Ok(BarOutcome { decision, fill, rejected })
}

/// Executed order as it appears in the trade log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillRecord {
    pub timestamp: i64,
    pub action: Action,
    pub reason: String,
    pub qty: f64,
    pub price: f64,
    pub fee: f64,
    pub position_after: f64,
    pub equity_after: f64,
}

/// Number of decisions of each kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionCounts {
    pub open: usize,
    pub close: usize,
    pub rebalance: usize,
    pub hold: usize,
    pub take_profit: usize,
    pub stop_loss: usize,
}

impl DecisionCounts {
    pub fn record(&mut self, decision: &Decision) {
        match decision.action {
            Action::Open => self.open += 1,
            Action::Close => self.close += 1,
            Action::Rebalance => self.rebalance += 1,
            Action::Hold => self.hold += 1,
        }
        match decision.reason {
            Reason::TakeProfit => self.take_profit += 1,
            Reason::StopLoss => self.stop_loss += 1,
            _ => {}
        }
    }
}

/// Summary of backtest results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub starting_balance: f64,
    pub ending_balance: f64,
    pub realized_pnl: f64,
    pub fees_paid: f64,
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub rejected_orders: usize,
    pub bars: usize,
    pub decisions: DecisionCounts,
    pub final_reward_risk: f64,
    #[serde(skip)]
    pub fills: Vec<FillRecord>,
    #[serde(skip)]
    pub closed_trades: Vec<ClosedTrade>,
}

impl BacktestReport {
    pub fn total_return(&self) -> f64 {
        if self.starting_balance > 0.0 {
            self.ending_balance / self.starting_balance - 1.0
        } else {
            0.0
        }
    }

    pub fn print(&self) {
        println!("===== BACKTEST REPORT =====");
        println!("Bars          : {}", self.bars);
        println!("Start Balance : {:.2}", self.starting_balance);
        println!("End Balance   : {:.2} ({:+.2}%)", self.ending_balance, self.total_return() * 100.0);
        println!("Realized PnL  : {:.2}", self.realized_pnl);
        println!("Fees Paid     : {:.2}", self.fees_paid);
        println!("Max Drawdown  : {:.2}%", self.max_drawdown * 100.0);
        println!("Sharpe (bar)  : {:.4}", self.sharpe_ratio);
        println!("Total Trades  : {}", self.total_trades);
        println!(
            "Winning Trades: {} ({:.2}%)",
            self.winning_trades,
            self.winning_trades as f64 / self.total_trades.max(1) as f64 * 100.0
        );
        println!("Rejected      : {}", self.rejected_orders);
        println!(
            "Decisions     : open {} / close {} (tp {}, sl {}) / rebalance {} / hold {}",
            self.decisions.open,
            self.decisions.close,
            self.decisions.take_profit,
            self.decisions.stop_loss,
            self.decisions.rebalance,
            self.decisions.hold
        );
        println!("Reward/Risk   : {:.3}", self.final_reward_risk);
        println!("===========================");
    }

    /// Write the fill log.
    /// CSV columns: timestamp,action,reason,qty,price,fee,position_after,equity_after
    pub fn export_trades_csv(&self, path: &Path) -> Result<()> {
        let mut wtr = csv::Writer::from_path(path)?;
        for f in &self.fills {
            wtr.serialize(f)?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Summary as pretty JSON (fills and closed trades excluded).
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Bar-by-bar simulation of one strategy configuration.
#[derive(Debug, Clone)]
pub struct Backtester {
    config: Config,
    show_progress: bool,
}

impl Backtester {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, show_progress: false })
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Load bars with `provider` and run them.
    pub fn run_file(&self, provider: &dyn HistoricalDataProvider, data_file: &Path) -> Result<BacktestReport> {
        let bars = provider.load(data_file)?;
        self.run(&bars)
    }

    pub fn run(&self, bars: &[Bar]) -> Result<BacktestReport> {
        if bars.is_empty() {
            return Err(crate::Error::DataError("No market data loaded".to_string()));
        }
        let cfg = &self.config;

        let sizer = PositionSizer::new(&cfg.sizing)?;
        let mut engine = DecisionEngine::new(sizer, cfg.strategy.clone())?;
        let mut account = MarginAccount::new(
            cfg.backtest.initial_balance,
            cfg.backtest.fee_rate,
            cfg.instrument.leverage,
            cfg.instrument.lot_size,
        );
        let mut smoother = if cfg.signal.smoothing { Some(PairSmoother::new(cfg.signal.smooth_alpha)?) } else { None };
        let mut rr_estimator = RewardRiskEstimator::from_config(&cfg.reward_risk);

        let mut metrics = EquityMetrics::new(cfg.backtest.initial_balance);
        let mut decisions = DecisionCounts::default();
        let mut fills = Vec::new();
        let mut rejected_orders = 0usize;

        let pb = self.progress_bar(bars.len());

        for (i, bar) in bars.iter().enumerate() {
            let signals = match smoother.as_mut() {
                Some(s) => s.smooth(bar.signals()),
                None => bar.signals(),
            };

            let outcome = step_bar(&mut engine, &mut account, bar, signals)?;
            decisions.record(&outcome.decision);
            if outcome.rejected.is_some() {
                rejected_orders += 1;
            }

            let equity = account.equity_at(bar.close);
            if let Some(fill) = outcome.fill {
                fills.push(FillRecord {
                    timestamp: bar.timestamp,
                    action: outcome.decision.action,
                    reason: outcome.decision.reason.to_string(),
                    qty: fill.qty,
                    price: fill.price,
                    fee: fill.fee,
                    position_after: account.position.size,
                    equity_after: equity,
                });
            }
            metrics.record(equity);

            let refresh = cfg.reward_risk.refresh_bars;
            if cfg.reward_risk.adaptive && refresh > 0 && (i + 1) % refresh == 0 {
                rr_estimator.batch_update(&account.trade_returns());
                let rr = rr_estimator.estimate();
                engine.set_reward_risk(rr)?;
                debug!("[{}] reward/risk refreshed to {rr:.3} from {} trades", bar.timestamp, rr_estimator.samples().len());
            }

            if let Some(pb) = &pb {
                pb.inc(1);
            }
        }

        if let Some(pb) = pb {
            pb.finish_with_message("done");
        }

        let last_price = bars.last().map(|b| b.close).unwrap_or_default();
        let stats = TradeStats::from_pnls(account.round_trips.iter().map(|t| t.pnl));
        let report = BacktestReport {
            starting_balance: cfg.backtest.initial_balance,
            ending_balance: account.equity_at(last_price),
            realized_pnl: account.position.realized_pnl,
            fees_paid: account.fees_paid,
            max_drawdown: metrics.max_drawdown,
            sharpe_ratio: metrics.sharpe_ratio(),
            total_trades: stats.total_trades,
            winning_trades: stats.winning_trades,
            rejected_orders,
            bars: bars.len(),
            decisions,
            final_reward_risk: engine.reward_risk(),
            fills,
            closed_trades: account.closed_trades,
        };
        info!(
            "backtest finished: {} bars, {} trades, end balance {:.2}, sharpe {:.4}",
            report.bars, report.total_trades, report.ending_balance, report.sharpe_ratio
        );
        Ok(report)
    }

    fn progress_bar(&self, len: usize) -> Option<ProgressBar> {
        if !self.show_progress {
            return None;
        }
        let pb = ProgressBar::new(len as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} bars ({eta})")
            .map(|s| s.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        Some(pb)
    }
}
