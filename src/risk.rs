//! Risk management rules (stop-loss / take-profit) and the sizing policies.
//! Exit rules are evaluated by the decision engine before any signal logic
//! and can be reused by a live harness without further dependencies.

use crate::utils::error::{Error, Result};

pub mod position_sizer;
pub mod reward_risk;

pub use position_sizer::PositionSizer;
pub use reward_risk::RewardRiskEstimator;

/// Action requested by a risk-rule evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskAction {
    /// Close the entire position at market: profit target reached.
    TakeProfit,
    /// Close the entire position at market: loss limit breached.
    StopLoss,
}

/// Signed PnL fraction of a position relative to its entry price.
///
/// Positive when the position is in profit, for longs and shorts alike.
/// A flat position has no PnL and yields `0.0`.
pub fn pnl_pct(position: f64, entry_price: f64, current_price: f64) -> Result<f64> {
    if position == 0.0 {
        return Ok(0.0);
    }
    if !(entry_price.is_finite() && entry_price > 0.0) {
        return Err(Error::invalid_input(format!(
            "entry_price must be > 0 for a non-flat position, got {entry_price}"
        )));
    }
    if !(current_price.is_finite() && current_price > 0.0) {
        return Err(Error::invalid_input(format!("price must be > 0, got {current_price}")));
    }
    let change = (current_price - entry_price) / entry_price;
    Ok(if position > 0.0 { change } else { -change })
}

/// Generic interface for risk-management rules.
pub trait RiskRule: std::fmt::Debug + Send + Sync {
    /// Evaluate the rule for the given signed PnL fraction.
    ///
    /// Return `Some(RiskAction)` if the rule triggers, otherwise `None`.
    fn evaluate(&self, pnl_pct: f64) -> Option<RiskAction>;

    /// Clone boxed trait-objects safely.
    fn box_clone(&self) -> Box<dyn RiskRule>;
}

impl Clone for Box<dyn RiskRule> {
    fn clone(&self) -> Self { self.box_clone() }
}

/// Stop-loss rule: close once the position has lost `pct` or more.
#[derive(Debug, Clone)]
pub struct StopLossRule {
    pct: f64, // e.g. 0.01 = 1%
}

impl StopLossRule {
    pub fn new(pct: f64) -> Self { Self { pct } }
}

impl RiskRule for StopLossRule {
    fn evaluate(&self, pnl_pct: f64) -> Option<RiskAction> {
        (pnl_pct <= -self.pct).then_some(RiskAction::StopLoss)
    }

    fn box_clone(&self) -> Box<dyn RiskRule> { Box::new(self.clone()) }
}

/// Take-profit rule: close once the position has gained `pct` or more.
#[derive(Debug, Clone)]
pub struct TakeProfitRule {
    pct: f64,
}

impl TakeProfitRule {
    pub fn new(pct: f64) -> Self { Self { pct } }
}

impl RiskRule for TakeProfitRule {
    fn evaluate(&self, pnl_pct: f64) -> Option<RiskAction> {
        (pnl_pct >= self.pct).then_some(RiskAction::TakeProfit)
    }

    fn box_clone(&self) -> Box<dyn RiskRule> { Box::new(self.clone()) }
}

/// Run `rules` in order and return the first action that fires.
pub fn first_triggered(rules: &[Box<dyn RiskRule>], pnl_pct: f64) -> Option<RiskAction> {
    rules.iter().find_map(|r| r.evaluate(pnl_pct))
}
