//! Position decision engine.
//!
//! Tracks the current exposure of a single instrument and, on every bar,
//! turns the incoming long/short probabilities into exactly one decision:
//! open, close, rebalance or hold. The engine performs no I/O; the harness
//! executes decisions and re-synchronises the engine through [`DecisionEngine::set_state`].

use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::StrategyConfig;
use crate::risk::{self, PositionSizer, RiskAction, RiskRule, StopLossRule, TakeProfitRule};
use crate::utils::error::{Error, Result};

/// Floor for the relative-size denominator.
const SIZE_EPSILON: f64 = 1e-9;

/// What the harness should do this bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Open,
    Close,
    Rebalance,
    Hold,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Open => "OPEN",
            Action::Close => "CLOSE",
            Action::Rebalance => "REBALANCE",
            Action::Hold => "HOLD",
        };
        f.write_str(s)
    }
}

/// Why a decision was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reason {
    TakeProfit,
    StopLoss,
    OpenFromFlat,
    FlatNoSignal,
    MinHold { held: u32, required: u32 },
    SameDirRebalance,
    SameDirNoRebalance,
    ReverseClose,
    NoSignalKeep,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::TakeProfit => f.write_str("TakeProfit"),
            Reason::StopLoss => f.write_str("StopLoss"),
            Reason::OpenFromFlat => f.write_str("OpenFromFlat"),
            Reason::FlatNoSignal => f.write_str("FlatNoSignal"),
            Reason::MinHold { held, required } => write!(f, "MinHold({held}/{required})"),
            Reason::SameDirRebalance => f.write_str("SameDirRebalance"),
            Reason::SameDirNoRebalance => f.write_str("SameDirNoRebalance"),
            Reason::ReverseClose => f.write_str("ReverseClose"),
            Reason::NoSignalKeep => f.write_str("NoSignalKeep"),
        }
    }
}

/// One bar's decision. Produced and consumed once.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    /// Signed quantity change requested from the harness.
    pub delta_qty: f64,
    /// Signed target exposure as a fraction of equity.
    pub target_ratio: f64,
    /// Signed target quantity implied by `target_ratio`.
    pub target_position: f64,
    pub reason: Reason,
}

impl Decision {
    fn hold(target_ratio: f64, target_position: f64, reason: Reason) -> Self {
        Self { action: Action::Hold, delta_qty: 0.0, target_ratio, target_position, reason }
    }

    pub fn is_hold(&self) -> bool {
        self.action == Action::Hold
    }
}

/// The engine's belief about the live position.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EngineState {
    pub position: f64,
    pub entry_price: f64,
    pub hold_bars: u32,
}

impl EngineState {
    pub fn is_flat(&self) -> bool {
        self.position == 0.0
    }
}

/// Behavioural phase of the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No position.
    Flat,
    /// Position inside its minimum holding window.
    Holding,
    /// Position eligible for rebalancing or reversal.
    Active,
}

/// Per-bar market and signal inputs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BarInput {
    pub price: f64,
    pub equity: f64,
    pub long_prob: f64,
    pub short_prob: f64,
    pub money_flow_ratio: f64,
    pub volatility: f64,
}

impl BarInput {
    fn validate(&self) -> Result<()> {
        if !(self.price.is_finite() && self.price > 0.0) {
            return Err(Error::invalid_input(format!("price must be > 0, got {}", self.price)));
        }
        if !(self.equity.is_finite() && self.equity >= 0.0) {
            return Err(Error::invalid_input(format!("equity must be >= 0, got {}", self.equity)));
        }
        for (name, p) in [("long_prob", self.long_prob), ("short_prob", self.short_prob)] {
            if !(0.0..=1.0).contains(&p) {
                return Err(Error::invalid_input(format!("{name} must be in [0, 1], got {p}")));
            }
        }
        if !self.money_flow_ratio.is_finite() {
            return Err(Error::invalid_input("money_flow_ratio must be finite"));
        }
        if !(self.volatility.is_finite() && self.volatility >= 0.0) {
            return Err(Error::invalid_input(format!(
                "volatility must be >= 0, got {}",
                self.volatility
            )));
        }
        Ok(())
    }
}

/// Single-instrument position state machine.
///
/// One engine per instrument; `on_bar` is called exactly once per bar.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    sizer: PositionSizer,
    cfg: StrategyConfig,
    exit_rules: Vec<Box<dyn RiskRule>>,
    state: EngineState,
}

impl DecisionEngine {
    /// Build a flat engine. Rejects non-positive thresholds and limits.
    pub fn new(sizer: PositionSizer, cfg: StrategyConfig) -> Result<Self> {
        cfg.validate()?;
        let exit_rules: Vec<Box<dyn RiskRule>> = vec![
            Box::new(TakeProfitRule::new(cfg.take_profit)),
            Box::new(StopLossRule::new(cfg.stop_loss)),
        ];
        Ok(Self { sizer, cfg, exit_rules, state: EngineState::default() })
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.cfg
    }

    pub fn sizer(&self) -> &PositionSizer {
        &self.sizer
    }

    pub fn reward_risk(&self) -> f64 {
        self.cfg.reward_risk
    }

    /// Replace the payoff ratio used by the Kelly term (e.g. from a fresh
    /// [`crate::risk::RewardRiskEstimator`] estimate).
    pub fn set_reward_risk(&mut self, reward_risk: f64) -> Result<()> {
        if !(reward_risk.is_finite() && reward_risk > 0.0) {
            return Err(Error::invalid_input(format!("reward_risk must be > 0, got {reward_risk}")));
        }
        self.cfg.reward_risk = reward_risk;
        Ok(())
    }

    /// Overwrite the engine's belief with ground truth from the account.
    ///
    /// `hold_bars` is kept unchanged when `None`. Position and entry price
    /// must be both zero or both non-zero, and the entry price never negative.
    pub fn set_state(&mut self, position: f64, entry_price: f64, hold_bars: Option<u32>) -> Result<()> {
        if !position.is_finite() || !entry_price.is_finite() {
            return Err(Error::invalid_input("position and entry_price must be finite"));
        }
        if entry_price < 0.0 {
            return Err(Error::invalid_input(format!("entry_price must be >= 0, got {entry_price}")));
        }
        if (position == 0.0) != (entry_price == 0.0) {
            return Err(Error::invalid_input(format!(
                "position ({position}) and entry_price ({entry_price}) must both be zero or both non-zero"
            )));
        }
        self.state.position = position;
        self.state.entry_price = entry_price;
        if let Some(h) = hold_bars {
            self.state.hold_bars = h;
        }
        Ok(())
    }

    pub fn get_state(&self) -> EngineState {
        self.state
    }

    pub fn phase(&self) -> Phase {
        if self.state.is_flat() {
            Phase::Flat
        } else if self.state.hold_bars < self.cfg.min_hold_bars {
            Phase::Holding
        } else {
            Phase::Active
        }
    }

    /// Signed target ratio for this bar's probabilities. Long wins when both
    /// thresholds are exceeded.
    pub fn target_ratio(&self, bar: &BarInput) -> f64 {
        let rr = self.cfg.reward_risk;
        if bar.long_prob > self.cfg.threshold_long {
            self.sizer.calculate_target_ratio(bar.long_prob, bar.money_flow_ratio, bar.volatility, rr)
        } else if bar.short_prob > self.cfg.threshold_short {
            -self.sizer.calculate_target_ratio(bar.short_prob, bar.money_flow_ratio, bar.volatility, rr)
        } else {
            0.0
        }
    }

    /// Evaluate one bar. Call exactly once per bar.
    pub fn on_bar(&mut self, bar: &BarInput) -> Result<Decision> {
        bar.validate()?;
        let decision = self.step(bar)?;
        debug!(
            "bar price={:.4} long={:.3} short={:.3} -> {} {} delta={:.6} target={:.6} state={:?}",
            bar.price,
            bar.long_prob,
            bar.short_prob,
            decision.action,
            decision.reason,
            decision.delta_qty,
            decision.target_position,
            self.state
        );
        Ok(decision)
    }

    fn step(&mut self, bar: &BarInput) -> Result<Decision> {
        let price = bar.price;
        let pos = self.state.position;

        // 1) exits preempt everything, including the minimum hold
        if pos != 0.0 {
            let pnl = risk::pnl_pct(pos, self.state.entry_price, price)?;
            if let Some(action) = risk::first_triggered(&self.exit_rules, pnl) {
                let reason = match action {
                    RiskAction::TakeProfit => Reason::TakeProfit,
                    RiskAction::StopLoss => Reason::StopLoss,
                };
                return Ok(self.close_all(0.0, 0.0, reason));
            }
        }

        // 2) target exposure
        let target_ratio = self.target_ratio(bar);
        let target_position = target_ratio * bar.equity / price;

        // 3) flat: only opening is possible
        if pos == 0.0 {
            if target_position != 0.0 && (target_position * price).abs() >= self.cfg.min_adjust_amount {
                self.state = EngineState { position: target_position, entry_price: price, hold_bars: 0 };
                return Ok(Decision {
                    action: Action::Open,
                    delta_qty: target_position,
                    target_ratio,
                    target_position,
                    reason: Reason::OpenFromFlat,
                });
            }
            return Ok(Decision::hold(target_ratio, target_position, Reason::FlatNoSignal));
        }

        // 4) minimum holding period
        self.state.hold_bars = self.state.hold_bars.saturating_add(1);
        if self.state.hold_bars < self.cfg.min_hold_bars {
            return Ok(Decision::hold(
                target_ratio,
                target_position,
                Reason::MinHold { held: self.state.hold_bars, required: self.cfg.min_hold_bars },
            ));
        }

        // 5) same direction: bounded partial rebalance
        let same_direction = (pos > 0.0 && target_position > 0.0) || (pos < 0.0 && target_position < 0.0);
        if same_direction {
            let size = pos.abs();
            let diff_ratio = (target_position - pos) / size.max(SIZE_EPSILON);
            if diff_ratio.abs() >= self.cfg.add_threshold {
                let cap = self.cfg.max_rebalance_ratio * size;
                // scaled by the signed position: for a short, a deeper target yields a positive delta
                let delta = (diff_ratio * pos).clamp(-cap, cap);
                if (delta * price).abs() >= self.cfg.min_adjust_amount {
                    self.apply_rebalance(delta, price);
                    return Ok(Decision {
                        action: Action::Rebalance,
                        delta_qty: delta,
                        target_ratio,
                        target_position,
                        reason: Reason::SameDirRebalance,
                    });
                }
            }
            return Ok(Decision::hold(target_ratio, target_position, Reason::SameDirNoRebalance));
        }

        // 6) opposite direction: flatten first, never flip in one bar
        if target_position != 0.0 {
            return Ok(self.close_all(target_ratio, target_position, Reason::ReverseClose));
        }

        // 7) no signal
        Ok(Decision::hold(target_ratio, target_position, Reason::NoSignalKeep))
    }

    fn close_all(&mut self, target_ratio: f64, target_position: f64, reason: Reason) -> Decision {
        let delta_qty = -self.state.position;
        self.state = EngineState::default();
        Decision { action: Action::Close, delta_qty, target_ratio, target_position, reason }
    }

    /// Adds move the entry price to the volume-weighted average; reductions keep it.
    fn apply_rebalance(&mut self, delta: f64, price: f64) {
        let pos = self.state.position;
        let new_pos = pos + delta;
        if delta.signum() == pos.signum() {
            self.state.entry_price = (pos * self.state.entry_price + delta * price) / new_pos;
        }
        self.state.position = new_pos;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SizingConfig;
    use assert_matches::assert_matches;

    fn engine_with(min_hold_bars: u32) -> DecisionEngine {
        let sizer = PositionSizer::new(&SizingConfig {
            min_ratio: 0.05,
            max_ratio: 0.3,
            adjust_unit: 50.0,
            target_vol: 0.015,
        })
        .unwrap();
        let cfg = StrategyConfig {
            threshold_long: 0.6,
            threshold_short: 0.6,
            take_profit: 0.02,
            stop_loss: 0.01,
            min_hold_bars,
            add_threshold: 0.15,
            max_rebalance_ratio: 0.3,
            min_adjust_amount: 10.0,
            reward_risk: 2.5,
        };
        DecisionEngine::new(sizer, cfg).unwrap()
    }

    fn bar(price: f64, long_prob: f64, short_prob: f64) -> BarInput {
        BarInput { price, equity: 1000.0, long_prob, short_prob, money_flow_ratio: 5.0, volatility: 0.01 }
    }

    #[test]
    fn rejects_invalid_config() {
        let sizer = engine_with(1).sizer().clone();
        let mut cfg = engine_with(1).config().clone();
        cfg.stop_loss = -0.01;
        assert_matches!(DecisionEngine::new(sizer.clone(), cfg), Err(Error::ConfigError(_)));

        let mut cfg = engine_with(1).config().clone();
        cfg.threshold_long = 0.0;
        assert_matches!(DecisionEngine::new(sizer, cfg), Err(Error::ConfigError(_)));
    }

    #[test]
    fn opens_long_from_flat() {
        let mut engine = engine_with(8);
        let d = engine.on_bar(&bar(100.0, 0.7, 0.2)).unwrap();
        assert_eq!(d.action, Action::Open);
        assert_eq!(d.reason, Reason::OpenFromFlat);
        assert!((d.delta_qty - 0.87).abs() < 1e-9);
        assert!((d.target_ratio - 0.087).abs() < 1e-12);

        let s = engine.get_state();
        assert!((s.position - 0.87).abs() < 1e-9);
        assert_eq!(s.entry_price, 100.0);
        assert_eq!(s.hold_bars, 0);
        assert_eq!(engine.phase(), Phase::Holding);
    }

    #[test]
    fn opens_short_from_flat() {
        let mut engine = engine_with(8);
        let d = engine.on_bar(&bar(100.0, 0.2, 0.7)).unwrap();
        assert_eq!(d.action, Action::Open);
        assert!(d.delta_qty < 0.0);
        assert!(d.target_ratio < 0.0);
        assert!(engine.get_state().position < 0.0);
    }

    #[test]
    fn long_wins_when_both_thresholds_exceeded() {
        let mut engine = engine_with(8);
        let d = engine.on_bar(&bar(100.0, 0.7, 0.9)).unwrap();
        assert_eq!(d.action, Action::Open);
        assert!(d.delta_qty > 0.0);
    }

    #[test]
    fn holds_when_flat_without_signal() {
        let mut engine = engine_with(8);
        let d = engine.on_bar(&bar(100.0, 0.55, 0.55)).unwrap();
        assert_eq!(d.action, Action::Hold);
        assert_eq!(d.reason, Reason::FlatNoSignal);
        assert_eq!(d.target_ratio, 0.0);
        assert_eq!(engine.get_state(), EngineState::default());
    }

    #[test]
    fn holds_when_notional_below_minimum() {
        let mut engine = engine_with(8);
        let mut b = bar(100.0, 0.7, 0.2);
        b.equity = 100.0; // target notional 8.7 < 10
        let d = engine.on_bar(&b).unwrap();
        assert_eq!(d.action, Action::Hold);
        assert_eq!(d.reason, Reason::FlatNoSignal);
        assert!(d.target_position > 0.0);
    }

    #[test]
    fn min_hold_blocks_reversal_but_not_exits() {
        let mut engine = engine_with(3);
        engine.on_bar(&bar(100.0, 0.7, 0.2)).unwrap();

        let d = engine.on_bar(&bar(100.0, 0.1, 0.9)).unwrap();
        assert_eq!(d.action, Action::Hold);
        assert_eq!(d.reason, Reason::MinHold { held: 1, required: 3 });
        assert_eq!(engine.get_state().hold_bars, 1);

        let d = engine.on_bar(&bar(102.5, 0.1, 0.9)).unwrap();
        assert_eq!(d.action, Action::Close);
        assert_eq!(d.reason, Reason::TakeProfit);
        assert!((d.delta_qty + 0.87).abs() < 1e-9);
        assert_eq!(engine.get_state(), EngineState::default());
    }

    #[test]
    fn stop_loss_for_short_position() {
        let mut engine = engine_with(8);
        engine.set_state(-2.0, 100.0, Some(0)).unwrap();
        let d = engine.on_bar(&bar(101.0, 0.5, 0.9)).unwrap();
        assert_eq!(d.action, Action::Close);
        assert_eq!(d.reason, Reason::StopLoss);
        assert_eq!(d.delta_qty, 2.0);
        assert_eq!(d.target_ratio, 0.0);
    }

    #[test]
    fn reverse_signal_closes_active_position() {
        let mut engine = engine_with(1);
        engine.set_state(1.0, 100.0, Some(5)).unwrap();
        let d = engine.on_bar(&bar(100.5, 0.1, 0.8)).unwrap();
        assert_eq!(d.action, Action::Close);
        assert_eq!(d.reason, Reason::ReverseClose);
        assert_eq!(d.delta_qty, -1.0);
        assert!(d.target_position < 0.0);
        assert_eq!(engine.phase(), Phase::Flat);
    }

    #[test]
    fn rebalance_adds_toward_target_with_cap() {
        let mut engine = engine_with(1);
        // target 0.87 units, holding 0.5 -> diff_ratio 0.74, capped at 30%
        engine.set_state(0.5, 100.0, Some(1)).unwrap();
        let d = engine.on_bar(&bar(100.0, 0.7, 0.2)).unwrap();
        assert_eq!(d.action, Action::Rebalance);
        assert!((d.delta_qty - 0.15).abs() < 1e-9);
        let s = engine.get_state();
        assert!((s.position - 0.65).abs() < 1e-9);
        assert!((s.entry_price - 100.0).abs() < 1e-9);
    }

    #[test]
    fn short_rebalance_scales_by_signed_position() {
        let mut engine = engine_with(1);
        // short 0.5 under a 0.87 short target: diff_ratio -0.74, delta +0.37 capped at +0.15
        engine.set_state(-0.5, 100.0, Some(1)).unwrap();
        let d = engine.on_bar(&bar(100.0, 0.2, 0.7)).unwrap();
        assert_eq!(d.action, Action::Rebalance);
        assert_eq!(d.reason, Reason::SameDirRebalance);
        assert!((d.delta_qty - 0.15).abs() < 1e-9);
        let s = engine.get_state();
        assert!((s.position + 0.35).abs() < 1e-9);
        assert_eq!(s.entry_price, 100.0);
    }

    #[test]
    fn oversized_short_rebalance_scales_by_signed_position() {
        let mut engine = engine_with(1);
        // short 2.0 over a 0.87 short target: diff_ratio 0.565, delta -1.13 capped at -0.6
        engine.set_state(-2.0, 100.0, Some(1)).unwrap();
        let d = engine.on_bar(&bar(100.0, 0.2, 0.7)).unwrap();
        assert_eq!(d.action, Action::Rebalance);
        assert!((d.delta_qty + 0.6).abs() < 1e-9);
        let s = engine.get_state();
        assert!((s.position + 2.6).abs() < 1e-9);
        assert!((s.entry_price - 100.0).abs() < 1e-9);
    }

    #[test]
    fn rebalance_reduces_oversized_position() {
        let mut engine = engine_with(1);
        engine.set_state(2.0, 100.0, Some(1)).unwrap();
        let d = engine.on_bar(&bar(100.0, 0.7, 0.2)).unwrap();
        assert_eq!(d.action, Action::Rebalance);
        assert!((d.delta_qty + 0.6).abs() < 1e-9);
        let s = engine.get_state();
        assert!((s.position - 1.4).abs() < 1e-9);
        assert_eq!(s.entry_price, 100.0);
    }

    #[test]
    fn adding_updates_entry_to_vwap() {
        let mut engine = engine_with(1);
        engine.set_state(0.5, 99.0, Some(1)).unwrap();
        engine.on_bar(&bar(100.0, 0.7, 0.2)).unwrap();
        let s = engine.get_state();
        let expected = (0.5 * 99.0 + 0.15 * 100.0) / 0.65;
        assert!((s.entry_price - expected).abs() < 1e-9);
    }

    #[test]
    fn small_difference_holds() {
        let mut engine = engine_with(1);
        engine.set_state(0.8, 100.0, Some(1)).unwrap();
        let d = engine.on_bar(&bar(100.0, 0.7, 0.2)).unwrap();
        assert_eq!(d.action, Action::Hold);
        assert_eq!(d.reason, Reason::SameDirNoRebalance);
    }

    #[test]
    fn no_signal_keeps_position() {
        let mut engine = engine_with(1);
        engine.set_state(1.0, 100.0, Some(3)).unwrap();
        let d = engine.on_bar(&bar(100.0, 0.5, 0.5)).unwrap();
        assert_eq!(d.action, Action::Hold);
        assert_eq!(d.reason, Reason::NoSignalKeep);
        let s = engine.get_state();
        assert_eq!(s.position, 1.0);
        assert_eq!(s.hold_bars, 4);
    }

    #[test]
    fn set_state_round_trip_and_validation() {
        let mut engine = engine_with(8);
        engine.set_state(-3.25, 42.5, Some(7)).unwrap();
        assert_eq!(engine.get_state(), EngineState { position: -3.25, entry_price: 42.5, hold_bars: 7 });

        engine.set_state(1.0, 50.0, None).unwrap();
        assert_eq!(engine.get_state().hold_bars, 7);

        assert_matches!(engine.set_state(1.0, 0.0, None), Err(Error::InvalidInput(_)));
        assert_matches!(engine.set_state(0.0, 10.0, None), Err(Error::InvalidInput(_)));
        assert_matches!(engine.set_state(1.0, -10.0, None), Err(Error::InvalidInput(_)));
        assert_eq!(engine.get_state().position, 1.0);
    }

    #[test]
    fn invalid_bar_fails_without_mutation() {
        let mut engine = engine_with(8);
        engine.set_state(1.0, 100.0, Some(2)).unwrap();
        let before = engine.get_state();

        assert_matches!(engine.on_bar(&bar(0.0, 0.7, 0.2)), Err(Error::InvalidInput(_)));
        assert_matches!(engine.on_bar(&bar(-5.0, 0.7, 0.2)), Err(Error::InvalidInput(_)));
        assert_matches!(engine.on_bar(&bar(100.0, 1.2, 0.2)), Err(Error::InvalidInput(_)));
        assert_matches!(engine.on_bar(&bar(100.0, f64::NAN, 0.2)), Err(Error::InvalidInput(_)));
        assert_eq!(engine.get_state(), before);
    }

    #[test]
    fn set_reward_risk_changes_sizing() {
        let mut engine = engine_with(8);
        let b = bar(100.0, 0.7, 0.2);
        let before = engine.target_ratio(&b);
        engine.set_reward_risk(1.0).unwrap();
        let after = engine.target_ratio(&b);
        assert!(after < before);
        assert!(engine.set_reward_risk(0.0).is_err());
    }
}
