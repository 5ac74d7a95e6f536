//! Position sizing policy.
//! Converts a signal probability plus liquidity/volatility features into a
//! bounded target exposure ratio (fraction of equity).

use crate::config::SizingConfig;
use crate::utils::error::Result;
use crate::utils::round_to;

/// Guards the volatility divisions against a zero estimate.
const VOL_EPSILON: f64 = 1e-6;

/// Bounds on the balance scaling applied by [`PositionSizer::volatility_adjust_balance`].
const VOL_ADJUST_MIN: f64 = 0.5;
const VOL_ADJUST_MAX: f64 = 1.5;

/// Money-flow ratio is expected in roughly [0, 5].
const MONEY_FLOW_SCALE: f64 = 5.0;

/// Volatility level that earns the full volatility term of the multi-factor score.
const REFERENCE_VOL: f64 = 0.02;

/// Pure sizing functions over a fixed set of bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSizer {
    min_ratio: f64,
    max_ratio: f64,
    adjust_unit: f64,
    target_vol: f64,
}

impl PositionSizer {
    /// Build a sizer, rejecting inverted or non-positive bounds.
    pub fn new(cfg: &SizingConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            min_ratio: cfg.min_ratio,
            max_ratio: cfg.max_ratio,
            adjust_unit: cfg.adjust_unit,
            target_vol: cfg.target_vol,
        })
    }

    pub fn min_ratio(&self) -> f64 {
        self.min_ratio
    }

    pub fn max_ratio(&self) -> f64 {
        self.max_ratio
    }

    /// Kelly criterion with an asymmetric payoff.
    ///
    /// kelly = (p·(b+1) − 1) / b, clamped to [0, 1], where `b` is the
    /// reward/risk ratio. Probabilities below the breakeven 1/(b+1) size to 0.
    pub fn kelly_fraction(&self, prob: f64, reward_risk: f64) -> f64 {
        if reward_risk <= 0.0 {
            return 0.0;
        }
        let kelly = (prob * (reward_risk + 1.0) - 1.0) / reward_risk;
        kelly.clamp(0.0, 1.0)
    }

    /// Scale `balance` toward a constant-risk budget: target_vol / volatility,
    /// bounded to [0.5, 1.5]×.
    pub fn volatility_adjust_balance(&self, balance: f64, volatility: f64) -> f64 {
        let factor = (self.target_vol / (volatility + VOL_EPSILON)).clamp(VOL_ADJUST_MIN, VOL_ADJUST_MAX);
        balance * factor
    }

    /// Heuristic confidence gate in [0, 1].
    pub fn multi_factor_score(&self, prob: f64, money_flow_ratio: f64, volatility: f64) -> f64 {
        let score = 0.5 * prob
            + 0.3 * (money_flow_ratio / MONEY_FLOW_SCALE)
            + 0.2 * (REFERENCE_VOL / (volatility + VOL_EPSILON));
        score.clamp(0.0, 1.0)
    }

    /// Final unsigned target ratio for a signal probability.
    ///
    /// The blended ratio grows linearly from `min_ratio` to `max_ratio` as the
    /// probability goes from 0.5 to 1, then is attenuated by both the Kelly
    /// fraction and the multi-factor score. Rounded to 4 decimals.
    pub fn calculate_target_ratio(
        &self,
        prob: f64,
        money_flow_ratio: f64,
        volatility: f64,
        reward_risk: f64,
    ) -> f64 {
        let signal_strength = (2.0 * (prob - 0.5)).clamp(0.0, 1.0);
        if signal_strength == 0.0 {
            return 0.0;
        }
        let blended_ratio = self.min_ratio + signal_strength * (self.max_ratio - self.min_ratio);
        let kelly_weight = self.kelly_fraction(prob, reward_risk);
        let multi_factor = self.multi_factor_score(prob, money_flow_ratio, volatility);
        round_to(blended_ratio * kelly_weight * multi_factor, 4)
    }

    /// Quote-currency amount needed to move `current_value` to `target_ratio`
    /// of `balance`. Deltas smaller than `adjust_unit` are suppressed.
    pub fn calculate_adjust_amount(&self, balance: f64, current_value: f64, target_ratio: f64) -> f64 {
        let delta = balance * target_ratio - current_value;
        if delta.abs() < self.adjust_unit {
            0.0
        } else {
            round_to(delta, 2)
        }
    }
}
