//! Signal fusion utilities.
//!
//! Several classifiers each emit a `[short, long]` probability pair per bar.
//! They are fused into one pair by plain or weighted averaging, and the
//! fused probabilities can be exponentially smoothed across bars.

use std::collections::BTreeMap;

use crate::utils::error::{Error, Result};

/// Probabilities emitted by one model for one bar.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOutput {
    pub name: String,
    pub short_prob: f64,
    pub long_prob: f64,
}

impl ModelOutput {
    pub fn new(name: &str, short_prob: f64, long_prob: f64) -> Self {
        Self { name: name.to_string(), short_prob, long_prob }
    }
}

/// Fused long/short probabilities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalPair {
    pub long_prob: f64,
    pub short_prob: f64,
}

/// Arithmetic mean of every model's output.
pub fn fuse_mean(outputs: &[ModelOutput]) -> Result<SignalPair> {
    if outputs.is_empty() {
        return Err(Error::invalid_input("no model outputs to fuse"));
    }
    let n = outputs.len() as f64;
    Ok(SignalPair {
        long_prob: outputs.iter().map(|o| o.long_prob).sum::<f64>() / n,
        short_prob: outputs.iter().map(|o| o.short_prob).sum::<f64>() / n,
    })
}

/// Confidence-weighted average.
///
/// Each output is scaled by its configured weight (1.0 when the model is not
/// listed) and the sum is divided by the total configured weight. An empty
/// weight map falls back to [`fuse_mean`].
pub fn fuse_weighted(outputs: &[ModelOutput], weights: &BTreeMap<String, f64>) -> Result<SignalPair> {
    if weights.is_empty() {
        return fuse_mean(outputs);
    }
    if outputs.is_empty() {
        return Err(Error::invalid_input("no model outputs to fuse"));
    }
    let total: f64 = weights.values().sum();
    if !(total.is_finite() && total > 0.0) {
        return Err(Error::invalid_input(format!("total model weight must be > 0, got {total}")));
    }
    let (mut long, mut short) = (0.0, 0.0);
    for o in outputs {
        let w = weights.get(&o.name).copied().unwrap_or(1.0);
        long += o.long_prob * w;
        short += o.short_prob * w;
    }
    Ok(SignalPair { long_prob: long / total, short_prob: short / total })
}

/// Exponential smoother: `alpha·new + (1 − alpha)·previous`.
#[derive(Debug, Clone)]
pub struct SignalSmoother {
    alpha: f64,
    smoothed: Option<f64>,
}

impl SignalSmoother {
    pub fn new(alpha: f64) -> Result<Self> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(Error::invalid_input(format!("smoothing alpha must be in (0, 1], got {alpha}")));
        }
        Ok(Self { alpha, smoothed: None })
    }

    /// Feed a new value; the first value passes through unchanged.
    pub fn smooth(&mut self, value: f64) -> f64 {
        let next = match self.smoothed {
            None => value,
            Some(prev) => self.alpha * value + (1.0 - self.alpha) * prev,
        };
        self.smoothed = Some(next);
        next
    }

    pub fn current(&self) -> Option<f64> {
        self.smoothed
    }

    pub fn reset(&mut self) {
        self.smoothed = None;
    }
}

/// Smooths both sides of a [`SignalPair`] independently.
#[derive(Debug, Clone)]
pub struct PairSmoother {
    long: SignalSmoother,
    short: SignalSmoother,
}

impl PairSmoother {
    pub fn new(alpha: f64) -> Result<Self> {
        Ok(Self { long: SignalSmoother::new(alpha)?, short: SignalSmoother::new(alpha)? })
    }

    pub fn smooth(&mut self, pair: SignalPair) -> SignalPair {
        SignalPair { long_prob: self.long.smooth(pair.long_prob), short_prob: self.short.smooth(pair.short_prob) }
    }
}
