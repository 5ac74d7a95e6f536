//! Decision engine and the signal plumbing that feeds it.

pub mod engine;
pub mod fusion;

pub use engine::{Action, BarInput, Decision, DecisionEngine, EngineState, Phase, Reason};
pub use fusion::{fuse_mean, fuse_weighted, ModelOutput, PairSmoother, SignalPair, SignalSmoother};
