//! Configuration module for the decision engine, sizer and backtest harness

mod template;

use crate::utils::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;

pub use template::{generate_commented_config_template, generate_config_template};

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Configuration file version
    pub version: String,

    /// Instrument being traded
    pub instrument: InstrumentConfig,

    /// Decision engine thresholds and risk limits
    pub strategy: StrategyConfig,

    /// Position sizer bounds
    pub sizing: SizingConfig,

    /// Rolling reward/risk estimation
    #[serde(default)]
    pub reward_risk: RewardRiskConfig,

    /// Signal fusion and smoothing
    #[serde(default)]
    pub signal: SignalConfig,

    /// Simulated account used by the backtester
    #[serde(default)]
    pub backtest: BacktestConfig,
}

/// Instrument configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Exchange symbol, e.g. SOL-USDT-SWAP
    pub symbol: String,

    /// Account leverage (1.0 = no leverage)
    pub leverage: f64,

    /// Minimum tradeable quantity step in contract units
    pub lot_size: f64,
}

/// Decision engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Long probability must exceed this to produce a long target
    pub threshold_long: f64,

    /// Short probability must exceed this to produce a short target
    pub threshold_short: f64,

    /// Close when signed PnL fraction reaches this value
    pub take_profit: f64,

    /// Close when signed PnL fraction falls to minus this value
    pub stop_loss: f64,

    /// Bars a position must be held before it may be rebalanced or reversed
    #[serde(default = "default_min_hold_bars")]
    pub min_hold_bars: u32,

    /// Minimum relative size change that triggers a rebalance
    #[serde(default = "default_add_threshold")]
    pub add_threshold: f64,

    /// Largest single rebalance as a fraction of the current position
    #[serde(default = "default_max_rebalance_ratio")]
    pub max_rebalance_ratio: f64,

    /// Minimum order notional in quote currency
    #[serde(default = "default_min_adjust_amount")]
    pub min_adjust_amount: f64,

    /// Payoff ratio used by the Kelly term until an estimate is available
    #[serde(default = "default_reward_risk")]
    pub reward_risk: f64,
}

/// Position sizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingConfig {
    /// Smallest non-zero target ratio
    pub min_ratio: f64,

    /// Largest target ratio
    pub max_ratio: f64,

    /// Minimum rebalance amount in quote currency
    pub adjust_unit: f64,

    /// Per-bar volatility the balance adjustment targets
    pub target_vol: f64,
}

/// Reward/risk estimator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardRiskConfig {
    /// Samples required before the estimate departs from `default_rr`
    pub min_trades: usize,

    /// Value returned while the window is too small or one-sided
    pub default_rr: f64,

    /// Maximum number of recent trade returns kept
    pub window: usize,

    /// Re-estimate every N bars during a backtest
    pub refresh_bars: usize,

    /// Feed the estimate back into the engine during a backtest
    pub adaptive: bool,
}

/// Signal fusion configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Smooth incoming probabilities before they reach the engine
    pub smoothing: bool,

    /// Exponential smoothing factor in (0, 1]
    pub smooth_alpha: f64,

    /// Per-model fusion weights, keyed by model name
    #[serde(default)]
    pub model_weights: BTreeMap<String, f64>,
}

/// Backtest configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Starting account balance in quote currency
    pub initial_balance: f64,

    /// Taker fee as a fraction of notional
    pub fee_rate: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            instrument: InstrumentConfig::default(),
            strategy: StrategyConfig::default(),
            sizing: SizingConfig::default(),
            reward_risk: RewardRiskConfig::default(),
            signal: SignalConfig::default(),
            backtest: BacktestConfig::default(),
        }
    }
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self { symbol: "SOL-USDT-SWAP".to_string(), leverage: 3.0, lot_size: 0.01 }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            threshold_long: 0.55,
            threshold_short: 0.45,
            take_profit: 0.02,
            stop_loss: 0.01,
            min_hold_bars: default_min_hold_bars(),
            add_threshold: default_add_threshold(),
            max_rebalance_ratio: default_max_rebalance_ratio(),
            min_adjust_amount: default_min_adjust_amount(),
            reward_risk: default_reward_risk(),
        }
    }
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self { min_ratio: 0.05, max_ratio: 0.3, adjust_unit: 50.0, target_vol: 0.015 }
    }
}

impl Default for RewardRiskConfig {
    fn default() -> Self {
        Self { min_trades: 20, default_rr: 1.0, window: 100, refresh_bars: 288, adaptive: false }
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self { smoothing: false, smooth_alpha: 0.3, model_weights: BTreeMap::new() }
    }
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self { initial_balance: 1000.0, fee_rate: 0.0005 }
    }
}

// --------- Helper default functions for serde ---------
fn default_min_hold_bars() -> u32 {
    8
}
fn default_add_threshold() -> f64 {
    0.15
}
fn default_max_rebalance_ratio() -> f64 {
    0.3
}
fn default_min_adjust_amount() -> f64 {
    50.0
}
fn default_reward_risk() -> f64 {
    2.5
}

impl StrategyConfig {
    /// Validate engine thresholds. Called by `DecisionEngine::new`.
    pub fn validate(&self) -> Result<()> {
        for (name, v) in [("threshold_long", self.threshold_long), ("threshold_short", self.threshold_short)] {
            if !(v > 0.0 && v < 1.0) {
                return Err(Error::config(format!("{name} must be in (0, 1), got {v}")));
            }
        }
        for (name, v) in [
            ("take_profit", self.take_profit),
            ("stop_loss", self.stop_loss),
            ("add_threshold", self.add_threshold),
            ("max_rebalance_ratio", self.max_rebalance_ratio),
            ("reward_risk", self.reward_risk),
        ] {
            if !(v.is_finite() && v > 0.0) {
                return Err(Error::config(format!("{name} must be > 0, got {v}")));
            }
        }
        if !(self.min_adjust_amount.is_finite() && self.min_adjust_amount >= 0.0) {
            return Err(Error::config(format!(
                "min_adjust_amount must be >= 0, got {}",
                self.min_adjust_amount
            )));
        }
        Ok(())
    }
}

impl SizingConfig {
    /// Validate sizer bounds. Called by `PositionSizer::new`.
    pub fn validate(&self) -> Result<()> {
        if !(self.min_ratio.is_finite() && self.min_ratio >= 0.0) {
            return Err(Error::config(format!("min_ratio must be >= 0, got {}", self.min_ratio)));
        }
        if !(self.max_ratio.is_finite() && self.max_ratio > 0.0) {
            return Err(Error::config(format!("max_ratio must be > 0, got {}", self.max_ratio)));
        }
        if self.min_ratio > self.max_ratio {
            return Err(Error::config(format!(
                "min_ratio ({}) cannot exceed max_ratio ({})",
                self.min_ratio, self.max_ratio
            )));
        }
        if !(self.adjust_unit.is_finite() && self.adjust_unit >= 0.0) {
            return Err(Error::config(format!("adjust_unit must be >= 0, got {}", self.adjust_unit)));
        }
        if !(self.target_vol.is_finite() && self.target_vol > 0.0) {
            return Err(Error::config(format!("target_vol must be > 0, got {}", self.target_vol)));
        }
        Ok(())
    }
}

impl RewardRiskConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window == 0 {
            return Err(Error::config("reward_risk.window must be > 0"));
        }
        if !(self.default_rr.is_finite() && self.default_rr > 0.0) {
            return Err(Error::config(format!("default_rr must be > 0, got {}", self.default_rr)));
        }
        if self.adaptive && self.refresh_bars == 0 {
            return Err(Error::config("reward_risk.refresh_bars must be > 0 when adaptive"));
        }
        Ok(())
    }
}

impl Config {
    /// Serialize default config to TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    /// Load configuration from a specific file path
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::ConfigError(format!("Failed to read config file {:?}: {}", path.as_ref(), e))
        })?;
        let mut cfg: Self = toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config file: {}", e)))?;
        cfg.merge_env()?;
        Ok(cfg)
    }

    /// Save the configuration to a file
    pub fn save<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create directory {:?}: {}", parent, e))
            })?;
        }
        std::fs::write(path, content).map_err(|e| {
            Error::ConfigError(format!("Failed to write config file {:?}: {}", path, e))
        })?;
        Ok(())
    }

    /// Validate the configuration for required fields and reasonable values
    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(Error::config("Config version must be set (e.g., '0.1.0')"));
        }
        if self.instrument.symbol.trim().is_empty() {
            return Err(Error::config("instrument.symbol must be set"));
        }
        if !(self.instrument.leverage.is_finite() && self.instrument.leverage >= 1.0) {
            return Err(Error::config("instrument.leverage must be >= 1"));
        }
        if !(self.instrument.lot_size.is_finite() && self.instrument.lot_size > 0.0) {
            return Err(Error::config("instrument.lot_size must be > 0"));
        }
        self.strategy.validate()?;
        self.sizing.validate()?;
        self.reward_risk.validate()?;
        if !(self.signal.smooth_alpha > 0.0 && self.signal.smooth_alpha <= 1.0) {
            return Err(Error::config("signal.smooth_alpha must be in (0, 1]"));
        }
        if self.signal.model_weights.values().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(Error::config("signal.model_weights must be finite and >= 0"));
        }
        if !(self.backtest.initial_balance.is_finite() && self.backtest.initial_balance > 0.0) {
            return Err(Error::config("backtest.initial_balance must be > 0"));
        }
        if !(self.backtest.fee_rate.is_finite() && (0.0..1.0).contains(&self.backtest.fee_rate)) {
            return Err(Error::config("backtest.fee_rate must be in [0, 1)"));
        }
        Ok(())
    }

    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        Self::load_from(std::path::Path::new("config.toml"), dirs::config_dir())
    }

    /// `local` first, then `<user_dir>/probtrader/config.toml`, then defaults.
    /// A file that exists but fails to parse is an error, never skipped.
    fn load_from(local: &std::path::Path, user_dir: Option<std::path::PathBuf>) -> Result<Self> {
        if local.exists() {
            return Self::from_file(local);
        }

        if let Some(mut path) = user_dir {
            path.push("probtrader");
            path.push("config.toml");
            if path.exists() {
                return Self::from_file(path);
            }
        }

        let mut config = Self::default();
        config.merge_env()?;
        Ok(config)
    }

    /// Merge environment variables (and a `.env` file, when present) into the configuration
    pub fn merge_env(&mut self) -> Result<()> {
        dotenv::dotenv().ok();

        if let Ok(symbol) = env::var("SYMBOL") {
            self.instrument.symbol = symbol;
        }
        merge_f64("LEVERAGE", &mut self.instrument.leverage)?;
        merge_f64("LOT_SIZE", &mut self.instrument.lot_size)?;

        merge_f64("THRESHOLD_LONG", &mut self.strategy.threshold_long)?;
        merge_f64("THRESHOLD_SHORT", &mut self.strategy.threshold_short)?;
        merge_f64("TAKE_PROFIT", &mut self.strategy.take_profit)?;
        merge_f64("STOP_LOSS", &mut self.strategy.stop_loss)?;
        merge_f64("MIN_ADJUST_AMOUNT", &mut self.strategy.min_adjust_amount)?;
        merge_f64("KELLY_REWARD_RISK", &mut self.strategy.reward_risk)?;
        if let Ok(raw) = env::var("MIN_HOLD_BARS") {
            self.strategy.min_hold_bars = raw
                .trim()
                .parse()
                .map_err(|e| Error::config(format!("MIN_HOLD_BARS={raw:?}: {e}")))?;
        }

        merge_f64("POSITION_MIN", &mut self.sizing.min_ratio)?;
        merge_f64("POSITION_MAX", &mut self.sizing.max_ratio)?;
        merge_f64("ADJUST_UNIT", &mut self.sizing.adjust_unit)?;
        merge_f64("TARGET_VOL", &mut self.sizing.target_vol)?;

        merge_f64("SMOOTH_ALPHA", &mut self.signal.smooth_alpha)?;
        if let Ok(raw) = env::var("MODEL_WEIGHTS") {
            self.signal.model_weights = parse_weights(&raw)?;
        }

        merge_f64("INITIAL_BALANCE", &mut self.backtest.initial_balance)?;
        merge_f64("FEE_RATE", &mut self.backtest.fee_rate)?;

        Ok(())
    }
}

fn merge_f64(key: &str, slot: &mut f64) -> Result<()> {
    if let Ok(raw) = env::var(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| Error::config(format!("{key}={raw:?}: {e}")))?;
    }
    Ok(())
}

/// Parse `name:weight,name:weight` into a weight map.
pub fn parse_weights(raw: &str) -> Result<BTreeMap<String, f64>> {
    let mut out = BTreeMap::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, weight) = item
            .split_once(':')
            .ok_or_else(|| Error::config(format!("model weight {item:?} is not name:weight")))?;
        let weight: f64 = weight
            .trim()
            .parse()
            .map_err(|e| Error::config(format!("model weight {item:?}: {e}")))?;
        out.insert(name.trim().to_string(), weight);
    }
    Ok(out)
}
