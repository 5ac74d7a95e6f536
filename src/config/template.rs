//! Configuration template generation

use crate::config::Config;
use crate::utils::error::{Error, Result};
use std::fs;
use std::path::Path;

const COMMENTED_TEMPLATE: &str = r#"# probtrader configuration
# Every value below is the built-in default. Environment variables
# (THRESHOLD_LONG, TAKE_PROFIT, POSITION_MAX, ...) override the file.

version = "0.1.0"

[instrument]
# Exchange symbol of the traded contract
symbol = "SOL-USDT-SWAP"

# Account leverage (1.0 = no leverage)
leverage = 3.0

# Quantity step; orders are floored to a multiple of this
lot_size = 0.01

[strategy]
# Probability thresholds; long is evaluated first when both are exceeded
threshold_long = 0.55
threshold_short = 0.45

# Exit when the signed PnL fraction reaches +take_profit or -stop_loss
take_profit = 0.02
stop_loss = 0.01

# Bars to hold before rebalancing or reversing is allowed
min_hold_bars = 8

# Relative size change needed to rebalance, and the cap on one rebalance
add_threshold = 0.15
max_rebalance_ratio = 0.3

# Minimum order notional in quote currency
min_adjust_amount = 50.0

# Payoff ratio fed to the Kelly term
reward_risk = 2.5

[sizing]
# Bounds on the target exposure as a fraction of equity
min_ratio = 0.05
max_ratio = 0.3

# Minimum rebalance amount in quote currency
adjust_unit = 50.0

# Per-bar volatility targeted by the balance adjustment
target_vol = 0.015

[reward_risk]
# Samples needed before the estimate replaces default_rr
min_trades = 20
default_rr = 1.0

# Most recent trade returns kept
window = 100

# Re-estimate every N bars and feed the result to the engine
refresh_bars = 288
adaptive = false

[signal]
# Exponential smoothing of incoming probabilities
smoothing = false
smooth_alpha = 0.3

[signal.model_weights]
# lgbm = 0.6
# xgb = 0.4

[backtest]
initial_balance = 1000.0
fee_rate = 0.0005
"#;

/// Generate a default configuration file at the specified path
pub fn generate_config_template<P: AsRef<Path>>(path: P) -> Result<()> {
    let config = Config::default();
    config
        .save(path)
        .map_err(|e| Error::ConfigError(e.to_string()))
}

/// Generate a configuration file with comments explaining each field
pub fn generate_commented_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(path, COMMENTED_TEMPLATE)?;
    Ok(())
}
