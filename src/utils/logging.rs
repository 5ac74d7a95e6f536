//! Logging setup for the engine, the harness and the CLI.
//!
//! Lines look like `2026-01-05T09:30:00.125 INFO  backtest: message`. The
//! module column drops the crate prefix so decisions, fills and reconciles
//! line up by subsystem.

use chrono::Local;
use env_logger::{Builder, Env, Target};
use log::{info, LevelFilter};
use std::io::Write;

const CRATE_PREFIX: &str = "probtrader::";

/// Subsystem label for a log target: `probtrader::backtest::optimizer` -> `backtest::optimizer`.
fn module_label(target: &str) -> &str {
    target.strip_prefix(CRATE_PREFIX).unwrap_or(target)
}

/// Initialize the logging system. `PROBTRADER_LOG` overrides `level`.
pub fn init_logging(level: &str) {
    let env = Env::default()
        .filter_or("PROBTRADER_LOG", level)
        .write_style_or("PROBTRADER_LOG_STYLE", "auto");

    Builder::from_env(env)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} {}: {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                buf.default_styled_level(record.level()),
                module_label(record.target()),
                record.args()
            )
        })
        .target(Target::Stderr)
        .try_init()
        .ok();

    info!("logging at {level} (override with PROBTRADER_LOG)");
}

/// Debug-level capture for tests; repeated calls are no-ops.
pub fn init_test_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(LevelFilter::Debug)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::debug;

    #[test]
    fn test_module_label_strips_crate_prefix() {
        assert_eq!(module_label("probtrader::strategy::engine"), "strategy::engine");
        assert_eq!(module_label("probtrader"), "probtrader");
        assert_eq!(module_label("rayon_core"), "rayon_core");
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging("debug");
        init_logging("info");
        debug!("second init must not panic");
    }

    #[test]
    fn test_test_logging() {
        init_test_logging();
        debug!("visible with --nocapture");
    }
}
