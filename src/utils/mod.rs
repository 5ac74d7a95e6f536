//! Utility functions and types for the trading system.

pub mod error;
pub mod logging;

pub use error::Error;
pub use logging::{init_logging, init_test_logging};

/// Round `value` to `decimals` places (half away from zero).
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::round_to;

    #[test]
    fn rounds_to_requested_places() {
        assert_eq!(round_to(0.123456, 4), 0.1235);
        assert_eq!(round_to(-12.3467, 2), -12.35);
        assert_eq!(round_to(7.0, 2), 7.0);
    }
}
