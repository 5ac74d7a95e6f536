//! Error handling for the decision engine and its harness.

use thiserror::Error;

/// Main error type for the trading system
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors (invalid bounds, unreadable files)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Caller passed a value the engine cannot compute with (e.g. a non-positive price)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Data-related errors (e.g. missing or malformed bar data)
    #[error("Data error: {0}")]
    DataError(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    /// CSV read/write errors
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

/// Result type for the trading system
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand used by the engine's input guards.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Shorthand used by config validation.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::ConfigError(msg.into())
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error::Other(err.to_string())
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Error::Other(err)
    }
}

// Allow automatic conversion from anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let config_error = Error::ConfigError("min_ratio > max_ratio".to_string());
        assert_eq!(
            config_error.to_string(),
            "Configuration error: min_ratio > max_ratio"
        );

        let input_error = Error::invalid_input("price must be > 0");
        assert_eq!(input_error.to_string(), "Invalid input: price must be > 0");

        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let wrapped_io_error = Error::from(io_error);
        assert!(wrapped_io_error.to_string().contains("I/O error"));

        let str_error = Error::from("custom error");
        assert_eq!(str_error.to_string(), "Error: custom error");
    }

    #[test]
    fn test_anyhow_conversion() {
        let err: Error = anyhow::anyhow!("boom").into();
        assert_eq!(err.to_string(), "Error: boom");
    }
}
