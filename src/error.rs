//! Error types for ratewindow.

use thiserror::Error;

/// Main error type for rate counter operations.
#[derive(Error, Debug)]
pub enum RateWindowError {
    /// Invalid counter or limiter configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The shared counter cache failed or is unreachable
    #[error("Cache error: {0}")]
    Cache(String),
}

impl From<::config::ConfigError> for RateWindowError {
    fn from(err: ::config::ConfigError) -> Self {
        RateWindowError::Config(err.to_string())
    }
}

/// Result type alias for ratewindow operations.
pub type Result<T> = std::result::Result<T, RateWindowError>;
