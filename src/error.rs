//! Error types for sevdesk-pacer.
//!
//! The rate limiter itself never fails; these errors come from loading
//! and validating configuration.

use thiserror::Error;

/// Main error type for sevdesk-pacer operations.
#[derive(Error, Debug)]
pub enum PacerError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for PacerError {
    fn from(err: ::config::ConfigError) -> Self {
        PacerError::Config(err.to_string())
    }
}

/// Result type alias for sevdesk-pacer operations.
pub type Result<T> = std::result::Result<T, PacerError>;
