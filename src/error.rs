//! Error types for the Reelgate service.

use thiserror::Error;

/// Main error type for Reelgate operations.
#[derive(Error, Debug)]
pub enum ReelgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for ReelgateError {
    fn from(err: config::ConfigError) -> Self {
        ReelgateError::Config(err.to_string())
    }
}

/// Result type alias for Reelgate operations.
pub type Result<T> = std::result::Result<T, ReelgateError>;

/// A rejected rate limit configuration update.
///
/// Carries every bound violation found, so administrators can fix them all
/// in one round trip.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid rate limit configuration: {}", violations.join("; "))]
pub struct ValidationError {
    /// Human-readable violations, one per offending field
    pub violations: Vec<String>,
}

impl ValidationError {
    pub fn new(violations: Vec<String>) -> Self {
        Self { violations }
    }

    pub fn single(violation: impl Into<String>) -> Self {
        Self {
            violations: vec![violation.into()],
        }
    }
}
