//! Error types shared by CROCUS crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CrocusError>;

/// Errors raised by the shared utilities
#[derive(Error, Debug)]
pub enum CrocusError {
    #[error("Invalid date '{value}': {reason}")]
    InvalidDate { value: String, reason: String },
}

impl CrocusError {
    /// Create an invalid date error
    pub fn invalid_date(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDate {
            value: value.into(),
            reason: reason.into(),
        }
    }
}
