//! Error types for parley.

use thiserror::Error;

/// Common error type for parley.
#[derive(Error, Debug)]
pub enum ParleyError {
    /// I/O error.
    ///
    /// On a session stream this is a connection failure and ends that
    /// session only.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Authentication error.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Validation error for user input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<crate::auth::PasswordError> for ParleyError {
    fn from(e: crate::auth::PasswordError) -> Self {
        ParleyError::Auth(e.to_string())
    }
}

/// Result type alias for parley operations.
pub type Result<T> = std::result::Result<T, ParleyError>;
