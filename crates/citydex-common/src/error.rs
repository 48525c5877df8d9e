//! Error types for Citydex

use thiserror::Error;

/// Result type alias for Citydex operations
pub type Result<T> = std::result::Result<T, CitydexError>;

/// Main error type shared across the workspace
#[derive(Error, Debug)]
pub enum CitydexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record is not a JSON object: {0}")]
    NotAnObject(String),

    #[error("Reserved field: {0}")]
    ReservedField(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
