//! Error types shared across the journeys crates

use thiserror::Error;

/// Result type alias for journeys operations
pub type Result<T> = std::result::Result<T, JourneysError>;

/// Main error type for journeys
#[derive(Error, Debug)]
pub enum JourneysError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bucket error: {0}")]
    Bucket(#[from] crate::bucket::BucketError),

    #[error("Invalid timestamp '{value}': {reason}")]
    InvalidTimestamp { value: String, reason: String },

    #[error("Invalid field '{field}': {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl JourneysError {
    pub fn invalid_field(field: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            value: value.into(),
        }
    }
}
