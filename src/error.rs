//! Error types for phase-memory.

use thiserror::Error;

/// Result type alias using phase-memory's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during memory model operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A write was rejected by the safety validator
    #[error("Capacity exceeded ({requested_bytes} bytes, {requested_entries} entries): {reason}")]
    CapacityExceeded {
        requested_bytes: u64,
        requested_entries: usize,
        reason: String,
    },

    /// Durable store read or write failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Correlation strength outside [0, 1]
    #[error("Correlation strength {0} is outside [0, 1]")]
    InvalidStrength(f64),

    /// Caller supplied an argument the model cannot accept
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a capacity exceeded error.
    pub fn capacity_exceeded(
        requested_bytes: u64,
        requested_entries: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self::CapacityExceeded {
            requested_bytes,
            requested_entries,
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Whether the caller should treat this error as backpressure and retry later.
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}
