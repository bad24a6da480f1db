use thiserror::Error;

/// Common error types used across the application.
///
/// Per-attempt delivery results are not errors: they travel as
/// [`crate::types::Outcome`] values and are absorbed by the outcome recorder.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid delivery window: min_hour={min_hour}, max_hour={max_hour}")]
    InvalidWindow { min_hour: u32, max_hour: u32 },

    #[error("Cancelled while waiting for capacity")]
    Cancelled,

    #[error("A scheduling pass is already running")]
    PassInProgress,

    #[error("Storage error: {0}")]
    Storage(String),
}
