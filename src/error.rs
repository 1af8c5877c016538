use thiserror::Error;

/// Failures of the tracking / persistence layer. These are the only errors
/// that reach callers of the prediction pipeline.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Database error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Tracked prediction not found: {0}")]
    NotFound(String),

    #[error("Unknown prediction status: {0}")]
    UnknownStatus(String),
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;
