//! Error types for the mesmer learning pipeline
//!
//! One typed error enum for the whole crate. Analysis failures are the one
//! kind that never escapes: the analysis service recovers them locally with
//! its heuristic fallback before any caller sees them.

use thiserror::Error;

/// Main error type for the mesmer engine
#[derive(Error, Debug)]
pub enum MesmerError {
    /// Operation referenced a session id absent from the store
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// Operation referenced a persona id absent from the store
    #[error("Unknown persona: {0}")]
    UnknownPersona(String),

    /// External analysis call failed or returned unparsable output.
    /// Recovered locally via the heuristic fallback, never surfaced
    /// to callers of end-session.
    #[error("Analysis unavailable: {0}")]
    AnalysisUnavailable(String),

    /// Completion stream ended abnormally. Partial text already
    /// produced is preserved, not discarded.
    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    /// Persistent store operation failed
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    /// Stored value could not be decoded back into a domain type
    #[error("Corrupt stored value: {0}")]
    CorruptRecord(String),

    /// Provider returned a non-success response
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// HTTP client errors
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, MesmerError>;
