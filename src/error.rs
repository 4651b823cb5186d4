//! Error types for streamshot.

use thiserror::Error;

/// Result type alias for streamshot operations.
pub type Result<T> = std::result::Result<T, SingleShotError>;

/// Errors that can occur while opening, invoking, or closing a single-shot
/// inference handle.
///
/// Callers should treat [`TimedOut`](SingleShotError::TimedOut) as retryable
/// (the next invoke self-heals), `InvalidParameter` and `NotSupported` as
/// non-retryable configuration errors, and `Pipe`/`Unknown` as fatal to the
/// handle (close and reopen).
#[derive(Debug, Error)]
pub enum SingleShotError {
    /// Malformed argument, shape mismatch, zero timeout, or use of a dead
    /// handle.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The selected framework or hardware is unavailable.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Graph construction or frame push failed inside the streaming engine.
    #[error("Pipe error: {0}")]
    Pipe(String),

    /// No output frame arrived within the configured timeout. The handle
    /// stays usable; the next invoke drains the stale result.
    #[error("Timed out waiting for an output frame")]
    TimedOut,

    /// Unclassified retrieval failure.
    #[error("Unknown error: {0}")]
    Unknown(String),

    /// YAML parsing error.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SingleShotError {
    /// Create an invalid-parameter error.
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// Create a not-supported error.
    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }

    /// Create a pipe error.
    pub fn pipe(msg: impl Into<String>) -> Self {
        Self::Pipe(msg.into())
    }

    /// Create an unknown error.
    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::Unknown(msg.into())
    }
}
