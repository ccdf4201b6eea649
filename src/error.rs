//! Error types for the outreach pipelines.

use thiserror::Error;

/// Result type alias using the mailrun error type.
pub type Result<T> = std::result::Result<T, MailrunError>;

/// Main error type for the outreach pipelines.
///
/// Per-attempt failures (bad status codes, timeouts, transport errors) never
/// surface through this type to the caller; they live in the per-item audit
/// trail. Only configuration problems and explicit persistence I/O propagate
/// as hard errors.
#[derive(Error, Debug)]
pub enum MailrunError {
    /// Invalid configuration or input, rejected before any network call
    #[error("Validation error: {0}")]
    Validation(String),

    /// HTTP client error
    #[error("HTTP request failed: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error while persisting a run summary
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// General error from anyhow
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
