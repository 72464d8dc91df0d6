//! Error types for the widget transport.

use thiserror::Error;

/// Errors that can occur when talking to the chat backend.
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status.
    #[error("HTTP {status}: {path}")]
    Status { status: u16, path: String },

    /// Base URL could not be used to build a request.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A server record is missing required fields.
    #[error("malformed record: {0}")]
    MalformedRecord(String),
}
