//! Core domain errors.

use thiserror::Error;

/// Core domain errors for InnChat.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Invalid lifecycle transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Invalid input (empty message, bad lead form field).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Same content was sent moments ago.
    #[error("Duplicate send suppressed, retry in {retry_in_ms} ms")]
    DuplicateSend { retry_in_ms: i64 },

    /// Input is not accepted in the current widget state.
    #[error("Input disabled while widget is {0}")]
    InputDisabled(String),
}
