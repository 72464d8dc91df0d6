//! Widget errors.

use thiserror::Error;

use innchat_core::CoreError;

/// Errors returned to callers of the widget handle.
///
/// Transport and storage failures never show up here; the widget contains
/// them (failed status, retry on next tick, in-memory fallback).
#[derive(Debug, Error)]
pub enum WidgetError {
    /// Rejected by the widget's own rules.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The widget task is gone (shut down or panicked).
    #[error("widget stopped")]
    Stopped,
}

/// Errors from durable identity storage.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Storage could not be read or written.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage contents are not what we wrote.
    #[error("storage format error: {0}")]
    Format(#[from] serde_json::Error),

    /// Storage is disabled or denied.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}
