//! This module defines the error types used by the `homeward-navigation` crate.

use thiserror::Error;

/// Error type for home-finding operations.
///
/// Motion and detection failures never show up here: the finder strategies turn
/// them into a `false` outcome plus a [`FailureReason`](crate::finder::FailureReason).
#[derive(Debug, Error)]
pub enum NavigationError {
    /// A go-home or set-home request is already in flight.
    #[error("a home-finding operation is already running")]
    Busy,
    /// The requested finder technology does not exist.
    #[error("unknown finder mode: {0}")]
    UnknownMode(String),
    /// The home record store rejected a load or save.
    #[error("home record store: {0}")]
    Store(String),
    /// Filesystem error from the JSON record store.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Malformed persisted record.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, NavigationError>;
